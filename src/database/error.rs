use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    ConnectionError,
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: String },
    QueryError,
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{}", describe(.kind, .detail))]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub detail: Option<String>,
}

fn describe(kind: &DatabaseErrorKind, detail: &Option<String>) -> String {
    let base = match kind {
        DatabaseErrorKind::ConnectionError => "database connection error".to_string(),
        DatabaseErrorKind::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
        DatabaseErrorKind::UniqueViolation { constraint } => {
            format!("unique constraint '{}' violated", constraint)
        }
        DatabaseErrorKind::QueryError => "query failed".to_string(),
        DatabaseErrorKind::Unknown { message } => message.clone(),
    };
    match detail {
        Some(detail) => format!("{}: {}", base, detail),
        None => base,
    }
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        })
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            }),
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => {
                Self::new(DatabaseErrorKind::ConnectionError).with_detail(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                // 23505 = unique_violation
                if db_err.code().as_deref() == Some("23505") {
                    Self::new(DatabaseErrorKind::UniqueViolation {
                        constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                    })
                } else {
                    Self::new(DatabaseErrorKind::QueryError).with_detail(db_err.message())
                }
            }
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: err.to_string(),
            }),
        }
    }

    /// Connection hiccups are worth retrying; constraint and query errors are not
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ConnectionError)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match &err.kind {
            DatabaseErrorKind::NotFound { id, .. } if !id.is_empty() => {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    transaction_id: id.clone(),
                }))
            }
            _ => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            })),
        }
    }
}
