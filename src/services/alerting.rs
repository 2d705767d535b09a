use crate::database::alert_repository::{AlertRecord, AlertStore, NewAlert};
use crate::database::error::DatabaseError;
use crate::error::{AppError, AppErrorKind, DomainError};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum RaiseOutcome {
    Created(AlertRecord),
    /// An unresolved alert with the same type and subject already exists
    Deduplicated,
}

impl RaiseOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, RaiseOutcome::Created(_))
    }
}

/// Raises, lists and resolves operational alerts
#[derive(Clone)]
pub struct AlertService {
    store: Arc<dyn AlertStore>,
}

impl AlertService {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    pub async fn raise(&self, alert: NewAlert) -> Result<RaiseOutcome, DatabaseError> {
        let alert_type = alert.alert_type;
        let severity = alert.severity;
        let subject = alert.subject_key.clone().unwrap_or_default();

        match self.store.insert_if_absent(alert).await? {
            Some(record) => {
                if record.requires_manual_action {
                    error!(
                        alert_id = %record.id,
                        alert_type = %alert_type,
                        severity = severity.as_str(),
                        subject = %subject,
                        "🚨 ALERT (manual action required): {}", record.message
                    );
                } else {
                    warn!(
                        alert_id = %record.id,
                        alert_type = %alert_type,
                        severity = severity.as_str(),
                        subject = %subject,
                        "🚨 ALERT: {}", record.message
                    );
                }
                Ok(RaiseOutcome::Created(record))
            }
            None => {
                info!(
                    alert_type = %alert_type,
                    subject = %subject,
                    "alert suppressed, unresolved duplicate exists"
                );
                Ok(RaiseOutcome::Deduplicated)
            }
        }
    }

    /// Raises an alert from a path that must not fail because alerting did
    pub async fn raise_logged(&self, alert: NewAlert) -> Option<RaiseOutcome> {
        let message = alert.message.clone();
        match self.raise(alert).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, alert_message = %message, "failed to persist alert");
                None
            }
        }
    }

    pub async fn list(&self, unresolved_only: bool, limit: i64) -> Result<Vec<AlertRecord>, AppError> {
        Ok(self.store.list(unresolved_only, limit).await?)
    }

    pub async fn resolve(&self, id: Uuid) -> Result<AlertRecord, AppError> {
        let record = self.store.resolve(id).await?.ok_or_else(|| {
            AppError::new(AppErrorKind::Domain(DomainError::AlertNotFound {
                alert_id: id.to_string(),
            }))
        })?;
        info!(alert_id = %id, "alert resolved");
        Ok(record)
    }
}
