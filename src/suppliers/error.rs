use thiserror::Error;

pub type SupplierResult<T> = Result<T, SupplierError>;

#[derive(Debug, Clone, Error)]
pub enum SupplierError {
    #[error("supplier {supplier} rejected the booking: {message}")]
    Rejected { supplier: String, message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("supplier {supplier} timed out after {timeout_secs}s")]
    Timeout { supplier: String, timeout_secs: u64 },

    #[error("invalid supplier response: {message}")]
    InvalidResponse { message: String },

    #[error("no supplier configured for {booking_type}")]
    NotConfigured { booking_type: String },
}

impl SupplierError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SupplierError::Network { .. } | SupplierError::Timeout { .. }
        )
    }
}
