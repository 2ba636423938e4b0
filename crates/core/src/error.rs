use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("payment provider error (status {status:?}): {message}")]
    PaymentProvider { status: Option<u16>, message: String },

    #[error("payment not completed: {0}")]
    PaymentNotCompleted(String),

    #[error("email provider error (status {status:?}): {message}")]
    Email { status: Option<u16>, message: String },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid or expired link")]
    InvalidLink,
}

impl CheckoutError {
    /// Network failures, timeouts and 5xx answers from a collaborator.
    /// 4xx answers are the caller's fault and are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            CheckoutError::PaymentProvider { status, .. } | CheckoutError::Email { status, .. } => {
                status.map_or(true, |code| code >= 500)
            }
            _ => false,
        }
    }

    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        CheckoutError::PaymentProvider {
            status,
            message: message.into(),
        }
    }
}

/// Field names only; the rejected values stay out of the message.
pub fn invalid_fields(errors: &validator::ValidationErrors) -> String {
    let mut fields: Vec<&str> = errors.errors().keys().copied().collect();
    fields.sort_unstable();
    format!("invalid {}", fields.join(", "))
}

impl From<validator::ValidationErrors> for CheckoutError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CheckoutError::Validation(invalid_fields(&errors))
    }
}

pub type CheckoutResult<T> = Result<T, CheckoutError>;
