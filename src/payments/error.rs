use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Gateway unavailable: {message}")]
    GatewayUnavailable { message: String },

    #[error("Gateway rejected request: {message}")]
    GatewayRejected {
        message: String,
        gateway_code: Option<String>,
    },

    #[error("Gateway has no order {order_id}")]
    OrderNotFound { order_id: String },

    #[error("Gateway timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Invalid gateway response: {message}")]
    InvalidResponse { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ValidationError { .. } => false,
            GatewayError::GatewayUnavailable { .. } => true,
            GatewayError::GatewayRejected { .. } => false,
            GatewayError::OrderNotFound { .. } => false,
            GatewayError::Timeout { .. } => true,
            GatewayError::InvalidResponse { .. } => false,
        }
    }
}
