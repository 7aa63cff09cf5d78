//! Application error type for the rent payment service
//!
//! Every layer keeps its own error enum; this module maps them onto a single
//! HTTP-facing error with a status code, a stable error code for clients and a
//! message that is safe to show to a user.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::payments::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "DUPLICATE_PENDING_PAYMENT")]
    DuplicatePendingPayment,
    #[serde(rename = "PAYMENT_ALREADY_CAPTURED")]
    PaymentAlreadyCaptured,
    #[serde(rename = "PAYMENT_ALREADY_FAILED")]
    PaymentAlreadyFailed,
    #[serde(rename = "PAYMENT_NOT_PENDING")]
    PaymentNotPending,
    #[serde(rename = "STALE_PAYMENT_STATE")]
    StalePaymentState,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "PAYMENT_REJECTED")]
    PaymentRejected,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "DATA_INTEGRITY_ERROR")]
    DataIntegrityError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No payment for the given id or gateway order id
    PaymentNotFound { reference: String },
    /// Another payment for the same tenant and room is still pending
    DuplicatePending { tenant_id: i64, room_id: i64 },
    /// Captured funds cannot be failed
    AlreadyCaptured { payment_id: String },
    /// A failed payment cannot later be captured
    AlreadyFailed { payment_id: String },
    /// Operation requires a pending payment
    NotPending { payment_id: String, status: String },
    /// A concurrent transition won the race
    StaleState { payment_id: String },
    /// Checkout signature did not verify
    InvalidSignature,
    /// Webhook signature did not verify
    InvalidWebhookSignature,
    /// Gateway refused the order (bad amount, currency, etc.)
    GatewayRejected { message: String },
}

/// Infrastructure-level errors (database, configuration, broken invariants)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
    /// Should-never-happen state, e.g. a paid gateway order with no capture
    DataIntegrity { message: String },
}

/// External service errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::DuplicatePending { .. } => 409,
                DomainError::AlreadyCaptured { .. } => 409,
                DomainError::AlreadyFailed { .. } => 409,
                DomainError::NotPending { .. } => 409,
                DomainError::StaleState { .. } => 409,
                DomainError::InvalidSignature => 400,
                DomainError::InvalidWebhookSignature => 401,
                DomainError::GatewayRejected { .. } => 422,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => {
                    if *is_retryable {
                        503
                    } else {
                        500
                    }
                }
                InfrastructureError::Configuration { .. } => 500,
                InfrastructureError::DataIntegrity { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => {
                    if *is_retryable {
                        503
                    } else {
                        502
                    }
                }
                ExternalError::Timeout { .. } => 503,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::DuplicatePending { .. } => ErrorCode::DuplicatePendingPayment,
                DomainError::AlreadyCaptured { .. } => ErrorCode::PaymentAlreadyCaptured,
                DomainError::AlreadyFailed { .. } => ErrorCode::PaymentAlreadyFailed,
                DomainError::NotPending { .. } => ErrorCode::PaymentNotPending,
                DomainError::StaleState { .. } => ErrorCode::StalePaymentState,
                DomainError::InvalidSignature | DomainError::InvalidWebhookSignature => {
                    ErrorCode::InvalidSignature
                }
                DomainError::GatewayRejected { .. } => ErrorCode::PaymentRejected,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::DataIntegrity { .. } => ErrorCode::DataIntegrityError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { reference } => {
                    format!("Payment '{}' not found", reference)
                }
                DomainError::DuplicatePending { tenant_id, room_id } => format!(
                    "A payment for tenant {} and room {} is already pending",
                    tenant_id, room_id
                ),
                DomainError::AlreadyCaptured { payment_id } => {
                    format!("Payment '{}' has already been captured", payment_id)
                }
                DomainError::AlreadyFailed { payment_id } => {
                    format!("Payment '{}' has already failed", payment_id)
                }
                DomainError::NotPending { payment_id, status } => {
                    format!("Payment '{}' is {} and can no longer change", payment_id, status)
                }
                DomainError::StaleState { payment_id } => format!(
                    "Payment '{}' was updated concurrently. Please reload it",
                    payment_id
                ),
                DomainError::InvalidSignature | DomainError::InvalidWebhookSignature => {
                    "Signature verification failed".to_string()
                }
                DomainError::GatewayRejected { message } => {
                    format!("Payment gateway rejected the request: {}", message)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::DataIntegrity { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let kind = match err.kind {
            DatabaseErrorKind::NotFound { id, .. } => {
                AppErrorKind::Domain(DomainError::PaymentNotFound { reference: id })
            }
            DatabaseErrorKind::StaleState { id, .. } => {
                AppErrorKind::Domain(DomainError::StaleState { payment_id: id })
            }
            DatabaseErrorKind::ConnectionError { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                })
            }
            other => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: DatabaseError::new(other).to_string(),
                is_retryable: false,
            }),
        };
        AppError::new(kind)
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let kind = match err {
            GatewayError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            GatewayError::GatewayRejected { message, .. } => {
                AppErrorKind::Domain(DomainError::GatewayRejected { message })
            }
            GatewayError::Timeout { timeout_secs } => AppErrorKind::External(ExternalError::Timeout {
                service: "Payment gateway".to_string(),
                timeout_secs,
            }),
            GatewayError::OrderNotFound { order_id } => {
                AppErrorKind::Infrastructure(InfrastructureError::DataIntegrity {
                    message: format!("gateway has no order {}", order_id),
                })
            }
            other => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "razorpay".to_string(),
                is_retryable: other.is_retryable(),
                message: other.to_string(),
            }),
        };
        AppError::new(kind)
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_pending_is_conflict() {
        let error = AppError::domain(DomainError::DuplicatePending {
            tenant_id: 7,
            room_id: 3,
        });

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::DuplicatePendingPayment);
        assert!(error.user_message().contains("already pending"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn signature_errors_do_not_say_what_mismatched() {
        let checkout = AppError::domain(DomainError::InvalidSignature);
        let webhook = AppError::domain(DomainError::InvalidWebhookSignature);

        assert_eq!(checkout.status_code(), 400);
        assert_eq!(webhook.status_code(), 401);
        assert_eq!(checkout.user_message(), webhook.user_message());
        assert_eq!(checkout.error_code(), ErrorCode::InvalidSignature);
    }

    #[test]
    fn retryable_database_error_is_service_unavailable() {
        let error: AppError = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut).into();
        assert_eq!(error.status_code(), 503);
        assert!(error.is_retryable());
        assert_eq!(error.error_code(), ErrorCode::DatabaseError);
    }

    #[test]
    fn gateway_errors_map_to_expected_statuses() {
        let unavailable: AppError = GatewayError::GatewayUnavailable {
            message: "connection reset".to_string(),
        }
        .into();
        assert_eq!(unavailable.status_code(), 503);
        assert!(unavailable.is_retryable());

        let rejected: AppError = GatewayError::GatewayRejected {
            message: "amount too small".to_string(),
            gateway_code: Some("BAD_REQUEST_ERROR".to_string()),
        }
        .into();
        assert_eq!(rejected.status_code(), 422);
        assert_eq!(rejected.error_code(), ErrorCode::PaymentRejected);

        let timeout: AppError = GatewayError::Timeout { timeout_secs: 5 }.into();
        assert_eq!(timeout.status_code(), 503);
        assert_eq!(timeout.error_code(), ErrorCode::ExternalServiceTimeout);
    }

    #[test]
    fn error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::DuplicatePendingPayment).unwrap();
        assert_eq!(json, "\"DUPLICATE_PENDING_PAYMENT\"");
    }
}
