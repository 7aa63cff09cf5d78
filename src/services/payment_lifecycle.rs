//! Payment lifecycle state machine
//!
//! A payment is created `Pending` once the gateway has confirmed the order, and
//! moves exactly once to `Captured` or `Failed`. Every status change goes through
//! the store's compare-and-swap, so redelivered webhooks, concurrent verify calls
//! and administrative cancellation all settle on a single terminal state.

use crate::config::GatewayConfig;
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::payment_repository::{
    NewPayment, Payment, PaymentRecordStore, PaymentStatus, TransitionFields,
    GATEWAY_ORDER_ID_CONSTRAINT, ONE_PENDING_PER_OBLIGATION,
};
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError, ValidationError};
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{CreateOrderRequest, OrderNotes, OrderSnapshot};
use crate::services::notification::{NotificationType, PaymentNotifier};
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type LifecycleResult<T> = Result<T, PaymentLifecycleError>;

#[derive(Debug, Error)]
pub enum PaymentLifecycleError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payment not found: {0}")]
    NotFound(String),

    #[error("A pending payment already exists for tenant {tenant_id} room {room_id}")]
    DuplicatePending { tenant_id: i64, room_id: i64 },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Payment {payment_id} is already captured")]
    AlreadyTerminalCaptured { payment_id: Uuid },

    #[error("Payment {payment_id} has already failed")]
    AlreadyTerminalFailed { payment_id: Uuid },

    #[error("Payment {payment_id} is {status}, not pending")]
    AlreadyTerminal {
        payment_id: Uuid,
        status: PaymentStatus,
    },

    #[error("Payment {payment_id} changed concurrently")]
    StaleState { payment_id: Uuid },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Data integrity alarm: {0}")]
    DataIntegrity(String),
}

impl PaymentLifecycleError {
    /// Transient infrastructure failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentLifecycleError::Gateway(e) => e.is_retryable(),
            PaymentLifecycleError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<PaymentLifecycleError> for AppError {
    fn from(err: PaymentLifecycleError) -> Self {
        match err {
            PaymentLifecycleError::Validation(reason) => {
                AppError::validation(ValidationError::InvalidField {
                    field: "request".to_string(),
                    reason,
                })
            }
            PaymentLifecycleError::NotFound(reference) => {
                AppError::domain(DomainError::PaymentNotFound { reference })
            }
            PaymentLifecycleError::DuplicatePending { tenant_id, room_id } => {
                AppError::domain(DomainError::DuplicatePending { tenant_id, room_id })
            }
            PaymentLifecycleError::InvalidSignature => {
                AppError::domain(DomainError::InvalidSignature)
            }
            PaymentLifecycleError::AlreadyTerminalCaptured { payment_id } => {
                AppError::domain(DomainError::AlreadyCaptured {
                    payment_id: payment_id.to_string(),
                })
            }
            PaymentLifecycleError::AlreadyTerminalFailed { payment_id } => {
                AppError::domain(DomainError::AlreadyFailed {
                    payment_id: payment_id.to_string(),
                })
            }
            PaymentLifecycleError::AlreadyTerminal { payment_id, status } => {
                AppError::domain(DomainError::NotPending {
                    payment_id: payment_id.to_string(),
                    status: status.to_string(),
                })
            }
            PaymentLifecycleError::StaleState { payment_id } => {
                AppError::domain(DomainError::StaleState {
                    payment_id: payment_id.to_string(),
                })
            }
            PaymentLifecycleError::Gateway(e) => e.into(),
            PaymentLifecycleError::Store(e) => e.into(),
            PaymentLifecycleError::DataIntegrity(message) => AppError::new(
                AppErrorKind::Infrastructure(InfrastructureError::DataIntegrity { message }),
            ),
        }
    }
}

/// Where a capture was observed. Only checkout captures carry a per-payment
/// signature; the other two are authenticated upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    Checkout,
    Webhook,
    Reconciliation,
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureSource::Checkout => "checkout",
            CaptureSource::Webhook => "webhook",
            CaptureSource::Reconciliation => "reconciliation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub currency: String,
    pub gateway_timeout: Duration,
    pub receipt_prefix: String,
}

impl From<&GatewayConfig> for LifecycleConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            gateway_timeout: config.timeout(),
            receipt_prefix: config.receipt_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub tenant_id: i64,
    pub room_id: i64,
    pub property_id: i64,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub payment: Payment,
    /// Public key the client hands to the checkout widget.
    pub gateway_key_ref: String,
}

/// Result of a transition request. `applied` is false when the payment was
/// already in the requested state.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub payment: Payment,
    pub applied: bool,
}

pub struct PaymentLifecycle {
    store: Arc<dyn PaymentRecordStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn PaymentNotifier>,
    config: LifecycleConfig,
}

impl PaymentLifecycle {
    pub fn new(
        store: Arc<dyn PaymentRecordStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn PaymentNotifier>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn PaymentRecordStore> {
        &self.store
    }

    /// Create a gateway order and record it as a pending payment.
    pub async fn initiate(&self, request: InitiatePayment) -> LifecycleResult<InitiatedPayment> {
        validate_initiate(&request)?;

        if let Some(existing) = self
            .store
            .find_pending_for_obligation(request.tenant_id, request.room_id)
            .await?
        {
            info!(
                tenant_id = request.tenant_id,
                room_id = request.room_id,
                existing_payment_id = %existing.id,
                "rejecting initiate: payment already pending"
            );
            return Err(PaymentLifecycleError::DuplicatePending {
                tenant_id: request.tenant_id,
                room_id: request.room_id,
            });
        }

        let description = request
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Rent payment for room {}", request.room_id));
        let receipt = generate_receipt(&self.config.receipt_prefix);

        let order_request = CreateOrderRequest {
            amount: request.amount,
            currency: self.config.currency.clone(),
            receipt: receipt.clone(),
            notes: OrderNotes {
                tenant_id: request.tenant_id,
                room_id: request.room_id,
                property_id: request.property_id,
                description: description.clone(),
            },
        };

        let order = self
            .with_gateway_timeout(self.gateway.create_order(order_request))
            .await?;

        if order.amount != request.amount {
            warn!(
                gateway_order_id = %order.gateway_order_id,
                requested = request.amount,
                gateway_amount = order.amount,
                "gateway order amount differs from requested amount"
            );
        }

        let new_payment = NewPayment {
            tenant_id: request.tenant_id,
            room_id: request.room_id,
            property_id: request.property_id,
            amount: request.amount,
            currency: self.config.currency.clone(),
            description,
            receipt,
            gateway_order_id: order.gateway_order_id.clone(),
        };

        let payment = match self.store.create(new_payment).await {
            Ok(payment) => payment,
            Err(e) => {
                error!(
                    reconciliation_item = true,
                    gateway_order_id = %order.gateway_order_id,
                    tenant_id = request.tenant_id,
                    room_id = request.room_id,
                    error = %e,
                    "gateway order created but payment could not be recorded"
                );
                return Err(if e.violates(ONE_PENDING_PER_OBLIGATION) {
                    PaymentLifecycleError::DuplicatePending {
                        tenant_id: request.tenant_id,
                        room_id: request.room_id,
                    }
                } else if e.violates(GATEWAY_ORDER_ID_CONSTRAINT) {
                    PaymentLifecycleError::DataIntegrity(format!(
                        "gateway reused order id {}",
                        order.gateway_order_id
                    ))
                } else {
                    PaymentLifecycleError::Store(e)
                });
            }
        };

        info!(
            payment_id = %payment.id,
            gateway_order_id = %payment.gateway_order_id,
            tenant_id = payment.tenant_id,
            room_id = payment.room_id,
            amount = payment.amount,
            "payment initiated"
        );

        Ok(InitiatedPayment {
            payment,
            gateway_key_ref: order.gateway_key_ref,
        })
    }

    /// Client-side confirmation after checkout. The signature must verify
    /// before anything changes; a bad signature leaves the payment pending.
    pub async fn confirm_capture(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> LifecycleResult<TransitionOutcome> {
        require("gatewayOrderId", gateway_order_id)?;
        require("gatewayPaymentId", gateway_payment_id)?;
        require("signature", signature)?;

        let payment = self.load_by_order(gateway_order_id).await?;

        if !self
            .gateway
            .verify_payment_signature(gateway_order_id, gateway_payment_id, signature)
        {
            warn!(
                payment_id = %payment.id,
                gateway_order_id = %gateway_order_id,
                "checkout signature verification failed"
            );
            return Err(PaymentLifecycleError::InvalidSignature);
        }

        self.capture(payment, gateway_payment_id, CaptureSource::Checkout)
            .await
    }

    /// Capture driven by evidence that was authenticated elsewhere (a signed
    /// webhook or a gateway fetch).
    pub async fn record_capture(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        source: CaptureSource,
    ) -> LifecycleResult<TransitionOutcome> {
        require("gatewayOrderId", gateway_order_id)?;
        require("gatewayPaymentId", gateway_payment_id)?;

        let payment = self.load_by_order(gateway_order_id).await?;
        self.capture(payment, gateway_payment_id, source).await
    }

    /// Move a pending payment to `Failed`. Failing a failed payment is a no-op;
    /// failing a captured one is refused.
    pub async fn mark_failed(
        &self,
        gateway_order_id: &str,
        reason: &str,
    ) -> LifecycleResult<TransitionOutcome> {
        require("gatewayOrderId", gateway_order_id)?;
        require("reason", reason)?;

        let payment = self.load_by_order(gateway_order_id).await?;

        match payment.status {
            PaymentStatus::Captured => {
                return Err(PaymentLifecycleError::AlreadyTerminalCaptured {
                    payment_id: payment.id,
                })
            }
            PaymentStatus::Failed => {
                return Ok(TransitionOutcome {
                    payment,
                    applied: false,
                })
            }
            PaymentStatus::Pending => {}
        }

        let result = self
            .store
            .transition_status(
                payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                TransitionFields::failed(reason.trim()),
            )
            .await;

        match result {
            Ok(updated) => {
                info!(
                    payment_id = %updated.id,
                    gateway_order_id = %updated.gateway_order_id,
                    reason = %reason,
                    "payment marked failed"
                );
                self.notify(updated.clone(), NotificationType::PaymentFailed);
                Ok(TransitionOutcome {
                    payment: updated,
                    applied: true,
                })
            }
            Err(DatabaseError {
                kind: DatabaseErrorKind::StaleState { actual, .. },
            }) => match actual {
                PaymentStatus::Captured => Err(PaymentLifecycleError::AlreadyTerminalCaptured {
                    payment_id: payment.id,
                }),
                PaymentStatus::Failed => Ok(TransitionOutcome {
                    payment: self.store.get_by_id(payment.id).await?,
                    applied: false,
                }),
                PaymentStatus::Pending => Err(PaymentLifecycleError::StaleState {
                    payment_id: payment.id,
                }),
            },
            Err(e) => Err(store_error(e, payment.id)),
        }
    }

    /// Current gateway view of an order, bounded by the gateway timeout.
    pub async fn fetch_gateway_order(
        &self,
        gateway_order_id: &str,
    ) -> LifecycleResult<OrderSnapshot> {
        self.with_gateway_timeout(self.gateway.fetch_order(gateway_order_id))
            .await
    }

    async fn capture(
        &self,
        payment: Payment,
        gateway_payment_id: &str,
        source: CaptureSource,
    ) -> LifecycleResult<TransitionOutcome> {
        match payment.status {
            PaymentStatus::Captured => {
                return Ok(self.duplicate_capture(payment, gateway_payment_id, source))
            }
            PaymentStatus::Failed => {
                return Err(self.capture_after_failure(&payment, gateway_payment_id, source))
            }
            PaymentStatus::Pending => {}
        }

        let result = self
            .store
            .transition_status(
                payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Captured,
                TransitionFields::captured(gateway_payment_id),
            )
            .await;

        match result {
            Ok(updated) => {
                info!(
                    payment_id = %updated.id,
                    gateway_order_id = %updated.gateway_order_id,
                    gateway_payment_id = %gateway_payment_id,
                    source = %source,
                    "payment captured"
                );
                self.notify(updated.clone(), NotificationType::PaymentCaptured);
                Ok(TransitionOutcome {
                    payment: updated,
                    applied: true,
                })
            }
            Err(DatabaseError {
                kind: DatabaseErrorKind::StaleState { actual, .. },
            }) => {
                let current = self
                    .store
                    .get_by_id(payment.id)
                    .await
                    .map_err(|e| store_error(e, payment.id))?;
                match actual {
                    PaymentStatus::Captured => {
                        Ok(self.duplicate_capture(current, gateway_payment_id, source))
                    }
                    PaymentStatus::Failed => {
                        Err(self.capture_after_failure(&current, gateway_payment_id, source))
                    }
                    PaymentStatus::Pending => Err(PaymentLifecycleError::StaleState {
                        payment_id: payment.id,
                    }),
                }
            }
            Err(e) => Err(store_error(e, payment.id)),
        }
    }

    fn duplicate_capture(
        &self,
        payment: Payment,
        gateway_payment_id: &str,
        source: CaptureSource,
    ) -> TransitionOutcome {
        if payment.gateway_payment_id.as_deref() != Some(gateway_payment_id) {
            error!(
                alarm = true,
                payment_id = %payment.id,
                gateway_order_id = %payment.gateway_order_id,
                recorded_payment_id = ?payment.gateway_payment_id,
                reported_payment_id = %gateway_payment_id,
                source = %source,
                "second capture reported for an already captured order"
            );
        } else {
            info!(
                payment_id = %payment.id,
                source = %source,
                "duplicate capture ignored"
            );
        }
        TransitionOutcome {
            payment,
            applied: false,
        }
    }

    fn capture_after_failure(
        &self,
        payment: &Payment,
        gateway_payment_id: &str,
        source: CaptureSource,
    ) -> PaymentLifecycleError {
        error!(
            alarm = true,
            payment_id = %payment.id,
            gateway_order_id = %payment.gateway_order_id,
            gateway_payment_id = %gateway_payment_id,
            failure_reason = ?payment.failure_reason,
            source = %source,
            "capture reported for a payment already marked failed"
        );
        PaymentLifecycleError::AlreadyTerminalFailed {
            payment_id: payment.id,
        }
    }

    async fn load_by_order(&self, gateway_order_id: &str) -> LifecycleResult<Payment> {
        self.store
            .get_by_gateway_order_id(gateway_order_id)
            .await
            .map_err(|e| store_error(e, gateway_order_id))
    }

    async fn with_gateway_timeout<T, F>(&self, call: F) -> LifecycleResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(result) => result.map_err(PaymentLifecycleError::from),
            Err(_) => Err(PaymentLifecycleError::Gateway(
                GatewayError::GatewayUnavailable {
                    message: format!(
                        "{} call exceeded {:?}",
                        self.gateway.name(),
                        self.config.gateway_timeout
                    ),
                },
            )),
        }
    }

    fn notify(&self, payment: Payment, notification_type: NotificationType) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.notify(&payment, notification_type).await;
        });
    }
}

fn store_error(err: DatabaseError, reference: impl ToString) -> PaymentLifecycleError {
    if err.is_not_found() {
        PaymentLifecycleError::NotFound(reference.to_string())
    } else {
        PaymentLifecycleError::Store(err)
    }
}

fn require(field: &str, value: &str) -> LifecycleResult<()> {
    if value.trim().is_empty() {
        return Err(PaymentLifecycleError::Validation(format!(
            "{} is required",
            field
        )));
    }
    Ok(())
}

fn validate_initiate(request: &InitiatePayment) -> LifecycleResult<()> {
    if request.amount <= 0 {
        return Err(PaymentLifecycleError::Validation(
            "amount must be a positive number of minor units".to_string(),
        ));
    }
    for (field, id) in [
        ("tenantId", request.tenant_id),
        ("roomId", request.room_id),
        ("propertyId", request.property_id),
    ] {
        if id <= 0 {
            return Err(PaymentLifecycleError::Validation(format!(
                "{} must be positive",
                field
            )));
        }
    }
    Ok(())
}

/// `<prefix><unix millis>_<8 hex chars>`, at most 40 characters for an 18 character prefix.
fn generate_receipt(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}_{}", prefix, Utc::now().timestamp_millis(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_has_prefix_and_fits_gateway_limit() {
        let receipt = generate_receipt("rent_");
        assert!(receipt.starts_with("rent_"));
        assert!(receipt.len() <= 40);
        let suffix = receipt.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);

        let long = generate_receipt("abcdefghijklmnopqr");
        assert!(long.len() <= 40);
    }

    #[test]
    fn initiate_validation_rejects_bad_input() {
        let base = InitiatePayment {
            tenant_id: 7,
            room_id: 3,
            property_id: 1,
            amount: 5000,
            description: None,
        };
        assert!(validate_initiate(&base).is_ok());

        let zero = InitiatePayment {
            amount: 0,
            ..base.clone()
        };
        assert!(matches!(
            validate_initiate(&zero),
            Err(PaymentLifecycleError::Validation(_))
        ));

        let no_room = InitiatePayment {
            room_id: 0,
            ..base
        };
        assert!(validate_initiate(&no_room).is_err());
    }

    #[test]
    fn lifecycle_errors_map_to_http_statuses() {
        let id = Uuid::new_v4();
        let cases: Vec<(PaymentLifecycleError, u16)> = vec![
            (PaymentLifecycleError::Validation("x".into()), 400),
            (PaymentLifecycleError::NotFound("order_x".into()), 404),
            (
                PaymentLifecycleError::DuplicatePending {
                    tenant_id: 7,
                    room_id: 3,
                },
                409,
            ),
            (PaymentLifecycleError::InvalidSignature, 400),
            (
                PaymentLifecycleError::AlreadyTerminalCaptured { payment_id: id },
                409,
            ),
            (
                PaymentLifecycleError::AlreadyTerminalFailed { payment_id: id },
                409,
            ),
            (PaymentLifecycleError::DataIntegrity("x".into()), 500),
            (
                PaymentLifecycleError::Gateway(GatewayError::GatewayUnavailable {
                    message: "down".into(),
                }),
                503,
            ),
        ];

        for (err, status) in cases {
            let label = err.to_string();
            let app: AppError = err.into();
            assert_eq!(app.status_code(), status, "{}", label);
        }
    }

    #[test]
    fn only_infrastructure_errors_are_retryable() {
        assert!(PaymentLifecycleError::Gateway(GatewayError::Timeout { timeout_secs: 5 })
            .is_retryable());
        assert!(!PaymentLifecycleError::InvalidSignature.is_retryable());
        assert!(!PaymentLifecycleError::DuplicatePending {
            tenant_id: 1,
            room_id: 1
        }
        .is_retryable());
    }
}
