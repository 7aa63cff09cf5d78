use crate::database::payment_repository::{Payment, PaymentStatus};
use crate::services::payment_lifecycle::{
    LifecycleResult, PaymentLifecycle, PaymentLifecycleError,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Administrative termination of a payment stuck in `Pending`.
///
/// Only the local record is failed. The gateway order is left to expire on its own.
pub struct CancellationHandler {
    lifecycle: Arc<PaymentLifecycle>,
}

impl CancellationHandler {
    pub fn new(lifecycle: Arc<PaymentLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub async fn cancel(&self, payment_id: Uuid, reason: &str) -> LifecycleResult<Payment> {
        if reason.trim().is_empty() {
            return Err(PaymentLifecycleError::Validation(
                "reason is required".to_string(),
            ));
        }

        let payment = self
            .lifecycle
            .store()
            .get_by_id(payment_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    PaymentLifecycleError::NotFound(payment_id.to_string())
                } else {
                    PaymentLifecycleError::Store(e)
                }
            })?;

        if payment.status != PaymentStatus::Pending {
            return Err(PaymentLifecycleError::AlreadyTerminal {
                payment_id,
                status: payment.status,
            });
        }

        let outcome = self
            .lifecycle
            .mark_failed(&payment.gateway_order_id, reason)
            .await?;

        // Someone else failed it between our read and the transition.
        if !outcome.applied {
            return Err(PaymentLifecycleError::AlreadyTerminal {
                payment_id,
                status: outcome.payment.status,
            });
        }

        info!(
            payment_id = %payment_id,
            gateway_order_id = %payment.gateway_order_id,
            reason = %reason,
            "payment cancelled"
        );
        Ok(outcome.payment)
    }
}
