use crate::database::payment_repository::Payment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    PaymentCaptured,
    PaymentFailed,
}

/// Outbound notification hook, invoked after a payment settles.
///
/// Delivery is fire-and-forget: callers spawn it and never retry.
#[async_trait]
pub trait PaymentNotifier: Send + Sync {
    async fn notify(&self, payment: &Payment, notification_type: NotificationType);
}

/// Writes notifications to the structured log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentNotifier for LogNotifier {
    async fn notify(&self, payment: &Payment, notification_type: NotificationType) {
        match notification_type {
            NotificationType::PaymentCaptured => {
                info!(
                    payment_id = %payment.id,
                    tenant_id = payment.tenant_id,
                    room_id = payment.room_id,
                    amount = payment.amount,
                    currency = %payment.currency,
                    gateway_payment_id = ?payment.gateway_payment_id,
                    "NOTIFICATION: rent payment received"
                );
            }
            NotificationType::PaymentFailed => {
                warn!(
                    payment_id = %payment.id,
                    tenant_id = payment.tenant_id,
                    room_id = payment.room_id,
                    reason = ?payment.failure_reason,
                    "NOTIFICATION: rent payment failed"
                );
            }
        }
    }
}
