use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::payments::provider::PaymentGateway;
use crate::payments::types::{WebhookEvent, WebhookEventKind};
use crate::services::payment_lifecycle::{
    CaptureSource, PaymentLifecycle, PaymentLifecycleError, TransitionOutcome,
};

const DEFAULT_FAILURE_REASON: &str = "payment failed at gateway";

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    /// Store or gateway hiccup; the gateway should redeliver.
    #[error("Temporarily unable to process webhook: {0}")]
    Transient(String),
}

/// What happened to a verified webhook. All variants are acknowledged to the
/// gateway with a 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A status transition was applied.
    Applied,
    /// The payment was already in the reported state.
    Duplicate,
    /// Event type carries nothing to act on, or could not be parsed.
    Ignored,
    /// Should-never-happen condition; logged with `alarm = true`.
    Alarm,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Alarm => "alarm",
        }
    }
}

pub struct WebhookProcessor {
    gateway: Arc<dyn PaymentGateway>,
    lifecycle: Arc<PaymentLifecycle>,
}

impl WebhookProcessor {
    pub fn new(gateway: Arc<dyn PaymentGateway>, lifecycle: Arc<PaymentLifecycle>) -> Self {
        Self { gateway, lifecycle }
    }

    /// Verify the raw body against the signature header, then dispatch.
    /// Nothing reaches the lifecycle unless the signature verifies.
    pub async fn process_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                warn!(gateway = self.gateway.name(), "webhook without signature header");
                WebhookProcessorError::InvalidSignature
            })?;

        if !self.gateway.verify_webhook_signature(payload, signature) {
            warn!(gateway = self.gateway.name(), "invalid webhook signature");
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event = match self.gateway.parse_webhook_event(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    gateway = self.gateway.name(),
                    error = %e,
                    "signed webhook payload could not be parsed"
                );
                return Ok(WebhookOutcome::Ignored);
            }
        };

        let outcome = self.dispatch(&event).await?;
        info!(
            event_type = %event.event_type,
            gateway_order_id = ?event.gateway_order_id,
            gateway_payment_id = ?event.gateway_payment_id,
            outcome = outcome.as_str(),
            "webhook processed"
        );
        Ok(outcome)
    }

    async fn dispatch(
        &self,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        match &event.kind {
            WebhookEventKind::PaymentCaptured | WebhookEventKind::OrderPaid => {
                let Some(order_id) = event.gateway_order_id.as_deref() else {
                    return Ok(missing_order_id(event));
                };
                let Some(payment_id) = event.gateway_payment_id.as_deref() else {
                    info!(
                        event_type = %event.event_type,
                        gateway_order_id = %order_id,
                        "capture event without payment id, leaving to reconciliation"
                    );
                    return Ok(WebhookOutcome::Ignored);
                };

                let result = self
                    .lifecycle
                    .record_capture(order_id, payment_id, CaptureSource::Webhook)
                    .await;
                classify(event, result)
            }
            WebhookEventKind::PaymentFailed => {
                let Some(order_id) = event.gateway_order_id.as_deref() else {
                    return Ok(missing_order_id(event));
                };
                let reason = event
                    .error_description
                    .as_deref()
                    .unwrap_or(DEFAULT_FAILURE_REASON);

                let result = self.lifecycle.mark_failed(order_id, reason).await;
                match result {
                    Err(PaymentLifecycleError::AlreadyTerminalCaptured { payment_id }) => {
                        warn!(
                            payment_id = %payment_id,
                            gateway_order_id = %order_id,
                            "failure event for a captured payment ignored"
                        );
                        Ok(WebhookOutcome::Ignored)
                    }
                    other => classify(event, other),
                }
            }
            WebhookEventKind::PaymentAuthorized | WebhookEventKind::Other(_) => {
                debug!(event_type = %event.event_type, "webhook event ignored");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}

fn missing_order_id(event: &WebhookEvent) -> WebhookOutcome {
    error!(
        alarm = true,
        event_type = %event.event_type,
        "webhook event carries no order id"
    );
    WebhookOutcome::Alarm
}

fn classify(
    event: &WebhookEvent,
    result: Result<TransitionOutcome, PaymentLifecycleError>,
) -> Result<WebhookOutcome, WebhookProcessorError> {
    match result {
        Ok(outcome) if outcome.applied => Ok(WebhookOutcome::Applied),
        Ok(_) => Ok(WebhookOutcome::Duplicate),
        Err(PaymentLifecycleError::NotFound(reference)) => {
            error!(
                alarm = true,
                event_type = %event.event_type,
                reference = %reference,
                "webhook for an order with no local payment"
            );
            Ok(WebhookOutcome::Alarm)
        }
        Err(e @ PaymentLifecycleError::StaleState { .. }) => {
            Err(WebhookProcessorError::Transient(e.to_string()))
        }
        Err(e) if e.is_retryable() => {
            warn!(event_type = %event.event_type, error = %e, "webhook processing deferred");
            Err(WebhookProcessorError::Transient(e.to_string()))
        }
        Err(e) => {
            error!(
                alarm = true,
                event_type = %event.event_type,
                gateway_order_id = ?event.gateway_order_id,
                error = %e,
                "webhook could not be applied"
            );
            Ok(WebhookOutcome::Alarm)
        }
    }
}
