mod common;

use common::{harness, payment_event, webhook_signature, Harness};
use rent_payments::database::payment_repository::{PaymentRecordStore, PaymentStatus};
use rent_payments::payments::provider::PaymentGateway;
use rent_payments::services::{
    InitiatePayment, WebhookOutcome, WebhookProcessor, WebhookProcessorError,
};
use std::sync::Arc;

async fn pending_order(h: &Harness, order_id: &str) {
    h.gateway.queue_order_id(order_id);
    h.lifecycle
        .initiate(InitiatePayment {
            tenant_id: 7,
            room_id: 3,
            property_id: 1,
            amount: 5000,
            description: Some("March rent".to_string()),
        })
        .await
        .unwrap();
}

fn processor(h: &Harness) -> WebhookProcessor {
    WebhookProcessor::new(
        h.gateway.clone() as Arc<dyn PaymentGateway>,
        Arc::clone(&h.lifecycle),
    )
}

#[tokio::test]
async fn captured_event_applies_then_deduplicates() {
    let h = harness();
    pending_order(&h, "order_abc").await;
    let body = payment_event("payment.captured", "order_abc", "pay_xyz");
    let signature = webhook_signature(&body);
    let processor = processor(&h);

    let first = processor
        .process_webhook(&body, Some(&signature))
        .await
        .unwrap();
    let second = processor
        .process_webhook(&body, Some(&signature))
        .await
        .unwrap();

    assert_eq!(first, WebhookOutcome::Applied);
    assert_eq!(second, WebhookOutcome::Duplicate);
    let stored = h.store.get_by_gateway_order_id("order_abc").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Captured);
    assert_eq!(stored.gateway_payment_id.as_deref(), Some("pay_xyz"));
}

#[tokio::test]
async fn bad_or_missing_signature_changes_nothing() {
    let h = harness();
    pending_order(&h, "order_abc").await;
    let body = payment_event("payment.captured", "order_abc", "pay_xyz");
    let processor = processor(&h);

    let missing = processor.process_webhook(&body, None).await;
    let forged = processor
        .process_webhook(&body, Some("deadbeef"))
        .await;

    assert!(matches!(missing, Err(WebhookProcessorError::InvalidSignature)));
    assert!(matches!(forged, Err(WebhookProcessorError::InvalidSignature)));
    let stored = h.store.get_by_gateway_order_id("order_abc").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn failed_event_records_gateway_reason() {
    let h = harness();
    pending_order(&h, "order_abc").await;
    let body = payment_event("payment.failed", "order_abc", "pay_bad");

    let outcome = processor(&h)
        .process_webhook(&body, Some(&webhook_signature(&body)))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Applied);
    let stored = h.store.get_by_gateway_order_id("order_abc").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("card declined"));
}

#[tokio::test]
async fn failure_after_capture_is_ignored() {
    let h = harness();
    pending_order(&h, "order_abc").await;
    let processor = processor(&h);
    let captured = payment_event("payment.captured", "order_abc", "pay_xyz");
    let failed = payment_event("payment.failed", "order_abc", "pay_other");

    processor
        .process_webhook(&captured, Some(&webhook_signature(&captured)))
        .await
        .unwrap();
    let outcome = processor
        .process_webhook(&failed, Some(&webhook_signature(&failed)))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
    let stored = h.store.get_by_gateway_order_id("order_abc").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Captured);
}

#[tokio::test]
async fn event_for_unknown_order_raises_alarm_but_is_acknowledged() {
    let h = harness();
    let body = payment_event("payment.captured", "order_ghost", "pay_xyz");

    let outcome = processor(&h)
        .process_webhook(&body, Some(&webhook_signature(&body)))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Alarm);
}

#[tokio::test]
async fn unrelated_events_are_ignored() {
    let h = harness();
    pending_order(&h, "order_abc").await;
    let body = serde_json::to_vec(&serde_json::json!({
        "event": "refund.created",
        "payload": {}
    }))
    .unwrap();

    let outcome = processor(&h)
        .process_webhook(&body, Some(&webhook_signature(&body)))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
    let stored = h.store.get_by_gateway_order_id("order_abc").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}
