#![allow(dead_code)]

use async_trait::async_trait;
use rent_payments::database::memory::InMemoryPaymentRepository;
use rent_payments::database::payment_repository::{Payment, PaymentRecordStore};
use rent_payments::payments::error::{GatewayError, GatewayResult};
use rent_payments::payments::provider::PaymentGateway;
use rent_payments::payments::providers::razorpay::parse_razorpay_event;
use rent_payments::payments::types::{
    AttemptStatus, CreateOrderRequest, CreatedOrder, OrderSnapshot, OrderStatus, PaymentAttempt,
    WebhookEvent,
};
use rent_payments::payments::utils::{hmac_sha256_hex, verify_hmac_sha256_hex};
use rent_payments::services::{LifecycleConfig, LogNotifier, PaymentLifecycle};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEY_SECRET: &str = "test_key_secret";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret";

/// Scripted gateway: hands out queued order ids and serves snapshots that
/// tests register per order.
#[derive(Default)]
pub struct FakeGateway {
    order_ids: Mutex<VecDeque<String>>,
    snapshots: Mutex<HashMap<String, OrderSnapshot>>,
    create_failure: Mutex<Option<GatewayError>>,
    delay: Mutex<Option<Duration>>,
    counter: Mutex<u32>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_order_id(&self, id: &str) {
        self.order_ids.lock().unwrap().push_back(id.to_string());
    }

    pub fn fail_next_create(&self, err: GatewayError) {
        *self.create_failure.lock().unwrap() = Some(err);
    }

    pub fn set_snapshot(&self, snapshot: OrderSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.gateway_order_id.clone(), snapshot);
    }

    pub fn create_calls(&self) -> u32 {
        *self.counter.lock().unwrap()
    }

    /// Every later network call sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn network_latency(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder> {
        request.validate()?;
        self.network_latency().await;
        if let Some(err) = self.create_failure.lock().unwrap().take() {
            return Err(err);
        }

        let n = {
            let mut counter = self.counter.lock().unwrap();
            *counter += 1;
            *counter
        };
        let gateway_order_id = self
            .order_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("order_fake_{}", n));

        Ok(CreatedOrder {
            gateway_order_id,
            gateway_key_ref: "rzp_test_key".to_string(),
            amount: request.amount,
            currency: request.currency,
            receipt: request.receipt,
        })
    }

    async fn fetch_order(&self, gateway_order_id: &str) -> GatewayResult<OrderSnapshot> {
        self.network_latency().await;
        self.snapshots
            .lock()
            .unwrap()
            .get(gateway_order_id)
            .cloned()
            .ok_or_else(|| GatewayError::OrderNotFound {
                order_id: gateway_order_id.to_string(),
            })
    }

    fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool {
        let body = format!("{}|{}", gateway_order_id, gateway_payment_id);
        verify_hmac_sha256_hex(body.as_bytes(), KEY_SECRET, signature)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha256_hex(payload, WEBHOOK_SECRET, signature)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<WebhookEvent> {
        parse_razorpay_event(payload)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub struct Harness {
    pub store: Arc<InMemoryPaymentRepository>,
    pub gateway: Arc<FakeGateway>,
    pub lifecycle: Arc<PaymentLifecycle>,
}

pub fn harness() -> Harness {
    harness_with_timeout(Duration::from_secs(2))
}

pub fn harness_with_timeout(gateway_timeout: Duration) -> Harness {
    let store = Arc::new(InMemoryPaymentRepository::new());
    let gateway = Arc::new(FakeGateway::new());
    let lifecycle = Arc::new(PaymentLifecycle::new(
        store.clone() as Arc<dyn PaymentRecordStore>,
        gateway.clone() as Arc<dyn PaymentGateway>,
        Arc::new(LogNotifier::new()),
        LifecycleConfig {
            currency: "INR".to_string(),
            gateway_timeout,
            receipt_prefix: "rent_".to_string(),
        },
    ));
    Harness {
        store,
        gateway,
        lifecycle,
    }
}

pub fn checkout_signature(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    hmac_sha256_hex(
        format!("{}|{}", gateway_order_id, gateway_payment_id).as_bytes(),
        KEY_SECRET,
    )
    .unwrap()
}

pub fn webhook_signature(body: &[u8]) -> String {
    hmac_sha256_hex(body, WEBHOOK_SECRET).unwrap()
}

pub fn payment_event(event: &str, order_id: &str, payment_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event": event,
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": order_id,
                    "status": if event == "payment.failed" { "failed" } else { "captured" },
                    "error_description": if event == "payment.failed" {
                        serde_json::Value::from("card declined")
                    } else {
                        serde_json::Value::Null
                    },
                }
            }
        }
    }))
    .unwrap()
}

pub fn snapshot(order_id: &str, status: OrderStatus, attempts: Vec<(&str, AttemptStatus)>) -> OrderSnapshot {
    OrderSnapshot {
        gateway_order_id: order_id.to_string(),
        status,
        amount: 5000,
        amount_paid: if status == OrderStatus::Paid { 5000 } else { 0 },
        attempts: attempts
            .into_iter()
            .enumerate()
            .map(|(i, (id, status))| PaymentAttempt {
                gateway_payment_id: id.to_string(),
                status,
                error_description: (status == AttemptStatus::Failed)
                    .then(|| "bank declined".to_string()),
                created_at: i as i64,
            })
            .collect(),
    }
}

/// Push a record's timestamps into the past so reconciliation picks it up.
pub async fn age(store: &InMemoryPaymentRepository, payment: &Payment, by: chrono::Duration) {
    let mut aged = store.get_by_id(payment.id).await.unwrap();
    aged.created_at = aged.created_at - by;
    aged.updated_at = aged.updated_at - by;
    store.put(aged).await;
}
