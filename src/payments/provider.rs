use crate::payments::error::GatewayResult;
use crate::payments::types::{CreateOrderRequest, CreatedOrder, OrderSnapshot, WebhookEvent};
use async_trait::async_trait;

/// Call surface of the external payment gateway. Implementations hold no
/// business state.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder>;

    async fn fetch_order(&self, gateway_order_id: &str) -> GatewayResult<OrderSnapshot>;

    /// Checkout signature check. A mismatch is `false`, never an error.
    fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool;

    /// Webhook signature check over the raw body, keyed by the webhook secret.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<WebhookEvent>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{OrderNotes, OrderStatus, WebhookEventKind};

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder> {
            Ok(CreatedOrder {
                gateway_order_id: "order_mock".to_string(),
                gateway_key_ref: "rzp_test_key".to_string(),
                amount: request.amount,
                currency: request.currency,
                receipt: request.receipt,
            })
        }

        async fn fetch_order(&self, gateway_order_id: &str) -> GatewayResult<OrderSnapshot> {
            Ok(OrderSnapshot {
                gateway_order_id: gateway_order_id.to_string(),
                status: OrderStatus::Created,
                amount: 100,
                amount_paid: 0,
                attempts: vec![],
            })
        }

        fn verify_payment_signature(&self, _: &str, _: &str, signature: &str) -> bool {
            signature == "ok"
        }

        fn verify_webhook_signature(&self, _payload: &[u8], signature: &str) -> bool {
            signature == "ok"
        }

        fn parse_webhook_event(&self, _payload: &[u8]) -> GatewayResult<WebhookEvent> {
            Ok(WebhookEvent {
                kind: WebhookEventKind::PaymentCaptured,
                event_type: "payment.captured".to_string(),
                gateway_order_id: Some("order_mock".to_string()),
                gateway_payment_id: Some("pay_mock".to_string()),
                error_description: None,
                payload: serde_json::json!({}),
                received_at: chrono::Utc::now().to_rfc3339(),
            })
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);
        let order = gateway
            .create_order(CreateOrderRequest {
                amount: 5000,
                currency: "INR".to_string(),
                receipt: "rent_1".to_string(),
                notes: OrderNotes {
                    tenant_id: 7,
                    room_id: 3,
                    property_id: 1,
                    description: "Rent Payment".to_string(),
                },
            })
            .await
            .expect("order creation should succeed");
        assert_eq!(order.gateway_order_id, "order_mock");
        assert_eq!(order.amount, 5000);

        let snapshot = gateway.fetch_order("order_mock").await.unwrap();
        assert_eq!(snapshot.status, OrderStatus::Created);
        assert!(!gateway.verify_payment_signature("order_mock", "pay_mock", "tampered"));
    }
}
