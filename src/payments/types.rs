use crate::payments::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Identifies the rent obligation an order is raised for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotes {
    pub tenant_id: i64,
    pub room_id: i64,
    pub property_id: i64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Smallest currency unit (paise for INR).
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: OrderNotes,
}

impl CreateOrderRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.amount <= 0 {
            return Err(GatewayError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if self.currency.trim().len() != 3 {
            return Err(GatewayError::ValidationError {
                message: format!("invalid currency code: {}", self.currency),
                field: Some("currency".to_string()),
            });
        }
        if self.receipt.trim().is_empty() || self.receipt.len() > 40 {
            return Err(GatewayError::ValidationError {
                message: "receipt must be between 1 and 40 characters".to_string(),
                field: Some("receipt".to_string()),
            });
        }
        Ok(())
    }
}

/// Result of a successful order creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub gateway_order_id: String,
    /// Public key the client SDK opens checkout with.
    pub gateway_key_ref: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Attempted,
    Paid,
}

impl FromStr for OrderStatus {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(OrderStatus::Created),
            "attempted" => Ok(OrderStatus::Attempted),
            "paid" => Ok(OrderStatus::Paid),
            other => Err(GatewayError::InvalidResponse {
                message: format!("unknown order status: {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Created,
    Authorized,
    Captured,
    Refunded,
    Failed,
    Unknown,
}

impl AttemptStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "created" => AttemptStatus::Created,
            "authorized" => AttemptStatus::Authorized,
            "captured" => AttemptStatus::Captured,
            "refunded" => AttemptStatus::Refunded,
            "failed" => AttemptStatus::Failed,
            _ => AttemptStatus::Unknown,
        }
    }
}

/// One checkout attempt made against an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub gateway_payment_id: String,
    pub status: AttemptStatus,
    pub error_description: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
}

/// Authoritative gateway view of an order, used by reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub gateway_order_id: String,
    pub status: OrderStatus,
    pub amount: i64,
    pub amount_paid: i64,
    pub attempts: Vec<PaymentAttempt>,
}

impl OrderSnapshot {
    pub fn captured_attempt(&self) -> Option<&PaymentAttempt> {
        self.attempts
            .iter()
            .find(|a| a.status == AttemptStatus::Captured)
    }

    pub fn last_failure(&self) -> Option<&PaymentAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Failed)
            .max_by_key(|a| a.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WebhookEventKind {
    PaymentCaptured,
    PaymentFailed,
    PaymentAuthorized,
    OrderPaid,
    Other(String),
}

impl WebhookEventKind {
    pub fn parse(event: &str) -> Self {
        match event {
            "payment.captured" => WebhookEventKind::PaymentCaptured,
            "payment.failed" => WebhookEventKind::PaymentFailed,
            "payment.authorized" => WebhookEventKind::PaymentAuthorized,
            "order.paid" => WebhookEventKind::OrderPaid,
            other => WebhookEventKind::Other(other.to_string()),
        }
    }
}

/// A verified, parsed webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub event_type: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub error_description: Option<String>,
    pub payload: JsonValue,
    pub received_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: i64, currency: &str) -> CreateOrderRequest {
        CreateOrderRequest {
            amount,
            currency: currency.to_string(),
            receipt: "rent_1700000000000_ab12cd34".to_string(),
            notes: OrderNotes {
                tenant_id: 7,
                room_id: 3,
                property_id: 1,
                description: "Rent Payment".to_string(),
            },
        }
    }

    #[test]
    fn create_order_request_rejects_non_positive_amount() {
        assert!(request(0, "INR").validate().is_err());
        assert!(request(-10, "INR").validate().is_err());
        assert!(request(5000, "INR").validate().is_ok());
    }

    #[test]
    fn create_order_request_rejects_bad_currency() {
        let err = request(5000, "RUPEES").validate().unwrap_err();
        assert!(matches!(err, GatewayError::ValidationError { .. }));
    }

    #[test]
    fn order_notes_serialize_camel_case() {
        let json = serde_json::to_value(request(5000, "INR").notes).unwrap();
        assert_eq!(json["tenantId"], 7);
        assert_eq!(json["propertyId"], 1);
    }

    #[test]
    fn snapshot_finds_captured_and_latest_failure() {
        let snapshot = OrderSnapshot {
            gateway_order_id: "order_abc".to_string(),
            status: OrderStatus::Attempted,
            amount: 5000,
            amount_paid: 0,
            attempts: vec![
                PaymentAttempt {
                    gateway_payment_id: "pay_1".to_string(),
                    status: AttemptStatus::Failed,
                    error_description: Some("card declined".to_string()),
                    created_at: 10,
                },
                PaymentAttempt {
                    gateway_payment_id: "pay_2".to_string(),
                    status: AttemptStatus::Failed,
                    error_description: Some("bank timeout".to_string()),
                    created_at: 20,
                },
            ],
        };
        assert!(snapshot.captured_attempt().is_none());
        assert_eq!(
            snapshot.last_failure().unwrap().gateway_payment_id,
            "pay_2".to_string()
        );
    }

    #[test]
    fn webhook_event_kind_parsing() {
        assert_eq!(
            WebhookEventKind::parse("payment.captured"),
            WebhookEventKind::PaymentCaptured
        );
        assert_eq!(
            WebhookEventKind::parse("refund.created"),
            WebhookEventKind::Other("refund.created".to_string())
        );
    }
}
