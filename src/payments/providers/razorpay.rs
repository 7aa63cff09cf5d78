use crate::config::GatewayConfig;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    AttemptStatus, CreateOrderRequest, CreatedOrder, OrderSnapshot, OrderStatus, PaymentAttempt,
    WebhookEvent, WebhookEventKind,
};
use crate::payments::utils::{verify_hmac_sha256_hex, BasicAuth, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub struct RazorpayGateway {
    config: GatewayConfig,
    http: PaymentHttpClient,
}

impl RazorpayGateway {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self) -> BasicAuth<'_> {
        BasicAuth {
            username: &self.config.key_id,
            password: &self.config.key_secret,
        }
    }

    fn ensure_order_id(gateway_order_id: &str) -> GatewayResult<()> {
        if gateway_order_id.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "gateway order id is required".to_string(),
                field: Some("gatewayOrderId".to_string()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder> {
        request.validate()?;

        let payload = serde_json::json!({
            "amount": request.amount,
            "currency": request.currency,
            "receipt": request.receipt,
            "payment_capture": 1,
            "notes": {
                "tenantId": request.notes.tenant_id.to_string(),
                "roomId": request.notes.room_id.to_string(),
                "propertyId": request.notes.property_id.to_string(),
                "description": request.notes.description,
            },
        });

        let order: RazorpayOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/orders"),
                Some(self.auth()),
                Some(&payload),
            )
            .await?;

        info!(
            gateway_order_id = %order.id,
            receipt = %request.receipt,
            amount = order.amount,
            "razorpay order created"
        );

        Ok(CreatedOrder {
            gateway_order_id: order.id,
            gateway_key_ref: self.config.key_id.clone(),
            amount: order.amount,
            currency: order.currency,
            receipt: order.receipt.unwrap_or(request.receipt),
        })
    }

    async fn fetch_order(&self, gateway_order_id: &str) -> GatewayResult<OrderSnapshot> {
        Self::ensure_order_id(gateway_order_id)?;

        let order: RazorpayOrder = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/orders/{}", gateway_order_id)),
                Some(self.auth()),
                None,
            )
            .await
            .map_err(|e| not_found_as_missing_order(e, gateway_order_id))?;

        let payments: RazorpayCollection<RazorpayPayment> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/orders/{}/payments", gateway_order_id)),
                Some(self.auth()),
                None,
            )
            .await
            .map_err(|e| not_found_as_missing_order(e, gateway_order_id))?;

        debug!(
            gateway_order_id = %gateway_order_id,
            status = %order.status,
            attempts = payments.items.len(),
            "razorpay order fetched"
        );

        Ok(OrderSnapshot {
            gateway_order_id: order.id,
            status: OrderStatus::from_str(&order.status)?,
            amount: order.amount,
            amount_paid: order.amount_paid.unwrap_or(0),
            attempts: payments
                .items
                .into_iter()
                .map(|p| PaymentAttempt {
                    status: AttemptStatus::parse(&p.status),
                    gateway_payment_id: p.id,
                    error_description: p.error_description,
                    created_at: p.created_at.unwrap_or(0),
                })
                .collect(),
        })
    }

    fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool {
        let body = format!("{}|{}", gateway_order_id, gateway_payment_id);
        verify_hmac_sha256_hex(body.as_bytes(), &self.config.key_secret, signature)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha256_hex(payload, &self.config.webhook_secret, signature)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<WebhookEvent> {
        parse_razorpay_event(payload)
    }

    fn name(&self) -> &'static str {
        "razorpay"
    }
}

/// Razorpay answers 400 `BAD_REQUEST_ERROR` for ids it does not know.
fn not_found_as_missing_order(err: GatewayError, gateway_order_id: &str) -> GatewayError {
    match err {
        GatewayError::GatewayRejected { ref message, .. }
            if message.to_lowercase().contains("does not exist") =>
        {
            GatewayError::OrderNotFound {
                order_id: gateway_order_id.to_string(),
            }
        }
        GatewayError::GatewayRejected {
            gateway_code: Some(ref code),
            ..
        } if code == "404" || code == "NOT_FOUND" => GatewayError::OrderNotFound {
            order_id: gateway_order_id.to_string(),
        },
        other => other,
    }
}

pub fn parse_razorpay_event(payload: &[u8]) -> GatewayResult<WebhookEvent> {
    let parsed: JsonValue =
        serde_json::from_slice(payload).map_err(|e| GatewayError::InvalidResponse {
            message: format!("invalid webhook JSON payload: {}", e),
        })?;

    let event_type = parsed
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::InvalidResponse {
            message: "webhook payload has no event field".to_string(),
        })?
        .to_string();

    let payment_entity = parsed.pointer("/payload/payment/entity");
    let order_entity = parsed.pointer("/payload/order/entity");

    let str_field = |entity: Option<&JsonValue>, field: &str| {
        entity
            .and_then(|e| e.get(field))
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };

    let gateway_order_id =
        str_field(payment_entity, "order_id").or_else(|| str_field(order_entity, "id"));
    let gateway_payment_id = str_field(payment_entity, "id");
    let error_description = str_field(payment_entity, "error_description");

    Ok(WebhookEvent {
        kind: WebhookEventKind::parse(&event_type),
        event_type,
        gateway_order_id,
        gateway_payment_id,
        error_description,
        payload: parsed,
        received_at: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    #[serde(default)]
    amount_paid: Option<i64>,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayCollection<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RazorpayPayment {
    id: String,
    status: String,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
}
