use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::{AppError, DomainError};
use crate::middleware::error::get_request_id_from_headers;
use crate::services::webhook_processor::WebhookProcessorError;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// POST /webhook/payment
///
/// Acknowledges every verified event with 200, including duplicates and events
/// that could not be applied, so the gateway stops redelivering. Only a bad
/// signature (401) or a transient failure (503) is reported as an error.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match state.webhooks.process_webhook(&body, signature).await {
        Ok(outcome) => {
            info!(outcome = outcome.as_str(), request_id = ?request_id, "Webhook acknowledged");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "ok", "outcome": outcome.as_str() })),
            )
                .into_response()
        }
        Err(WebhookProcessorError::InvalidSignature) => {
            let mut error = AppError::domain(DomainError::InvalidWebhookSignature);
            if let Some(id) = request_id {
                error = error.with_request_id(id);
            }
            error.into_response()
        }
        Err(e @ WebhookProcessorError::Transient(_)) => {
            warn!(error = %e, request_id = ?request_id, "Webhook deferred, asking gateway to retry");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "retry" })),
            )
                .into_response()
        }
    }
}
