//! HTTP boundary: request decoding, routing and response shaping

pub mod payments;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::health::{HealthChecker, HealthStatus};
use crate::middleware::request_id::UuidRequestId;
use crate::payments::provider::PaymentGateway;
use crate::services::{CancellationHandler, PaymentLifecycle, WebhookProcessor};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<PaymentLifecycle>,
    pub cancellation: Arc<CancellationHandler>,
    pub webhooks: Arc<WebhookProcessor>,
    pub health_checker: HealthChecker,
}

impl AppState {
    pub fn new(lifecycle: Arc<PaymentLifecycle>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            cancellation: Arc::new(CancellationHandler::new(Arc::clone(&lifecycle))),
            webhooks: Arc::new(WebhookProcessor::new(gateway, Arc::clone(&lifecycle))),
            health_checker: HealthChecker::new(Arc::clone(lifecycle.store())),
            lifecycle,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(health))
        .route("/health/live", get(liveness))
        .route("/payment/initiate", post(payments::initiate_payment))
        .route("/payment/verify", post(payments::verify_payment))
        .route("/payment/cancel", post(payments::cancel_payment))
        .route("/payment/list", post(payments::list_payments))
        .route("/payment/{id}", get(payments::get_payment))
        .route("/webhook/payment", post(webhooks::handle_payment_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn root() -> &'static str {
    "Rent payments API"
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.is_healthy() {
        Ok(Json(health_status))
    } else {
        warn!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    }
}

/// Liveness probe - the process is up and serving
async fn liveness() -> &'static str {
    "OK"
}
