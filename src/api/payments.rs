use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::api::AppState;
use crate::database::payment_repository::{PageRequest, Payment, PaymentFilter, PaymentStatus};
use crate::error::{AppError, AppResult, ValidationError};
use crate::middleware::error::{
    get_request_id_from_headers, success_response, success_response_with_meta,
};
use crate::services::payment_lifecycle::InitiatePayment;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub tenant_id: i64,
    pub room_id: i64,
    pub property_id: i64,
    /// Smallest currency unit.
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub gateway_order_id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub gateway_key_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub gateway_payment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPaymentRequest {
    pub payment_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct CancelPaymentResponse {
    pub payment: Payment,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPaymentsRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
    pub tenant_id: Option<i64>,
    pub property_id: Option<i64>,
    pub room_id: Option<i64>,
    /// `YYYY-MM-DD`, inclusive.
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`, inclusive of the whole day.
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

/// POST /payment/initiate
pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<InitiatePaymentRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = payload.map_err(|e| tag(json_rejection(e), &request_id))?;

    let initiated = state
        .lifecycle
        .initiate(InitiatePayment {
            tenant_id: request.tenant_id,
            room_id: request.room_id,
            property_id: request.property_id,
            amount: request.amount,
            description: request.description,
        })
        .await
        .map_err(|e| tag(e.into(), &request_id))?;

    let payment = initiated.payment;
    Ok((
        StatusCode::CREATED,
        success_response(InitiatePaymentResponse {
            payment_id: payment.id,
            gateway_order_id: payment.gateway_order_id,
            amount: payment.amount,
            currency: payment.currency,
            receipt: payment.receipt,
            gateway_key_ref: initiated.gateway_key_ref,
        }),
    ))
}

/// POST /payment/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = payload.map_err(|e| tag(json_rejection(e), &request_id))?;

    let outcome = state
        .lifecycle
        .confirm_capture(
            &request.gateway_order_id,
            &request.gateway_payment_id,
            &request.signature,
        )
        .await
        .map_err(|e| tag(e.into(), &request_id))?;

    Ok(success_response(VerifyPaymentResponse {
        payment_id: outcome.payment.id,
        status: outcome.payment.status,
        gateway_payment_id: outcome.payment.gateway_payment_id,
    }))
}

/// POST /payment/cancel
pub async fn cancel_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CancelPaymentRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = payload.map_err(|e| tag(json_rejection(e), &request_id))?;

    let payment = state
        .cancellation
        .cancel(request.payment_id, &request.reason)
        .await
        .map_err(|e| tag(e.into(), &request_id))?;

    Ok(success_response(CancelPaymentResponse { payment }))
}

/// GET /payment/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let request_id = get_request_id_from_headers(&headers);
    let id = Uuid::parse_str(&id).map_err(|_| {
        tag(
            AppError::validation(ValidationError::InvalidField {
                field: "id".to_string(),
                reason: "must be a UUID".to_string(),
            }),
            &request_id,
        )
    })?;

    let payment = state
        .lifecycle
        .store()
        .get_by_id(id)
        .await
        .map_err(|e| tag(e.into(), &request_id))?;

    Ok(success_response(payment))
}

/// POST /payment/list
pub async fn list_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ListPaymentsRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let request_id = get_request_id_from_headers(&headers);
    // An empty body lists everything with default paging.
    let request = match payload {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => ListPaymentsRequest::default(),
        Err(e) => return Err(tag(json_rejection(e), &request_id)),
    };

    let filter = build_filter(&request).map_err(|e| tag(e, &request_id))?;
    let page = PageRequest::new(request.page, request.limit);

    let (payments, total) = state
        .lifecycle
        .store()
        .list(&filter, page)
        .await
        .map_err(|e| tag(e.into(), &request_id))?;

    Ok(success_response_with_meta(
        payments,
        PageMeta {
            page: page.page,
            limit: page.limit,
            total,
            total_pages: page.total_pages(total),
        },
    ))
}

fn build_filter(request: &ListPaymentsRequest) -> AppResult<PaymentFilter> {
    let status = request
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(PaymentStatus::from_str)
        .transpose()
        .map_err(|reason| {
            AppError::validation(ValidationError::InvalidField {
                field: "status".to_string(),
                reason,
            })
        })?;

    let created_from = request
        .start_date
        .as_deref()
        .map(|d| parse_day("startDate", d))
        .transpose()?;
    let created_before = request
        .end_date
        .as_deref()
        .map(|d| parse_day("endDate", d))
        .transpose()?
        .map(|day| day + chrono::Duration::days(1));

    Ok(PaymentFilter {
        status,
        tenant_id: request.tenant_id,
        property_id: request.property_id,
        room_id: request.room_id,
        created_from,
        created_before,
    })
}

/// Midnight UTC at the start of `value`.
fn parse_day(field: &str, value: &str) -> AppResult<DateTime<Utc>> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            AppError::validation(ValidationError::InvalidField {
                field: field.to_string(),
                reason: "expected a date in YYYY-MM-DD format".to_string(),
            })
        })
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    AppError::validation(ValidationError::InvalidField {
        field: "body".to_string(),
        reason: rejection.body_text(),
    })
}

fn tag(error: AppError, request_id: &Option<String>) -> AppError {
    match request_id {
        Some(id) => error.with_request_id(id.clone()),
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_date_covers_the_whole_day() {
        let filter = build_filter(&ListPaymentsRequest {
            start_date: Some("2025-03-01".to_string()),
            end_date: Some("2025-03-31".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            filter.created_from.unwrap().to_rfc3339(),
            "2025-03-01T00:00:00+00:00"
        );
        assert_eq!(
            filter.created_before.unwrap().to_rfc3339(),
            "2025-04-01T00:00:00+00:00"
        );
    }

    #[test]
    fn invalid_status_and_date_are_rejected() {
        let bad_status = build_filter(&ListPaymentsRequest {
            status: Some("refunded".to_string()),
            ..Default::default()
        });
        assert_eq!(bad_status.unwrap_err().status_code(), 400);

        let bad_date = build_filter(&ListPaymentsRequest {
            start_date: Some("01/03/2025".to_string()),
            ..Default::default()
        });
        assert_eq!(bad_date.unwrap_err().status_code(), 400);
    }

    #[test]
    fn status_filter_is_case_insensitive() {
        let filter = build_filter(&ListPaymentsRequest {
            status: Some("Captured".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(filter.status, Some(PaymentStatus::Captured));
    }
}
