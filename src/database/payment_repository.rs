use crate::database::error::{DatabaseError, DatabaseErrorKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique constraint on `payments.gateway_order_id`.
pub const GATEWAY_ORDER_ID_CONSTRAINT: &str = "payments_gateway_order_id_key";
/// Partial unique index allowing one pending payment per (tenant, room).
pub const ONE_PENDING_PER_OBLIGATION: &str = "payments_one_pending_per_obligation";

const PAYMENT_COLUMNS: &str = "id, tenant_id, room_id, property_id, amount, currency, description, \
     receipt, gateway_order_id, gateway_payment_id, status, failure_reason, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Captured,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Status only moves forward, and only out of `Pending`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Captured)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "captured" => Ok(PaymentStatus::Captured),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// A rent payment and its gateway order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub tenant_id: i64,
    pub room_id: i64,
    pub property_id: i64,
    /// Smallest currency unit (paise for INR).
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub receipt: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub status: PaymentStatus,
    #[serde(rename = "reason")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    tenant_id: i64,
    room_id: i64,
    property_id: i64,
    amount: i64,
    currency: String,
    description: String,
    receipt: String,
    gateway_order_id: String,
    gateway_payment_id: Option<String>,
    status: String,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::from_str(&row.status)
            .map_err(|message| DatabaseError::new(DatabaseErrorKind::QueryError { message }))?;

        Ok(Payment {
            id: row.id,
            tenant_id: row.tenant_id,
            room_id: row.room_id,
            property_id: row.property_id,
            amount: row.amount,
            currency: row.currency,
            description: row.description,
            receipt: row.receipt,
            gateway_order_id: row.gateway_order_id,
            gateway_payment_id: row.gateway_payment_id,
            status,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert payload. Records are only ever created in `Pending`.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub tenant_id: i64,
    pub room_id: i64,
    pub property_id: i64,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub receipt: String,
    pub gateway_order_id: String,
}

/// Columns written alongside a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionFields {
    pub gateway_payment_id: Option<String>,
    pub reason: Option<String>,
}

impl TransitionFields {
    pub fn captured(gateway_payment_id: impl Into<String>) -> Self {
        Self {
            gateway_payment_id: Some(gateway_payment_id.into()),
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            gateway_payment_id: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub tenant_id: Option<i64>,
    pub property_id: Option<i64>,
    pub room_id: Option<i64>,
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub created_before: Option<DateTime<Utc>>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.status.map_or(true, |s| payment.status == s)
            && self.tenant_id.map_or(true, |t| payment.tenant_id == t)
            && self.property_id.map_or(true, |p| payment.property_id == p)
            && self.room_id.map_or(true, |r| payment.room_id == r)
            && self.created_from.map_or(true, |from| payment.created_at >= from)
            && self.created_before.map_or(true, |to| payment.created_at < to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.filter(|p| *p > 0).unwrap_or(1),
            limit: limit
                .filter(|l| *l > 0)
                .unwrap_or(Self::DEFAULT_LIMIT)
                .min(Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        (total + self.limit as i64 - 1) / self.limit as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Persistence boundary for payments.
///
/// `transition_status` is the only way a status changes: it applies only when the
/// stored status still equals `from`, otherwise it fails with `StaleState` carrying
/// the status actually found.
#[async_trait]
pub trait PaymentRecordStore: Send + Sync {
    async fn create(&self, payment: NewPayment) -> Result<Payment, DatabaseError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Payment, DatabaseError>;

    async fn get_by_gateway_order_id(&self, gateway_order_id: &str)
        -> Result<Payment, DatabaseError>;

    async fn find_pending_for_obligation(
        &self,
        tenant_id: i64,
        room_id: i64,
    ) -> Result<Option<Payment>, DatabaseError>;

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        fields: TransitionFields,
    ) -> Result<Payment, DatabaseError>;

    /// Newest first, with the total number of matching rows.
    async fn list(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> Result<(Vec<Payment>, i64), DatabaseError>;

    /// Pending payments not updated since `older_than`, oldest first.
    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> Result<(), DatabaseError>;
}

pub(crate) fn ensure_transition(
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<(), DatabaseError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(DatabaseError::new(DatabaseErrorKind::InvalidTransition {
            from,
            to,
        }))
    }
}

/// Postgres-backed payment store
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Payment, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE {}", PAYMENT_COLUMNS, clause);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("Payment", value))?;
        row.try_into()
    }
}

#[async_trait]
impl PaymentRecordStore for PgPaymentRepository {
    async fn create(&self, payment: NewPayment) -> Result<Payment, DatabaseError> {
        let sql = format!(
            "INSERT INTO payments (id, tenant_id, room_id, property_id, amount, currency, description, receipt, gateway_order_id, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending')
             RETURNING {}",
            PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(payment.tenant_id)
            .bind(payment.room_id)
            .bind(payment.property_id)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(&payment.description)
            .bind(&payment.receipt)
            .bind(&payment.gateway_order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Payment, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?;
        row.try_into()
    }

    async fn get_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Payment, DatabaseError> {
        self.fetch_one_where("gateway_order_id = $1", gateway_order_id)
            .await
    }

    async fn find_pending_for_obligation(
        &self,
        tenant_id: i64,
        room_id: i64,
    ) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE tenant_id = $1 AND room_id = $2 AND status = 'pending'",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tenant_id)
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        fields: TransitionFields,
    ) -> Result<Payment, DatabaseError> {
        ensure_transition(from, to)?;

        let gateway_payment_id = fields
            .gateway_payment_id
            .filter(|_| to == PaymentStatus::Captured);
        let reason = fields.reason.filter(|_| to == PaymentStatus::Failed);

        let sql = format!(
            "UPDATE payments
             SET status = $3,
                 gateway_payment_id = COALESCE($4, gateway_payment_id),
                 failure_reason = COALESCE($5, failure_reason),
                 updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING {}",
            PAYMENT_COLUMNS
        );

        let updated = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(gateway_payment_id)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                let current = self.get_by_id(id).await?;
                Err(DatabaseError::new(DatabaseErrorKind::StaleState {
                    id: id.to_string(),
                    expected: from,
                    actual: current.status,
                }))
            }
        }
    }

    async fn list(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> Result<(Vec<Payment>, i64), DatabaseError> {
        const WHERE: &str = "WHERE ($1::text IS NULL OR status = $1)
               AND ($2::bigint IS NULL OR tenant_id = $2)
               AND ($3::bigint IS NULL OR property_id = $3)
               AND ($4::bigint IS NULL OR room_id = $4)
               AND ($5::timestamptz IS NULL OR created_at >= $5)
               AND ($6::timestamptz IS NULL OR created_at < $6)";

        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM payments {}", WHERE))
            .bind(status)
            .bind(filter.tenant_id)
            .bind(filter.property_id)
            .bind(filter.room_id)
            .bind(filter.created_from)
            .bind(filter.created_before)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let sql = format!(
            "SELECT {} FROM payments {} ORDER BY created_at DESC LIMIT $7 OFFSET $8",
            PAYMENT_COLUMNS, WHERE
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(status)
            .bind(filter.tenant_id)
            .bind(filter.property_id)
            .bind(filter.room_id)
            .bind(filter.created_from)
            .bind(filter.created_before)
            .bind(page.limit as i64)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let payments = rows
            .into_iter()
            .map(Payment::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((payments, total))
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments
             WHERE status = 'pending' AND updated_at < $1
             ORDER BY updated_at ASC
             LIMIT $2",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        crate::database::health_check(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_can_move() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Captured));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        for terminal in [PaymentStatus::Captured, PaymentStatus::Failed] {
            for next in [
                PaymentStatus::Pending,
                PaymentStatus::Captured,
                PaymentStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn status_round_trips_through_column_value() {
        assert_eq!(
            PaymentStatus::from_str("CAPTURED").unwrap(),
            PaymentStatus::Captured
        );
        assert_eq!(PaymentStatus::Failed.as_str(), "failed");
        assert!(PaymentStatus::from_str("refunded").is_err());
    }

    #[test]
    fn page_request_defaults_and_caps() {
        let page = PageRequest::new(None, None);
        assert_eq!((page.page, page.limit), (1, 10));
        assert_eq!(page.offset(), 0);

        let page = PageRequest::new(Some(3), Some(500));
        assert_eq!(page.limit, 100);
        assert_eq!(page.offset(), 200);

        let page = PageRequest::new(Some(0), Some(0));
        assert_eq!((page.page, page.limit), (1, 10));
        assert_eq!(page.total_pages(21), 3);
        assert_eq!(page.total_pages(0), 0);
    }

    #[test]
    fn transition_fields_constructors() {
        assert_eq!(
            TransitionFields::captured("pay_xyz").gateway_payment_id.as_deref(),
            Some("pay_xyz")
        );
        assert_eq!(
            TransitionFields::failed("timed out").reason.as_deref(),
            Some("timed out")
        );
    }

    #[test]
    fn serializes_reason_field() {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            tenant_id: 7,
            room_id: 3,
            property_id: 1,
            amount: 5000,
            currency: "INR".to_string(),
            description: String::new(),
            receipt: "rent_1_abcd1234".to_string(),
            gateway_order_id: "order_abc".to_string(),
            gateway_payment_id: None,
            status: PaymentStatus::Failed,
            failure_reason: Some("timed out".to_string()),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&payment).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "timed out");
        assert_eq!(json["gatewayOrderId"], "order_abc");
    }
}
