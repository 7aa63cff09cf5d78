//! In-process payment store with the same constraint semantics as Postgres.
//! Used by tests and by local runs without a database.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::payment_repository::{
    ensure_transition, NewPayment, PageRequest, Payment, PaymentFilter, PaymentRecordStore,
    PaymentStatus, TransitionFields, GATEWAY_ORDER_ID_CONSTRAINT, ONE_PENDING_PER_OBLIGATION,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    payments: RwLock<HashMap<Uuid, Payment>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored record. Test helper for ageing records.
    pub async fn put(&self, payment: Payment) {
        self.payments.write().await.insert(payment.id, payment);
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.read().await.is_empty()
    }
}

#[async_trait]
impl PaymentRecordStore for InMemoryPaymentRepository {
    async fn create(&self, payment: NewPayment) -> Result<Payment, DatabaseError> {
        let mut payments = self.payments.write().await;

        if payments
            .values()
            .any(|p| p.gateway_order_id == payment.gateway_order_id)
        {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: GATEWAY_ORDER_ID_CONSTRAINT.to_string(),
            }));
        }
        if payments.values().any(|p| {
            p.status == PaymentStatus::Pending
                && p.tenant_id == payment.tenant_id
                && p.room_id == payment.room_id
        }) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: ONE_PENDING_PER_OBLIGATION.to_string(),
            }));
        }

        let now = Utc::now();
        let record = Payment {
            id: Uuid::new_v4(),
            tenant_id: payment.tenant_id,
            room_id: payment.room_id,
            property_id: payment.property_id,
            amount: payment.amount,
            currency: payment.currency,
            description: payment.description,
            receipt: payment.receipt,
            gateway_order_id: payment.gateway_order_id,
            gateway_payment_id: None,
            status: PaymentStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        payments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Payment, DatabaseError> {
        self.payments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Payment", id))
    }

    async fn get_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Payment, DatabaseError> {
        self.payments
            .read()
            .await
            .values()
            .find(|p| p.gateway_order_id == gateway_order_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Payment", gateway_order_id))
    }

    async fn find_pending_for_obligation(
        &self,
        tenant_id: i64,
        room_id: i64,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| {
                p.status == PaymentStatus::Pending
                    && p.tenant_id == tenant_id
                    && p.room_id == room_id
            })
            .cloned())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        fields: TransitionFields,
    ) -> Result<Payment, DatabaseError> {
        ensure_transition(from, to)?;

        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?;

        if payment.status != from {
            return Err(DatabaseError::new(DatabaseErrorKind::StaleState {
                id: id.to_string(),
                expected: from,
                actual: payment.status,
            }));
        }

        payment.status = to;
        match to {
            PaymentStatus::Captured => {
                if let Some(gateway_payment_id) = fields.gateway_payment_id {
                    payment.gateway_payment_id = Some(gateway_payment_id);
                }
            }
            PaymentStatus::Failed => {
                if let Some(reason) = fields.reason {
                    payment.failure_reason = Some(reason);
                }
            }
            PaymentStatus::Pending => {}
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn list(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> Result<(Vec<Payment>, i64), DatabaseError> {
        let payments = self.payments.read().await;
        let mut matching: Vec<Payment> = payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let data = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();
        Ok((data, total))
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let payments = self.payments.read().await;
        let mut stale: Vec<Payment> = payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_payment(order: &str, tenant_id: i64, room_id: i64) -> NewPayment {
        NewPayment {
            tenant_id,
            room_id,
            property_id: 1,
            amount: 5000,
            currency: "INR".to_string(),
            description: "Rent".to_string(),
            receipt: format!("rent_{}", order),
            gateway_order_id: order.to_string(),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_gateway_order() {
        let store = InMemoryPaymentRepository::new();
        store.create(new_payment("order_abc", 7, 3)).await.unwrap();

        let err = store
            .create(new_payment("order_abc", 8, 4))
            .await
            .unwrap_err();
        assert!(err.violates(GATEWAY_ORDER_ID_CONSTRAINT));
    }

    #[tokio::test]
    async fn create_rejects_second_pending_for_same_obligation() {
        let store = InMemoryPaymentRepository::new();
        let first = store.create(new_payment("order_1", 7, 3)).await.unwrap();

        let err = store.create(new_payment("order_2", 7, 3)).await.unwrap_err();
        assert!(err.violates(ONE_PENDING_PER_OBLIGATION));

        store
            .transition_status(
                first.id,
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                TransitionFields::failed("cancelled"),
            )
            .await
            .unwrap();
        assert!(store.create(new_payment("order_2", 7, 3)).await.is_ok());
    }

    #[tokio::test]
    async fn compare_and_swap_reports_actual_status() {
        let store = InMemoryPaymentRepository::new();
        let payment = store.create(new_payment("order_abc", 7, 3)).await.unwrap();

        let captured = store
            .transition_status(
                payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Captured,
                TransitionFields::captured("pay_xyz"),
            )
            .await
            .unwrap();
        assert_eq!(captured.gateway_payment_id.as_deref(), Some("pay_xyz"));
        assert!(captured.updated_at >= payment.updated_at);

        let err = store
            .transition_status(
                payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                TransitionFields::failed("late"),
            )
            .await
            .unwrap_err();
        match err.kind {
            DatabaseErrorKind::StaleState { actual, .. } => {
                assert_eq!(actual, PaymentStatus::Captured)
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let stored = store.get_by_id(payment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Captured);
        assert!(stored.failure_reason.is_none());
    }

    #[tokio::test]
    async fn terminal_to_terminal_transition_is_refused() {
        let store = InMemoryPaymentRepository::new();
        let payment = store.create(new_payment("order_abc", 7, 3)).await.unwrap();

        let err = store
            .transition_status(
                payment.id,
                PaymentStatus::Captured,
                PaymentStatus::Failed,
                TransitionFields::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            DatabaseErrorKind::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn list_filters_and_paginates_newest_first() {
        let store = InMemoryPaymentRepository::new();
        for i in 0..5 {
            let mut payment = store
                .create(new_payment(&format!("order_{}", i), 7, i))
                .await
                .unwrap();
            payment.created_at = Utc::now() - Duration::minutes(10 - i);
            store.put(payment).await;
        }
        store.create(new_payment("order_other", 9, 1)).await.unwrap();

        let filter = PaymentFilter {
            tenant_id: Some(7),
            ..Default::default()
        };
        let (page, total) = store
            .list(&filter, PageRequest::new(Some(1), Some(2)))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].gateway_order_id, "order_4");
        assert_eq!(page[1].gateway_order_id, "order_3");

        let (page, _) = store
            .list(&filter, PageRequest::new(Some(3), Some(2)))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].gateway_order_id, "order_0");
    }

    #[tokio::test]
    async fn stale_pending_skips_fresh_and_terminal_records() {
        let store = InMemoryPaymentRepository::new();
        let mut old = store.create(new_payment("order_old", 1, 1)).await.unwrap();
        old.updated_at = Utc::now() - Duration::hours(2);
        store.put(old.clone()).await;

        store.create(new_payment("order_new", 2, 1)).await.unwrap();

        let mut done = store.create(new_payment("order_done", 3, 1)).await.unwrap();
        done.status = PaymentStatus::Captured;
        done.updated_at = Utc::now() - Duration::hours(2);
        store.put(done).await;

        let stale = store
            .find_stale_pending(Utc::now() - Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }
}
