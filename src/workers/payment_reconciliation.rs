//! Periodic sweep over payments stuck in `Pending`.
//!
//! A webhook can be lost or never sent. For every payment that has not moved
//! for `stale_after`, the sweep asks the gateway for the order and drives the
//! same capture / fail transitions the webhook would have.

use crate::config::ReconciliationConfig;
use crate::database::error::DatabaseError;
use crate::database::payment_repository::Payment;
use crate::payments::error::GatewayError;
use crate::payments::types::OrderStatus;
use crate::services::payment_lifecycle::{
    CaptureSource, PaymentLifecycle, PaymentLifecycleError,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

const ABANDONED_REASON: &str = "abandoned: no captured payment at gateway";
const SWEEP_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub examined: usize,
    pub captured: usize,
    pub failed: usize,
    pub untouched: usize,
    pub alarms: usize,
}

impl ReconciliationReport {
    fn record(&mut self, action: ReconcileAction) {
        self.examined += 1;
        match action {
            ReconcileAction::Captured => self.captured += 1,
            ReconcileAction::Failed => self.failed += 1,
            ReconcileAction::Untouched => self.untouched += 1,
            ReconcileAction::Alarm => self.alarms += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconcileAction {
    Captured,
    Failed,
    Untouched,
    Alarm,
}

pub struct PaymentReconciliationWorker {
    lifecycle: Arc<PaymentLifecycle>,
    config: ReconciliationConfig,
}

impl PaymentReconciliationWorker {
    pub fn new(lifecycle: Arc<PaymentLifecycle>, config: ReconciliationConfig) -> Self {
        Self { lifecycle, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            abandon_after_secs = self.config.abandon_after.as_secs(),
            batch_size = self.config.batch_size,
            "payment reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.run_sweep().await {
                        Ok(report) if report.examined > 0 => {
                            info!(
                                examined = report.examined,
                                captured = report.captured,
                                failed = report.failed,
                                untouched = report.untouched,
                                alarms = report.alarms,
                                "reconciliation sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "reconciliation sweep failed"),
                    }
                }
            }
        }

        info!("payment reconciliation worker stopped");
    }

    /// One pass over stale pending payments. Only the initial selection can fail
    /// the sweep; per-payment problems are counted and logged.
    pub async fn run_sweep(&self) -> Result<ReconciliationReport, DatabaseError> {
        let now = Utc::now();
        let cutoff = now - to_chrono(self.config.stale_after);

        let stale = self
            .lifecycle
            .store()
            .find_stale_pending(cutoff, self.config.batch_size)
            .await?;

        let actions: Vec<ReconcileAction> = stream::iter(stale)
            .map(|payment| self.reconcile_one(payment, now))
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut report = ReconciliationReport::default();
        for action in actions {
            report.record(action);
        }
        Ok(report)
    }

    async fn reconcile_one(&self, payment: Payment, now: DateTime<Utc>) -> ReconcileAction {
        let snapshot = match self
            .lifecycle
            .fetch_gateway_order(&payment.gateway_order_id)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(PaymentLifecycleError::Gateway(GatewayError::OrderNotFound { .. })) => {
                error!(
                    alarm = true,
                    payment_id = %payment.id,
                    gateway_order_id = %payment.gateway_order_id,
                    "gateway has no order for a pending payment"
                );
                return ReconcileAction::Alarm;
            }
            Err(e) => {
                warn!(
                    payment_id = %payment.id,
                    gateway_order_id = %payment.gateway_order_id,
                    error = %e,
                    "could not fetch gateway order, will retry next sweep"
                );
                return ReconcileAction::Untouched;
            }
        };

        if let Some(attempt) = snapshot.captured_attempt() {
            return match self
                .lifecycle
                .record_capture(
                    &payment.gateway_order_id,
                    &attempt.gateway_payment_id,
                    CaptureSource::Reconciliation,
                )
                .await
            {
                Ok(outcome) if outcome.applied => ReconcileAction::Captured,
                Ok(_) => ReconcileAction::Untouched,
                Err(PaymentLifecycleError::AlreadyTerminalFailed { .. }) => ReconcileAction::Alarm,
                Err(e) => {
                    warn!(payment_id = %payment.id, error = %e, "reconciled capture not applied");
                    ReconcileAction::Untouched
                }
            };
        }

        if snapshot.status == OrderStatus::Paid {
            error!(
                alarm = true,
                payment_id = %payment.id,
                gateway_order_id = %payment.gateway_order_id,
                amount_paid = snapshot.amount_paid,
                "gateway order is paid but has no captured payment"
            );
            return ReconcileAction::Alarm;
        }

        if now - payment.created_at < to_chrono(self.config.abandon_after) {
            return ReconcileAction::Untouched;
        }

        let reason = snapshot
            .last_failure()
            .and_then(|attempt| attempt.error_description.clone())
            .unwrap_or_else(|| ABANDONED_REASON.to_string());

        match self
            .lifecycle
            .mark_failed(&payment.gateway_order_id, &reason)
            .await
        {
            Ok(outcome) if outcome.applied => ReconcileAction::Failed,
            Ok(_) | Err(PaymentLifecycleError::AlreadyTerminalCaptured { .. }) => {
                ReconcileAction::Untouched
            }
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "abandoned payment not failed");
                ReconcileAction::Untouched
            }
        }
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::seconds(duration.as_secs() as i64)
}
