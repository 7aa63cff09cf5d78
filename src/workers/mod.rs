pub mod payment_reconciliation;
