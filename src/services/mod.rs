//! Services module for payment business logic

pub mod cancellation;
pub mod notification;
pub mod payment_lifecycle;
pub mod webhook_processor;

pub use cancellation::CancellationHandler;
pub use notification::{LogNotifier, NotificationType, PaymentNotifier};
pub use payment_lifecycle::{
    CaptureSource, InitiatePayment, InitiatedPayment, LifecycleConfig, PaymentLifecycle,
    PaymentLifecycleError, TransitionOutcome,
};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
