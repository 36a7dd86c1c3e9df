/// Sent-alert ledger and its stores
pub mod ledger;

/// Notification channels and retry policy
pub mod notifier;

/// Alert orchestration pass
pub mod orchestrator;

pub use ledger::{InMemoryLedgerStore, JsonLedgerStore, LedgerStore, SentAlertLedger};
pub use notifier::{
    DeliveryFailure, LogNotifier, MultiNotifier, Notifier, RetryPolicy, WebhookNotifier,
};
pub use orchestrator::AlertOrchestrator;
