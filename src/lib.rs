/// Error types for the alert router
pub mod error;

/// Core log record and severity types
pub mod events;

/// Field extraction from raw log lines
pub mod extract;

/// Log sources feeding the orchestrator
pub mod sources;

/// Grouping strategies and the strategy registry
pub mod strategies;

/// Recipients, their stores, and the recipient directory
pub mod recipients;

/// Tracking-ticket contract, the in-memory board, and Azure DevOps work items
pub mod tickets;

/// Alert orchestration, notification, and the sent-alert ledger
pub mod alerts;

/// Structured run events and per-run counters
pub mod monitoring;

/// Configuration management
pub mod config;

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the async collaborator traits
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Re-export commonly used types
pub use error::{
    ConfigError, DirectoryError, NotifyError, OrchestratorError, SourceError, StoreError,
    StrategyError, TicketError,
};
