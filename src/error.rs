use thiserror::Error;

/// Errors that can occur while fetching raw log lines
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Log source unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to parse log payload: {0}")]
    ParseError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors reported by a ticket system
#[derive(Error, Debug)]
pub enum TicketError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Ticket not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by this ticket system: {0}")]
    Unsupported(&'static str),

    #[error("Ticket system transport failed: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur when sending alerts
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors from the recipient and ledger backing stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to parse store contents: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Errors raised by the recipient directory
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Component must not be empty")]
    EmptyComponent,

    #[error("Failed to load recipients: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised while selecting or building grouping strategies
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StrategyError {
    #[error("Strategy {0} not implemented")]
    NotImplemented(String),
}

/// Errors that abort a whole orchestration run
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Failed to fetch logs: {0}")]
    Source(#[from] SourceError),

    #[error("Strategy configuration error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("No recipients available: {0}")]
    Recipients(#[from] DirectoryError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
