use crate::alerts::RetryPolicy;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration loaded from a TOML file
///
/// Every section and field has a default, so an empty file is a valid
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub recipients: RecipientsConfig,
    pub ledger: LedgerConfig,
    pub tickets: TicketsConfig,
    pub notifier: NotifierConfig,
    pub schedule: ScheduleConfig,
}

/// Where pending log lines come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    File,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Log file read by the `file` source
    pub path: PathBuf,
    /// Endpoint polled by the `http` source
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::File,
            path: PathBuf::from("pending_logs.txt"),
            url: String::new(),
            timeout_seconds: 30,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipientsConfig {
    /// JSON file holding the recipient list
    pub path: PathBuf,
}

impl Default for RecipientsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("recipients.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON file holding already-sent alert keys
    pub path: PathBuf,
    /// Empty the ledger when the daemon starts
    pub clear_on_start: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sent_alerts.json"),
            clear_on_start: false,
        }
    }
}

/// Which ticket system holds tracking tickets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketSystemKind {
    /// Process-local board, lost on exit
    #[default]
    Memory,
    /// Azure DevOps work items
    DevOps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketsConfig {
    pub kind: TicketSystemKind,
    /// Organization URL, e.g. `https://dev.azure.com/acme`
    pub organization_url: String,
    pub project: String,
    pub personal_access_token: String,
    pub timeout_seconds: u64,
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            kind: TicketSystemKind::Memory,
            organization_url: String::new(),
            project: String::new(),
            personal_access_token: String::new(),
            timeout_seconds: 30,
        }
    }
}

impl TicketsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// A notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierChannel {
    Log,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub channels: Vec<NotifierChannel>,
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channels: vec![NotifierChannel::Log],
            webhook_url: None,
            timeout_seconds: 30,
            max_attempts: 1,
            retry_base_delay_ms: 500,
        }
    }
}

impl NotifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between orchestration passes
    pub interval_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, a parse
    /// error for malformed TOML, and `ConfigError::ValidationError` for
    /// out-of-range values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field requirements
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "schedule.interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.notifier.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "notifier.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.source.kind == SourceKind::Http && self.source.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "source.url is required for the http source".to_string(),
            ));
        }

        if self.tickets.kind == TicketSystemKind::DevOps {
            let required = [
                ("tickets.organization_url", &self.tickets.organization_url),
                ("tickets.project", &self.tickets.project),
                ("tickets.personal_access_token", &self.tickets.personal_access_token),
            ];
            if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "{} is required for the devops ticket system",
                    name
                )));
            }
        }

        if self.notifier.channels.is_empty() {
            return Err(ConfigError::ValidationError(
                "notifier.channels must name at least one channel".to_string(),
            ));
        }

        let webhook_url_missing = self
            .notifier
            .webhook_url
            .as_deref()
            .map_or(true, |url| url.trim().is_empty());
        if self.notifier.channels.contains(&NotifierChannel::Webhook) && webhook_url_missing {
            return Err(ConfigError::ValidationError(
                "notifier.webhook_url is required for the webhook channel".to_string(),
            ));
        }

        Ok(())
    }
}
