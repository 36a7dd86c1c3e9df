use alertrouter::alerts::{
    AlertOrchestrator, JsonLedgerStore, LogNotifier, MultiNotifier, Notifier, SentAlertLedger,
    WebhookNotifier,
};
use alertrouter::config::{Config, NotifierChannel, SourceKind, TicketSystemKind};
use alertrouter::error::ConfigError;
use alertrouter::monitoring::RunReport;
use alertrouter::recipients::{JsonRecipientStore, RecipientDirectory};
use alertrouter::sources::{FileLogSource, HttpLogSource, LogSource};
use alertrouter::strategies::StrategyRegistry;
use alertrouter::tickets::{DevOpsTicketSystem, InMemoryTicketSystem, TicketSystem};
use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;

/// Command-line arguments for the alert router
#[derive(Parser)]
#[command(
    name = "alertrouter",
    about = "Correlates monitoring logs into alerts and routes them to the people responsible",
    long_about = "Periodically fetches pending monitoring log lines, groups them per recipient \
                  with the recipient's chosen strategy, makes sure a tracking ticket exists for \
                  every problem, and sends one merged notification per group and address."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Run a single pass and exit
    #[arg(long, help = "Run one orchestration pass and exit")]
    once: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// Missing files are accepted here; `load_config` falls back to defaults.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Load configuration, falling back to defaults if the file is missing or invalid
fn load_config(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match Config::from_file(std::path::Path::new(path)) {
                Ok(config) => config,
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path
                    );
                    Config::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path, e);
                    warn!("Using default configuration due to invalid config file");
                    Config::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    }
}

fn build_source(config: &Config) -> anyhow::Result<Arc<dyn LogSource>> {
    Ok(match config.source.kind {
        SourceKind::File => Arc::new(FileLogSource::new(&config.source.path)),
        SourceKind::Http => Arc::new(
            HttpLogSource::new(config.source.url.clone(), config.source.timeout())
                .context("Failed to build HTTP log source")?,
        ),
    })
}

fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
    for channel in &config.notifier.channels {
        match channel {
            NotifierChannel::Log => channels.push(Arc::new(LogNotifier)),
            NotifierChannel::Webhook => {
                let url = config
                    .notifier
                    .webhook_url
                    .clone()
                    .context("notifier.webhook_url is not set")?;
                let webhook = WebhookNotifier::new(url, config.notifier.timeout())
                    .context("Failed to build webhook notifier")?;
                channels.push(Arc::new(webhook));
            }
        }
    }

    if channels.len() == 1 {
        if let Some(channel) = channels.pop() {
            return Ok(channel);
        }
    }
    Ok(Arc::new(MultiNotifier::new(channels)))
}

fn build_tickets(config: &Config) -> anyhow::Result<Arc<dyn TicketSystem>> {
    let tickets = &config.tickets;
    let system: Arc<dyn TicketSystem> = match tickets.kind {
        TicketSystemKind::Memory => {
            warn!("Using the in-memory ticket board; tickets are lost on exit");
            Arc::new(InMemoryTicketSystem::new())
        }
        TicketSystemKind::DevOps => Arc::new(
            DevOpsTicketSystem::new(
                &tickets.organization_url,
                &tickets.project,
                &tickets.personal_access_token,
                tickets.timeout(),
            )
            .context("Failed to build Azure DevOps ticket system")?,
        ),
    };
    Ok(system)
}

/// Wire every collaborator named in `config` into an orchestrator
fn build_orchestrator(config: &Config) -> anyhow::Result<AlertOrchestrator> {
    let ledger_store = JsonLedgerStore::new(&config.ledger.path);
    if config.ledger.clear_on_start {
        ledger_store
            .clear()
            .context("Failed to clear sent-alert ledger")?;
    }
    let ledger = SentAlertLedger::load(Box::new(ledger_store)).with_context(|| {
        format!(
            "Failed to load sent-alert ledger from {}",
            config.ledger.path.display()
        )
    })?;

    let directory =
        RecipientDirectory::new(Box::new(JsonRecipientStore::new(&config.recipients.path)));

    Ok(AlertOrchestrator::new(
        directory,
        StrategyRegistry::with_defaults(),
        build_source(config)?,
        build_tickets(config)?,
        build_notifier(config)?,
        ledger,
    )
    .with_retry_policy(config.notifier.retry_policy()))
}

fn log_report(report: &RunReport) {
    info!(
        "Pass complete: {} logs, {} recipients ({} skipped), {} groups, {} tickets created, \
         {} updated, {} alerts sent, {} failed, {} suppressed, {} collaborator errors",
        report.logs_fetched,
        report.recipients_processed,
        report.recipients_skipped,
        report.groups,
        report.tickets_created,
        report.tickets_updated,
        report.alerts_sent,
        report.alerts_failed,
        report.alerts_suppressed,
        report.collaborator_errors
    );
}

fn run(cli: Cli) -> anyhow::Result<()> {
    cli.validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid arguments")?;
    let config_path = cli
        .config_path_str()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration path")?;
    let config = load_config(config_path);

    let mut orchestrator = build_orchestrator(&config)?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    if cli.once {
        let report = runtime
            .block_on(orchestrator.run())
            .context("Orchestration pass failed")?;
        log_report(&report);
        return Ok(());
    }

    let (shutdown_sender, shutdown_receiver) = mpsc::channel();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    let interval = config.schedule.interval();
    info!(
        "Alert router is running every {:?}. Press Ctrl+C to stop.",
        interval
    );

    loop {
        match runtime.block_on(orchestrator.run()) {
            Ok(report) => log_report(&report),
            Err(e) => error!("Orchestration pass failed: {}", e),
        }

        match shutdown_receiver.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => continue,
        }
    }

    info!("Alert router shutdown complete");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting alert router");

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
