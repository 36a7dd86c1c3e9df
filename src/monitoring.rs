//! Structured run events for the alert orchestrator
//!
//! The orchestrator reports every decision it makes as a `RunEvent` instead of
//! writing log lines itself. Events go to an `EventSink` supplied at
//! construction and are tallied into the `RunReport` returned from each run.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Mutex;

/// Why a notification was not dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SuppressionReason {
    /// Same group key and email already dispatched earlier in this run
    SentThisRun,
    /// Key already recorded in the persisted sent-alert ledger
    Ledger,
}

/// One observable decision taken during an orchestration run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunEvent {
    RecipientsRefreshed {
        count: usize,
    },
    RecipientsRefreshFailed {
        error: String,
    },
    LogsFetched {
        count: usize,
    },
    /// Recipient had no logs for any of its components
    RecipientSkipped {
        recipient: String,
        strategy: String,
    },
    RecipientGrouped {
        recipient: String,
        strategy: String,
        relevant_logs: usize,
        groups: usize,
    },
    KnownProblemsLookupFailed {
        board: String,
        component: String,
        error: String,
    },
    TicketCreated {
        board: String,
        title: String,
        reference: String,
    },
    TicketCreateFailed {
        board: String,
        title: String,
        error: String,
    },
    TicketLookupFailed {
        board: String,
        title: String,
        error: String,
    },
    TicketUpdated {
        board: String,
        title: String,
        added_problem_ids: usize,
    },
    TicketUpdateFailed {
        board: String,
        title: String,
        error: String,
    },
    AlertSent {
        email: String,
        group_key: String,
    },
    AlertFailed {
        email: String,
        group_key: String,
        attempts: u32,
        error: String,
    },
    AlertSuppressed {
        email: String,
        group_key: String,
        reason: SuppressionReason,
    },
    LedgerSaveFailed {
        error: String,
    },
}

/// Receiver for run events
pub trait EventSink: Send + Sync {
    fn record(&self, event: &RunEvent);
}

/// Sink that renders events through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn record(&self, event: &RunEvent) {
        match event {
            RunEvent::RecipientsRefreshed { count } => {
                debug!("Loaded {} recipients", count)
            }
            RunEvent::RecipientsRefreshFailed { error } => {
                warn!("Failed to refresh recipients, keeping previous list: {}", error)
            }
            RunEvent::LogsFetched { count } => info!("Fetched {} log lines", count),
            RunEvent::RecipientSkipped {
                recipient,
                strategy,
            } => debug!(
                "No relevant logs for recipient '{}' with strategy {}",
                recipient, strategy
            ),
            RunEvent::RecipientGrouped {
                recipient,
                strategy,
                relevant_logs,
                groups,
            } => debug!(
                "Recipient '{}' ({}): {} relevant logs in {} groups",
                recipient, strategy, relevant_logs, groups
            ),
            RunEvent::KnownProblemsLookupFailed {
                board,
                component,
                error,
            } => warn!(
                "Could not read known problems for '{}' on board '{}': {}",
                component, board, error
            ),
            RunEvent::TicketCreated {
                board, reference, ..
            } => info!("Created ticket {} on board '{}'", reference, board),
            RunEvent::TicketCreateFailed {
                board,
                title,
                error,
            } => error!(
                "Failed to create ticket '{}' on board '{}': {}",
                title, board, error
            ),
            RunEvent::TicketLookupFailed {
                board,
                title,
                error,
            } => warn!(
                "Failed to look up ticket '{}' on board '{}': {}",
                title, board, error
            ),
            RunEvent::TicketUpdated {
                board,
                title,
                added_problem_ids,
            } => info!(
                "Added {} problem ids to ticket '{}' on board '{}'",
                added_problem_ids, title, board
            ),
            RunEvent::TicketUpdateFailed {
                board,
                title,
                error,
            } => error!(
                "Failed to update ticket '{}' on board '{}': {}",
                title, board, error
            ),
            RunEvent::AlertSent { email, group_key } => {
                info!("Sent alert for group '{}' to {}", group_key, email)
            }
            RunEvent::AlertFailed {
                email,
                group_key,
                attempts,
                error,
            } => error!(
                "Failed to send alert for group '{}' to {} after {} attempts: {}",
                group_key, email, attempts, error
            ),
            RunEvent::AlertSuppressed {
                email,
                group_key,
                reason,
            } => debug!(
                "Suppressed alert for group '{}' to {} ({:?})",
                group_key, email, reason
            ),
            RunEvent::LedgerSaveFailed { error } => {
                error!("Failed to save sent-alert ledger: {}", error)
            }
        }
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingEventSink {
    fn record(&self, event: &RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Counters for one orchestration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub logs_fetched: usize,
    pub recipients_processed: usize,
    pub recipients_skipped: usize,
    pub groups: usize,
    pub tickets_created: usize,
    pub tickets_updated: usize,
    pub alerts_sent: usize,
    pub alerts_failed: usize,
    pub alerts_suppressed: usize,
    /// Ticket, directory, and ledger failures that were tolerated
    pub collaborator_errors: usize,
}

impl RunReport {
    /// Fold one event into the counters
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::LogsFetched { count } => self.logs_fetched = *count,
            RunEvent::RecipientSkipped { .. } => self.recipients_skipped += 1,
            RunEvent::RecipientGrouped { groups, .. } => {
                self.recipients_processed += 1;
                self.groups += groups;
            }
            RunEvent::TicketCreated { .. } => self.tickets_created += 1,
            RunEvent::TicketUpdated { .. } => self.tickets_updated += 1,
            RunEvent::AlertSent { .. } => self.alerts_sent += 1,
            RunEvent::AlertFailed { .. } => self.alerts_failed += 1,
            RunEvent::AlertSuppressed { .. } => self.alerts_suppressed += 1,
            RunEvent::RecipientsRefreshFailed { .. }
            | RunEvent::KnownProblemsLookupFailed { .. }
            | RunEvent::TicketCreateFailed { .. }
            | RunEvent::TicketLookupFailed { .. }
            | RunEvent::TicketUpdateFailed { .. }
            | RunEvent::LedgerSaveFailed { .. } => self.collaborator_errors += 1,
            RunEvent::RecipientsRefreshed { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_events() {
        let mut report = RunReport::default();
        let events = vec![
            RunEvent::LogsFetched { count: 4 },
            RunEvent::RecipientGrouped {
                recipient: "ops".to_string(),
                strategy: "Severity".to_string(),
                relevant_logs: 3,
                groups: 2,
            },
            RunEvent::RecipientSkipped {
                recipient: "dev".to_string(),
                strategy: "Component".to_string(),
            },
            RunEvent::AlertSent {
                email: "ops@example.com".to_string(),
                group_key: "Fatal".to_string(),
            },
            RunEvent::AlertSuppressed {
                email: "ops@example.com".to_string(),
                group_key: "Info".to_string(),
                reason: SuppressionReason::Ledger,
            },
            RunEvent::TicketLookupFailed {
                board: "Ops".to_string(),
                title: "api - P1".to_string(),
                error: "timeout".to_string(),
            },
        ];

        for event in &events {
            report.apply(event);
        }

        assert_eq!(report.logs_fetched, 4);
        assert_eq!(report.recipients_processed, 1);
        assert_eq!(report.recipients_skipped, 1);
        assert_eq!(report.groups, 2);
        assert_eq!(report.alerts_sent, 1);
        assert_eq!(report.alerts_suppressed, 1);
        assert_eq!(report.collaborator_errors, 1);
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingEventSink::new();
        sink.record(&RunEvent::LogsFetched { count: 1 });
        sink.record(&RunEvent::RecipientsRefreshed { count: 2 });

        assert_eq!(
            sink.events(),
            vec![
                RunEvent::LogsFetched { count: 1 },
                RunEvent::RecipientsRefreshed { count: 2 },
            ]
        );
    }

    #[test]
    fn test_log_sink_handles_every_event() {
        // Only checks that rendering never panics
        let sink = LogEventSink;
        sink.record(&RunEvent::LedgerSaveFailed {
            error: "disk full".to_string(),
        });
        sink.record(&RunEvent::AlertFailed {
            email: "a@example.com".to_string(),
            group_key: "Fatal".to_string(),
            attempts: 3,
            error: "smtp".to_string(),
        });
    }
}
