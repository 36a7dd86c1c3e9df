use crate::alerts::ledger::SentAlertLedger;
use crate::alerts::notifier::{Notifier, RetryPolicy};
use crate::error::{OrchestratorError, StrategyError};
use crate::extract;
use crate::monitoring::{EventSink, LogEventSink, RunEvent, RunReport, SuppressionReason};
use crate::recipients::{Recipient, RecipientDirectory};
use crate::sources::LogSource;
use crate::strategies::{
    AlertGroup, GroupingStrategy, KnownProblemsFilterStrategy, StrategyKind, StrategyRegistry,
};
use crate::tickets::{TicketKind, TicketSystem};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Separator between message blocks merged into one notification
pub const BLOCK_SEPARATOR: &str = "\n-----------------------------\n";

/// Prefix of the ticket reference line appended to a message block
pub const REFERENCE_PREFIX: &str = "Taak referentie: ";

const PROBLEM_ID_MARKER: &str = "ProblemId:";
const UNKNOWN_PROBLEM: &str = "UnknownProblem";

/// Title of the ticket that tracks a component's known problem ids
pub fn known_problems_title(component: &str) -> String {
    format!("{} - KnownProblems", component)
}

/// Problem ids recorded in a known-problems ticket description
///
/// Every line containing `ProblemId:` contributes the trimmed text after its
/// last occurrence.
pub fn known_problem_ids(description: &str) -> HashSet<String> {
    description
        .lines()
        .filter(|line| line.contains(PROBLEM_ID_MARKER))
        .filter_map(|line| line.rsplit(PROBLEM_ID_MARKER).next())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn problem_id_lines<S: AsRef<str>>(ids: &[S]) -> String {
    ids.iter()
        .map(|id| format!("{} {}", PROBLEM_ID_MARKER, id.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Title of the ticket tracking the problem `first_line` belongs to
///
/// The exception type wins when present, otherwise the problem id.
pub fn ticket_title(component: &str, first_line: &str) -> String {
    match extract::exception_type(first_line) {
        Some(exception_type) => format!("{} - {}", component, exception_type),
        None => {
            let problem_id = extract::problem_id(first_line);
            if problem_id.trim().is_empty() {
                format!("{} - {}", component, UNKNOWN_PROBLEM)
            } else {
                format!("{} - {}", component, problem_id)
            }
        }
    }
}

/// `#{id} ({title})` when an id is known, the bare title otherwise
pub fn ticket_reference(title: &str, id: Option<&str>) -> String {
    match id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => format!("#{} ({})", id, title),
        None => title.to_string(),
    }
}

/// Ledger key of a merged alert for one group and address
pub fn alert_key(group_key: &str, email: &str) -> String {
    format!("{}|{}", group_key.trim(), email.trim()).to_lowercase()
}

/// Ledger key of a known-problem alert for one problem id and address
pub fn known_problem_key(component: &str, problem_id: &str, email: &str) -> String {
    format!("{}|{}|{}", component.trim(), problem_id.trim(), email.trim()).to_lowercase()
}

/// Lines of a group split per component, in first-seen order
fn lines_by_component(lines: &[String]) -> Vec<(String, Vec<&str>)> {
    let mut by_component: Vec<(String, Vec<&str>)> = Vec::new();
    for line in lines {
        let component = extract::component(line);
        if component.trim().is_empty() {
            continue;
        }
        match by_component.iter_mut().find(|(c, _)| *c == component) {
            Some((_, component_lines)) => component_lines.push(line),
            None => by_component.push((component, vec![line.as_str()])),
        }
    }
    by_component
}

fn distinct_problem_ids(lines: &[&str]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for line in lines {
        let id = extract::problem_id(line);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// State that lives for exactly one pass
#[derive(Default)]
struct RunState {
    report: RunReport,
    /// Ledger keys dispatched, or attempted, this pass
    sent_this_run: HashSet<String>,
    /// Keys delivered this pass, added to the ledger when the pass ends
    delivered: Vec<String>,
    /// Ticket references already resolved this pass, by (board, title)
    references: HashMap<(String, String), String>,
}

/// Correlates fetched logs into alerts and routes them to recipients
///
/// Each call to [`run`](Self::run) is one complete pass: refresh recipients,
/// fetch logs, then for every recipient group its relevant logs, make sure a
/// tracking ticket exists per problem, and send one merged notification per
/// group and email. Collaborator failures are reported as events and never
/// abort the pass for other recipients.
pub struct AlertOrchestrator {
    directory: RecipientDirectory,
    registry: StrategyRegistry,
    source: Arc<dyn LogSource>,
    tickets: Arc<dyn TicketSystem>,
    notifier: Arc<dyn Notifier>,
    ledger: SentAlertLedger,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl AlertOrchestrator {
    pub fn new(
        directory: RecipientDirectory,
        registry: StrategyRegistry,
        source: Arc<dyn LogSource>,
        tickets: Arc<dyn TicketSystem>,
        notifier: Arc<dyn Notifier>,
        ledger: SentAlertLedger,
    ) -> Self {
        Self {
            directory,
            registry,
            source,
            tickets,
            notifier,
            ledger,
            sink: Arc::new(LogEventSink),
            retry: RetryPolicy::default(),
        }
    }

    /// Send run events to `sink` instead of the log
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn directory(&self) -> &RecipientDirectory {
        &self.directory
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &SentAlertLedger {
        &self.ledger
    }

    fn emit(&self, state: &mut RunState, event: RunEvent) {
        self.sink.record(&event);
        state.report.apply(&event);
    }

    /// Run one complete orchestration pass
    ///
    /// # Errors
    ///
    /// Fails when logs cannot be fetched, when a recipient asks for a strategy
    /// that is unknown or not registered, or when recipients fail to load and
    /// no earlier list is available. Everything else is reported in the
    /// returned `RunReport` and through the event sink.
    pub async fn run(&mut self) -> Result<RunReport, OrchestratorError> {
        let mut state = RunState::default();

        match self.directory.refresh() {
            Ok(count) => self.emit(&mut state, RunEvent::RecipientsRefreshed { count }),
            Err(e) => {
                self.emit(
                    &mut state,
                    RunEvent::RecipientsRefreshFailed {
                        error: e.to_string(),
                    },
                );
                if !self.directory.is_loaded() {
                    return Err(e.into());
                }
            }
        }

        self.check_strategies()?;

        let logs = self.source.fetch_logs().await?;
        self.emit(&mut state, RunEvent::LogsFetched { count: logs.len() });

        for recipient in self.directory.all() {
            self.process_recipient(recipient, &logs, &mut state).await?;
        }

        let delivered = std::mem::take(&mut state.delivered);
        for key in delivered {
            self.ledger.record(key);
        }
        if let Err(e) = self.ledger.persist() {
            self.emit(
                &mut state,
                RunEvent::LedgerSaveFailed {
                    error: e.to_string(),
                },
            );
        }

        Ok(state.report)
    }

    /// Fail fast when any recipient asks for a strategy nobody registered
    fn check_strategies(&self) -> Result<(), StrategyError> {
        for recipient in self.directory.all() {
            self.select_registered(recipient.strategy_kind()?)?;
        }
        Ok(())
    }

    fn select_registered(
        &self,
        kind: StrategyKind,
    ) -> Result<Option<Arc<dyn GroupingStrategy>>, StrategyError> {
        if kind == StrategyKind::KnownProblemsFilter {
            return Ok(None);
        }
        self.registry
            .find(kind)
            .map(Some)
            .ok_or_else(|| StrategyError::NotImplemented(kind.to_string()))
    }

    async fn process_recipient(
        &self,
        recipient: &Recipient,
        logs: &[String],
        state: &mut RunState,
    ) -> Result<(), StrategyError> {
        let kind = recipient.strategy_kind()?;
        let relevant: Vec<String> = logs
            .iter()
            .filter(|line| recipient.is_responsible(&extract::component(line)))
            .cloned()
            .collect();

        if relevant.is_empty() {
            self.emit(
                state,
                RunEvent::RecipientSkipped {
                    recipient: recipient.name.clone(),
                    strategy: kind.to_string(),
                },
            );
            return Ok(());
        }

        let strategy: Arc<dyn GroupingStrategy> = match self.select_registered(kind)? {
            Some(strategy) => strategy,
            None => Arc::new(
                self.known_problems_strategy(recipient, &relevant, state)
                    .await,
            ),
        };

        let groups = strategy.group_logs(&relevant);
        self.emit(
            state,
            RunEvent::RecipientGrouped {
                recipient: recipient.name.clone(),
                strategy: kind.to_string(),
                relevant_logs: relevant.len(),
                groups: groups.len(),
            },
        );

        for group in &groups {
            if strategy.kind() == StrategyKind::KnownProblemsFilter {
                self.process_known_problems_group(recipient, group, state)
                    .await;
            } else {
                self.process_general_group(recipient, group, state).await;
            }
        }

        Ok(())
    }

    /// Build a known-problems filter over a snapshot of the recipient's tickets
    ///
    /// The ticket of every component in `relevant` is read once up front so
    /// the strategy's synchronous lookup never touches the ticket system.
    async fn known_problems_strategy(
        &self,
        recipient: &Recipient,
        relevant: &[String],
        state: &mut RunState,
    ) -> KnownProblemsFilterStrategy {
        let mut snapshot: HashMap<String, HashSet<String>> = HashMap::new();

        for line in relevant {
            let component = extract::component(line);
            if snapshot.contains_key(&component) {
                continue;
            }
            let title = known_problems_title(&component);
            let known = match self.tickets.description(&recipient.board, &title).await {
                Ok(description) => description
                    .map(|d| known_problem_ids(&d))
                    .unwrap_or_default(),
                Err(e) => {
                    self.emit(
                        state,
                        RunEvent::KnownProblemsLookupFailed {
                            board: recipient.board.clone(),
                            component: component.clone(),
                            error: e.to_string(),
                        },
                    );
                    HashSet::new()
                }
            };
            snapshot.insert(component, known);
        }

        KnownProblemsFilterStrategy::new(move |component| {
            snapshot.get(component).cloned().unwrap_or_default()
        })
    }

    async fn process_known_problems_group(
        &self,
        recipient: &Recipient,
        group: &AlertGroup,
        state: &mut RunState,
    ) {
        let board = recipient.board.as_str();

        for (component, lines) in lines_by_component(&group.lines) {
            let title = known_problems_title(&component);
            let new_ids = distinct_problem_ids(&lines);

            match self.tickets.ticket_exists(board, &title).await {
                Ok(true) => {
                    let description = match self.tickets.description(board, &title).await {
                        Ok(description) => description.unwrap_or_default(),
                        Err(e) => {
                            self.emit(
                                state,
                                RunEvent::TicketLookupFailed {
                                    board: board.to_string(),
                                    title,
                                    error: e.to_string(),
                                },
                            );
                            continue;
                        }
                    };

                    let known = known_problem_ids(&description);
                    let to_add: Vec<&String> =
                        new_ids.iter().filter(|id| !known.contains(*id)).collect();
                    if to_add.is_empty() {
                        continue;
                    }

                    let updated = if description.trim().is_empty() {
                        problem_id_lines(&to_add)
                    } else {
                        format!("{}\n{}", description, problem_id_lines(&to_add))
                    };
                    let event = match self
                        .tickets
                        .update_description(board, &title, &updated)
                        .await
                    {
                        Ok(()) => RunEvent::TicketUpdated {
                            board: board.to_string(),
                            title: title.clone(),
                            added_problem_ids: to_add.len(),
                        },
                        Err(e) => RunEvent::TicketUpdateFailed {
                            board: board.to_string(),
                            title: title.clone(),
                            error: e.to_string(),
                        },
                    };
                    self.emit(state, event);
                }
                Ok(false) => {
                    let description = problem_id_lines(&new_ids);
                    let event = match self
                        .tickets
                        .create_ticket(board, &title, &description, TicketKind::Bug)
                        .await
                    {
                        Ok(id) => RunEvent::TicketCreated {
                            board: board.to_string(),
                            reference: ticket_reference(&title, id.as_deref()),
                            title: title.clone(),
                        },
                        Err(e) => RunEvent::TicketCreateFailed {
                            board: board.to_string(),
                            title: title.clone(),
                            error: e.to_string(),
                        },
                    };
                    self.emit(state, event);
                }
                Err(e) => {
                    self.emit(
                        state,
                        RunEvent::TicketLookupFailed {
                            board: board.to_string(),
                            title,
                            error: e.to_string(),
                        },
                    );
                    continue;
                }
            }

            for email in recipient.distinct_emails() {
                self.dispatch_known_problems(email, &group.key, &component, &lines, state)
                    .await;
            }
        }
    }

    /// Send the lines whose problem ids this pass and the ledger have not covered yet
    ///
    /// Ledger keys are per problem id, so a restart with the same problems stays
    /// quiet while a new id on an already-alerted component still goes out.
    async fn dispatch_known_problems(
        &self,
        email: &str,
        group_key: &str,
        component: &str,
        lines: &[&str],
        state: &mut RunState,
    ) {
        let mut fresh_lines: Vec<&str> = Vec::new();
        let mut fresh_keys: Vec<String> = Vec::new();
        let mut reason = SuppressionReason::SentThisRun;

        for line in lines {
            let key = known_problem_key(component, &extract::problem_id(line), email);
            if state.sent_this_run.contains(&key) {
                continue;
            }
            if self.ledger.contains(&key) {
                reason = SuppressionReason::Ledger;
                continue;
            }
            fresh_lines.push(*line);
            if !fresh_keys.contains(&key) {
                fresh_keys.push(key);
            }
        }

        if fresh_lines.is_empty() {
            self.emit(
                state,
                RunEvent::AlertSuppressed {
                    email: email.to_string(),
                    group_key: group_key.to_string(),
                    reason,
                },
            );
            return;
        }

        state.sent_this_run.extend(fresh_keys.iter().cloned());
        if self
            .deliver(email, group_key, &fresh_lines.join("\n"), state)
            .await
        {
            state.delivered.extend(fresh_keys);
        }
    }

    async fn process_general_group(
        &self,
        recipient: &Recipient,
        group: &AlertGroup,
        state: &mut RunState,
    ) {
        let by_component = lines_by_component(&group.lines);
        let mut references: HashMap<&str, String> = HashMap::new();
        let mut processed: HashSet<String> = HashSet::new();

        for (component, lines) in &by_component {
            if !processed.insert(component.to_lowercase()) {
                continue;
            }
            let Some(first_line) = lines.first() else {
                continue;
            };
            let title = ticket_title(component, first_line);
            let reference = self
                .resolve_reference(&recipient.board, &title, &lines.join("\n"), state)
                .await;
            references.insert(component.as_str(), reference);
        }

        // Ordered per email so merged messages are stable
        let mut blocks_per_email: Vec<(&str, Vec<String>)> = Vec::new();
        for (component, lines) in &by_component {
            if !recipient.is_responsible(component) || lines.is_empty() {
                continue;
            }
            let mut block = lines.join("\n");
            if let Some(reference) = references.get(component.as_str()) {
                block.push('\n');
                block.push_str(REFERENCE_PREFIX);
                block.push_str(reference);
            }

            for email in recipient.distinct_emails() {
                let position = match blocks_per_email
                    .iter()
                    .position(|(e, _)| e.eq_ignore_ascii_case(email))
                {
                    Some(position) => position,
                    None => {
                        blocks_per_email.push((email, Vec::new()));
                        blocks_per_email.len() - 1
                    }
                };
                let blocks = &mut blocks_per_email[position].1;
                if !blocks.contains(&block) {
                    blocks.push(block.clone());
                }
            }
        }

        for (email, blocks) in blocks_per_email {
            if blocks.is_empty() {
                continue;
            }
            self.dispatch(email, &group.key, &blocks.join(BLOCK_SEPARATOR), state)
                .await;
        }
    }

    /// Ensure a ticket titled `title` exists on `board` and return its reference
    ///
    /// Lookup and creation failures degrade to the bare title.
    async fn resolve_reference(
        &self,
        board: &str,
        title: &str,
        description: &str,
        state: &mut RunState,
    ) -> String {
        let memo_key = (board.to_string(), title.to_string());
        if let Some(reference) = state.references.get(&memo_key) {
            return reference.clone();
        }

        let reference = match self.tickets.ticket_exists(board, title).await {
            Ok(false) => match self
                .tickets
                .create_ticket(board, title, description, TicketKind::Bug)
                .await
            {
                Ok(id) => {
                    let reference = ticket_reference(title, id.as_deref());
                    self.emit(
                        state,
                        RunEvent::TicketCreated {
                            board: board.to_string(),
                            title: title.to_string(),
                            reference: reference.clone(),
                        },
                    );
                    reference
                }
                Err(e) => {
                    self.emit(
                        state,
                        RunEvent::TicketCreateFailed {
                            board: board.to_string(),
                            title: title.to_string(),
                            error: e.to_string(),
                        },
                    );
                    title.to_string()
                }
            },
            Ok(true) => match self.tickets.ticket_id(board, title).await {
                Ok(id) => ticket_reference(title, id.as_deref()),
                Err(e) => {
                    self.emit(
                        state,
                        RunEvent::TicketLookupFailed {
                            board: board.to_string(),
                            title: title.to_string(),
                            error: e.to_string(),
                        },
                    );
                    title.to_string()
                }
            },
            Err(e) => {
                self.emit(
                    state,
                    RunEvent::TicketLookupFailed {
                        board: board.to_string(),
                        title: title.to_string(),
                        error: e.to_string(),
                    },
                );
                title.to_string()
            }
        };

        state.references.insert(memo_key, reference.clone());
        reference
    }

    /// Send one merged notification unless this pass or the ledger already covered it
    async fn dispatch(&self, email: &str, group_key: &str, message: &str, state: &mut RunState) {
        let unique_key = alert_key(group_key, email);

        if !state.sent_this_run.insert(unique_key.clone()) {
            self.emit(
                state,
                RunEvent::AlertSuppressed {
                    email: email.to_string(),
                    group_key: group_key.to_string(),
                    reason: SuppressionReason::SentThisRun,
                },
            );
            return;
        }

        if self.ledger.contains(&unique_key) {
            self.emit(
                state,
                RunEvent::AlertSuppressed {
                    email: email.to_string(),
                    group_key: group_key.to_string(),
                    reason: SuppressionReason::Ledger,
                },
            );
            return;
        }

        if self.deliver(email, group_key, message, state).await {
            state.delivered.push(unique_key);
        }
    }

    /// Send through the retry policy and report the outcome
    async fn deliver(
        &self,
        email: &str,
        group_key: &str,
        message: &str,
        state: &mut RunState,
    ) -> bool {
        match self
            .retry
            .send(self.notifier.as_ref(), message, email, group_key)
            .await
        {
            Ok(_) => {
                self.emit(
                    state,
                    RunEvent::AlertSent {
                        email: email.to_string(),
                        group_key: group_key.to_string(),
                    },
                );
                true
            }
            Err(failure) => {
                self.emit(
                    state,
                    RunEvent::AlertFailed {
                        email: email.to_string(),
                        group_key: group_key.to_string(),
                        attempts: failure.attempts,
                        error: failure.error.to_string(),
                    },
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::ledger::InMemoryLedgerStore;
    use crate::error::{NotifyError, StoreError, TicketError};
    use crate::monitoring::RecordingEventSink;
    use crate::recipients::store::MockRecipientStore;
    use crate::alerts::ledger::LedgerStore;
    use crate::recipients::{JsonRecipientStore, MemoryRecipientStore};
    use crate::sources::file_source::FileLogSource;
    use crate::sources::memory_source::MemoryLogSource;
    use crate::tickets::InMemoryTicketSystem;
    use crate::BoxFuture;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Sent {
        message: String,
        email: String,
        group_key: String,
    }

    /// Records every alert; fails for addresses listed in `failing`
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Sent>>,
        failing: Mutex<HashSet<String>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn fail_for(&self, email: &str) {
            self.failing.lock().unwrap().insert(email.to_string());
        }

        fn recover(&self) {
            self.failing.lock().unwrap().clear();
        }
    }

    impl Notifier for RecordingNotifier {
        fn send_alert<'a>(
            &'a self,
            message: &'a str,
            recipient_email: &'a str,
            group_key: &'a str,
        ) -> BoxFuture<'a, Result<(), NotifyError>> {
            Box::pin(async move {
                if self.failing.lock().unwrap().contains(recipient_email) {
                    return Err(NotifyError::NotificationFailed("smtp down".to_string()));
                }
                self.sent.lock().unwrap().push(Sent {
                    message: message.to_string(),
                    email: recipient_email.to_string(),
                    group_key: group_key.to_string(),
                });
                Ok(())
            })
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// In-memory board with switchable failures
    #[derive(Default)]
    struct FlakyTickets {
        inner: InMemoryTicketSystem,
        fail_exists: bool,
        fail_create: bool,
        fail_update: bool,
        ticket_id_unsupported: bool,
    }

    fn transport_error<'a, T: Send + 'a>() -> BoxFuture<'a, Result<T, TicketError>> {
        Box::pin(async { Err(TicketError::Transport("connection reset".to_string())) })
    }

    impl TicketSystem for FlakyTickets {
        fn ticket_exists<'a>(
            &'a self,
            board: &'a str,
            title: &'a str,
        ) -> BoxFuture<'a, Result<bool, TicketError>> {
            if self.fail_exists {
                return transport_error();
            }
            self.inner.ticket_exists(board, title)
        }

        fn create_ticket<'a>(
            &'a self,
            board: &'a str,
            title: &'a str,
            description: &'a str,
            kind: TicketKind,
        ) -> BoxFuture<'a, Result<Option<String>, TicketError>> {
            if self.fail_create {
                return transport_error();
            }
            self.inner.create_ticket(board, title, description, kind)
        }

        fn ticket_id<'a>(
            &'a self,
            board: &'a str,
            title: &'a str,
        ) -> BoxFuture<'a, Result<Option<String>, TicketError>> {
            if self.ticket_id_unsupported {
                return Box::pin(async { Err(TicketError::Unsupported("ticket_id")) });
            }
            self.inner.ticket_id(board, title)
        }

        fn description<'a>(
            &'a self,
            board: &'a str,
            title: &'a str,
        ) -> BoxFuture<'a, Result<Option<String>, TicketError>> {
            self.inner.description(board, title)
        }

        fn update_description<'a>(
            &'a self,
            board: &'a str,
            title: &'a str,
            description: &'a str,
        ) -> BoxFuture<'a, Result<(), TicketError>> {
            if self.fail_update {
                return transport_error();
            }
            self.inner.update_description(board, title, description)
        }
    }

    const BOARD: &str = "Ops\\Alerts";

    fn recipient(name: &str, components: &[&str], strategy: StrategyKind) -> Recipient {
        Recipient::new(
            name,
            vec![format!("{}@example.com", name)],
            components.iter().map(|c| c.to_string()).collect(),
            BOARD,
            strategy,
        )
    }

    fn fatal(component: &str, problem_id: &str) -> String {
        format!(
            "Timestamp: 2024-06-01T12:00:00Z | Component: {} | Severity: 3 | ProblemId: {}",
            component, problem_id
        )
    }

    struct Harness {
        recipients: Arc<MemoryRecipientStore>,
        source: Arc<MemoryLogSource>,
        tickets: Arc<InMemoryTicketSystem>,
        notifier: Arc<RecordingNotifier>,
        ledger_store: Arc<InMemoryLedgerStore>,
        sink: Arc<RecordingEventSink>,
    }

    impl Harness {
        fn new(recipients: Vec<Recipient>, logs: Vec<String>) -> Self {
            Self {
                recipients: Arc::new(MemoryRecipientStore::new(recipients)),
                source: Arc::new(MemoryLogSource::new(logs)),
                tickets: Arc::new(InMemoryTicketSystem::new()),
                notifier: Arc::new(RecordingNotifier::default()),
                ledger_store: Arc::new(InMemoryLedgerStore::new()),
                sink: Arc::new(RecordingEventSink::new()),
            }
        }

        fn orchestrator(&self) -> AlertOrchestrator {
            self.build(self.tickets.clone(), StrategyRegistry::with_defaults())
        }

        fn build(
            &self,
            tickets: Arc<dyn TicketSystem>,
            registry: StrategyRegistry,
        ) -> AlertOrchestrator {
            let directory = RecipientDirectory::new(Box::new(self.recipients.clone()));
            let ledger = SentAlertLedger::load(Box::new(self.ledger_store.clone())).unwrap();
            AlertOrchestrator::new(
                directory,
                registry,
                self.source.clone(),
                tickets,
                self.notifier.clone(),
                ledger,
            )
            .with_event_sink(self.sink.clone())
        }

        fn has_event(&self, predicate: impl Fn(&RunEvent) -> bool) -> bool {
            self.sink.events().iter().any(predicate)
        }
    }

    #[test]
    fn test_known_problem_ids_parsing() {
        let description = "Tracked problems\nProblemId: P1\n  ProblemId:  P2  \nnote ProblemId: old ProblemId: P3\nProblemId:   \n";
        let ids = known_problem_ids(description);
        let expected: HashSet<String> =
            ["P1", "P2", "P3"].iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_ticket_title_prefers_exception_type() {
        assert_eq!(
            ticket_title("api", "Component: api | ExceptionType: Timeout | ProblemId: P1"),
            "api - Timeout"
        );
        assert_eq!(ticket_title("api", "Component: api | ProblemId: P1"), "api - P1");
    }

    #[test]
    fn test_ticket_reference_format() {
        assert_eq!(ticket_reference("api - P1", Some("42")), "#42 (api - P1)");
        assert_eq!(ticket_reference("api - P1", Some(" ")), "api - P1");
        assert_eq!(ticket_reference("api - P1", None), "api - P1");
    }

    #[tokio::test]
    async fn test_single_fatal_log_sends_one_alert() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Component)],
            vec!["Timestamp: 2024-06-01T12:00:00Z | Endpoint: compA | Severity: 3".to_string()],
        );

        let report = harness.orchestrator().run().await.unwrap();
        let sent = harness.notifier.sent();

        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].email, "user1@example.com");
        assert_eq!(sent[0].group_key, "compA");
        assert!(sent[0].message.contains("compA"));
        assert!(sent[0].message.contains("\nTaak referentie: #1 (compA - "));
        assert_eq!(report.alerts_sent, 1);
        assert_eq!(report.tickets_created, 1);
        assert_eq!(harness.tickets.tickets()[0].kind, TicketKind::Bug);
    }

    #[tokio::test]
    async fn test_disjoint_recipients_get_only_their_alerts() {
        let harness = Harness::new(
            vec![
                recipient("user1", &["compA"], StrategyKind::Component),
                recipient("user2", &["compB"], StrategyKind::Component),
            ],
            vec![fatal("compA", "P1"), fatal("compB", "P2")],
        );

        harness.orchestrator().run().await.unwrap();
        let sent = harness.notifier.sent();

        assert_eq!(sent.len(), 2);
        let user1: Vec<&Sent> = sent.iter().filter(|s| s.email == "user1@example.com").collect();
        let user2: Vec<&Sent> = sent.iter().filter(|s| s.email == "user2@example.com").collect();
        assert_eq!(user1.len(), 1);
        assert_eq!(user2.len(), 1);
        assert!(user1[0].message.contains("compA") && !user1[0].message.contains("compB"));
        assert!(user2[0].message.contains("compB") && !user2[0].message.contains("compA"));
    }

    #[tokio::test]
    async fn test_duplicate_log_in_one_fetch_sends_once() {
        let line = fatal("compA", "P1");
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Severity)],
            vec![line.clone(), line.clone()],
        );

        harness.orchestrator().run().await.unwrap();
        let sent = harness.notifier.sent();

        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].group_key, "Fatal");
        assert_eq!(sent[0].message.matches(&line).count(), 1);
    }

    #[tokio::test]
    async fn test_known_problems_across_runs() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::KnownProblemsFilter)],
            vec![fatal("compA", "P1")],
        );
        let mut orchestrator = harness.orchestrator();
        let title = known_problems_title("compA");

        orchestrator.run().await.unwrap();
        assert_eq!(harness.notifier.sent().len(), 1);
        assert_eq!(
            harness.tickets.ticket(BOARD, &title).unwrap().description,
            "ProblemId: P1"
        );

        harness.source.set_logs(vec![fatal("compA", "P2")]);
        let report = orchestrator.run().await.unwrap();
        assert_eq!(harness.notifier.sent().len(), 2);
        assert_eq!(report.tickets_updated, 1);
        let description = harness.tickets.ticket(BOARD, &title).unwrap().description;
        assert!(description.contains("ProblemId: P1"));
        assert!(description.contains("ProblemId: P2"));
        assert!(harness.notifier.sent()[1].message.contains("ProblemId: P2"));

        let report = orchestrator.run().await.unwrap();
        assert_eq!(harness.notifier.sent().len(), 2);
        assert_eq!(report.alerts_sent, 0);
        assert_eq!(report.groups, 0);
    }

    #[tokio::test]
    async fn test_known_problems_update_failure_still_alerts() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::KnownProblemsFilter)],
            vec![fatal("compA", "P2")],
        );
        let tickets = Arc::new(FlakyTickets {
            fail_update: true,
            ..FlakyTickets::default()
        });
        tickets
            .inner
            .create_ticket(BOARD, &known_problems_title("compA"), "ProblemId: P1", TicketKind::Bug)
            .await
            .unwrap();

        let report = harness
            .build(tickets.clone(), StrategyRegistry::with_defaults())
            .run()
            .await
            .unwrap();

        assert_eq!(report.alerts_sent, 1);
        assert!(harness.has_event(|e| matches!(e, RunEvent::TicketUpdateFailed { .. })));
        assert_eq!(
            tickets.inner.ticket(BOARD, &known_problems_title("compA")).unwrap().description,
            "ProblemId: P1"
        );
    }

    #[tokio::test]
    async fn test_ledger_suppresses_repeat_across_runs() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Component)],
            vec![fatal("compA", "P1")],
        );

        let first = harness.orchestrator().run().await.unwrap();
        assert_eq!(first.alerts_sent, 1);
        assert!(harness.ledger_store.keys().contains("compa|user1@example.com"));

        // A fresh orchestrator loads the persisted ledger
        let second = harness.orchestrator().run().await.unwrap();
        assert_eq!(second.alerts_sent, 0);
        assert_eq!(second.alerts_suppressed, 1);
        assert_eq!(harness.notifier.sent().len(), 1);
        assert!(harness.has_event(|e| matches!(
            e,
            RunEvent::AlertSuppressed {
                reason: SuppressionReason::Ledger,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_failed_send_is_retried_next_run() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Component)],
            vec![fatal("compA", "P1")],
        );
        harness.notifier.fail_for("user1@example.com");
        let mut orchestrator = harness.orchestrator();

        let first = orchestrator.run().await.unwrap();
        assert_eq!(first.alerts_failed, 1);
        assert!(harness.ledger_store.keys().is_empty());

        harness.notifier.recover();
        let second = orchestrator.run().await.unwrap();
        assert_eq!(second.alerts_sent, 1);
        assert_eq!(harness.notifier.sent().len(), 1);
        // The ticket from the first run is reused
        assert_eq!(harness.tickets.len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_stop_other_recipients() {
        let harness = Harness::new(
            vec![
                recipient("user1", &["compA"], StrategyKind::Component),
                recipient("user2", &["compA"], StrategyKind::Component),
            ],
            vec![fatal("compA", "P1")],
        );
        harness.notifier.fail_for("user1@example.com");

        let report = harness.orchestrator().run().await.unwrap();

        assert_eq!(report.alerts_failed, 1);
        assert_eq!(report.alerts_sent, 1);
        assert_eq!(harness.notifier.sent()[0].email, "user2@example.com");
        // Same title on the same board: one ticket, created once
        assert_eq!(harness.tickets.len(), 1);
    }

    #[tokio::test]
    async fn test_components_merge_into_one_message() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA", "compB"], StrategyKind::Severity)],
            vec![fatal("compA", "P1"), fatal("compB", "P2")],
        );

        harness.orchestrator().run().await.unwrap();
        let sent = harness.notifier.sent();

        assert_eq!(sent.len(), 1);
        let blocks: Vec<&str> = sent[0].message.split(BLOCK_SEPARATOR).collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].ends_with("Taak referentie: #1 (compA - P1)"));
        assert!(blocks[1].ends_with("Taak referentie: #2 (compB - P2)"));
    }

    #[tokio::test]
    async fn test_emails_are_distinct_case_insensitively() {
        let mut user = recipient("user1", &["compA"], StrategyKind::Component);
        user.emails = vec![
            "user1@example.com".to_string(),
            "USER1@example.com".to_string(),
            "oncall@example.com".to_string(),
        ];
        let harness = Harness::new(vec![user], vec![fatal("compA", "P1")]);

        harness.orchestrator().run().await.unwrap();
        let emails: Vec<String> = harness.notifier.sent().into_iter().map(|s| s.email).collect();

        assert_eq!(emails, vec!["user1@example.com", "oncall@example.com"]);
    }

    #[tokio::test]
    async fn test_existing_ticket_reference_uses_its_id() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Component)],
            vec![fatal("compA", "P1")],
        );
        harness
            .tickets
            .create_ticket(BOARD, "other", "", TicketKind::Task)
            .await
            .unwrap();
        harness
            .tickets
            .create_ticket(BOARD, "compA - P1", "", TicketKind::Bug)
            .await
            .unwrap();

        let report = harness.orchestrator().run().await.unwrap();

        assert_eq!(report.tickets_created, 0);
        assert!(harness.notifier.sent()[0]
            .message
            .ends_with("Taak referentie: #2 (compA - P1)"));
    }

    #[tokio::test]
    async fn test_unsupported_ticket_id_degrades_to_title() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Component)],
            vec![fatal("compA", "P1")],
        );
        let tickets = Arc::new(FlakyTickets {
            ticket_id_unsupported: true,
            ..FlakyTickets::default()
        });
        tickets
            .inner
            .create_ticket(BOARD, "compA - P1", "", TicketKind::Bug)
            .await
            .unwrap();

        let report = harness
            .build(tickets, StrategyRegistry::with_defaults())
            .run()
            .await
            .unwrap();

        assert_eq!(report.alerts_sent, 1);
        assert!(harness.notifier.sent()[0]
            .message
            .ends_with("Taak referentie: compA - P1"));
        assert!(harness.has_event(|e| matches!(e, RunEvent::TicketLookupFailed { .. })));
    }

    #[tokio::test]
    async fn test_ticket_failures_degrade_to_title() {
        for tickets in [
            FlakyTickets {
                fail_create: true,
                ..FlakyTickets::default()
            },
            FlakyTickets {
                fail_exists: true,
                ..FlakyTickets::default()
            },
        ] {
            let harness = Harness::new(
                vec![recipient("user1", &["compA"], StrategyKind::Component)],
                vec![fatal("compA", "P1")],
            );

            let report = harness
                .build(Arc::new(tickets), StrategyRegistry::with_defaults())
                .run()
                .await
                .unwrap();

            assert_eq!(report.alerts_sent, 1);
            assert_eq!(report.collaborator_errors, 1);
            assert!(harness.notifier.sent()[0]
                .message
                .ends_with("Taak referentie: compA - P1"));
        }
    }

    #[tokio::test]
    async fn test_unregistered_strategy_fails_fast() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Severity)],
            vec![fatal("compA", "P1")],
        );
        let mut registry = StrategyRegistry::new();
        registry.add(StrategyKind::Component.build());

        let result = harness
            .build(harness.tickets.clone(), registry)
            .run()
            .await;

        assert!(matches!(
            result,
            Err(OrchestratorError::Strategy(StrategyError::NotImplemented(ref kind))) if kind == "Severity"
        ));
        assert!(harness.notifier.sent().is_empty());
        assert!(harness.tickets.is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_aborts_run() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Component)],
            Vec::new(),
        );
        let directory = RecipientDirectory::new(Box::new(harness.recipients.clone()));
        let mut orchestrator = AlertOrchestrator::new(
            directory,
            StrategyRegistry::with_defaults(),
            Arc::new(FileLogSource::new("/nonexistent/alerts/pending.log")),
            harness.tickets.clone(),
            harness.notifier.clone(),
            SentAlertLedger::empty(Box::new(InMemoryLedgerStore::new())),
        );

        let result = orchestrator.run().await;
        assert!(matches!(result, Err(OrchestratorError::Source(_))));
    }

    #[tokio::test]
    async fn test_recipient_without_relevant_logs_is_skipped() {
        let harness = Harness::new(
            vec![
                recipient("user1", &["compA"], StrategyKind::Component),
                recipient("user2", &["compZ"], StrategyKind::Component),
            ],
            vec![fatal("compA", "P1"), "Component: compZ | Severity: 1".to_string()],
        );

        let report = harness.orchestrator().run().await.unwrap();

        // user2 has a relevant Info line, but ByComponent drops it
        assert_eq!(report.recipients_processed, 2);
        assert_eq!(report.alerts_sent, 1);

        harness.source.set_logs(vec![fatal("compA", "P9")]);
        let report = harness.orchestrator().run().await.unwrap();
        assert_eq!(report.recipients_skipped, 1);
        assert!(harness.has_event(|e| matches!(
            e,
            RunEvent::RecipientSkipped { recipient, .. } if recipient == "user2"
        )));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_recipients() {
        let mut store = MockRecipientStore::new();
        let mut calls = 0;
        store.expect_load().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![recipient("user1", &["compA"], StrategyKind::Severity)])
            } else {
                Err(StoreError::ParseError("half-written file".to_string()))
            }
        });
        let harness = Harness::new(Vec::new(), vec![fatal("compA", "P1")]);
        let mut orchestrator = AlertOrchestrator::new(
            RecipientDirectory::new(Box::new(store)),
            StrategyRegistry::with_defaults(),
            harness.source.clone(),
            harness.tickets.clone(),
            harness.notifier.clone(),
            SentAlertLedger::empty(Box::new(InMemoryLedgerStore::new())),
        )
        .with_event_sink(harness.sink.clone());

        orchestrator.run().await.unwrap();
        harness
            .source
            .set_logs(vec!["Component: compA | Severity: 2 | ProblemId: W1".to_string()]);
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.collaborator_errors, 1);
        assert_eq!(report.alerts_sent, 1);
        assert_eq!(orchestrator.directory().len(), 1);
        assert_eq!(harness.notifier.sent()[1].group_key, "Warning");
        assert!(harness.has_event(|e| matches!(e, RunEvent::RecipientsRefreshFailed { .. })));
    }

    #[tokio::test]
    async fn test_retry_policy_applies_to_dispatch() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Component)],
            vec![fatal("compA", "P1")],
        );
        harness.notifier.fail_for("user1@example.com");

        let report = harness
            .orchestrator()
            .with_retry_policy(RetryPolicy::new(3, std::time::Duration::from_millis(1)))
            .run()
            .await
            .unwrap();

        assert!(harness.has_event(|e| matches!(e, RunEvent::AlertFailed { attempts: 3, .. })));
        assert_eq!(report.alerts_failed, 1);
    }

    #[tokio::test]
    async fn test_unknown_strategy_in_recipient_file_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipients.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "good", "emails": ["good@example.com"], "responsibleComponents": ["compA"], "board": "Ops", "groupingStrategy": "Component"},
                {"name": "bad", "emails": ["bad@example.com"], "responsibleComponents": ["compA"], "board": "Ops", "groupingStrategy": "Correlation"}
            ]"#,
        )
        .unwrap();
        let harness = Harness::new(Vec::new(), vec![fatal("compA", "P1")]);
        let mut orchestrator = AlertOrchestrator::new(
            RecipientDirectory::new(Box::new(JsonRecipientStore::new(&path))),
            StrategyRegistry::with_defaults(),
            harness.source.clone(),
            harness.tickets.clone(),
            harness.notifier.clone(),
            SentAlertLedger::empty(Box::new(InMemoryLedgerStore::new())),
        )
        .with_event_sink(harness.sink.clone());

        let result = orchestrator.run().await;

        assert!(matches!(
            result,
            Err(OrchestratorError::Strategy(StrategyError::NotImplemented(ref kind))) if kind == "Correlation"
        ));
        assert_eq!(orchestrator.directory().len(), 2);
        assert!(harness.notifier.sent().is_empty());
        assert!(harness.tickets.is_empty());
    }

    #[tokio::test]
    async fn test_first_refresh_failure_fails_run() {
        let mut store = MockRecipientStore::new();
        store
            .expect_load()
            .times(1)
            .returning(|| Err(StoreError::ParseError("truncated file".to_string())));
        let harness = Harness::new(Vec::new(), vec![fatal("compA", "P1")]);
        let mut orchestrator = AlertOrchestrator::new(
            RecipientDirectory::new(Box::new(store)),
            StrategyRegistry::with_defaults(),
            harness.source.clone(),
            harness.tickets.clone(),
            harness.notifier.clone(),
            SentAlertLedger::empty(Box::new(InMemoryLedgerStore::new())),
        )
        .with_event_sink(harness.sink.clone());

        let result = orchestrator.run().await;

        assert!(matches!(result, Err(OrchestratorError::Recipients(_))));
        assert!(harness.has_event(|e| matches!(e, RunEvent::RecipientsRefreshFailed { .. })));
        assert!(!harness.has_event(|e| matches!(e, RunEvent::LogsFetched { .. })));
    }

    #[tokio::test]
    async fn test_known_problems_respect_ledger_after_restart() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::KnownProblemsFilter)],
            vec![fatal("compA", "P1")],
        );

        let first = harness.orchestrator().run().await.unwrap();
        assert_eq!(first.alerts_sent, 1);
        assert!(harness
            .ledger_store
            .keys()
            .contains(&known_problem_key("compA", "P1", "user1@example.com")));

        // A restart with a fresh ticket board still finds the alert in the ledger
        let restarted = Harness {
            tickets: Arc::new(InMemoryTicketSystem::new()),
            ..harness
        };
        let second = restarted.orchestrator().run().await.unwrap();
        assert_eq!(second.alerts_sent, 0);
        assert_eq!(second.alerts_suppressed, 1);
        assert_eq!(second.tickets_created, 1);
        assert_eq!(restarted.notifier.sent().len(), 1);
        assert!(restarted.has_event(|e| matches!(
            e,
            RunEvent::AlertSuppressed {
                reason: SuppressionReason::Ledger,
                ..
            }
        )));

        // A new problem id on the same component still goes out, alone
        restarted
            .source
            .set_logs(vec![fatal("compA", "P1"), fatal("compA", "P2")]);
        let third = Harness {
            tickets: Arc::new(InMemoryTicketSystem::new()),
            ..restarted
        };
        let report = third.orchestrator().run().await.unwrap();
        assert_eq!(report.alerts_sent, 1);
        let sent = third.notifier.sent();
        assert!(sent[1].message.contains("ProblemId: P2"));
        assert!(!sent[1].message.contains("ProblemId: P1"));
    }

    #[tokio::test]
    async fn test_ledger_matches_email_in_any_case() {
        let harness = Harness::new(
            vec![recipient("user1", &["compA"], StrategyKind::Component)],
            vec![fatal("compA", "P1")],
        );
        harness
            .ledger_store
            .save_sent_keys(&HashSet::from(["compA|USER1@Example.com".to_string()]))
            .unwrap();

        let report = harness.orchestrator().run().await.unwrap();

        assert_eq!(report.alerts_sent, 0);
        assert_eq!(report.alerts_suppressed, 1);
        assert!(harness.notifier.sent().is_empty());
    }

    #[test]
    fn test_ledger_keys_are_normalized() {
        assert_eq!(alert_key("compA", " User1@Example.com "), "compa|user1@example.com");
        assert_eq!(
            known_problem_key("compA", "P1", "User1@Example.com"),
            "compa|p1|user1@example.com"
        );
    }
}
