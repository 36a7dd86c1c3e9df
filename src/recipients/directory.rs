use crate::error::DirectoryError;
use crate::recipients::RecipientStore;
use crate::error::StrategyError;
use crate::strategies::{StrategyKind, StrategySetting};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Normalize a component name for comparison
///
/// Surrounding whitespace and quote characters are dropped and the result is
/// lowercased.
pub fn normalize_component(component: &str) -> String {
    component
        .trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'')
        .to_lowercase()
}

/// A person or team that receives alerts for a set of components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(alias = "Name")]
    pub name: String,

    /// Notification addresses, in configured order
    #[serde(default, alias = "Emails")]
    pub emails: Vec<String>,

    /// Components this recipient answers for, compared case-insensitively
    #[serde(default, alias = "ResponsibleComponents")]
    pub responsible_components: Vec<String>,

    /// Ticket-system area where this recipient's tickets are filed
    #[serde(default, alias = "Board")]
    pub board: String,

    /// Configured strategy; an unknown value is kept and fails at selection
    #[serde(default, alias = "GroupingStrategy")]
    pub grouping_strategy: StrategySetting,
}

impl Recipient {
    pub fn new(
        name: impl Into<String>,
        emails: Vec<String>,
        responsible_components: Vec<String>,
        board: impl Into<String>,
        grouping_strategy: impl Into<StrategySetting>,
    ) -> Self {
        Self {
            name: name.into(),
            emails,
            responsible_components,
            board: board.into(),
            grouping_strategy: grouping_strategy.into(),
        }
    }

    /// The strategy kind this recipient asks for
    ///
    /// # Errors
    ///
    /// `StrategyError::NotImplemented` when the configured value names no kind.
    pub fn strategy_kind(&self) -> Result<StrategyKind, StrategyError> {
        self.grouping_strategy.kind()
    }

    /// Whether this recipient answers for `component`
    pub fn is_responsible(&self, component: &str) -> bool {
        let wanted = normalize_component(component);
        if wanted.is_empty() {
            return false;
        }
        self.responsible_components
            .iter()
            .any(|candidate| normalize_component(candidate) == wanted)
    }

    /// Non-blank emails with case-insensitive duplicates removed, first spelling kept
    pub fn distinct_emails(&self) -> Vec<&str> {
        let mut seen: Vec<String> = Vec::new();
        let mut emails = Vec::new();
        for email in &self.emails {
            let trimmed = email.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lowered = trimmed.to_lowercase();
            if !seen.contains(&lowered) {
                seen.push(lowered);
                emails.push(trimmed);
            }
        }
        emails
    }
}

/// Maps components to the recipients responsible for them
///
/// The list is replaced wholesale on every successful refresh, so readers
/// never observe a half-loaded configuration.
pub struct RecipientDirectory {
    store: Box<dyn RecipientStore>,
    recipients: Vec<Recipient>,
    loaded: bool,
}

impl RecipientDirectory {
    /// Create an empty directory over `store`; call [`refresh`](Self::refresh) to load it
    pub fn new(store: Box<dyn RecipientStore>) -> Self {
        Self {
            store,
            recipients: Vec::new(),
            loaded: false,
        }
    }

    /// Reload recipients from the backing store
    ///
    /// On failure the previous list stays in place and the error is returned.
    pub fn refresh(&mut self) -> Result<usize, DirectoryError> {
        let recipients = self.store.load()?;
        let count = recipients.len();
        self.recipients = recipients;
        self.loaded = true;
        info!("Loaded {} recipients", count);
        Ok(count)
    }

    /// First recipient, in list order, responsible for `component`
    ///
    /// # Errors
    ///
    /// Returns `DirectoryError::EmptyComponent` when `component` is blank.
    pub fn resolve(&self, component: &str) -> Result<Option<&Recipient>, DirectoryError> {
        if normalize_component(component).is_empty() {
            return Err(DirectoryError::EmptyComponent);
        }
        let found = self
            .recipients
            .iter()
            .find(|recipient| recipient.is_responsible(component));
        debug!(
            "Resolved component '{}' to {:?}",
            component,
            found.map(|r| r.name.as_str())
        );
        Ok(found)
    }

    /// Every recipient, in list order
    pub fn all(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Recipients responsible for `component`, or everyone when it is absent or blank
    pub fn recipients_for(&self, component: Option<&str>) -> Vec<&Recipient> {
        match component.filter(|c| !normalize_component(c).is_empty()) {
            Some(component) => self
                .recipients
                .iter()
                .filter(|recipient| recipient.is_responsible(component))
                .collect(),
            None => self.recipients.iter().collect(),
        }
    }

    /// Whether any refresh has succeeded yet
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}
