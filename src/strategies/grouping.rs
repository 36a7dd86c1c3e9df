//! Built-in grouping strategies
//!
//! Each strategy partitions a recipient's relevant log lines into named
//! groups. One notification is dispatched per group and recipient email, so
//! the strategy decides how coarse or fine the digests are.

use crate::events::{LogRecord, Severity};
use crate::extract;
use crate::strategies::registry::{GroupingStrategy, StrategyKind};
use std::collections::{HashMap, HashSet};

/// One named group of distinct log lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertGroup {
    /// Strategy-chosen key (component, severity, or exception type name)
    pub key: String,
    /// Distinct lines in encounter order
    pub lines: Vec<String>,
}

/// Ordered collection of alert groups with unique keys
///
/// Groups keep the order in which their key was first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertGroups {
    groups: Vec<AlertGroup>,
    index: HashMap<String, usize>,
}

impl AlertGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `line` to the group named `key`, creating the group if needed
    ///
    /// A line already present in that group is ignored.
    pub fn push(&mut self, key: &str, line: &str) {
        let position = match self.index.get(key) {
            Some(&position) => position,
            None => {
                self.groups.push(AlertGroup {
                    key: key.to_string(),
                    lines: Vec::new(),
                });
                self.index.insert(key.to_string(), self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let lines = &mut self.groups[position].lines;
        if !lines.iter().any(|existing| existing == line) {
            lines.push(line.to_string());
        }
    }

    /// Lines of the group named `key`
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.index
            .get(key)
            .map(|&position| self.groups[position].lines.as_slice())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Group keys in first-seen order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|group| group.key.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AlertGroup> {
        self.groups.iter()
    }

    /// Get the number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl<'a> IntoIterator for &'a AlertGroups {
    type Item = &'a AlertGroup;
    type IntoIter = std::slice::Iter<'a, AlertGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

impl IntoIterator for AlertGroups {
    type Item = AlertGroup;
    type IntoIter = std::vec::IntoIter<AlertGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

/// Groups Fatal lines by component
///
/// This is a fatal-only filter, not a general grouper: lines below Fatal are
/// silently dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByComponentStrategy;

impl GroupingStrategy for ByComponentStrategy {
    fn group_logs(&self, logs: &[String]) -> AlertGroups {
        let mut groups = AlertGroups::new();

        for line in logs {
            if extract::severity(line) != Severity::Fatal {
                continue;
            }
            groups.push(&extract::component(line), line);
        }

        groups
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Component
    }

    fn name(&self) -> &str {
        "ByComponentStrategy"
    }
}

/// Groups every line by its severity name
#[derive(Debug, Clone, Copy, Default)]
pub struct BySeverityStrategy;

impl GroupingStrategy for BySeverityStrategy {
    fn group_logs(&self, logs: &[String]) -> AlertGroups {
        let mut groups = AlertGroups::new();

        for line in logs {
            groups.push(extract::severity(line).as_str(), line);
        }

        groups
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Severity
    }

    fn name(&self) -> &str {
        "BySeverityStrategy"
    }
}

/// Groups lines by exception type; lines without one are dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct ByExceptionTypeStrategy;

impl GroupingStrategy for ByExceptionTypeStrategy {
    fn group_logs(&self, logs: &[String]) -> AlertGroups {
        let mut groups = AlertGroups::new();

        for line in logs {
            if let Some(exception_type) = extract::exception_type(line) {
                groups.push(&exception_type, line);
            }
        }

        groups
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::ExceptionType
    }

    fn name(&self) -> &str {
        "ByExceptionTypeStrategy"
    }
}

/// Component-scoped lookup of problem ids that are already tracked
pub type KnownProblemsLookup = Box<dyn Fn(&str) -> HashSet<String> + Send + Sync>;

/// Keeps only lines whose problem id is not yet known, grouped by component
///
/// The lookup is consulted once per component. A component whose problem ids
/// are all known is omitted from the result entirely.
pub struct KnownProblemsFilterStrategy {
    known_problems: KnownProblemsLookup,
}

impl KnownProblemsFilterStrategy {
    /// Create a filter backed by the given lookup
    pub fn new<F>(known_problems: F) -> Self
    where
        F: Fn(&str) -> HashSet<String> + Send + Sync + 'static,
    {
        Self {
            known_problems: Box::new(known_problems),
        }
    }

    /// Create a filter that treats every problem id as new
    pub fn without_known_problems() -> Self {
        Self::new(|_| HashSet::new())
    }
}

impl GroupingStrategy for KnownProblemsFilterStrategy {
    fn group_logs(&self, logs: &[String]) -> AlertGroups {
        let mut by_component: Vec<(String, Vec<LogRecord>, Vec<&String>)> = Vec::new();

        for line in logs {
            let record = LogRecord::parse(line);
            match by_component
                .iter_mut()
                .find(|(component, _, _)| *component == record.component)
            {
                Some((_, records, lines)) => {
                    records.push(record);
                    lines.push(line);
                }
                None => by_component.push((record.component.clone(), vec![record], vec![line])),
            }
        }

        let mut groups = AlertGroups::new();
        for (component, records, lines) in by_component {
            let known = (self.known_problems)(&component);
            for (record, line) in records.iter().zip(lines) {
                if !known.contains(&record.problem_id) {
                    groups.push(&component, line);
                }
            }
        }

        groups
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::KnownProblemsFilter
    }

    fn name(&self) -> &str {
        "KnownProblemsFilterStrategy"
    }
}
