use crate::error::StrategyError;
use crate::strategies::grouping::{
    AlertGroups, ByComponentStrategy, ByExceptionTypeStrategy, BySeverityStrategy,
    KnownProblemsFilterStrategy,
};
use log::info;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Trait for policies that partition log lines into named alert groups
pub trait GroupingStrategy: Send + Sync {
    /// Partition `logs` into groups
    ///
    /// Keys are unique, lines keep their encounter order, and a line appears
    /// at most once per group.
    fn group_logs(&self, logs: &[String]) -> AlertGroups;

    /// Which configured strategy kind this is
    fn kind(&self) -> StrategyKind;

    /// Get a human-readable name for this strategy
    fn name(&self) -> &str;
}

/// Grouping strategy a recipient has chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyKind {
    /// Fatal lines grouped by component
    #[default]
    Component,
    /// All lines grouped by severity name
    Severity,
    /// Lines grouped by exception type
    ExceptionType,
    /// Only problem ids not yet tracked, grouped by component
    KnownProblemsFilter,
}

impl StrategyKind {
    /// Every kind, in declaration order
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Component,
        StrategyKind::Severity,
        StrategyKind::ExceptionType,
        StrategyKind::KnownProblemsFilter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Component => "Component",
            StrategyKind::Severity => "Severity",
            StrategyKind::ExceptionType => "ExceptionType",
            StrategyKind::KnownProblemsFilter => "KnownProblemsFilter",
        }
    }

    /// Look up a kind by its numeric value (0-3)
    pub fn from_index(index: u64) -> Result<Self, StrategyError> {
        usize::try_from(index)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or_else(|| StrategyError::NotImplemented(index.to_string()))
    }

    /// Build a fresh strategy of this kind
    ///
    /// A known-problems filter built here knows no problems; the orchestrator
    /// builds its own per recipient with a real lookup.
    pub fn build(self) -> Arc<dyn GroupingStrategy> {
        match self {
            StrategyKind::Component => Arc::new(ByComponentStrategy),
            StrategyKind::Severity => Arc::new(BySeverityStrategy),
            StrategyKind::ExceptionType => Arc::new(ByExceptionTypeStrategy),
            StrategyKind::KnownProblemsFilter => {
                Arc::new(KnownProblemsFilterStrategy::without_known_problems())
            }
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<u64>() {
            return Self::from_index(index);
        }

        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| StrategyError::NotImplemented(trimmed.to_string()))
    }
}

impl Serialize for StrategyKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Stored strategy value: a name in any case or its numeric value
#[derive(Deserialize)]
#[serde(untagged)]
enum StrategyKindRepr {
    Index(u64),
    Name(String),
}

impl<'de> Deserialize<'de> for StrategyKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = match StrategyKindRepr::deserialize(deserializer)? {
            StrategyKindRepr::Index(index) => StrategyKind::from_index(index),
            StrategyKindRepr::Name(name) => name.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

/// A recipient's strategy as configured
///
/// Values that name no known kind are kept rather than rejected, so one bad
/// record does not fail a whole recipient file. Selecting such a setting is
/// `StrategyError::NotImplemented`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StrategySetting {
    Known(StrategyKind),
    Unknown(String),
}

impl StrategySetting {
    pub fn kind(&self) -> Result<StrategyKind, StrategyError> {
        match self {
            StrategySetting::Known(kind) => Ok(*kind),
            StrategySetting::Unknown(raw) => Err(StrategyError::NotImplemented(raw.clone())),
        }
    }
}

impl Default for StrategySetting {
    fn default() -> Self {
        StrategySetting::Known(StrategyKind::default())
    }
}

impl From<StrategyKind> for StrategySetting {
    fn from(kind: StrategyKind) -> Self {
        StrategySetting::Known(kind)
    }
}

impl fmt::Display for StrategySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategySetting::Known(kind) => kind.fmt(f),
            StrategySetting::Unknown(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for StrategySetting {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StrategySetting::Known(kind) => kind.serialize(serializer),
            StrategySetting::Unknown(raw) => serializer.serialize_str(raw),
        }
    }
}

impl<'de> Deserialize<'de> for StrategySetting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let setting = match StrategyKindRepr::deserialize(deserializer)? {
            StrategyKindRepr::Index(index) => StrategyKind::from_index(index)
                .map(StrategySetting::Known)
                .unwrap_or_else(|_| StrategySetting::Unknown(index.to_string())),
            StrategyKindRepr::Name(name) => name
                .parse()
                .map(StrategySetting::Known)
                .unwrap_or_else(|_| StrategySetting::Unknown(name.trim().to_string())),
        };
        Ok(setting)
    }
}

/// Owned, ordered collection of active grouping strategies
///
/// Configuration-time only: no internal locking. Adding the same instance
/// twice is legal and yields two entries.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn GroupingStrategy>>,
}

impl StrategyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Create a registry with one component, severity, and exception-type strategy
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.add(StrategyKind::Component.build());
        registry.add(StrategyKind::Severity.build());
        registry.add(StrategyKind::ExceptionType.build());
        registry
    }

    /// Append a strategy
    pub fn add(&mut self, strategy: Arc<dyn GroupingStrategy>) {
        info!("Added alert strategy: {}", strategy.name());
        self.strategies.push(strategy);
    }

    /// Remove the first entry that is this exact instance
    ///
    /// # Returns
    ///
    /// `true` if an entry was removed
    pub fn remove(&mut self, strategy: &Arc<dyn GroupingStrategy>) -> bool {
        match self
            .strategies
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, strategy))
        {
            Some(position) => {
                let removed = self.strategies.remove(position);
                info!("Removed alert strategy: {}", removed.name());
                true
            }
            None => false,
        }
    }

    /// Active strategies in insertion order
    pub fn list(&self) -> &[Arc<dyn GroupingStrategy>] {
        &self.strategies
    }

    /// First registered strategy of the given kind
    pub fn find(&self, kind: StrategyKind) -> Option<Arc<dyn GroupingStrategy>> {
        self.strategies
            .iter()
            .find(|strategy| strategy.kind() == kind)
            .cloned()
    }

    /// Get the number of registered strategies
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
