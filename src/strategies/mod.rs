/// Grouping strategy implementations and the strategy registry
pub mod grouping;
pub mod registry;

pub use grouping::{
    AlertGroup, AlertGroups, ByComponentStrategy, ByExceptionTypeStrategy, BySeverityStrategy,
    KnownProblemsFilterStrategy, KnownProblemsLookup,
};
pub use registry::{GroupingStrategy, StrategyKind, StrategyRegistry, StrategySetting};
