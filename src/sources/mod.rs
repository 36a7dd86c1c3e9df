/// Log sources that fetch raw monitoring log lines
pub mod file_source;
pub mod http_source;
pub mod memory_source;

pub use file_source::FileLogSource;
pub use http_source::HttpLogSource;
pub use memory_source::MemoryLogSource;

use crate::error::SourceError;
use crate::BoxFuture;

/// Trait for backends that supply pending raw log lines
///
/// Lines are pipe-delimited (`Key: Value | Key: Value`). The result may be
/// empty and its order is source-dependent.
pub trait LogSource: Send + Sync {
    fn fetch_logs(&self) -> BoxFuture<'_, Result<Vec<String>, SourceError>>;
}
