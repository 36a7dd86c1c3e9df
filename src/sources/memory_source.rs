use crate::error::SourceError;
use crate::sources::LogSource;
use crate::BoxFuture;
use std::sync::Mutex;

/// Log source serving a replaceable in-memory list of lines
#[derive(Debug, Default)]
pub struct MemoryLogSource {
    logs: Mutex<Vec<String>>,
}

impl MemoryLogSource {
    pub fn new(logs: Vec<String>) -> Self {
        Self {
            logs: Mutex::new(logs),
        }
    }

    /// Replace the lines returned by subsequent fetches
    pub fn set_logs(&self, logs: Vec<String>) {
        if let Ok(mut current) = self.logs.lock() {
            *current = logs;
        }
    }
}

impl LogSource for MemoryLogSource {
    fn fetch_logs(&self) -> BoxFuture<'_, Result<Vec<String>, SourceError>> {
        Box::pin(async move {
            self.logs
                .lock()
                .map(|logs| logs.clone())
                .map_err(|_| SourceError::Unavailable("log buffer lock poisoned".to_string()))
        })
    }
}
