use crate::error::StoreError;
use crate::recipients::Recipient;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Trait for backing stores the recipient directory refreshes from
#[cfg_attr(test, mockall::automock)]
pub trait RecipientStore: Send + Sync {
    /// Load the full recipient list, in configured order
    fn load(&self) -> Result<Vec<Recipient>, StoreError>;
}

impl<T: RecipientStore + ?Sized> RecipientStore for Arc<T> {
    fn load(&self) -> Result<Vec<Recipient>, StoreError> {
        (**self).load()
    }
}

/// Recipient store backed by a JSON array on disk
///
/// A missing or blank file is an empty configuration, not an error.
#[derive(Debug, Clone)]
pub struct JsonRecipientStore {
    path: PathBuf,
}

impl JsonRecipientStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `recipients` as pretty-printed JSON, creating parent directories
    pub fn save(&self, recipients: &[Recipient]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(recipients)?;
        fs::write(&self.path, json)?;
        debug!(
            "Saved {} recipients to {}",
            recipients.len(),
            self.path.display()
        );
        Ok(())
    }
}

impl RecipientStore for JsonRecipientStore {
    fn load(&self) -> Result<Vec<Recipient>, StoreError> {
        if !self.path.exists() {
            warn!(
                "Recipient file {} not found, no recipients configured",
                self.path.display()
            );
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&contents).map_err(|e| {
            StoreError::ParseError(format!("{}: {}", self.path.display(), e))
        })
    }
}

/// Recipient store held in memory, replaceable between refreshes
#[derive(Debug, Default)]
pub struct MemoryRecipientStore {
    recipients: Mutex<Vec<Recipient>>,
}

impl MemoryRecipientStore {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self {
            recipients: Mutex::new(recipients),
        }
    }

    /// Replace the list returned by subsequent loads
    pub fn set(&self, recipients: Vec<Recipient>) {
        if let Ok(mut current) = self.recipients.lock() {
            *current = recipients;
        }
    }
}

impl RecipientStore for MemoryRecipientStore {
    fn load(&self) -> Result<Vec<Recipient>, StoreError> {
        self.recipients
            .lock()
            .map(|recipients| recipients.clone())
            .map_err(|_| StoreError::ParseError("recipient list lock poisoned".to_string()))
    }
}
