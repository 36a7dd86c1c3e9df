use crate::error::StoreError;
use log::{debug, info};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Trait for stores that persist sent-alert keys between runs
#[cfg_attr(test, mockall::automock)]
pub trait LedgerStore: Send + Sync {
    fn load_sent_keys(&self) -> Result<HashSet<String>, StoreError>;

    fn save_sent_keys(&self, keys: &HashSet<String>) -> Result<(), StoreError>;
}

impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    fn load_sent_keys(&self) -> Result<HashSet<String>, StoreError> {
        (**self).load_sent_keys()
    }

    fn save_sent_keys(&self, keys: &HashSet<String>) -> Result<(), StoreError> {
        (**self).save_sent_keys(keys)
    }
}

/// Ledger store backed by a JSON array of keys on disk
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    path: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forget every stored key
    pub fn clear(&self) -> Result<(), StoreError> {
        self.save_sent_keys(&HashSet::new())?;
        info!("Cleared sent-alert ledger at {}", self.path.display());
        Ok(())
    }
}

impl LedgerStore for JsonLedgerStore {
    fn load_sent_keys(&self) -> Result<HashSet<String>, StoreError> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(HashSet::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| StoreError::ParseError(format!("{}: {}", self.path.display(), e)))
    }

    fn save_sent_keys(&self, keys: &HashSet<String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // Sorted so the file diffs cleanly between runs
        let sorted: BTreeSet<&String> = keys.iter().collect();
        fs::write(&self.path, serde_json::to_string_pretty(&sorted)?)?;
        debug!("Saved {} ledger keys to {}", keys.len(), self.path.display());
        Ok(())
    }
}

/// Ledger store held in memory
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    keys: Mutex<HashSet<String>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the saved keys
    pub fn keys(&self) -> HashSet<String> {
        self.keys.lock().map(|keys| keys.clone()).unwrap_or_default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn load_sent_keys(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.keys())
    }

    fn save_sent_keys(&self, keys: &HashSet<String>) -> Result<(), StoreError> {
        let mut stored = self
            .keys
            .lock()
            .map_err(|_| StoreError::ParseError("ledger lock poisoned".to_string()))?;
        *stored = keys.clone();
        Ok(())
    }
}

/// Set of `groupKey|email` keys already notified in earlier runs
///
/// Loaded once when constructed. Keys are only added; removing them is an
/// external operation on the store.
pub struct SentAlertLedger {
    store: Box<dyn LedgerStore>,
    keys: HashSet<String>,
    dirty: bool,
}

impl SentAlertLedger {
    /// Load the ledger from `store`
    ///
    /// Keys are compared case-insensitively, so stored keys are lowercased here.
    pub fn load(store: Box<dyn LedgerStore>) -> Result<Self, StoreError> {
        let keys: HashSet<String> = store
            .load_sent_keys()?
            .into_iter()
            .map(|key| key.to_lowercase())
            .collect();
        info!("Loaded {} sent-alert keys", keys.len());
        Ok(Self {
            store,
            keys,
            dirty: false,
        })
    }

    /// Start with no keys, ignoring whatever the store holds until the next persist
    pub fn empty(store: Box<dyn LedgerStore>) -> Self {
        Self {
            store,
            keys: HashSet::new(),
            dirty: false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(&key.to_lowercase())
    }

    /// Add a key; returns false if it was already present in any case
    pub fn record(&mut self, key: impl Into<String>) -> bool {
        let added = self.keys.insert(key.into().to_lowercase());
        self.dirty |= added;
        added
    }

    /// Save the keys if anything was recorded since the last save
    pub fn persist(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        self.store.save_sent_keys(&self.keys)?;
        self.dirty = false;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
