//! Secure State Store
//!
//! Encrypted key/value records plus the behavior history. Values are typed
//! (string / int / bool) and serialized to JSON before encryption. A record
//! that fails to decrypt reads as absent.
//!
//! Persistence is optional: `open` loads a JSON state file and `flush`
//! rewrites it through a temporary file and a rename.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::crypto::{CryptoBox, EncryptedRecord, EncryptionFailure, MasterKey};
use super::history::BehaviorHistory;
use crate::constants::RECENT_THREAT_WINDOW_SECS;
use crate::logic::threat::ThreatType;

/// State file layout version
pub const FORMAT_VERSION: u32 = 1;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file format: {0}")]
    Format(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// FILE FORMAT
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    format_version: u32,
    records: Vec<EncryptedRecord>,
}

/// Plaintext of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
enum StoredValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

pub fn history_count_key(kind: ThreatType) -> String {
    format!("history.count.{}", kind.as_str())
}

pub fn history_last_seen_key(kind: ThreatType) -> String {
    format!("history.last_seen.{}", kind.as_str())
}

// ============================================================================
// STORE
// ============================================================================

pub struct SecureStateStore {
    crypto: CryptoBox,
    records: RwLock<BTreeMap<String, EncryptedRecord>>,
    history: BehaviorHistory,
    recent_window: Duration,
    path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl SecureStateStore {
    /// Store that lives only as long as the process
    pub fn in_memory(key: &MasterKey) -> Self {
        Self {
            crypto: CryptoBox::new(key),
            records: RwLock::new(BTreeMap::new()),
            history: BehaviorHistory::new(),
            recent_window: Duration::from_secs(RECENT_THREAT_WINDOW_SECS),
            path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the state file at `path`; a missing file starts empty
    pub fn open(path: impl Into<PathBuf>, key: &MasterKey) -> Result<Self, StoreError> {
        let path = path.into();
        let mut store = Self::in_memory(key);

        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(io_error(&path))?;
            let file: StateFile =
                serde_json::from_str(&raw).map_err(|e| StoreError::Format(e.to_string()))?;
            if file.format_version != FORMAT_VERSION {
                return Err(StoreError::Format(format!(
                    "unsupported format version {}",
                    file.format_version
                )));
            }
            let mut records = store.records.write();
            for record in file.records {
                records.insert(record.key.clone(), record);
            }
        }

        store.path = Some(path);
        store.load_history();
        log::info!(
            "Secure state loaded: {} record(s), {} past threat(s)",
            store.len(),
            store.history.total()
        );
        Ok(store)
    }

    fn load_history(&self) {
        for kind in ThreatType::ALL {
            let count = self.get_int(&history_count_key(kind)).unwrap_or(0).max(0) as u64;
            let last_seen = self.get_int(&history_last_seen_key(kind)).unwrap_or(0);
            self.history.restore(kind, count, last_seen);
        }
    }

    /// How long a threat type keeps counting in `recent_threat_count`
    pub fn with_recent_window(mut self, window: Duration) -> Self {
        self.recent_window = window;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ------------------------------------------------------------------
    // Raw records
    // ------------------------------------------------------------------

    pub fn encrypt(&self, key: &str, plaintext: &[u8]) -> Result<EncryptedRecord, EncryptionFailure> {
        self.crypto.encrypt(key, plaintext)
    }

    pub fn decrypt(&self, record: &EncryptedRecord) -> Result<Vec<u8>, EncryptionFailure> {
        self.crypto.decrypt(record)
    }

    /// Stored record as persisted
    pub fn record(&self, key: &str) -> Option<EncryptedRecord> {
        self.records.read().get(key).cloned()
    }

    /// Insert a record as-is (no re-encryption)
    pub fn insert_record(&self, record: EncryptedRecord) {
        self.records.write().insert(record.key.clone(), record);
        self.dirty.store(true, Ordering::Release);
    }

    fn put_value(&self, key: &str, value: StoredValue) -> Result<(), EncryptionFailure> {
        let plaintext =
            serde_json::to_vec(&value).map_err(|e| EncryptionFailure::Encoding(e.to_string()))?;
        let record = self.crypto.encrypt(key, &plaintext)?;
        self.insert_record(record);
        Ok(())
    }

    fn get_value(&self, key: &str) -> Option<StoredValue> {
        let record = self.record(key)?;
        let plaintext = match self.crypto.decrypt(&record) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                log::warn!("Secure state record '{}' unreadable: {}", key, e);
                return None;
            }
        };
        match serde_json::from_slice(&plaintext) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Secure state record '{}' has bad payload: {}", key, e);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------

    pub fn put_string(&self, key: &str, value: &str) -> Result<(), EncryptionFailure> {
        self.put_value(key, StoredValue::Str(value.to_string()))
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get_value(key)? {
            StoredValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn put_int(&self, key: &str, value: i64) -> Result<(), EncryptionFailure> {
        self.put_value(key, StoredValue::Int(value))
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get_value(key)? {
            StoredValue::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn put_bool(&self, key: &str, value: bool) -> Result<(), EncryptionFailure> {
        self.put_value(key, StoredValue::Bool(value))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get_value(key)? {
            StoredValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self.records.write().remove(key).is_some();
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record and zero the history
    pub fn clear(&self) {
        self.records.write().clear();
        self.history.reset();
        self.dirty.store(true, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Behavior history
    // ------------------------------------------------------------------

    pub fn history(&self) -> &BehaviorHistory {
        &self.history
    }

    /// Sum of the counters of threat types seen within the recent window
    pub fn recent_threat_count(&self) -> u64 {
        self.history.recent_total(Utc::now(), self.recent_window)
    }

    /// Count one more occurrence of `kind` and persist the counter
    pub fn record_threat(&self, kind: ThreatType) -> u64 {
        let now = Utc::now();
        let count = self.history.increment(kind, now);
        let persisted = self
            .put_int(&history_count_key(kind), count.min(i64::MAX as u64) as i64)
            .and_then(|_| self.put_int(&history_last_seen_key(kind), now.timestamp_millis()));
        if let Err(e) = persisted {
            log::error!("Failed to persist {} counter: {}", kind, e);
        }
        count
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write pending changes to the state file. No-op for in-memory stores.
    pub fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.write_file(path);
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn write_file(&self, path: &Path) -> Result<(), StoreError> {
        let file = StateFile {
            format_version: FORMAT_VERSION,
            records: self.records.read().values().cloned().collect(),
        };
        let content =
            serde_json::to_string_pretty(&file).map_err(|e| StoreError::Format(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_error(&tmp))?;
        fs::rename(&tmp, path).map_err(io_error(path))?;

        log::debug!("Secure state flushed to {}", path.display());
        Ok(())
    }
}
