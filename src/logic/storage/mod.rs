//! Storage Module
//!
//! Encrypted local state: escalation counters and host-visible flags.
//!
//! # Components
//! - `crypto.rs`: AES-256-GCM records, key derivation
//! - `history.rs`: atomic per-threat counters
//! - `store.rs`: typed key/value store with JSON persistence

pub mod crypto;
pub mod history;
pub mod store;

pub use crypto::{CryptoBox, EncryptedRecord, EncryptionFailure, MasterKey};
pub use history::{BehaviorHistory, HistoryEntry};
pub use store::{history_count_key, history_last_seen_key, SecureStateStore, StoreError};
