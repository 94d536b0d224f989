//! AES-256-GCM record encryption
//!
//! Each record gets a fresh random 96-bit IV. The record key is bound as
//! associated data, so a ciphertext copied under another key fails
//! authentication.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::constants::STATE_KEY_PREFIX;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncryptionFailure {
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("authentication failed (tampered record or wrong key)")]
    AuthenticationFailed,

    #[error("encoding error: {0}")]
    Encoding(String),
}

// ============================================================================
// KEY
// ============================================================================

/// 256-bit store key
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// SHA-256 over arbitrary key material
    pub fn derive(material: &[u8]) -> Self {
        Self(Sha256::digest(material).into())
    }

    /// Key bound to the device: prefix plus the sorted build identifiers
    pub fn from_device(build: &HashMap<String, String>) -> Self {
        let mut entries: Vec<_> = build.iter().collect();
        entries.sort();
        let mut hasher = Sha256::new();
        hasher.update(STATE_KEY_PREFIX.as_bytes());
        for (key, value) in entries {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        Self(hasher.finalize().into())
    }

    pub fn random() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// Unit of persisted state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub key: String,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub auth_tag: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// CIPHER
// ============================================================================

pub struct CryptoBox {
    cipher: Aes256Gcm,
}

impl CryptoBox {
    pub fn new(key: &MasterKey) -> Self {
        Self {
            cipher: Aes256Gcm::new((&key.0).into()),
        }
    }

    pub fn encrypt(&self, key: &str, plaintext: &[u8]) -> Result<EncryptedRecord, EncryptionFailure> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| EncryptionFailure::Encoding("AES-GCM encryption failed".to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let tag_at = sealed
            .len()
            .checked_sub(TAG_LEN)
            .ok_or_else(|| EncryptionFailure::Encoding("sealed output shorter than tag".to_string()))?;
        let auth_tag = sealed.split_off(tag_at);

        Ok(EncryptedRecord {
            key: key.to_string(),
            ciphertext: sealed,
            iv: iv.to_vec(),
            auth_tag,
        })
    }

    pub fn decrypt(&self, record: &EncryptedRecord) -> Result<Vec<u8>, EncryptionFailure> {
        if record.iv.len() != IV_LEN {
            return Err(EncryptionFailure::MalformedRecord(format!(
                "iv is {} bytes, expected {}",
                record.iv.len(),
                IV_LEN
            )));
        }
        if record.auth_tag.len() != TAG_LEN {
            return Err(EncryptionFailure::MalformedRecord(format!(
                "auth tag is {} bytes, expected {}",
                record.auth_tag.len(),
                TAG_LEN
            )));
        }

        let mut sealed = Vec::with_capacity(record.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&record.ciphertext);
        sealed.extend_from_slice(&record.auth_tag);

        self.cipher
            .decrypt(
                Nonce::from_slice(&record.iv),
                Payload {
                    msg: &sealed,
                    aad: record.key.as_bytes(),
                },
            )
            .map_err(|_| EncryptionFailure::AuthenticationFailed)
    }
}
