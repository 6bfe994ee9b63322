//! Token persistence for the session core.
//!
//! This module provides:
//! - `StorageBackend`: the get/set/remove seam each client runtime implements
//! - `MemoryBackend`: process-lifetime storage (the Volatile tier)
//! - `FileBackend`: JSON file in the cache directory (a Durable tier)
//! - `KeyringBackend`: OS secure credential storage (a Durable tier)
//! - `TokenStore`: the two-tier store the session controller writes through
//!
//! Backend failures never escape `TokenStore`: they are logged and degrade to
//! "nothing stored".

pub mod file;
pub mod keyring;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use self::file::FileBackend;
pub use self::keyring::KeyringBackend;
pub use self::memory::MemoryBackend;

/// Key holding the bearer credential in each tier
pub const CREDENTIAL_KEY: &str = "vtu.credential";

/// Key holding the RFC 3339 timestamp of the last user interaction
pub const LAST_ACTIVITY_KEY: &str = "vtu.last_activity";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage contents unreadable: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Secure storage failed: {0}")]
    Keyring(#[from] ::keyring::Error),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Key-value persistence over a platform-specific backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Persistence tier chosen at login and fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// Survives process restart ("remember me")
    Durable,
    /// Lives only as long as the current process
    Volatile,
}

impl PersistenceMode {
    pub fn from_remember_me(remember: bool) -> Self {
        if remember {
            PersistenceMode::Durable
        } else {
            PersistenceMode::Volatile
        }
    }

    pub fn other(&self) -> Self {
        match self {
            PersistenceMode::Durable => PersistenceMode::Volatile,
            PersistenceMode::Volatile => PersistenceMode::Durable,
        }
    }
}

impl fmt::Display for PersistenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceMode::Durable => write!(f, "durable"),
            PersistenceMode::Volatile => write!(f, "volatile"),
        }
    }
}

/// Credential found by bootstrap, along with the tier it came from.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub token: String,
    pub mode: PersistenceMode,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Two-tier token store. Every operation absorbs backend errors.
/// Clone is cheap - both backends are behind `Arc`.
#[derive(Clone)]
pub struct TokenStore {
    durable: Arc<dyn StorageBackend>,
    volatile: Arc<dyn StorageBackend>,
}

impl TokenStore {
    pub fn new(durable: Arc<dyn StorageBackend>, volatile: Arc<dyn StorageBackend>) -> Self {
        Self { durable, volatile }
    }

    fn backend(&self, mode: PersistenceMode) -> &Arc<dyn StorageBackend> {
        match mode {
            PersistenceMode::Durable => &self.durable,
            PersistenceMode::Volatile => &self.volatile,
        }
    }

    /// Read a key. Backend failures are logged and read as absent.
    pub async fn get(&self, mode: PersistenceMode, key: &str) -> Option<String> {
        match self.backend(mode).get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, tier = %mode, key, "Token store read failed");
                None
            }
        }
    }

    /// Write a key. Returns false if the backend rejected the write.
    pub async fn set(&self, mode: PersistenceMode, key: &str, value: &str) -> bool {
        match self.backend(mode).set(key, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, tier = %mode, key, "Token store write failed");
                false
            }
        }
    }

    /// Remove a key. Returns false if the backend rejected the removal.
    pub async fn remove(&self, mode: PersistenceMode, key: &str) -> bool {
        match self.backend(mode).remove(key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, tier = %mode, key, "Token store remove failed");
                false
            }
        }
    }

    /// Write the credential, then read it back. Returns true only when the
    /// stored value is observable and identical.
    pub async fn write_credential(&self, mode: PersistenceMode, token: &str) -> bool {
        if !self.set(mode, CREDENTIAL_KEY, token).await {
            return false;
        }
        match self.get(mode, CREDENTIAL_KEY).await {
            Some(stored) if stored == token => true,
            Some(_) => {
                warn!(tier = %mode, "Token store returned a different credential after write");
                false
            }
            None => {
                warn!(tier = %mode, "Credential not observable after write");
                false
            }
        }
    }

    /// Find the persisted credential. The volatile tier is checked first: it is
    /// only populated when the current process logged in without "remember me",
    /// and login always empties the other tier, so at most one tier holds a
    /// credential.
    pub async fn load_credential(&self) -> Option<StoredCredential> {
        for mode in [PersistenceMode::Volatile, PersistenceMode::Durable] {
            if let Some(token) = self.get(mode, CREDENTIAL_KEY).await {
                let last_activity = self.load_last_activity(mode).await;
                debug!(tier = %mode, "Found stored credential");
                return Some(StoredCredential {
                    token,
                    mode,
                    last_activity,
                });
            }
        }
        None
    }

    async fn load_last_activity(&self, mode: PersistenceMode) -> Option<DateTime<Utc>> {
        let raw = self.get(mode, LAST_ACTIVITY_KEY).await?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!(error = %e, tier = %mode, "Ignoring unreadable last-activity timestamp");
                None
            }
        }
    }

    pub async fn save_last_activity(&self, mode: PersistenceMode, at: DateTime<Utc>) -> bool {
        self.set(mode, LAST_ACTIVITY_KEY, &at.to_rfc3339()).await
    }

    /// Remove the credential and last-activity keys from one tier.
    pub async fn clear(&self, mode: PersistenceMode) {
        let credential_removed = self.remove(mode, CREDENTIAL_KEY).await;
        let activity_removed = self.remove(mode, LAST_ACTIVITY_KEY).await;
        if credential_removed && activity_removed {
            debug!(tier = %mode, "Token store cleared");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
