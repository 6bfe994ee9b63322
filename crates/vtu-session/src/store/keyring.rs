use async_trait::async_trait;
use tracing::{debug, warn};

use super::{StorageBackend, StoreError};

/// Keychain service name entries are filed under
const SERVICE_NAME: &str = "vtu-session";

/// Entry written and removed by `is_available`
const CHECK_KEY: &str = "vtu.availability-check";

/// Durable tier in the OS secure credential store (keychain, credential
/// manager, secret service). Each key becomes its own keychain entry.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Round-trip a throwaway entry. False when the platform store rejects
    /// writes, or accepts them without keeping them (keyring's mock store).
    pub async fn is_available(&self) -> bool {
        let key = format!("{}-{}", CHECK_KEY, std::process::id());
        if let Err(e) = self.set(&key, "ok").await {
            warn!(error = %e, service = %self.service, "Keyring rejected a write");
            return false;
        }
        let readable = matches!(self.get(&key).await, Ok(Some(ref v)) if v == "ok");
        if let Err(e) = self.remove(&key).await {
            debug!(error = %e, "Failed to remove keyring availability entry");
        }
        if !readable {
            warn!(service = %self.service, "Keyring does not persist entries");
        }
        readable
    }

    /// Keyring calls block on platform IPC, so they run off the async workers.
    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(::keyring::Entry) -> Result<T, ::keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = ::keyring::Entry::new(&service, &key)?;
            op(entry)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("keyring task failed: {}", e)))?
        .map_err(StoreError::from)
    }
}

#[async_trait]
impl StorageBackend for KeyringBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(::keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let value = value.to_string();
        self.with_entry(key, move |entry| entry.set_password(&value))
            .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(::keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }
}
