//! Client configuration.
//!
//! Stored at `<config_dir>/vtu-session/config.json`. A missing file yields
//! defaults; unknown or missing fields fall back to their defaults too.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::session::controller::{
    SessionOptions, DEFAULT_EXPIRY_WARNING_SECS, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_VERIFY_INTERVAL_SECS,
};
use crate::session::RouteTable;
use crate::store::{FileBackend, KeyringBackend, MemoryBackend, StorageBackend, TokenStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "vtu-session";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

/// Where the Durable tier lives on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableBackend {
    /// OS credential manager
    #[default]
    Keyring,
    /// `session.json` in the cache directory
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub idle_timeout_secs: u64,
    pub verify_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub expiry_warning_secs: u64,
    pub durable_backend: DurableBackend,
    pub routes: RouteTable,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            verify_interval_secs: DEFAULT_VERIFY_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            expiry_warning_secs: DEFAULT_EXPIRY_WARNING_SECS,
            durable_backend: DurableBackend::default(),
            routes: RouteTable::default(),
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            verify_interval: Duration::from_secs(self.verify_interval_secs),
            request_timeout: self.request_timeout(),
            expiry_warning: Duration::from_secs(self.expiry_warning_secs),
            login_route: self.routes.login_route.clone(),
        }
    }

    /// Two-tier store for this machine: the configured durable backend plus
    /// process memory.
    pub async fn token_store(&self) -> Result<TokenStore> {
        let durable = self.durable_store(&self.cache_dir()?).await;
        Ok(TokenStore::new(durable, Arc::new(MemoryBackend::new())))
    }

    /// Durable backend rooted at `cache_dir`. A keyring that can't keep an
    /// entry is replaced by the session file.
    pub async fn durable_store(&self, cache_dir: &Path) -> Arc<dyn StorageBackend> {
        match self.durable_backend {
            DurableBackend::Keyring => {
                let keyring = KeyringBackend::default();
                if keyring.is_available().await {
                    Arc::new(keyring)
                } else {
                    let file = FileBackend::new(cache_dir);
                    warn!(path = %file.path().display(), "Keyring unavailable, storing session in file");
                    Arc::new(file)
                }
            }
            DurableBackend::File => Arc::new(FileBackend::new(cache_dir)),
        }
    }
}
