//! Process configuration.
//!
//! One optional JSON file holding a section per server plus storage:
//!
//! ```json
//! {
//!   "sync":    { "bind_addr": "0.0.0.0:9090", "queue_capacity": 100 },
//!   "notify":  { "bind_addr": "0.0.0.0:9091" },
//!   "chat":    { "bind_addr": "0.0.0.0:9093", "peer_buffer": 64 },
//!   "storage": { "path": "data/progress", "sync_writes": false }
//! }
//! ```
//!
//! Every field is optional. Without a `storage` section progress is kept in
//! memory only.

use std::path::{Path, PathBuf};

use mangahub_realtime::{ChatServerConfig, NotifyServerConfig, StoreConfig, SyncServerConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "mangahub.json";

/// Overrides `storage.path`, enabling the on-disk store.
pub const STORAGE_PATH_ENV: &str = "MANGAHUB_STORAGE_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncServerConfig,
    pub notify: NotifyServerConfig,
    pub chat: ChatServerConfig,
    pub storage: Option<StoreConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                log::info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("{e}; using default configuration");
                Self::default()
            }
        }
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in the
    /// binary.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(STORAGE_PATH_ENV).filter(|p| !p.is_empty()) {
            let storage = self.storage.get_or_insert_with(StoreConfig::default);
            storage.path = PathBuf::from(path);
        }
        self
    }
}
