use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Result, VaultError};
use crate::kdf::KdfParams;

pub const SETTINGS_FILE: &str = "settings.json";
pub const ENV_DEV_KEY: &str = "ELEUTHIA_DEV_KEY";
pub const ENV_AUTO_LOCK_SECS: &str = "ELEUTHIA_AUTO_LOCK_SECS";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Prefix for exported backup file names.
    pub namespace: String,
    /// Idle seconds before an unlocked session locks itself. 0 disables.
    pub auto_lock_secs: u64,
    /// Oldest snapshots beyond this count are dropped. `None` or 0 keeps all.
    pub max_snapshots: Option<usize>,
    pub kdf: KdfParams,
    /// Base64 raw key for standalone encrypt/decrypt. Never written back out.
    #[serde(skip_serializing)]
    pub dev_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: "ELEUTHIA".into(),
            auto_lock_secs: 1800,
            max_snapshots: None,
            kdf: KdfParams::default(),
            dev_key: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("namespace", &self.namespace)
            .field("auto_lock_secs", &self.auto_lock_secs)
            .field("max_snapshots", &self.max_snapshots)
            .field("kdf", &self.kdf)
            .field("dev_key", &self.dev_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Settings {
    /// Load `settings.json` from `data_dir` (defaults when absent), then apply
    /// environment overrides.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(SETTINGS_FILE);
        let settings = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            serde_json::from_str(&json).map_err(|e| VaultError::Storage {
                key: SETTINGS_FILE.into(),
                reason: e.to_string(),
            })?
        } else {
            Settings::default()
        };
        settings.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_DEV_KEY).filter(|k| !k.trim().is_empty()) {
            self.dev_key = Some(key);
        }
        if let Some(raw) = lookup(ENV_AUTO_LOCK_SECS) {
            self.auto_lock_secs = raw.trim().parse().map_err(|_| {
                VaultError::Configuration(format!("{ENV_AUTO_LOCK_SECS} must be an integer"))
            })?;
        }
        Ok(self)
    }
}
