// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// `[runtime]` section: where artifacts live and how the host treats them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory scanned for plugin artifacts.
    pub artifact_dir: PathBuf,
    /// Glob matched against artifact file names.
    pub artifact_pattern: String,
    /// Private staging area (loaded copies and pending updates).
    pub staging_dir: PathBuf,
    /// SQLite metadata database.
    pub db_path: PathBuf,
    pub scan_interval_secs: u64,
    /// Time budget for a single listener invocation during dispatch.
    pub listener_timeout_ms: u64,
    /// Fuel granted to every guest call.
    pub fuel_per_call: u64,
    /// Plugins enabled right after the initial scan.
    pub auto_enable: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            artifact_dir: paths::artifacts_dir(),
            artifact_pattern: "*.wasm".into(),
            staging_dir: paths::staging_dir(),
            db_path: paths::db_path(),
            scan_interval_secs: 60,
            listener_timeout_ms: 5_000,
            fuel_per_call: 10_000_000,
            auto_enable: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }

    /// Per-load private copies made by the isolated loader.
    pub fn scope_staging_dir(&self) -> PathBuf {
        self.staging_dir.join("scopes")
    }

    /// Frozen copies of changed artifacts awaiting a deferred update.
    pub fn pending_staging_dir(&self) -> PathBuf {
        self.staging_dir.join("pending")
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
