// src/host.rs — Host process wiring: store, registry, watcher
//
// Startup is an initial scan followed by re-enabling what was enabled when
// the host last ran plus auto-enable; teardown stops the watcher, shuts every
// plugin down and removes the staging areas.

use std::sync::Arc;

use crate::infra::config::RuntimeConfig;
use crate::runtime::loader::{ArtifactLoader, IsolatedLoader};
use crate::runtime::registry::PluginRegistry;
use crate::runtime::wasm::WasmArtifactLoader;
use crate::runtime::watcher::{HotReloadWatcher, ScanReport, WatcherConfig};
use crate::store::{MetadataStore, SqliteMetadataStore};

pub struct Host {
    config: RuntimeConfig,
    registry: Arc<PluginRegistry>,
    watcher: Arc<HotReloadWatcher>,
    watch_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Host {
    /// Production wiring: SQLite metadata and WASM artifacts.
    pub fn build(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteMetadataStore::open(&config.db_path)?);
        let backend = Arc::new(WasmArtifactLoader::new(config.fuel_per_call)?);
        Self::with_parts(config, store, backend)
    }

    pub fn with_parts(
        config: &RuntimeConfig,
        store: Arc<dyn MetadataStore>,
        backend: Arc<dyn ArtifactLoader>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.artifact_dir).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create artifact dir {}: {}",
                config.artifact_dir.display(),
                e
            )
        })?;

        let loader = IsolatedLoader::new(config.scope_staging_dir(), backend);
        let registry = Arc::new(PluginRegistry::new(
            loader,
            store,
            config.listener_timeout(),
        ));
        let watcher = Arc::new(HotReloadWatcher::new(
            registry.clone(),
            WatcherConfig::from_runtime(config)?,
        ));

        Ok(Self {
            config: config.clone(),
            registry,
            watcher,
            watch_task: std::sync::Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn watcher(&self) -> &Arc<HotReloadWatcher> {
        &self.watcher
    }

    /// Initial scan, then enable the plugins recorded as enabled, the
    /// configured ones and `extra_enable`.
    pub async fn start(&self, extra_enable: &[String]) -> ScanReport {
        // Read before the scan rewrites the rows of reloaded plugins
        let restored: Vec<String> = match self.registry.list_all() {
            Ok(descriptors) => descriptors
                .into_iter()
                .filter(|d| d.enabled && d.loaded)
                .map(|d| d.name)
                .collect(),
            Err(e) => {
                tracing::warn!("Could not read plugin descriptors: {}", e);
                Vec::new()
            }
        };
        let report = self.watcher.scan_once().await;

        let mut names: Vec<&String> = restored.iter().collect();
        for name in self.config.auto_enable.iter().chain(extra_enable) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        for name in names {
            if let Err(e) = self.registry.enable(name).await {
                tracing::warn!("Could not enable '{}' at startup: {}", name, e);
            }
        }
        report
    }

    /// Begin periodic watching.
    pub fn watch(&self) {
        let handle = self.watcher.start();
        if let Some(previous) = crate::infra::lock(&self.watch_task).replace(handle) {
            previous.abort();
        }
    }

    /// Stop watching, shut every plugin down and remove the staging areas.
    pub async fn shutdown(&self) {
        self.watcher.stop();
        let task = crate::infra::lock(&self.watch_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::debug!("Watch task ended abnormally: {}", e);
            }
        }

        let errors = self.registry.shutdown_all().await;
        if !errors.is_empty() {
            tracing::warn!("{} plugin(s) failed to shut down cleanly", errors.len());
        }

        self.registry.loader().cleanup_staging();
        let pending_dir = self.config.pending_staging_dir();
        if pending_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&pending_dir) {
                tracing::warn!(
                    "Could not remove pending staging dir {}: {}",
                    pending_dir.display(),
                    e
                );
            }
        }
        tracing::info!("Host shut down");
    }
}
