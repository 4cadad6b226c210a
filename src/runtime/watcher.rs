// src/runtime/watcher.rs — Hot-reload watcher for the artifact directory
//
// Every cycle lists the artifact directory, fingerprints each artifact and
// classifies it as new, changed, unchanged or removed. Changes are frozen
// into the pending staging area and handed to the registry, which applies
// them right away or parks them while the plugin is enabled.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

use crate::infra::config::RuntimeConfig;
use crate::infra::errors::RuntimeError;
use crate::infra::lock;
use crate::runtime::fingerprint::{artifact_file_name, list_artifacts, read_fingerprinted};
use crate::runtime::registry::{PluginRegistry, UpdateOutcome};
use crate::runtime::types::{ArtifactFingerprint, PendingUpdate, PluginView};

/// Where and how often to look for artifacts.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub artifact_dir: PathBuf,
    pub pattern: glob::Pattern,
    pub interval: Duration,
    /// Frozen copies of changed artifacts.
    pub pending_dir: PathBuf,
}

impl WatcherConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let pattern = glob::Pattern::new(&config.artifact_pattern).map_err(|e| {
            anyhow::anyhow!("Invalid artifact pattern '{}': {}", config.artifact_pattern, e)
        })?;
        Ok(Self {
            artifact_dir: config.artifact_dir.clone(),
            pattern,
            interval: config.scan_interval(),
            pending_dir: config.pending_staging_dir(),
        })
    }
}

/// What one watch cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Plugins loaded from new artifacts.
    pub loaded: Vec<String>,
    /// Plugins whose update was applied immediately.
    pub applied: Vec<String>,
    /// Enabled plugins that now have a pending update.
    pub deferred: Vec<String>,
    /// Pending updates dropped because the artifact went back to the running code.
    pub cancelled: Vec<String>,
    /// Artifacts that failed to load or update.
    pub failed: Vec<String>,
    /// Artifacts that disappeared from the directory.
    pub removed: Vec<String>,
    /// Artifacts that could not be read this cycle.
    pub skipped: Vec<String>,
    /// Updates still waiting after the cycle.
    pub pending: usize,
}

impl ScanReport {
    /// Nothing was loaded, updated or removed.
    pub fn is_quiet(&self) -> bool {
        self.loaded.is_empty()
            && self.applied.is_empty()
            && self.deferred.is_empty()
            && self.cancelled.is_empty()
            && self.failed.is_empty()
            && self.removed.is_empty()
            && self.skipped.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} loaded, {} applied, {} deferred, {} cancelled, {} failed, {} removed, {} skipped, {} pending",
            self.loaded.len(),
            self.applied.len(),
            self.deferred.len(),
            self.cancelled.len(),
            self.failed.len(),
            self.removed.len(),
            self.skipped.len(),
            self.pending
        )
    }
}

/// Last observation of one artifact file.
#[derive(Debug, Clone)]
struct Tracked {
    hash: String,
    /// Plugin last loaded from this file; `None` while it has never loaded.
    plugin_name: Option<String>,
    removed: bool,
}

pub struct HotReloadWatcher {
    registry: Arc<PluginRegistry>,
    config: WatcherConfig,
    /// Artifact file name -> last observation. Also serializes scans.
    tracked: AsyncMutex<HashMap<String, Tracked>>,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
}

impl HotReloadWatcher {
    pub fn new(registry: Arc<PluginRegistry>, config: WatcherConfig) -> Self {
        Self {
            registry,
            config,
            tracked: AsyncMutex::new(HashMap::new()),
            shutdown_tx: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Run one watch cycle.
    pub async fn scan_once(&self) -> ScanReport {
        let mut tracked = self.tracked.lock().await;
        let mut report = ScanReport::default();

        let artifacts = match list_artifacts(&self.config.artifact_dir, &self.config.pattern) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::warn!(
                    "Cannot list artifact directory {}: {}",
                    self.config.artifact_dir.display(),
                    e
                );
                report.pending = self.warn_pending();
                return report;
            }
        };

        let mut seen = HashSet::new();
        for path in artifacts {
            let file = artifact_file_name(&path);
            seen.insert(file.clone());

            let (bytes, hash) = match read_fingerprinted(&path) {
                Ok(read) => read,
                Err(e) => {
                    tracing::warn!("{}; skipping this cycle", e);
                    report.skipped.push(file);
                    continue;
                }
            };

            let previous = tracked.get_mut(&file).map(|t| {
                if t.removed {
                    tracing::info!("Artifact {} reappeared", file);
                    t.removed = false;
                }
                t.clone()
            });

            let next = match previous {
                None => self.load_new(&path, &file, hash, None, &mut report).await,
                Some(t) if t.hash == hash => {
                    tracing::debug!("Artifact {} unchanged", file);
                    continue;
                }
                Some(t) => {
                    let live = match &t.plugin_name {
                        Some(name) => self.registry.get(name).await,
                        None => None,
                    };
                    match live {
                        Some(view) => {
                            match self.handle_change(&file, &bytes, hash, view, &mut report).await {
                                Some(next) => next,
                                None => continue,
                            }
                        }
                        None => {
                            self.load_new(&path, &file, hash, t.plugin_name, &mut report)
                                .await
                        }
                    }
                }
            };
            tracked.insert(file, next);
        }

        for (file, t) in tracked.iter_mut() {
            if !t.removed && !seen.contains(file) {
                t.removed = true;
                match &t.plugin_name {
                    Some(name) => tracing::info!(
                        "Artifact {} removed; plugin '{}' keeps its current state",
                        file,
                        name
                    ),
                    None => tracing::info!("Artifact {} removed", file),
                }
                report.removed.push(file.clone());
            }
        }
        report.removed.sort();

        report.pending = self.warn_pending();
        if report.is_quiet() {
            tracing::debug!("Scan finished: {}", report.summary());
        } else {
            tracing::info!("Scan finished: {}", report.summary());
        }
        report
    }

    async fn load_new(
        &self,
        path: &Path,
        file: &str,
        hash: String,
        known_as: Option<String>,
        report: &mut ScanReport,
    ) -> Tracked {
        match self.registry.discover_and_load(path).await {
            Ok(view) => {
                report.loaded.push(view.info.name.clone());
                Tracked {
                    hash: view.content_hash,
                    plugin_name: Some(view.info.name),
                    removed: false,
                }
            }
            Err(_) => {
                // Remembered by hash: retried only once the artifact changes.
                report.failed.push(file.to_string());
                Tracked {
                    hash,
                    plugin_name: known_as,
                    removed: false,
                }
            }
        }
    }

    /// A live plugin's artifact changed. Returns `None` to retry next cycle.
    async fn handle_change(
        &self,
        file: &str,
        bytes: &[u8],
        hash: String,
        running: PluginView,
        report: &mut ScanReport,
    ) -> Option<Tracked> {
        let name = running.info.name.clone();

        if hash == running.content_hash {
            if self.registry.cancel_pending(&name) {
                report.cancelled.push(name.clone());
            }
            return Some(Tracked {
                hash,
                plugin_name: Some(name),
                removed: false,
            });
        }

        let staged = match self.stage_pending(file, bytes, &hash) {
            Ok(staged) => staged,
            Err(e) => {
                tracing::warn!("Could not stage update of {}: {}", file, e);
                report.skipped.push(file.to_string());
                return None;
            }
        };

        tracing::info!(
            "Update detected for plugin '{}' ({} changed)",
            name,
            file
        );
        let update = PendingUpdate {
            plugin_name: name.clone(),
            staged_artifact_path: staged,
            new_hash: hash.clone(),
            detected_at: Utc::now(),
        };

        let plugin_name = match self.registry.stage_or_apply(update).await {
            Ok(UpdateOutcome::Applied(view)) => {
                report.applied.push(view.info.name.clone());
                view.info.name
            }
            Ok(UpdateOutcome::Deferred) => {
                report.deferred.push(name.clone());
                name
            }
            Err(e) => {
                tracing::warn!("Update of '{}' failed: {}", name, e);
                report.failed.push(file.to_string());
                name
            }
        };
        Some(Tracked {
            hash,
            plugin_name: Some(plugin_name),
            removed: false,
        })
    }

    /// Freeze the changed bytes as `pending/<hash prefix>/<file>` so the
    /// update keeps its original file name.
    fn stage_pending(&self, file: &str, bytes: &[u8], hash: &str) -> std::io::Result<PathBuf> {
        let dir = self
            .config
            .pending_dir
            .join(hash.get(..16).unwrap_or(hash));
        std::fs::create_dir_all(&dir)?;
        let staged = dir.join(file);
        std::fs::write(&staged, bytes)?;
        Ok(staged)
    }

    /// Re-announce every waiting update; returns how many there are.
    fn warn_pending(&self) -> usize {
        let pending = self.registry.pending().list();
        for update in &pending {
            tracing::warn!(
                "Plugin '{}' has an update pending since {}; disable it or apply pending updates",
                update.plugin_name,
                update.detected_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        pending.len()
    }

    /// Apply every pending update (maintenance window).
    pub async fn apply_all_pending_updates(
        &self,
    ) -> Vec<(String, Result<PluginView, RuntimeError>)> {
        self.registry.apply_all_pending_updates().await
    }

    /// Current fingerprint table, by file name.
    pub async fn fingerprints(&self) -> Vec<ArtifactFingerprint> {
        let tracked = self.tracked.lock().await;
        let mut fingerprints: Vec<ArtifactFingerprint> = tracked
            .iter()
            .filter(|(_, t)| !t.removed)
            .map(|(file, t)| ArtifactFingerprint {
                artifact_file_name: file.clone(),
                content_hash: t.hash.clone(),
                plugin_name: t.plugin_name.clone(),
            })
            .collect();
        fingerprints.sort_by(|a, b| a.artifact_file_name.cmp(&b.artifact_file_name));
        fingerprints
    }

    /// Start the periodic watch loop. The first tick fires after one interval;
    /// run `scan_once` for the startup scan.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        *lock(&self.shutdown_tx) = Some(shutdown_tx);

        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let interval = watcher.config.interval;
            tracing::info!(
                "Hot-reload watcher started on {} ({}s interval)",
                watcher.config.artifact_dir.display(),
                interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        watcher.scan_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Hot-reload watcher stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the watch loop.
    pub fn stop(&self) {
        if let Some(tx) = lock(&self.shutdown_tx).take() {
            let _ = tx.send(());
        }
    }
}
