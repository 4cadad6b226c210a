// src/runtime/loader.rs — Isolated loading of plugin artifacts
//
// Every load copies the artifact into a private staging file, instantiates it
// in a fresh isolation scope and reserves the plugin's name. The running code
// only ever maps the staged copy, so the original artifact can be replaced on
// disk at any time. Unloading drops the instance (and with it the scope) and
// deletes the staged copy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::infra::errors::{LoadError, RuntimeError};
use crate::infra::lock;
use crate::runtime::contract::{contain, Plugin};
use crate::runtime::fingerprint::{artifact_file_name, hash_bytes};
use crate::runtime::types::PluginInfo;

/// What an artifact format produces from a staged file.
pub struct Instantiated {
    /// Name of the single entry point the artifact declares.
    pub entry_point: String,
    pub plugin: Box<dyn Plugin>,
}

/// An artifact format (WASM modules in production).
///
/// Each call must build a brand-new scope: nothing may be shared with a
/// previous instantiation of the same or any other artifact.
pub trait ArtifactLoader: Send + Sync {
    fn instantiate(&self, staged: &Path, artifact_file_name: &str)
        -> Result<Instantiated, LoadError>;
}

/// Opaque handle to one plugin's isolation scope.
#[derive(Debug)]
pub struct IsolationScope {
    id: u64,
    staged_path: PathBuf,
}

/// A plugin instance together with the scope it lives in.
pub struct LoadedArtifact {
    pub info: PluginInfo,
    pub entry_point: String,
    pub artifact_file_name: String,
    pub content_hash: String,
    instance: Box<dyn Plugin>,
    scope: IsolationScope,
}

impl LoadedArtifact {
    pub fn scope_id(&self) -> u64 {
        self.scope.id
    }

    pub fn staged_path(&self) -> &Path {
        &self.scope.staged_path
    }

    pub fn instance_mut(&mut self) -> &mut dyn Plugin {
        self.instance.as_mut()
    }
}

impl std::fmt::Debug for LoadedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedArtifact")
            .field("name", &self.info.name)
            .field("version", &self.info.version)
            .field("entry_point", &self.entry_point)
            .field("scope", &self.scope)
            .finish()
    }
}

pub struct IsolatedLoader {
    staging_dir: PathBuf,
    backend: Arc<dyn ArtifactLoader>,
    /// Plugin name -> scope id of the resident instance.
    resident: Mutex<HashMap<String, u64>>,
    next_scope: AtomicU64,
    /// Staged copies that could not be deleted yet (e.g. locked files).
    deferred_cleanup: Mutex<Vec<PathBuf>>,
}

impl IsolatedLoader {
    pub fn new(staging_dir: impl Into<PathBuf>, backend: Arc<dyn ArtifactLoader>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            backend,
            resident: Mutex::new(HashMap::new()),
            next_scope: AtomicU64::new(1),
            deferred_cleanup: Mutex::new(Vec::new()),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Stage and instantiate the artifact at `artifact_path`.
    pub fn load(&self, artifact_path: &Path) -> Result<LoadedArtifact, LoadError> {
        let file_name = artifact_file_name(artifact_path);
        let bytes = std::fs::read(artifact_path).map_err(|source| LoadError::Unreadable {
            path: artifact_path.to_path_buf(),
            source,
        })?;
        let content_hash = hash_bytes(&bytes);

        let scope_id = self.next_scope.fetch_add(1, Ordering::SeqCst);
        let staged_path = self.staging_dir.join(format!("{scope_id:06}-{file_name}"));
        std::fs::create_dir_all(&self.staging_dir)
            .and_then(|_| std::fs::write(&staged_path, &bytes))
            .map_err(|source| LoadError::Staging {
                artifact: file_name.clone(),
                source,
            })?;
        let scope = IsolationScope {
            id: scope_id,
            staged_path,
        };

        let Instantiated {
            entry_point,
            plugin,
        } = match self.backend.instantiate(&scope.staged_path, &file_name) {
            Ok(instantiated) => instantiated,
            Err(e) => {
                self.discard_staged(&scope.staged_path);
                return Err(e);
            }
        };

        let info = match contain(|| Ok(plugin.info())) {
            Ok(info) if !info.name.trim().is_empty() => info,
            Ok(_) => {
                drop(plugin);
                self.discard_staged(&scope.staged_path);
                return Err(LoadError::Instantiation {
                    artifact: file_name,
                    message: "plugin reported an empty name".into(),
                });
            }
            Err(e) => {
                drop(plugin);
                self.discard_staged(&scope.staged_path);
                return Err(LoadError::Instantiation {
                    artifact: file_name,
                    message: format!("info failed: {e:#}"),
                });
            }
        };

        {
            let mut resident = lock(&self.resident);
            if resident.contains_key(&info.name) {
                drop(resident);
                drop(plugin);
                self.discard_staged(&scope.staged_path);
                return Err(LoadError::AlreadyLoaded { name: info.name });
            }
            resident.insert(info.name.clone(), scope.id);
        }

        tracing::debug!(
            "Staged '{}' as scope {} ({} v{})",
            file_name,
            scope.id,
            info.name,
            info.version
        );

        Ok(LoadedArtifact {
            info,
            entry_point,
            artifact_file_name: file_name,
            content_hash,
            instance: plugin,
            scope,
        })
    }

    /// Discard a plugin's scope: drop the instance, release its name and
    /// delete the staged copy.
    pub fn unload(&self, artifact: LoadedArtifact) -> Result<(), RuntimeError> {
        let LoadedArtifact {
            info,
            instance,
            scope,
            ..
        } = artifact;

        drop(instance);

        let released = {
            let mut resident = lock(&self.resident);
            if resident.get(&info.name) == Some(&scope.id) {
                resident.remove(&info.name);
                true
            } else {
                false
            }
        };

        self.discard_staged(&scope.staged_path);
        tracing::debug!("Discarded scope {} of '{}'", scope.id, info.name);

        if released {
            Ok(())
        } else {
            Err(RuntimeError::NotLoaded(info.name))
        }
    }

    pub fn is_resident(&self, name: &str) -> bool {
        lock(&self.resident).contains_key(name)
    }

    pub fn resident_count(&self) -> usize {
        lock(&self.resident).len()
    }

    /// Staged copies waiting for deletion.
    pub fn deferred_cleanup(&self) -> Vec<PathBuf> {
        lock(&self.deferred_cleanup).clone()
    }

    fn discard_staged(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    "Could not delete staged copy {} ({}); retrying at shutdown",
                    path.display(),
                    e
                );
                lock(&self.deferred_cleanup).push(path.to_path_buf());
            }
        }
    }

    /// Process-exit cleanup: retry deferred deletions and drop the staging area.
    pub fn cleanup_staging(&self) {
        let deferred = std::mem::take(&mut *lock(&self.deferred_cleanup));
        for path in deferred {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Leaving staged copy {}: {}", path.display(), e);
                }
            }
        }
        if lock(&self.resident).is_empty() && self.staging_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.staging_dir) {
                tracing::warn!(
                    "Could not remove staging dir {}: {}",
                    self.staging_dir.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::PluginContext;

    /// Artifact content is `name:version`; `!` makes instantiation fail.
    struct LineLoader;

    struct LinePlugin {
        info: PluginInfo,
    }

    impl Plugin for LinePlugin {
        fn info(&self) -> PluginInfo {
            self.info.clone()
        }
        fn initialize(&mut self, _: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }
        fn on_enable(&mut self, _: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }
        fn on_disable(&mut self, _: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }
        fn shutdown(&mut self, _: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl ArtifactLoader for LineLoader {
        fn instantiate(
            &self,
            staged: &Path,
            artifact_file_name: &str,
        ) -> Result<Instantiated, LoadError> {
            let text = std::fs::read_to_string(staged).map_err(|source| LoadError::Unreadable {
                path: staged.to_path_buf(),
                source,
            })?;
            if text.trim() == "!" {
                return Err(LoadError::AmbiguousOrMissingEntryPoint {
                    artifact: artifact_file_name.to_string(),
                    candidates: vec![],
                });
            }
            let (name, version) = text.trim().split_once(':').unwrap_or((text.trim(), "0"));
            Ok(Instantiated {
                entry_point: "Line".into(),
                plugin: Box::new(LinePlugin {
                    info: PluginInfo {
                        name: name.into(),
                        version: version.into(),
                        author: String::new(),
                        description: String::new(),
                    },
                }),
            })
        }
    }

    fn setup() -> (tempfile::TempDir, IsolatedLoader) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("store")).unwrap();
        let loader = IsolatedLoader::new(dir.path().join("staging"), Arc::new(LineLoader));
        (dir, loader)
    }

    #[test]
    fn test_load_stages_private_copy() {
        let (dir, loader) = setup();
        let artifact = dir.path().join("store/echo.wasm");
        std::fs::write(&artifact, "Echo:1.0.0").unwrap();

        let loaded = loader.load(&artifact).unwrap();
        assert_eq!(loaded.info.name, "Echo");
        assert_eq!(loaded.artifact_file_name, "echo.wasm");
        assert_eq!(loaded.content_hash, hash_bytes(b"Echo:1.0.0"));
        assert!(loaded.staged_path().starts_with(loader.staging_dir()));
        assert!(loaded.staged_path().exists());

        // The original can be replaced without touching the staged copy
        std::fs::write(&artifact, "Echo:2.0.0").unwrap();
        assert_eq!(
            std::fs::read_to_string(loaded.staged_path()).unwrap(),
            "Echo:1.0.0"
        );
    }

    #[test]
    fn test_second_load_of_same_name_fails_fast() {
        let (dir, loader) = setup();
        let a = dir.path().join("store/a.wasm");
        let b = dir.path().join("store/b.wasm");
        std::fs::write(&a, "Echo:1").unwrap();
        std::fs::write(&b, "Echo:2").unwrap();

        let first = loader.load(&a).unwrap();
        let err = loader.load(&b).unwrap_err();
        assert!(matches!(err, LoadError::AlreadyLoaded { ref name } if name == "Echo"));
        assert_eq!(loader.resident_count(), 1);

        loader.unload(first).unwrap();
        let again = loader.load(&b).unwrap();
        assert_eq!(again.info.version, "2");
    }

    #[test]
    fn test_each_load_gets_a_fresh_scope() {
        let (dir, loader) = setup();
        let a = dir.path().join("store/a.wasm");
        std::fs::write(&a, "A:1").unwrap();

        let first = loader.load(&a).unwrap();
        let first_id = first.scope_id();
        loader.unload(first).unwrap();
        let second = loader.load(&a).unwrap();
        assert_ne!(second.scope_id(), first_id);
    }

    #[test]
    fn test_unload_deletes_staged_copy_and_releases_name() {
        let (dir, loader) = setup();
        let a = dir.path().join("store/a.wasm");
        std::fs::write(&a, "A:1").unwrap();

        let loaded = loader.load(&a).unwrap();
        let staged = loaded.staged_path().to_path_buf();
        loader.unload(loaded).unwrap();
        assert!(!staged.exists());
        assert!(!loader.is_resident("A"));
    }

    #[test]
    fn test_failed_instantiation_leaves_nothing_behind() {
        let (dir, loader) = setup();
        let bad = dir.path().join("store/bad.wasm");
        std::fs::write(&bad, "!").unwrap();

        let err = loader.load(&bad).unwrap_err();
        assert!(matches!(err, LoadError::AmbiguousOrMissingEntryPoint { .. }));
        assert_eq!(loader.resident_count(), 0);
        let leftovers = std::fs::read_dir(loader.staging_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_unreadable_artifact() {
        let (dir, loader) = setup();
        let err = loader.load(&dir.path().join("store/missing.wasm")).unwrap_err();
        assert!(matches!(err, LoadError::Unreadable { .. }));
    }

    #[test]
    fn test_cleanup_removes_staging_dir_when_empty() {
        let (dir, loader) = setup();
        let a = dir.path().join("store/a.wasm");
        std::fs::write(&a, "A:1").unwrap();
        let loaded = loader.load(&a).unwrap();
        loader.unload(loaded).unwrap();

        loader.cleanup_staging();
        assert!(!loader.staging_dir().exists());
        assert!(loader.deferred_cleanup().is_empty());
    }
}
