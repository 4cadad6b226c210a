// tests/common/mod.rs — Shared fixtures: stub artifacts described in TOML
//
// A stub artifact is a small TOML document:
//
//   name = "Echo"
//   version = "1.0.0"
//   entries = 1              # entry points declared (0 or 2+ fail to load)
//   fail_on = ["on_enable"]  # hooks that return an error
//   commands = ["echo"]      # registered on enable
//   listen = "normal"        # listener priority registered on enable
//
// Every instantiation gets its own counters so tests can tell instances apart.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;

use plughost::infra::errors::LoadError;
use plughost::runtime::{
    ArtifactLoader, EventPriority, HostEvent, Instantiated, IsolatedLoader, Plugin,
    PluginContext, PluginInfo, PluginRegistry,
};
use plughost::store::SqliteMetadataStore;

#[derive(Debug, Deserialize)]
struct StubManifest {
    name: String,
    version: String,
    #[serde(default = "one")]
    entries: usize,
    #[serde(default)]
    fail_on: Vec<String>,
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    listen: Option<String>,
}

fn one() -> usize {
    1
}

/// Hook and callback counts of one plugin instance.
#[derive(Debug, Default)]
pub struct Counters {
    pub version: String,
    pub initialize: AtomicUsize,
    pub enable: AtomicUsize,
    pub disable: AtomicUsize,
    pub shutdown: AtomicUsize,
    pub commands: AtomicUsize,
    pub events: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// All hook counts, in lifecycle order.
    pub fn hooks(&self) -> [usize; 4] {
        [
            Self::get(&self.initialize),
            Self::get(&self.enable),
            Self::get(&self.disable),
            Self::get(&self.shutdown),
        ]
    }
}

struct StubPlugin {
    manifest: StubManifest,
    counters: Arc<Counters>,
}

impl StubPlugin {
    fn hook(&self, hook: &str, counter: &AtomicUsize) -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.manifest.fail_on.iter().any(|h| h == hook) {
            anyhow::bail!("{} refused by {}", hook, self.manifest.name);
        }
        Ok(())
    }
}

impl Plugin for StubPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            author: "tests".into(),
            description: "stub plugin".into(),
        }
    }

    fn initialize(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        self.hook("initialize", &self.counters.initialize)
    }

    fn on_enable(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        for command in &self.manifest.commands {
            let counters = self.counters.clone();
            let label = format!("{} v{}", self.manifest.name, self.manifest.version);
            ctx.register_command(
                command,
                Arc::new(move |args: &str| -> anyhow::Result<String> {
                    counters.commands.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("{label}: {args}"))
                }),
            )?;
        }
        if let Some(priority) = &self.manifest.listen {
            let priority = EventPriority::parse(priority).unwrap_or(EventPriority::Normal);
            let counters = self.counters.clone();
            ctx.register_listener(
                Arc::new(move |_: &HostEvent| -> anyhow::Result<()> {
                    counters.events.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                priority,
            )?;
        }
        ctx.log(plughost::runtime::LogLevel::Debug, "enabled");
        self.hook("on_enable", &self.counters.enable)
    }

    fn on_disable(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        self.hook("on_disable", &self.counters.disable)
    }

    fn shutdown(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        self.hook("shutdown", &self.counters.shutdown)
    }
}

/// `ArtifactLoader` over TOML stub artifacts, recording every instance.
#[derive(Default)]
pub struct StubLoader {
    instances: Mutex<HashMap<String, Vec<Arc<Counters>>>>,
}

impl StubLoader {
    /// Counters of every instance created for `name`, oldest first.
    pub fn instances(&self, name: &str) -> Vec<Arc<Counters>> {
        self.instances
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn latest(&self, name: &str) -> Arc<Counters> {
        self.instances(name)
            .pop()
            .unwrap_or_else(|| panic!("no instance of {name}"))
    }
}

impl ArtifactLoader for StubLoader {
    fn instantiate(&self, staged: &Path, artifact_file_name: &str) -> Result<Instantiated, LoadError> {
        let text = std::fs::read_to_string(staged).map_err(|source| LoadError::Unreadable {
            path: staged.to_path_buf(),
            source,
        })?;
        let manifest: StubManifest = toml::from_str(&text).map_err(|e| LoadError::Instantiation {
            artifact: artifact_file_name.to_string(),
            message: e.to_string(),
        })?;
        if manifest.entries != 1 {
            return Err(LoadError::AmbiguousOrMissingEntryPoint {
                artifact: artifact_file_name.to_string(),
                candidates: (0..manifest.entries).map(|i| format!("Stub{i}")).collect(),
            });
        }

        let counters = Arc::new(Counters {
            version: manifest.version.clone(),
            ..Counters::default()
        });
        self.instances
            .lock()
            .unwrap()
            .entry(manifest.name.clone())
            .or_default()
            .push(counters.clone());

        Ok(Instantiated {
            entry_point: format!("{}Plugin", manifest.name),
            plugin: Box::new(StubPlugin { manifest, counters }),
        })
    }
}

/// Stub artifact text with commands `echo` and a normal-priority listener.
pub fn stub(name: &str, version: &str) -> String {
    format!(
        "name = \"{name}\"\nversion = \"{version}\"\ncommands = [\"{}\"]\nlisten = \"normal\"\n",
        name.to_lowercase()
    )
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub loader: Arc<StubLoader>,
    pub registry: Arc<PluginRegistry>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        let loader = Arc::new(StubLoader::default());
        let isolated = IsolatedLoader::new(dir.path().join("staging/scopes"), loader.clone());
        let store = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let registry = Arc::new(PluginRegistry::new(
            isolated,
            store,
            Duration::from_millis(500),
        ));
        Self {
            dir,
            loader,
            registry,
        }
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.dir.path().join("staging/pending")
    }

    /// Write (or overwrite) an artifact in the plugin directory.
    pub fn write(&self, file: &str, content: &str) -> PathBuf {
        let path = self.plugins_dir().join(file);
        std::fs::write(&path, content).unwrap();
        path
    }
}
