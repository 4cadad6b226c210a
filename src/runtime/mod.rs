// src/runtime/mod.rs — Plugin runtime: loading, lifecycle, hot reload, events

pub mod context;
pub mod contract;
pub mod events;
pub mod fingerprint;
pub mod loader;
pub mod pending;
pub mod registry;
pub mod types;
pub mod wasm;
pub mod watcher;

pub use context::{CommandHandler, CommandTable, LogLevel, PluginContext};
pub use contract::{Hook, Plugin};
pub use events::{DispatchReport, EventFanout, EventListener, EventPriority, HostEvent, ListenerId};
pub use loader::{ArtifactLoader, Instantiated, IsolatedLoader, LoadedArtifact};
pub use registry::{PluginRegistry, UpdateOutcome};
pub use types::{
    ArtifactFingerprint, PendingUpdate, PluginDescriptor, PluginInfo, PluginState, PluginView,
};
pub use wasm::WasmArtifactLoader;
pub use watcher::{HotReloadWatcher, ScanReport, WatcherConfig};
