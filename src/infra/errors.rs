// src/infra/errors.rs — Error types for plughost

use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::contract::Hook;
use crate::runtime::types::PluginState;

/// Why an artifact could not become a loaded plugin.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Artifact {} is unreadable: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact '{artifact}' must declare exactly one entry point, found {}", describe_candidates(.candidates))]
    AmbiguousOrMissingEntryPoint {
        artifact: String,
        candidates: Vec<String>,
    },

    #[error("Plugin '{name}' is already loaded")]
    AlreadyLoaded { name: String },

    #[error("Failed to instantiate '{artifact}': {message}")]
    Instantiation { artifact: String, message: String },

    #[error("Failed to stage '{artifact}': {source}")]
    Staging {
        artifact: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugin '{name}' failed to initialize: {message}")]
    Initialize { name: String, message: String },
}

fn describe_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "none".into()
    } else {
        format!("{} ({})", candidates.len(), candidates.join(", "))
    }
}

/// Failures of lifecycle operations driven through the registry.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Plugin '{name}' hook '{hook}' failed: {message}")]
    HookFailed {
        name: String,
        hook: Hook,
        message: String,
    },

    #[error("Plugin '{name}' cannot go from {from} to {to}")]
    IllegalTransition {
        name: String,
        from: PluginState,
        to: PluginState,
    },

    #[error("Plugin '{name}' was disabled but its pending update failed: {message}")]
    UpdateFailed { name: String, message: String },

    #[error("Plugin '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Plugin '{name}' was invoked after its code was discarded")]
    StaleReference { name: String },

    #[error("Command '{0}' is not registered")]
    UnknownCommand(String),

    #[error("Command '{command}' is already registered by plugin '{owner}'")]
    CommandConflict { command: String, owner: String },

    #[error("Command '{command}' of plugin '{plugin}' failed: {message}")]
    CommandFailed {
        command: String,
        plugin: String,
        message: String,
    },

    #[error("Execution context of plugin '{0}' is closed")]
    ContextClosed(String),

    #[error("Metadata store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl RuntimeError {
    /// The plugin the failure is about, when there is one.
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            RuntimeError::Load(LoadError::AlreadyLoaded { name })
            | RuntimeError::Load(LoadError::Initialize { name, .. })
            | RuntimeError::HookFailed { name, .. }
            | RuntimeError::IllegalTransition { name, .. }
            | RuntimeError::UpdateFailed { name, .. }
            | RuntimeError::StaleReference { name } => Some(name),
            RuntimeError::NotLoaded(name) | RuntimeError::ContextClosed(name) => Some(name),
            RuntimeError::CommandFailed { plugin, .. } => Some(plugin),
            RuntimeError::CommandConflict { owner, .. } => Some(owner),
            _ => None,
        }
    }
}

/// I/O failure while hashing an artifact; the artifact is skipped for one cycle.
#[derive(Error, Debug)]
#[error("Cannot fingerprint {}: {source}", path.display())]
pub struct FingerprintError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_entry_point_message() {
        let err = LoadError::AmbiguousOrMissingEntryPoint {
            artifact: "broken.wasm".into(),
            candidates: vec![],
        };
        assert_eq!(
            err.to_string(),
            "Artifact 'broken.wasm' must declare exactly one entry point, found none"
        );
    }

    #[test]
    fn test_ambiguous_entry_point_lists_candidates() {
        let err = LoadError::AmbiguousOrMissingEntryPoint {
            artifact: "twins.wasm".into(),
            candidates: vec!["A".into(), "B".into()],
        };
        assert!(err.to_string().ends_with("found 2 (A, B)"));
    }

    #[test]
    fn test_plugin_name_extraction() {
        let err = RuntimeError::IllegalTransition {
            name: "Echo".into(),
            from: PluginState::Enabled,
            to: PluginState::Unloaded,
        };
        assert_eq!(err.plugin_name(), Some("Echo"));
        assert_eq!(
            err.to_string(),
            "Plugin 'Echo' cannot go from ENABLED to UNLOADED"
        );
        assert_eq!(RuntimeError::UnknownCommand("x".into()).plugin_name(), None);
    }
}
