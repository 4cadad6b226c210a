// src/runtime/types.rs — Plugin data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identity a plugin reports about itself (`getInfo`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
}

/// Lifecycle states.
///
/// `Discovered -> Loaded -> Enabled <-> Disabled -> Unloaded`, plus the
/// terminal `LoadFailed` reachable only from `Discovered`. A loaded plugin
/// that was never enabled may be unloaded directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    Discovered,
    Loaded,
    Enabled,
    Disabled,
    Unloaded,
    LoadFailed,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "DISCOVERED",
            Self::Loaded => "LOADED",
            Self::Enabled => "ENABLED",
            Self::Disabled => "DISABLED",
            Self::Unloaded => "UNLOADED",
            Self::LoadFailed => "LOAD_FAILED",
        }
    }

    /// Whether `self -> next` is a legal single step.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Discovered, Loaded)
                | (Discovered, LoadFailed)
                | (Loaded, Enabled)
                | (Loaded, Unloaded)
                | (Enabled, Disabled)
                | (Disabled, Enabled)
                | (Disabled, Unloaded)
        )
    }

    /// A live instance exists in this state.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Loaded | Self::Enabled | Self::Disabled)
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a plugin, one row per unique name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub artifact_file_name: String,
    pub entry_point_name: String,
    pub enabled: bool,
    pub loaded: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PluginDescriptor {
    /// Descriptor for a freshly loaded plugin.
    pub fn loaded(info: &PluginInfo, artifact_file_name: &str, entry_point_name: &str) -> Self {
        let now = Utc::now();
        Self {
            name: info.name.clone(),
            version: info.version.clone(),
            author: info.author.clone(),
            description: info.description.clone(),
            artifact_file_name: artifact_file_name.to_string(),
            entry_point_name: entry_point_name.to_string(),
            enabled: false,
            loaded: true,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Descriptor recording a failed load. Identity fields stay empty when
    /// the artifact never told us who it is.
    pub fn load_failed(name: &str, artifact_file_name: &str, error: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            version: String::new(),
            author: String::new(),
            description: String::new(),
            artifact_file_name: artifact_file_name.to_string(),
            entry_point_name: String::new(),
            enabled: false,
            loaded: false,
            last_error: Some(error.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    /// The state an operator should read from a persisted row.
    pub fn display_state(&self) -> PluginState {
        match (self.loaded, self.enabled, self.last_error.is_some()) {
            (true, true, _) => PluginState::Enabled,
            (true, false, _) => PluginState::Loaded,
            (false, _, true) => PluginState::LoadFailed,
            (false, _, false) => PluginState::Unloaded,
        }
    }
}

/// Content hash of one artifact, recomputed every watch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactFingerprint {
    pub artifact_file_name: String,
    pub content_hash: String,
    /// `None` until the artifact loads successfully.
    pub plugin_name: Option<String>,
}

/// A detected change that cannot be applied while its plugin is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub plugin_name: String,
    pub staged_artifact_path: PathBuf,
    pub new_hash: String,
    pub detected_at: DateTime<Utc>,
}

/// Read-only snapshot of a live plugin handed out by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginView {
    pub info: PluginInfo,
    pub state: PluginState,
    pub artifact_file_name: String,
    pub entry_point_name: String,
    pub content_hash: String,
    /// Changes every time the plugin's code is (re)loaded.
    pub scope_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use PluginState::*;

    #[test]
    fn test_legal_transitions() {
        assert!(Discovered.can_transition_to(Loaded));
        assert!(Discovered.can_transition_to(LoadFailed));
        assert!(Loaded.can_transition_to(Enabled));
        assert!(Enabled.can_transition_to(Disabled));
        assert!(Disabled.can_transition_to(Enabled));
        assert!(Disabled.can_transition_to(Unloaded));
        assert!(Loaded.can_transition_to(Unloaded));
    }

    #[test]
    fn test_enabled_cannot_skip_disable() {
        assert!(!Enabled.can_transition_to(Unloaded));
        assert!(!Discovered.can_transition_to(Enabled));
        assert!(!LoadFailed.can_transition_to(Loaded));
        assert!(!Unloaded.can_transition_to(Loaded));
        assert!(!Enabled.can_transition_to(Enabled));
    }

    #[test]
    fn test_state_serializes_screaming() {
        let json = serde_json::to_string(&LoadFailed).unwrap();
        assert_eq!(json, "\"LOAD_FAILED\"");
        assert_eq!(LoadFailed.to_string(), "LOAD_FAILED");
    }

    #[test]
    fn test_info_optional_fields() {
        let info: PluginInfo = serde_json::from_str(r#"{"name":"Echo","version":"1"}"#).unwrap();
        assert_eq!(info.author, "");
        assert_eq!(info.description, "");
    }

    #[test]
    fn test_descriptor_display_state() {
        let info = PluginInfo {
            name: "Echo".into(),
            version: "1.0.0".into(),
            author: String::new(),
            description: String::new(),
        };
        let mut d = PluginDescriptor::loaded(&info, "echo.wasm", "EchoPlugin");
        assert_eq!(d.display_state(), Loaded);
        d.enabled = true;
        assert_eq!(d.display_state(), Enabled);

        let failed = PluginDescriptor::load_failed("broken", "broken.wasm", "no entry point");
        assert_eq!(failed.display_state(), LoadFailed);
        assert!(!failed.loaded);
    }
}
