// src/infra/paths.rs — Path management
//
// All paths respect the PLUGHOST_HOME environment variable for isolation.
// When PLUGHOST_HOME is set, config and data live under that directory.
// When unset, config uses ~/.plughost/ and data uses XDG_DATA_HOME/plughost.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;
use std::sync::OnceLock;

static PROJECT_DIRS: OnceLock<Option<ProjectDirs>> = OnceLock::new();

fn project_dirs() -> Option<&'static ProjectDirs> {
    PROJECT_DIRS
        .get_or_init(|| ProjectDirs::from("", "", "plughost"))
        .as_ref()
}

/// Returns the PLUGHOST_HOME override, if set.
fn plughost_home() -> Option<PathBuf> {
    std::env::var_os("PLUGHOST_HOME").map(PathBuf::from)
}

/// Home directory, or the current directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $PLUGHOST_HOME/ or ~/.plughost/
pub fn config_dir() -> PathBuf {
    if let Some(home) = plughost_home() {
        return home;
    }
    dirs_home().join(".plughost")
}

/// Data directory: $PLUGHOST_HOME/data/ or ~/.local/share/plughost/
pub fn data_dir() -> PathBuf {
    if let Some(home) = plughost_home() {
        return home.join("data");
    }
    match project_dirs() {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => config_dir().join("data"),
    }
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Metadata database path
pub fn db_path() -> PathBuf {
    data_dir().join("plughost.db")
}

/// Artifact store: one `.wasm` file per plugin
pub fn artifacts_dir() -> PathBuf {
    data_dir().join("plugins")
}

/// Private staging area for loaded copies and pending updates
pub fn staging_dir() -> PathBuf {
    data_dir().join("staging")
}
