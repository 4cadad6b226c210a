// src/runtime/pending.rs — Deferred updates for busy plugins
//
// An enabled plugin is never swapped underneath itself. A detected change is
// parked here until the plugin is disabled (the registry consumes it right
// after the disable transition) or an operator flushes the queue.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::infra::lock;
use crate::runtime::types::PendingUpdate;

#[derive(Default)]
pub struct PendingUpdates {
    updates: Mutex<HashMap<String, PendingUpdate>>,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `update`, superseding (and deleting the staged copy of) any
    /// earlier update for the same plugin.
    pub fn insert(&self, update: PendingUpdate) {
        let previous = lock(&self.updates).insert(update.plugin_name.clone(), update);
        if let Some(previous) = previous {
            remove_staged(&previous.staged_artifact_path);
        }
    }

    /// Take the update for `plugin`, leaving its staged copy for the caller.
    pub fn take(&self, plugin: &str) -> Option<PendingUpdate> {
        lock(&self.updates).remove(plugin)
    }

    /// Drop the update for `plugin` and its staged copy.
    pub fn discard(&self, plugin: &str) -> bool {
        match self.take(plugin) {
            Some(update) => {
                remove_staged(&update.staged_artifact_path);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, plugin: &str) -> Option<PendingUpdate> {
        lock(&self.updates).get(plugin).cloned()
    }

    /// All parked updates, oldest first.
    pub fn list(&self) -> Vec<PendingUpdate> {
        let mut updates: Vec<PendingUpdate> = lock(&self.updates).values().cloned().collect();
        updates.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then_with(|| a.plugin_name.cmp(&b.plugin_name))
        });
        updates
    }

    pub fn len(&self) -> usize {
        lock(&self.updates).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn remove_staged(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Could not delete staged update {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn update(plugin: &str, path: PathBuf, hash: &str) -> PendingUpdate {
        PendingUpdate {
            plugin_name: plugin.into(),
            staged_artifact_path: path,
            new_hash: hash.into(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_newer_update_supersedes_older() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("echo-h2.wasm");
        let second = dir.path().join("echo-h3.wasm");
        std::fs::write(&first, b"v2").unwrap();
        std::fs::write(&second, b"v3").unwrap();

        let pending = PendingUpdates::new();
        pending.insert(update("Echo", first.clone(), "h2"));
        pending.insert(update("Echo", second.clone(), "h3"));

        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get("Echo").unwrap().new_hash, "h3");
        assert!(!first.exists());
        assert!(second.exists());
    }

    #[test]
    fn test_take_leaves_file_discard_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wasm");
        let b = dir.path().join("b.wasm");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let pending = PendingUpdates::new();
        pending.insert(update("A", a.clone(), "ha"));
        pending.insert(update("B", b.clone(), "hb"));

        let taken = pending.take("A").unwrap();
        assert_eq!(taken.staged_artifact_path, a);
        assert!(a.exists());

        assert!(pending.discard("B"));
        assert!(!b.exists());
        assert!(!pending.discard("B"));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_list_is_ordered_by_detection() {
        let pending = PendingUpdates::new();
        let mut older = update("Zed", PathBuf::from("/nonexistent/z"), "hz");
        older.detected_at = Utc::now() - chrono::Duration::seconds(30);
        pending.insert(update("Alpha", PathBuf::from("/nonexistent/a"), "ha"));
        pending.insert(older);

        let names: Vec<String> = pending.list().into_iter().map(|u| u.plugin_name).collect();
        assert_eq!(names, vec!["Zed", "Alpha"]);
    }
}
