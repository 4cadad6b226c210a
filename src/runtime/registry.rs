// src/runtime/registry.rs — Plugin registry: the lifecycle authority
//
// Maps plugin name -> {instance, isolation scope, execution context, state}.
// Every transition for a name runs under that name's own async lock, so
// unrelated plugins never wait on each other. The registry is the only code
// that changes a plugin's state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::infra::errors::{LoadError, RuntimeError};
use crate::infra::lock;
use crate::runtime::context::{CommandTable, PluginContext};
use crate::runtime::contract::{run_hook, Hook};
use crate::runtime::events::{DispatchReport, EventFanout, HostEvent};
use crate::runtime::fingerprint::artifact_file_name;
use crate::runtime::loader::{IsolatedLoader, LoadedArtifact};
use crate::runtime::pending::{remove_staged, PendingUpdates};
use crate::runtime::types::{PendingUpdate, PluginDescriptor, PluginState, PluginView};
use crate::store::MetadataStore;

/// A live plugin: the loaded artifact and the context it talks through.
struct LivePlugin {
    artifact: LoadedArtifact,
    context: PluginContext,
}

/// Per-name lifecycle record. `plugin` is `Some` exactly while the state is
/// LOADED, ENABLED or DISABLED.
struct Slot {
    state: PluginState,
    plugin: Option<LivePlugin>,
}

impl Slot {
    fn view(&self) -> Option<PluginView> {
        self.plugin.as_ref().map(|live| PluginView {
            info: live.artifact.info.clone(),
            state: self.state,
            artifact_file_name: live.artifact.artifact_file_name.clone(),
            entry_point_name: live.artifact.entry_point.clone(),
            content_hash: live.artifact.content_hash.clone(),
            scope_id: live.artifact.scope_id(),
        })
    }
}

/// What happened to a detected artifact change.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// The old instance was replaced right away.
    Applied(PluginView),
    /// The plugin is enabled; the update waits in the pending queue.
    Deferred,
}

/// Whether a transition is written to the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Durable,
    /// Host termination: rows keep the state the operator left them in, so
    /// the next start can restore it.
    Transient,
}

pub struct PluginRegistry {
    loader: IsolatedLoader,
    store: Arc<dyn MetadataStore>,
    commands: Arc<CommandTable>,
    events: Arc<EventFanout>,
    pending: PendingUpdates,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<Slot>>>>,
}

impl PluginRegistry {
    pub fn new(
        loader: IsolatedLoader,
        store: Arc<dyn MetadataStore>,
        listener_timeout: Duration,
    ) -> Self {
        Self {
            loader,
            store,
            commands: Arc::new(CommandTable::new()),
            events: Arc::new(EventFanout::new(listener_timeout)),
            pending: PendingUpdates::new(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn commands(&self) -> &Arc<CommandTable> {
        &self.commands
    }

    pub fn events(&self) -> &Arc<EventFanout> {
        &self.events
    }

    pub fn pending(&self) -> &PendingUpdates {
        &self.pending
    }

    pub fn loader(&self) -> &IsolatedLoader {
        &self.loader
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    fn slot(&self, name: &str) -> Arc<AsyncMutex<Slot>> {
        lock(&self.slots)
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(Slot {
                    state: PluginState::Discovered,
                    plugin: None,
                }))
            })
            .clone()
    }

    fn existing_slot(&self, name: &str) -> Result<Arc<AsyncMutex<Slot>>, RuntimeError> {
        lock(&self.slots)
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotLoaded(name.to_string()))
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.slots).keys().cloned().collect();
        names.sort();
        names
    }

    // -----------------------------------------------------------------------
    // Persistence (failures are logged, never fatal to a transition)
    // -----------------------------------------------------------------------

    fn persist(&self, slot: &Slot, last_error: Option<String>) {
        self.persist_as(Record::Durable, slot, last_error);
    }

    fn persist_as(&self, record: Record, slot: &Slot, last_error: Option<String>) {
        if record == Record::Transient {
            return;
        }
        let Some(live) = slot.plugin.as_ref() else {
            return;
        };
        let artifact = &live.artifact;
        let mut descriptor = PluginDescriptor::loaded(
            &artifact.info,
            &artifact.artifact_file_name,
            &artifact.entry_point,
        );
        descriptor.enabled = slot.state == PluginState::Enabled;
        descriptor.last_error = last_error;
        if let Err(e) = self.store.upsert(&descriptor) {
            tracing::warn!("Could not persist plugin '{}': {:#}", descriptor.name, e);
        }
    }

    fn persist_unloaded(&self, descriptor: PluginDescriptor) {
        if let Err(e) = self.store.upsert(&descriptor) {
            tracing::warn!("Could not persist plugin '{}': {:#}", descriptor.name, e);
        }
    }

    fn record_failure(&self, name: &str, artifact_file: &str, error: &str) {
        if let Err(e) = self.store.record_load_error(name, artifact_file, error) {
            tracing::warn!("Could not record load error of '{}': {:#}", name, e);
        }
    }

    /// Descriptor key for an artifact that failed before reporting a name:
    /// the plugin last loaded from that file, else the file stem.
    fn failure_name(&self, path: &Path) -> String {
        let file_name = artifact_file_name(path);
        let known = self.store.list().ok().and_then(|descriptors| {
            descriptors
                .into_iter()
                .find(|d| d.artifact_file_name == file_name)
                .map(|d| d.name)
        });
        known.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or(file_name)
        })
    }

    fn transition(name: &str, slot: &mut Slot, to: PluginState) -> Result<(), RuntimeError> {
        if !slot.state.can_transition_to(to) {
            return Err(RuntimeError::IllegalTransition {
                name: name.to_string(),
                from: slot.state,
                to,
            });
        }
        tracing::debug!("Plugin '{}': {} -> {}", name, slot.state, to);
        slot.state = to;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Load the artifact at `path` and initialize it: DISCOVERED -> LOADED.
    ///
    /// On failure the plugin stays absent from the registry and the
    /// descriptor records `last_error`.
    pub async fn discover_and_load(&self, path: &Path) -> Result<PluginView, RuntimeError> {
        let mut artifact = match self.loader.load(path) {
            Ok(artifact) => artifact,
            Err(e @ LoadError::AlreadyLoaded { .. }) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                return Err(e.into());
            }
            Err(e) => {
                let name = self.failure_name(path);
                tracing::warn!("Plugin '{}' failed to load: {}", name, e);
                self.record_failure(&name, &artifact_file_name(path), &e.to_string());
                let known = lock(&self.slots).get(&name).cloned();
                if let Some(slot) = known {
                    if let Ok(mut slot) = slot.try_lock() {
                        if slot.plugin.is_none() {
                            slot.state = PluginState::LoadFailed;
                        }
                    }
                }
                return Err(e.into());
            }
        };

        let name = artifact.info.name.clone();
        let slot = self.slot(&name);
        let mut slot = slot.lock().await;
        slot.state = PluginState::Discovered;

        let context = PluginContext::new(&name, self.commands.clone(), self.events.clone());
        if let Err(e) = run_hook(artifact.instance_mut(), Hook::Initialize, &context) {
            context.revoke_all();
            context.close();
            let file = artifact.artifact_file_name.clone();
            if let Err(unload_err) = self.loader.unload(artifact) {
                tracing::warn!("{}", unload_err);
            }
            let err = LoadError::Initialize {
                name: name.clone(),
                message: format!("{e:#}"),
            };
            tracing::warn!("{}", err);
            self.record_failure(&name, &file, &err.to_string());
            Self::transition(&name, &mut slot, PluginState::LoadFailed)?;
            return Err(err.into());
        }

        slot.plugin = Some(LivePlugin { artifact, context });
        Self::transition(&name, &mut slot, PluginState::Loaded)?;
        self.persist(&slot, None);

        let view = slot
            .view()
            .ok_or_else(|| RuntimeError::NotLoaded(name.clone()))?;
        tracing::info!(
            "Loaded plugin {} v{} from {}",
            view.info.name,
            view.info.version,
            view.artifact_file_name
        );
        Ok(view)
    }

    /// LOADED | DISABLED -> ENABLED.
    ///
    /// If the hook fails the plugin keeps its prior state and everything it
    /// registered is revoked.
    pub async fn enable(&self, name: &str) -> Result<PluginView, RuntimeError> {
        let slot = self.existing_slot(name)?;
        let mut slot = slot.lock().await;
        if !slot.state.is_live() {
            return Err(RuntimeError::NotLoaded(name.to_string()));
        }
        if !slot.state.can_transition_to(PluginState::Enabled) {
            return Err(RuntimeError::IllegalTransition {
                name: name.to_string(),
                from: slot.state,
                to: PluginState::Enabled,
            });
        }

        let live = slot
            .plugin
            .as_mut()
            .ok_or_else(|| RuntimeError::NotLoaded(name.to_string()))?;
        if let Err(e) = run_hook(live.artifact.instance_mut(), Hook::Enable, &live.context) {
            let (commands, listeners) = live.context.revoke_all();
            let err = RuntimeError::HookFailed {
                name: name.to_string(),
                hook: Hook::Enable,
                message: format!("{e:#}"),
            };
            tracing::warn!(
                "{} (revoked {} command(s), {} listener(s))",
                err,
                commands,
                listeners
            );
            self.persist(&slot, Some(err.to_string()));
            return Err(err);
        }
        live.context.open_events();

        Self::transition(name, &mut slot, PluginState::Enabled)?;
        self.persist(&slot, None);
        tracing::info!("Enabled plugin '{}'", name);
        slot.view().ok_or_else(|| RuntimeError::NotLoaded(name.to_string()))
    }

    /// ENABLED -> DISABLED, then apply a pending update for the plugin.
    ///
    /// Commands and listeners are revoked even when the hook fails; the
    /// transition completes and the hook failure is reported afterwards.
    pub async fn disable(&self, name: &str) -> Result<(), RuntimeError> {
        let (hook_result, applied) = self.disable_and_apply(name).await?;
        if let Some(Err(e)) = applied {
            let err = RuntimeError::UpdateFailed {
                name: name.to_string(),
                message: e.to_string(),
            };
            tracing::warn!("{}", err);
            return Err(err);
        }
        hook_result
    }

    /// Disable `name` and consume its pending update, if any. Returns the
    /// disable hook's outcome and the update's outcome.
    async fn disable_and_apply(
        &self,
        name: &str,
    ) -> Result<
        (
            Result<(), RuntimeError>,
            Option<Result<PluginView, RuntimeError>>,
        ),
        RuntimeError,
    > {
        let slot = self.existing_slot(name)?;
        let mut slot = slot.lock().await;
        let hook_result = self.disable_locked(name, &mut slot, Record::Durable)?;

        let Some(update) = self.pending.take(name) else {
            return Ok((hook_result, None));
        };
        tracing::info!(
            "Applying pending update of '{}' ({})",
            name,
            short_hash(&update.new_hash)
        );
        if let Some(live) = slot.plugin.take() {
            if let Err(e) = self.discard_locked(name, &mut slot, live, Record::Durable) {
                tracing::warn!("{}", e);
            }
        }
        drop(slot);

        let applied = self.discover_and_load(&update.staged_artifact_path).await;
        remove_staged(&update.staged_artifact_path);
        Ok((hook_result, Some(applied)))
    }

    /// Run the disable hook and revoke resources. The outer `Err` means the
    /// transition itself was refused; the inner one reports a hook failure.
    fn disable_locked(
        &self,
        name: &str,
        slot: &mut Slot,
        record: Record,
    ) -> Result<Result<(), RuntimeError>, RuntimeError> {
        if !slot.state.is_live() {
            return Err(RuntimeError::NotLoaded(name.to_string()));
        }
        if !slot.state.can_transition_to(PluginState::Disabled) {
            return Err(RuntimeError::IllegalTransition {
                name: name.to_string(),
                from: slot.state,
                to: PluginState::Disabled,
            });
        }

        let live = slot
            .plugin
            .as_mut()
            .ok_or_else(|| RuntimeError::NotLoaded(name.to_string()))?;
        let hook_result = run_hook(live.artifact.instance_mut(), Hook::Disable, &live.context)
            .map_err(|e| RuntimeError::HookFailed {
                name: name.to_string(),
                hook: Hook::Disable,
                message: format!("{e:#}"),
            });
        let (commands, listeners) = live.context.revoke_all();

        Self::transition(name, slot, PluginState::Disabled)?;
        match &hook_result {
            Ok(()) => self.persist_as(record, slot, None),
            Err(e) => {
                tracing::warn!("{}", e);
                self.persist_as(record, slot, Some(e.to_string()));
            }
        }
        tracing::info!(
            "Disabled plugin '{}' (revoked {} command(s), {} listener(s))",
            name,
            commands,
            listeners
        );
        Ok(hook_result)
    }

    /// LOADED | DISABLED -> UNLOADED: shutdown hook, revocation, scope discard.
    pub async fn unload(&self, name: &str) -> Result<(), RuntimeError> {
        let slot = self.existing_slot(name)?;
        let mut slot = slot.lock().await;
        if !slot.state.is_live() {
            return Err(RuntimeError::NotLoaded(name.to_string()));
        }
        if !slot.state.can_transition_to(PluginState::Unloaded) {
            return Err(RuntimeError::IllegalTransition {
                name: name.to_string(),
                from: slot.state,
                to: PluginState::Unloaded,
            });
        }
        self.pending.discard(name);
        let live = slot
            .plugin
            .take()
            .ok_or_else(|| RuntimeError::NotLoaded(name.to_string()))?;
        self.discard_locked(name, &mut slot, live, Record::Durable)
    }

    /// Shut down and discard a live plugin whose slot is locked by the caller.
    ///
    /// A failing shutdown hook is logged and returned but not stored: the
    /// row of an unloaded plugin carries only load errors.
    fn discard_locked(
        &self,
        name: &str,
        slot: &mut Slot,
        mut live: LivePlugin,
        record: Record,
    ) -> Result<(), RuntimeError> {
        let hook_result = run_hook(live.artifact.instance_mut(), Hook::Shutdown, &live.context)
            .map_err(|e| RuntimeError::HookFailed {
                name: name.to_string(),
                hook: Hook::Shutdown,
                message: format!("{e:#}"),
            });
        live.context.revoke_all();

        let mut descriptor = PluginDescriptor::loaded(
            &live.artifact.info,
            &live.artifact.artifact_file_name,
            &live.artifact.entry_point,
        );
        descriptor.loaded = false;
        descriptor.enabled = false;

        let LivePlugin { artifact, context } = live;
        let unload_result = self.loader.unload(artifact);
        context.close();

        slot.state = PluginState::Unloaded;
        if record == Record::Durable {
            self.persist_unloaded(descriptor);
        }
        tracing::info!("Unloaded plugin '{}'", name);

        if let Err(e) = &hook_result {
            tracing::warn!("{}", e);
        }
        unload_result?;
        hook_result
    }

    /// Unload `name` if it is live and delete its descriptor.
    pub async fn forget(&self, name: &str) -> Result<bool, RuntimeError> {
        self.pending.discard(name);
        if let Ok(slot) = self.existing_slot(name) {
            let mut slot = slot.lock().await;
            if slot.state == PluginState::Enabled {
                if let Err(e) = self.disable_locked(name, &mut slot, Record::Durable)? {
                    tracing::warn!("{}", e);
                }
            }
            if let Some(live) = slot.plugin.take() {
                if let Err(e) = self.discard_locked(name, &mut slot, live, Record::Durable) {
                    tracing::warn!("{}", e);
                }
            }
        }
        let existed = self.store.delete(name)?;
        tracing::info!("Forgot plugin '{}'", name);
        Ok(existed)
    }

    /// Disable and unload every live plugin. One plugin's failure never
    /// stops the others; the failures are returned.
    ///
    /// Descriptors are left as they were while running.
    pub async fn shutdown_all(&self) -> Vec<RuntimeError> {
        for update in self.pending.list() {
            self.pending.discard(&update.plugin_name);
        }

        let names = self.names();
        let results = futures::future::join_all(
            names.iter().map(|name| self.shutdown_one(name)),
        )
        .await;

        let errors: Vec<RuntimeError> = results.into_iter().flatten().collect();
        for e in &errors {
            tracing::warn!("Shutdown: {}", e);
        }
        tracing::info!(
            "Shut down {} plugin slot(s), {} failure(s)",
            names.len(),
            errors.len()
        );
        errors
    }

    async fn shutdown_one(&self, name: &str) -> Vec<RuntimeError> {
        let mut errors = Vec::new();
        let Ok(slot) = self.existing_slot(name) else {
            return errors;
        };
        let mut slot = slot.lock().await;
        if slot.state == PluginState::Enabled {
            match self.disable_locked(name, &mut slot, Record::Transient) {
                Ok(Ok(())) => {}
                Ok(Err(e)) | Err(e) => errors.push(e),
            }
        }
        if let Some(live) = slot.plugin.take() {
            if let Err(e) = self.discard_locked(name, &mut slot, live, Record::Transient) {
                errors.push(e);
            }
        }
        errors
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Handle a changed artifact of a live plugin. Applied right away unless
    /// the plugin is enabled, in which case it is parked.
    pub async fn stage_or_apply(
        &self,
        update: PendingUpdate,
    ) -> Result<UpdateOutcome, RuntimeError> {
        let name = update.plugin_name.clone();
        let slot = self.slot(&name);
        let mut slot = slot.lock().await;

        if slot.state == PluginState::Enabled {
            tracing::warn!(
                "Plugin '{}' is enabled; update {} deferred until it is disabled",
                name,
                short_hash(&update.new_hash)
            );
            self.pending.insert(update);
            return Ok(UpdateOutcome::Deferred);
        }

        self.pending.discard(&name);
        if let Some(live) = slot.plugin.take() {
            if let Err(e) = self.discard_locked(&name, &mut slot, live, Record::Durable) {
                tracing::warn!("{}", e);
            }
        }
        drop(slot);

        let result = self.discover_and_load(&update.staged_artifact_path).await;
        remove_staged(&update.staged_artifact_path);
        let view = result?;
        tracing::info!(
            "Applied update of '{}' (now v{})",
            name,
            view.info.version
        );
        Ok(UpdateOutcome::Applied(view))
    }

    /// Drop a pending update whose artifact went back to the running code.
    pub fn cancel_pending(&self, name: &str) -> bool {
        let cancelled = self.pending.discard(name);
        if cancelled {
            tracing::info!("Pending update of '{}' cancelled", name);
        }
        cancelled
    }

    /// Apply every pending update: disable, apply, re-enable. Per-plugin
    /// outcomes are returned; failures do not stop the rest.
    pub async fn apply_all_pending_updates(
        &self,
    ) -> Vec<(String, Result<PluginView, RuntimeError>)> {
        let mut outcomes = Vec::new();
        for update in self.pending.list() {
            let name = update.plugin_name.clone();
            let outcome = self.apply_pending(&name).await;
            match &outcome {
                Ok(view) => tracing::info!(
                    "Pending update of '{}' applied (v{}, {})",
                    name,
                    view.info.version,
                    view.state
                ),
                Err(e) => tracing::warn!("Pending update of '{}' failed: {}", name, e),
            }
            outcomes.push((name, outcome));
        }
        outcomes
    }

    async fn apply_pending(&self, name: &str) -> Result<PluginView, RuntimeError> {
        let was_enabled = self.state(name).await == Some(PluginState::Enabled);
        if !was_enabled {
            let update = self
                .pending
                .take(name)
                .ok_or_else(|| RuntimeError::NotLoaded(name.to_string()))?;
            return match self.stage_or_apply(update).await? {
                UpdateOutcome::Applied(view) => Ok(view),
                UpdateOutcome::Deferred => Err(RuntimeError::NotLoaded(name.to_string())),
            };
        }

        let (hook_result, applied) = self.disable_and_apply(name).await?;
        if let Err(e) = hook_result {
            tracing::warn!("{}", e);
        }
        let view = applied.ok_or_else(|| RuntimeError::NotLoaded(name.to_string()))??;
        self.enable(&view.info.name).await
    }

    // -----------------------------------------------------------------------
    // Queries and passthroughs
    // -----------------------------------------------------------------------

    pub async fn get(&self, name: &str) -> Option<PluginView> {
        let slot = self.existing_slot(name).ok()?;
        let slot = slot.lock().await;
        slot.view()
    }

    pub async fn state(&self, name: &str) -> Option<PluginState> {
        let slot = self.existing_slot(name).ok()?;
        let state = slot.lock().await.state;
        Some(state)
    }

    /// Snapshots of every live plugin, by name.
    pub async fn live_plugins(&self) -> Vec<PluginView> {
        let mut views = Vec::new();
        for name in self.names() {
            if let Some(view) = self.get(&name).await {
                views.push(view);
            }
        }
        views
    }

    /// Every persisted descriptor, by name.
    pub fn list_all(&self) -> Result<Vec<PluginDescriptor>, RuntimeError> {
        Ok(self.store.list()?)
    }

    pub async fn dispatch(&self, event: HostEvent) -> DispatchReport {
        self.events.dispatch(event).await
    }

    pub fn execute_command(&self, name: &str, args: &str) -> Result<String, RuntimeError> {
        self.commands.execute(name, args)
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
