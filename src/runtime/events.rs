// src/runtime/events.rs — Host event fan-out to plugin listeners
//
// Listeners are grouped by priority tier and invoked tier by tier. A listener
// only receives an event while its plugin is enabled: the registry opens a
// plugin's gate on enable and `unregister_all_for` closes it on disable,
// waiting (at most one listener budget) for invocations already running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::infra::lock;
use crate::runtime::contract::contain;

/// Dispatch tiers, invoked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    High,
    Normal,
    Low,
    /// Observes the outcome; runs last.
    Monitor,
}

impl EventPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Monitor => "monitor",
        }
    }

    /// Decode the numeric tier used across the wasm boundary.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::High),
            1 => Some(Self::Normal),
            2 => Some(Self::Low),
            3 => Some(Self::Monitor),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            "monitor" => Some(Self::Monitor),
            _ => None,
        }
    }
}

/// An event raised by the host (chat message, schedule tick, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl HostEvent {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value, source: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &HostEvent) -> anyhow::Result<()>;
}

impl<F> EventListener for F
where
    F: Fn(&HostEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &HostEvent) -> anyhow::Result<()> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

struct ListenerEntry {
    id: ListenerId,
    plugin: String,
    listener: Arc<dyn EventListener>,
}

#[derive(Default)]
struct GateState {
    open: bool,
    in_flight: usize,
}

/// Per-plugin delivery switch plus the invocations currently running.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    idle: Condvar,
}

impl Gate {
    fn open(&self) {
        lock(&self.state).open = true;
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Admit one invocation; `None` while the gate is closed.
    fn enter(&self) -> Option<Admitted<'_>> {
        let mut state = lock(&self.state);
        if !state.open {
            return None;
        }
        state.in_flight += 1;
        Some(Admitted(self))
    }

    /// Close, then wait up to `budget` for running invocations.
    /// Returns how many are still running.
    fn close(&self, budget: Duration) -> usize {
        let mut state = lock(&self.state);
        state.open = false;
        if state.in_flight == 0 {
            return 0;
        }
        let (state, _) = self
            .idle
            .wait_timeout_while(state, budget, |s| s.in_flight > 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.in_flight
    }
}

/// An invocation admitted through a gate; leaves it on drop.
struct Admitted<'a>(&'a Gate);

impl Drop for Admitted<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.0.state);
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            self.0.idle.notify_all();
        }
    }
}

#[derive(Default)]
struct FanoutState {
    tiers: BTreeMap<EventPriority, Vec<ListenerEntry>>,
    /// Open while the plugin is enabled.
    gates: HashMap<String, Arc<Gate>>,
}

impl FanoutState {
    fn gate(&mut self, plugin: &str) -> Arc<Gate> {
        self.gates.entry(plugin.to_string()).or_default().clone()
    }

    fn is_registered(&self, id: ListenerId) -> bool {
        self.tiers.values().flatten().any(|e| e.id == id)
    }
}

/// Outcome of one `dispatch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Listeners whose plugin was not enabled, or which were removed meanwhile.
    pub skipped: usize,
    /// `(plugin, error)` for listeners that failed.
    pub failed: Vec<(String, String)>,
    /// Plugins whose listener exceeded the time budget.
    pub timed_out: Vec<String>,
}

enum Invocation {
    Delivered,
    Skipped,
    Failed(String),
}

pub struct EventFanout {
    state: Arc<Mutex<FanoutState>>,
    next_id: AtomicU64,
    listener_timeout: Duration,
}

impl EventFanout {
    pub fn new(listener_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(FanoutState::default())),
            next_id: AtomicU64::new(1),
            listener_timeout,
        }
    }

    pub fn register_listener(
        &self,
        plugin: &str,
        listener: Arc<dyn EventListener>,
        priority: EventPriority,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = lock(&self.state);
        state.gate(plugin);
        state.tiers.entry(priority).or_default().push(ListenerEntry {
            id,
            plugin: plugin.to_string(),
            listener,
        });
        tracing::debug!(
            "Listener {} registered for plugin '{}' ({})",
            id.0,
            plugin,
            priority.as_str()
        );
        id
    }

    /// Remove one listener; only its owning plugin may remove it.
    pub fn unregister_listener(&self, plugin: &str, id: ListenerId) -> bool {
        let mut state = lock(&self.state);
        for entries in state.tiers.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id && e.plugin == plugin) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Start delivering events to `plugin`'s listeners.
    pub fn open_gate(&self, plugin: &str) {
        lock(&self.state).gate(plugin).open();
    }

    /// Remove every listener of `plugin` and stop delivering to it.
    ///
    /// Idempotent. Returns once no invocation for `plugin` is still running,
    /// or after one listener budget if a hung invocation never returns.
    pub fn unregister_all_for(&self, plugin: &str) -> usize {
        let (removed, gate) = {
            let mut state = lock(&self.state);
            let mut removed = 0;
            for entries in state.tiers.values_mut() {
                let before = entries.len();
                entries.retain(|e| e.plugin != plugin);
                removed += before - entries.len();
            }
            state.tiers.retain(|_, entries| !entries.is_empty());
            (removed, state.gates.get(plugin).cloned())
        };

        if let Some(gate) = gate {
            let running = gate.close(self.listener_timeout);
            if running > 0 {
                tracing::warn!(
                    "{} listener invocation(s) of plugin '{}' still running after {:?}",
                    running,
                    plugin,
                    self.listener_timeout
                );
            }
        }

        if removed > 0 {
            tracing::debug!("Removed {} listener(s) of plugin '{}'", removed, plugin);
        }
        removed
    }

    pub fn listener_count_for(&self, plugin: &str) -> usize {
        lock(&self.state)
            .tiers
            .values()
            .flatten()
            .filter(|e| e.plugin == plugin)
            .count()
    }

    pub fn is_open(&self, plugin: &str) -> bool {
        let gate = lock(&self.state).gates.get(plugin).cloned();
        gate.is_some_and(|gate| gate.is_open())
    }

    /// Deliver `event` to every registered listener, tier by tier.
    ///
    /// Each invocation runs on the blocking pool under the configured time
    /// budget. A failing, panicking or slow listener is logged and the
    /// remaining listeners still run.
    pub async fn dispatch(&self, event: HostEvent) -> DispatchReport {
        let event = Arc::new(event);
        let snapshot: Vec<(ListenerId, String, Arc<dyn EventListener>, Arc<Gate>)> = {
            let mut state = lock(&self.state);
            let entries: Vec<(ListenerId, String, Arc<dyn EventListener>)> = state
                .tiers
                .values()
                .flatten()
                .map(|e| (e.id, e.plugin.clone(), e.listener.clone()))
                .collect();
            entries
                .into_iter()
                .map(|(id, plugin, listener)| {
                    let gate = state.gate(&plugin);
                    (id, plugin, listener, gate)
                })
                .collect()
        };

        let mut report = DispatchReport::default();
        for (id, plugin, listener, gate) in snapshot {
            let state = self.state.clone();
            let listener_event = event.clone();
            let task = tokio::task::spawn_blocking(move || {
                let Some(_admitted) = gate.enter() else {
                    return Invocation::Skipped;
                };
                if !lock(&state).is_registered(id) {
                    return Invocation::Skipped;
                }
                match contain(|| listener.on_event(&listener_event)) {
                    Ok(()) => Invocation::Delivered,
                    Err(e) => Invocation::Failed(format!("{e:#}")),
                }
            });

            match tokio::time::timeout(self.listener_timeout, task).await {
                Ok(Ok(Invocation::Delivered)) => report.delivered += 1,
                Ok(Ok(Invocation::Skipped)) => report.skipped += 1,
                Ok(Ok(Invocation::Failed(message))) => {
                    tracing::warn!(
                        "Listener of plugin '{}' failed on '{}': {}",
                        plugin,
                        event.kind,
                        message
                    );
                    report.failed.push((plugin, message));
                }
                Ok(Err(join_err)) => {
                    tracing::warn!("Listener of plugin '{}' aborted: {}", plugin, join_err);
                    report.failed.push((plugin, join_err.to_string()));
                }
                Err(_) => {
                    tracing::warn!(
                        "Listener of plugin '{}' exceeded {:?} on '{}'",
                        plugin,
                        self.listener_timeout,
                        event.kind
                    );
                    report.timed_out.push(plugin);
                }
            }
        }
        report
    }
}
