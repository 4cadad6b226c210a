// src/runtime/context.rs — Execution context and the host command table
//
// A `PluginContext` is the capability surface a plugin uses to talk to the
// host. Everything registered through it is attributed to the owning plugin
// so the registry can revoke it wholesale on disable/unload.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::infra::errors::RuntimeError;
use crate::infra::lock;
use crate::runtime::contract::contain;
use crate::runtime::events::{EventFanout, EventListener, EventPriority, ListenerId};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub trait CommandHandler: Send + Sync {
    fn call(&self, args: &str) -> anyhow::Result<String>;
}

impl<F> CommandHandler for F
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    fn call(&self, args: &str) -> anyhow::Result<String> {
        self(args)
    }
}

struct CommandEntry {
    owner: String,
    handler: Arc<dyn CommandHandler>,
}

/// Host-wide command name -> handler table.
#[derive(Default)]
pub struct CommandTable {
    commands: Mutex<HashMap<String, CommandEntry>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` for `owner`. A plugin may replace its own command but
    /// never one owned by another plugin.
    pub fn register(
        &self,
        owner: &str,
        name: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), RuntimeError> {
        let mut commands = lock(&self.commands);
        if let Some(existing) = commands.get(name) {
            if existing.owner != owner {
                return Err(RuntimeError::CommandConflict {
                    command: name.to_string(),
                    owner: existing.owner.clone(),
                });
            }
        }
        commands.insert(
            name.to_string(),
            CommandEntry {
                owner: owner.to_string(),
                handler,
            },
        );
        Ok(())
    }

    pub fn unregister(&self, owner: &str, name: &str) -> bool {
        let mut commands = lock(&self.commands);
        match commands.get(name) {
            Some(entry) if entry.owner == owner => {
                commands.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn unregister_all_for(&self, owner: &str) -> usize {
        let mut commands = lock(&self.commands);
        let before = commands.len();
        commands.retain(|_, entry| entry.owner != owner);
        before - commands.len()
    }

    pub fn owner_of(&self, name: &str) -> Option<String> {
        lock(&self.commands).get(name).map(|e| e.owner.clone())
    }

    pub fn commands_of(&self, owner: &str) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.commands)
            .iter()
            .filter(|(_, e)| e.owner == owner)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.commands).keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a command. The table lock is not held while the handler runs.
    pub fn execute(&self, name: &str, args: &str) -> Result<String, RuntimeError> {
        let (owner, handler) = {
            let commands = lock(&self.commands);
            let entry = commands
                .get(name)
                .ok_or_else(|| RuntimeError::UnknownCommand(name.to_string()))?;
            (entry.owner.clone(), entry.handler.clone())
        };

        contain(|| handler.call(args)).map_err(|e| match e.downcast::<RuntimeError>() {
            Ok(runtime_err) => runtime_err,
            Err(e) => RuntimeError::CommandFailed {
                command: name.to_string(),
                plugin: owner,
                message: format!("{e:#}"),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Plugin context
// ---------------------------------------------------------------------------

/// Severity for plugin-originated log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Decode the numeric level used across the wasm boundary (0 = error).
    pub fn from_i32(value: i32) -> Self {
        match value {
            i32::MIN..=0 => Self::Error,
            1 => Self::Warn,
            2 => Self::Info,
            3 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

struct ContextInner {
    plugin_name: String,
    commands: Arc<CommandTable>,
    events: Arc<EventFanout>,
    closed: AtomicBool,
}

/// One per loaded plugin; cloning shares the same context.
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

impl PluginContext {
    pub fn new(plugin_name: &str, commands: Arc<CommandTable>, events: Arc<EventFanout>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                plugin_name: plugin_name.to_string(),
                commands,
                events,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.inner.plugin_name
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.is_closed() {
            return Err(RuntimeError::ContextClosed(self.inner.plugin_name.clone()));
        }
        Ok(())
    }

    pub fn register_command(
        &self,
        name: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        self.inner
            .commands
            .register(&self.inner.plugin_name, name, handler)?;
        tracing::debug!("Plugin '{}' registered command '{}'", self.plugin_name(), name);
        Ok(())
    }

    pub fn unregister_command(&self, name: &str) -> bool {
        self.inner.commands.unregister(&self.inner.plugin_name, name)
    }

    pub fn register_listener(
        &self,
        listener: Arc<dyn EventListener>,
        priority: EventPriority,
    ) -> Result<ListenerId, RuntimeError> {
        self.ensure_open()?;
        Ok(self
            .inner
            .events
            .register_listener(&self.inner.plugin_name, listener, priority))
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.inner
            .events
            .unregister_listener(&self.inner.plugin_name, id)
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        let name = self.plugin_name();
        match level {
            LogLevel::Error => tracing::error!(target: "plugin", "[{}] {}", name, message),
            LogLevel::Warn => tracing::warn!(target: "plugin", "[{}] {}", name, message),
            LogLevel::Info => tracing::info!(target: "plugin", "[{}] {}", name, message),
            LogLevel::Debug => tracing::debug!(target: "plugin", "[{}] {}", name, message),
            LogLevel::Trace => tracing::trace!(target: "plugin", "[{}] {}", name, message),
        }
    }

    /// Drop every command and listener the plugin registered.
    /// Returns `(commands, listeners)` removed.
    pub fn revoke_all(&self) -> (usize, usize) {
        let name = &self.inner.plugin_name;
        let listeners = self.inner.events.unregister_all_for(name);
        let commands = self.inner.commands.unregister_all_for(name);
        (commands, listeners)
    }

    /// Allow listeners registered through this context to receive events.
    pub fn open_events(&self) {
        self.inner.events.open_gate(&self.inner.plugin_name);
    }

    /// Called once the plugin reaches UNLOADED.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.inner.plugin_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
