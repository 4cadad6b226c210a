// src/runtime/contract.rs — The contract every plugin implements
//
// The host drives these hooks in lifecycle order: `initialize` once after
// instantiation, then any number of `on_enable`/`on_disable` pairs, then
// `shutdown` right before the code is discarded.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::runtime::context::PluginContext;
use crate::runtime::types::PluginInfo;

/// Lifecycle hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Initialize,
    Enable,
    Disable,
    Shutdown,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Enable => "on_enable",
            Self::Disable => "on_disable",
            Self::Shutdown => "shutdown",
        }
    }

    /// All hook variants in the order the host calls them.
    pub fn all() -> &'static [Hook] {
        &[Hook::Initialize, Hook::Enable, Hook::Disable, Hook::Shutdown]
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A live plugin instance.
///
/// Implementations live inside an isolation scope owned by the registry.
/// Hooks report failure through `Err`; panics are caught by the host and
/// treated the same way.
pub trait Plugin: Send {
    fn info(&self) -> PluginInfo;

    fn initialize(&mut self, ctx: &PluginContext) -> anyhow::Result<()>;

    fn on_enable(&mut self, ctx: &PluginContext) -> anyhow::Result<()>;

    fn on_disable(&mut self, ctx: &PluginContext) -> anyhow::Result<()>;

    fn shutdown(&mut self, ctx: &PluginContext) -> anyhow::Result<()>;
}

/// Run one lifecycle hook, converting a panic into an error.
pub fn run_hook(
    plugin: &mut dyn Plugin,
    hook: Hook,
    ctx: &PluginContext,
) -> anyhow::Result<()> {
    contain(|| match hook {
        Hook::Initialize => plugin.initialize(ctx),
        Hook::Enable => plugin.on_enable(ctx),
        Hook::Disable => plugin.on_disable(ctx),
        Hook::Shutdown => plugin.shutdown(ctx),
    })
}

/// Call into plugin code, turning a panic into an `Err`.
pub fn contain<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            Err(anyhow::anyhow!("panicked: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_names() {
        let names: Vec<&str> = Hook::all().iter().map(|h| h.as_str()).collect();
        assert_eq!(names, vec!["initialize", "on_enable", "on_disable", "shutdown"]);
        assert_eq!(Hook::Enable.to_string(), "on_enable");
    }

    #[test]
    fn test_contain_passes_through_ok_and_err() {
        assert_eq!(contain(|| Ok(7)).unwrap(), 7);
        let err = contain::<()>(|| anyhow::bail!("boom")).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_contain_catches_panics() {
        let err = contain::<()>(|| panic!("plugin bug")).unwrap_err();
        assert_eq!(err.to_string(), "panicked: plugin bug");

        let owned = String::from("formatted");
        let err = contain::<()>(|| panic!("{owned} bug")).unwrap_err();
        assert_eq!(err.to_string(), "panicked: formatted bug");
    }
}
