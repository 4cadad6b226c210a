// src/runtime/wasm.rs — WASM plugin artifacts (wasmtime)
//
// Each load compiles the staged module and instantiates it in its own
// wasmtime `Store`: that store is the plugin's isolation scope. Linear memory,
// globals and tables are never shared between plugins, and dropping the store
// discards all of the plugin's code and state.
//
// Artifact contract:
//   entry:<Entry>            () -> i64          getInfo, packed (ptr << 32) | len of JSON
//   <Entry>.initialize       () | () -> i32     optional lifecycle hooks (0 = ok)
//   <Entry>.on_enable / .on_disable / .shutdown
//   <Entry>.command.<name>   (ptr, len) -> i64  command handler, packed reply
//   <Entry>.on_event         (ptr, len) -> i32  event listener, event JSON in
//   alloc                    (len) -> ptr       needed to pass non-empty input
//   memory                                      exported linear memory
//
// Host imports live in module "env": log, register_command,
// unregister_command, register_listener, unregister_listener.

use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use wasmtime::{Caller, Engine, ExternType, Instance, Linker, Memory, Module, Store, Val};

use crate::infra::errors::{LoadError, RuntimeError};
use crate::infra::lock;
use crate::runtime::context::{CommandHandler, LogLevel, PluginContext};
use crate::runtime::contract::{Hook, Plugin};
use crate::runtime::events::{EventListener, EventPriority, HostEvent, ListenerId};
use crate::runtime::loader::{ArtifactLoader, Instantiated};
use crate::runtime::types::PluginInfo;

/// Export-name prefix marking the entry point.
pub const ENTRY_PREFIX: &str = "entry:";

// ---------------------------------------------------------------------------
// Per-store host state
// ---------------------------------------------------------------------------

/// State held in each plugin's wasmtime `Store`.
struct HostState {
    plugin_name: String,
    entry: String,
    /// Set before every hook call; host imports act through it.
    context: Option<PluginContext>,
    /// Back-reference handed to command handlers and listeners.
    core: Weak<Mutex<WasmCore>>,
}

struct WasmCore {
    store: Store<HostState>,
    instance: Instance,
    fuel_per_call: u64,
}

impl WasmCore {
    fn refuel(&mut self) -> anyhow::Result<()> {
        self.store.set_fuel(self.fuel_per_call)?;
        Ok(())
    }

    fn memory(&mut self) -> anyhow::Result<Memory> {
        self.instance
            .get_memory(&mut self.store, "memory")
            .ok_or_else(|| anyhow::anyhow!("module does not export 'memory'"))
    }

    fn read_info(&mut self) -> anyhow::Result<PluginInfo> {
        let export = format!("{ENTRY_PREFIX}{}", self.store.data().entry);
        self.refuel()?;
        let func = self
            .instance
            .get_typed_func::<(), i64>(&mut self.store, &export)?;
        let packed = func.call(&mut self.store, ())?;
        let bytes = self.read_packed(packed)?;
        let info: PluginInfo = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("invalid plugin info JSON: {e}"))?;
        Ok(info)
    }

    /// Copy `len` bytes at `ptr` out of guest memory (`packed = ptr << 32 | len`).
    fn read_packed(&mut self, packed: i64) -> anyhow::Result<Vec<u8>> {
        let packed = packed as u64;
        let ptr = (packed >> 32) as usize;
        let len = (packed & 0xffff_ffff) as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let memory = self.memory()?;
        memory
            .data(&self.store)
            .get(ptr..ptr + len)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| anyhow::anyhow!("guest returned out-of-bounds range {ptr}+{len}"))
    }

    /// Copy `bytes` into guest memory through the module's `alloc` export.
    fn write_input(&mut self, bytes: &[u8]) -> anyhow::Result<(i32, i32)> {
        if bytes.is_empty() {
            return Ok((0, 0));
        }
        let alloc = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, "alloc")
            .map_err(|_| anyhow::anyhow!("module must export 'alloc' to receive input"))?;
        let len = i32::try_from(bytes.len())?;
        let ptr = alloc.call(&mut self.store, len)?;
        let memory = self.memory()?;
        memory.write(&mut self.store, ptr as u32 as usize, bytes)?;
        Ok((ptr, len))
    }

    /// Call an optional lifecycle hook export.
    fn call_hook(&mut self, export: &str) -> anyhow::Result<()> {
        let func = match self.instance.get_func(&mut self.store, export) {
            Some(f) => f,
            None => {
                tracing::debug!(
                    "WASM plugin '{}' does not export '{}'",
                    self.store.data().plugin_name,
                    export
                );
                return Ok(());
            }
        };

        self.refuel()?;
        let ty = func.ty(&self.store);
        if ty.params().len() != 0 {
            anyhow::bail!("hook '{export}' must not take parameters");
        }
        match ty.results().len() {
            0 => func.call(&mut self.store, &[], &mut [])?,
            1 => {
                let mut results = [Val::I32(0)];
                func.call(&mut self.store, &[], &mut results)?;
                if let Val::I32(code) = results[0] {
                    if code != 0 {
                        anyhow::bail!("hook '{export}' returned error code {code}");
                    }
                }
            }
            n => anyhow::bail!("hook '{export}' has unsupported signature ({n} results)"),
        }
        Ok(())
    }

    fn call_command(&mut self, export: &str, args: &str) -> anyhow::Result<String> {
        self.refuel()?;
        let func = self
            .instance
            .get_typed_func::<(i32, i32), i64>(&mut self.store, export)?;
        let (ptr, len) = self.write_input(args.as_bytes())?;
        let packed = func.call(&mut self.store, (ptr, len))?;
        let reply = self.read_packed(packed)?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    fn call_listener(&mut self, export: &str, event_json: &[u8]) -> anyhow::Result<()> {
        self.refuel()?;
        let func = self
            .instance
            .get_typed_func::<(i32, i32), i32>(&mut self.store, export)?;
        let (ptr, len) = self.write_input(event_json)?;
        let code = func.call(&mut self.store, (ptr, len))?;
        if code != 0 {
            anyhow::bail!("listener '{export}' returned error code {code}");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WasmPlugin — the Plugin implementation
// ---------------------------------------------------------------------------

/// A loaded WASM plugin. Owns the only strong reference to its store.
pub struct WasmPlugin {
    entry: String,
    info: PluginInfo,
    core: Arc<Mutex<WasmCore>>,
}

impl WasmPlugin {
    fn run(&mut self, hook: Hook, ctx: &PluginContext) -> anyhow::Result<()> {
        let mut core = lock(&self.core);
        core.store.data_mut().context = Some(ctx.clone());
        let export = format!("{}.{}", self.entry, hook.as_str());
        core.call_hook(&export)
    }
}

impl Plugin for WasmPlugin {
    fn info(&self) -> PluginInfo {
        self.info.clone()
    }

    fn initialize(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.run(Hook::Initialize, ctx)
    }

    fn on_enable(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.run(Hook::Enable, ctx)
    }

    fn on_disable(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.run(Hook::Disable, ctx)
    }

    fn shutdown(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.run(Hook::Shutdown, ctx)
    }
}

impl std::fmt::Debug for WasmPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmPlugin")
            .field("name", &self.info.name)
            .field("version", &self.info.version)
            .field("entry", &self.entry)
            .finish()
    }
}

/// Weak reference to a plugin's store. Calls through it fail with
/// `StaleReference` once the plugin has been unloaded.
#[derive(Clone)]
pub struct WasmHandle {
    plugin: String,
    core: Weak<Mutex<WasmCore>>,
}

impl WasmHandle {
    fn upgrade(&self) -> Result<Arc<Mutex<WasmCore>>, RuntimeError> {
        self.core.upgrade().ok_or_else(|| RuntimeError::StaleReference {
            name: self.plugin.clone(),
        })
    }

    /// Call an exported command handler directly.
    pub fn call_command(&self, export: &str, args: &str) -> anyhow::Result<String> {
        let core = self.upgrade()?;
        let mut core = lock(&core);
        core.call_command(export, args)
    }
}

struct WasmCommand {
    handle: WasmHandle,
    export: String,
}

impl CommandHandler for WasmCommand {
    fn call(&self, args: &str) -> anyhow::Result<String> {
        self.handle.call_command(&self.export, args)
    }
}

struct WasmListener {
    handle: WasmHandle,
    export: String,
}

impl EventListener for WasmListener {
    fn on_event(&self, event: &HostEvent) -> anyhow::Result<()> {
        let core = self.handle.upgrade()?;
        let json = serde_json::to_vec(event)?;
        let mut core = lock(&core);
        core.call_listener(&self.export, &json)
    }
}

// ---------------------------------------------------------------------------
// WasmArtifactLoader — compiles and instantiates artifacts
// ---------------------------------------------------------------------------

pub struct WasmArtifactLoader {
    engine: Engine,
    fuel_per_call: u64,
}

impl WasmArtifactLoader {
    pub fn new(fuel_per_call: u64) -> anyhow::Result<Self> {
        let mut config = wasmtime::Config::new();
        // Fuel metering turns runaway guest loops into traps
        config.consume_fuel(true);
        let engine = Engine::new(&config)?;
        Ok(Self {
            engine,
            fuel_per_call,
        })
    }

    /// Entry-point candidates declared by a compiled module.
    fn entry_candidates(module: &Module) -> Vec<String> {
        module
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .filter_map(|export| export.name().strip_prefix(ENTRY_PREFIX).map(str::to_string))
            .collect()
    }

    fn instantiate_module(
        &self,
        module: &Module,
        entry: &str,
        artifact_file_name: &str,
    ) -> anyhow::Result<(Arc<Mutex<WasmCore>>, PluginInfo)> {
        let state = HostState {
            plugin_name: artifact_file_name.to_string(),
            entry: entry.to_string(),
            context: None,
            core: Weak::new(),
        };
        let mut store = Store::new(&self.engine, state);
        store.set_fuel(self.fuel_per_call)?;

        let mut linker = Linker::new(&self.engine);
        link_host_functions(&mut linker)?;
        let instance = linker.instantiate(&mut store, module)?;

        let core = Arc::new(Mutex::new(WasmCore {
            store,
            instance,
            fuel_per_call: self.fuel_per_call,
        }));

        let info = {
            let mut guard = lock(&core);
            guard.store.data_mut().core = Arc::downgrade(&core);
            let info = guard.read_info()?;
            guard.store.data_mut().plugin_name = info.name.clone();
            info
        };
        Ok((core, info))
    }
}

impl ArtifactLoader for WasmArtifactLoader {
    fn instantiate(
        &self,
        staged: &Path,
        artifact_file_name: &str,
    ) -> Result<Instantiated, LoadError> {
        let bytes = std::fs::read(staged).map_err(|source| LoadError::Unreadable {
            path: staged.to_path_buf(),
            source,
        })?;

        let module = Module::new(&self.engine, &bytes).map_err(|e| LoadError::Instantiation {
            artifact: artifact_file_name.to_string(),
            message: format!("{e:#}"),
        })?;

        let mut candidates = Self::entry_candidates(&module);
        if candidates.len() != 1 {
            return Err(LoadError::AmbiguousOrMissingEntryPoint {
                artifact: artifact_file_name.to_string(),
                candidates,
            });
        }
        let entry = candidates.remove(0);

        let (core, info) = self
            .instantiate_module(&module, &entry, artifact_file_name)
            .map_err(|e| LoadError::Instantiation {
                artifact: artifact_file_name.to_string(),
                message: format!("{e:#}"),
            })?;

        tracing::info!(
            "Instantiated WASM plugin {} v{} from {} (entry '{}')",
            info.name,
            info.version,
            artifact_file_name,
            entry
        );

        Ok(Instantiated {
            entry_point: entry.clone(),
            plugin: Box::new(WasmPlugin { entry, info, core }),
        })
    }
}

// ---------------------------------------------------------------------------
// Host imports
// ---------------------------------------------------------------------------

/// Copy a UTF-8 string out of the caller's exported memory.
fn read_guest_str(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Option<String> {
    let memory = caller.get_export("memory").and_then(|e| e.into_memory())?;
    let start = ptr as u32 as usize;
    let end = start.checked_add(len as u32 as usize)?;
    let data = memory.data(&*caller);
    let bytes = data.get(start..end)?;
    std::str::from_utf8(bytes).ok().map(str::to_string)
}

fn link_host_functions(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "log",
        |mut caller: Caller<'_, HostState>, level: i32, ptr: i32, len: i32| {
            let Some(message) = read_guest_str(&mut caller, ptr, len) else {
                return;
            };
            match caller.data().context.clone() {
                Some(ctx) => ctx.log(LogLevel::from_i32(level), &message),
                None => tracing::info!(
                    target: "plugin",
                    "[{}] {}",
                    caller.data().plugin_name,
                    message
                ),
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "register_command",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i32 {
            let Some(name) = read_guest_str(&mut caller, ptr, len) else {
                return 1;
            };
            let state = caller.data();
            let Some(ctx) = state.context.clone() else {
                return 1;
            };
            let handler = WasmCommand {
                handle: WasmHandle {
                    plugin: state.plugin_name.clone(),
                    core: state.core.clone(),
                },
                export: format!("{}.command.{}", state.entry, name),
            };
            match ctx.register_command(&name, Arc::new(handler)) {
                Ok(()) => 0,
                Err(e) => {
                    tracing::warn!("{}", e);
                    2
                }
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "unregister_command",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i32 {
            let Some(name) = read_guest_str(&mut caller, ptr, len) else {
                return 1;
            };
            match caller.data().context.as_ref() {
                Some(ctx) if ctx.unregister_command(&name) => 0,
                _ => 1,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "register_listener",
        |caller: Caller<'_, HostState>, priority: i32| -> i64 {
            let state = caller.data();
            let (Some(ctx), Some(priority)) =
                (state.context.clone(), EventPriority::from_i32(priority))
            else {
                return -1;
            };
            let listener = WasmListener {
                handle: WasmHandle {
                    plugin: state.plugin_name.clone(),
                    core: state.core.clone(),
                },
                export: format!("{}.on_event", state.entry),
            };
            match ctx.register_listener(Arc::new(listener), priority) {
                Ok(id) => id.0 as i64,
                Err(e) => {
                    tracing::warn!("{}", e);
                    -1
                }
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "unregister_listener",
        |caller: Caller<'_, HostState>, id: i64| -> i32 {
            match caller.data().context.as_ref() {
                Some(ctx) if id >= 0 && ctx.unregister_listener(ListenerId(id as u64)) => 0,
                _ => 1,
            }
        },
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::CommandTable;
    use crate::runtime::events::EventFanout;
    use std::time::Duration;

    fn info_json(name: &str, version: &str) -> String {
        format!(r#"{{"name":"{name}","version":"{version}","author":"tests","description":"echoes input"}}"#)
    }

    fn wat_escape(s: &str) -> String {
        s.replace('\\', "\\\\").replace('"', "\\\"")
    }

    /// Echo plugin: registers `echo` and a listener on enable, counts events.
    fn echo_wat(version: &str) -> String {
        let info = info_json("Echo", version);
        format!(
            r#"(module
  (import "env" "log" (func $log (param i32 i32 i32)))
  (import "env" "register_command" (func $register_command (param i32 i32) (result i32)))
  (import "env" "register_listener" (func $register_listener (param i32) (result i64)))
  (memory (export "memory") 1)
  (global $events (mut i32) (i32.const 0))
  (data (i32.const 0) "{data}")
  (data (i32.const 1024) "echo")
  (data (i32.const 1040) "enabled")
  (func (export "entry:EchoPlugin") (result i64)
    i64.const {len})
  (func (export "alloc") (param i32) (result i32)
    i32.const 4096)
  (func (export "EchoPlugin.on_enable") (result i32)
    (call $log (i32.const 2) (i32.const 1040) (i32.const 7))
    (drop (call $register_command (i32.const 1024) (i32.const 4)))
    (drop (call $register_listener (i32.const 1)))
    i32.const 0)
  (func (export "EchoPlugin.on_disable") (result i32)
    i32.const 7)
  (func (export "EchoPlugin.command.echo") (param $ptr i32) (param $len i32) (result i64)
    local.get $ptr
    i64.extend_i32_u
    i64.const 32
    i64.shl
    local.get $len
    i64.extend_i32_u
    i64.or)
  (func (export "EchoPlugin.on_event") (param i32 i32) (result i32)
    global.get $events
    i32.const 1
    i32.add
    global.set $events
    i32.const 0)
)"#,
            data = wat_escape(&info),
            len = info.len()
        )
    }

    fn write_artifact(dir: &Path, file: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(file);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn context(name: &str) -> (PluginContext, Arc<CommandTable>, Arc<EventFanout>) {
        let commands = Arc::new(CommandTable::new());
        let events = Arc::new(EventFanout::new(Duration::from_secs(2)));
        (
            PluginContext::new(name, commands.clone(), events.clone()),
            commands,
            events,
        )
    }

    #[test]
    fn test_loads_info_from_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "echo.wasm", &echo_wat("1.0.0"));
        let loader = WasmArtifactLoader::new(1_000_000).unwrap();

        let instantiated = loader.instantiate(&path, "echo.wasm").unwrap();
        assert_eq!(instantiated.entry_point, "EchoPlugin");
        let info = instantiated.plugin.info();
        assert_eq!(info.name, "Echo");
        assert_eq!(info.version, "1.0.0");
        assert_eq!(info.author, "tests");
    }

    #[test]
    fn test_missing_entry_point_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(
            dir.path(),
            "plain.wasm",
            r#"(module (func (export "main")))"#,
        );
        let loader = WasmArtifactLoader::new(1_000_000).unwrap();
        let err = loader.instantiate(&path, "plain.wasm").err().unwrap();
        assert!(matches!(
            err,
            LoadError::AmbiguousOrMissingEntryPoint { ref candidates, .. } if candidates.is_empty()
        ));
    }

    #[test]
    fn test_multiple_entry_points_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(
            dir.path(),
            "twins.wasm",
            r#"(module
  (func (export "entry:A") (result i64) i64.const 0)
  (func (export "entry:B") (result i64) i64.const 0))"#,
        );
        let loader = WasmArtifactLoader::new(1_000_000).unwrap();
        let err = loader.instantiate(&path, "twins.wasm").err().unwrap();
        match err {
            LoadError::AmbiguousOrMissingEntryPoint { candidates, .. } => {
                assert_eq!(candidates, vec!["A".to_string(), "B".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_module_is_instantiation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "junk.wasm", "this is not wasm");
        let loader = WasmArtifactLoader::new(1_000_000).unwrap();
        let err = loader.instantiate(&path, "junk.wasm").err().unwrap();
        assert!(matches!(err, LoadError::Instantiation { .. }));
    }

    #[test]
    fn test_bad_info_json_is_instantiation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(
            dir.path(),
            "mute.wasm",
            r#"(module
  (memory (export "memory") 1)
  (data (i32.const 0) "nope")
  (func (export "entry:Mute") (result i64) i64.const 4))"#,
        );
        let loader = WasmArtifactLoader::new(1_000_000).unwrap();
        let err = loader.instantiate(&path, "mute.wasm").err().unwrap();
        assert!(err.to_string().contains("invalid plugin info JSON"));
    }

    #[tokio::test]
    async fn test_enable_registers_command_and_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "echo.wasm", &echo_wat("1.0.0"));
        let loader = WasmArtifactLoader::new(1_000_000).unwrap();
        let mut plugin = loader.instantiate(&path, "echo.wasm").unwrap().plugin;
        let (ctx, commands, events) = context("Echo");

        plugin.initialize(&ctx).unwrap();
        plugin.on_enable(&ctx).unwrap();
        assert_eq!(commands.execute("echo", "hello wasm").unwrap(), "hello wasm");
        assert_eq!(commands.execute("echo", "").unwrap(), "");
        assert_eq!(events.listener_count_for("Echo"), 1);

        ctx.open_events();
        let report = events
            .dispatch(HostEvent::new("ping", serde_json::json!({"n": 1}), "test"))
            .await;
        assert_eq!(report.delivered, 1);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_nonzero_hook_result_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "echo.wasm", &echo_wat("1.0.0"));
        let loader = WasmArtifactLoader::new(1_000_000).unwrap();
        let mut plugin = loader.instantiate(&path, "echo.wasm").unwrap().plugin;
        let (ctx, _, _) = context("Echo");

        let err = plugin.on_disable(&ctx).unwrap_err();
        assert!(err.to_string().contains("returned error code 7"));
        // Missing optional hooks are fine
        plugin.shutdown(&ctx).unwrap();
    }

    #[test]
    fn test_runaway_hook_runs_out_of_fuel() {
        let dir = tempfile::tempdir().unwrap();
        let info = info_json("Spin", "0.1.0");
        let wat = format!(
            r#"(module
  (memory (export "memory") 1)
  (data (i32.const 0) "{data}")
  (func (export "entry:Spin") (result i64) i64.const {len})
  (func (export "Spin.on_enable")
    (loop $forever (br $forever))))"#,
            data = wat_escape(&info),
            len = info.len()
        );
        let path = write_artifact(dir.path(), "spin.wasm", &wat);
        let loader = WasmArtifactLoader::new(10_000).unwrap();
        let mut plugin = loader.instantiate(&path, "spin.wasm").unwrap().plugin;
        let (ctx, _, _) = context("Spin");

        assert!(plugin.on_enable(&ctx).is_err());
    }

    #[test]
    fn test_handlers_go_stale_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "echo.wasm", &echo_wat("1.0.0"));
        let loader = WasmArtifactLoader::new(1_000_000).unwrap();
        let mut plugin = loader.instantiate(&path, "echo.wasm").unwrap().plugin;
        let (ctx, commands, _) = context("Echo");
        plugin.on_enable(&ctx).unwrap();

        drop(plugin);
        let err = commands.execute("echo", "anyone there?").unwrap_err();
        assert!(matches!(err, RuntimeError::StaleReference { ref name } if name == "Echo"));
    }

    #[test]
    fn test_two_loads_do_not_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "echo.wasm", &echo_wat("1.0.0"));
        let loader = WasmArtifactLoader::new(1_000_000).unwrap();
        let first = loader.instantiate(&path, "echo.wasm").unwrap();
        let second = loader.instantiate(&path, "echo.wasm").unwrap();

        let a = first.plugin;
        let b = second.plugin;
        assert_eq!(a.info(), b.info());
        drop(a);
        // The second instance survives the first one's teardown
        assert_eq!(b.info().name, "Echo");
    }
}
