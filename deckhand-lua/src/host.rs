//! Per-script Luau state.
//!
//! Each script gets an isolated interpreter with the safe standard library,
//! the capability modules, and a shared `state` table passed to all three
//! entry points. The definitional pass runs once at load under an interrupt
//! deadline; after that the state is only touched through the owning
//! runner's mutex.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use deckhand_hid::Device;
use log::debug;
use mlua::prelude::*;
use mlua::Compiler;

use crate::appearance::KeyAppearance;
use crate::modules::{self, ModuleContext, RefreshHook};
use crate::runner::RestartPolicy;

/// Wall-clock budget for the definitional pass. Entry-point invocations run
/// without a deadline; background loops are expected to yield.
const LOAD_TIMEOUT: Duration = Duration::from_secs(1);

/// Entry points recognized in both the global and module-table script shapes.
const ENTRY_POINTS: [&str; 3] = ["background", "passive", "trigger"];

/// Outcome of one background coroutine resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackgroundStep {
    /// The coroutine yielded a sleep request of this many milliseconds.
    Yielded(u64),
    /// The coroutine returned; the driver recreates it after a pause.
    Finished,
}

/// What the definitional pass discovered about a script.
pub(crate) struct ScriptMeta {
    pub has_background: bool,
    pub has_passive: bool,
    pub has_trigger: bool,
    pub restart_policy: RestartPolicy,
}

/// The interpreter state behind a runner's mutex.
pub(crate) struct ScriptHost {
    lua: Lua,
    script_dir: PathBuf,
    /// Shared state table handed to background/passive/trigger.
    state: LuaRegistryKey,
    /// Module table returned by the script, when it used that shape.
    module: Option<LuaRegistryKey>,
    /// Live background coroutine, if one exists.
    background: Option<LuaRegistryKey>,
    /// True until the first resume, which passes the state table in.
    background_fresh: bool,
}

impl ScriptHost {
    /// Create the interpreter and run the script's definitional pass.
    pub fn load(
        script_path: &Path,
        script_name: &str,
        device: Option<Arc<Device>>,
        config_dir: &Path,
        refresh: RefreshHook,
    ) -> LuaResult<(Self, ScriptMeta)> {
        let lua = Lua::new();
        lua.load_std_libs(LuaStdLib::ALL_SAFE)?;

        let ctx = ModuleContext {
            device,
            config_dir: config_dir.to_path_buf(),
            script_path: script_path.to_path_buf(),
            script_name: script_name.to_string(),
            refresh,
        };
        modules::register_all(&lua, &ctx)?;

        let state_table = lua.create_table()?;
        lua.globals().set("state", &state_table)?;
        let state = lua.create_registry_value(state_table)?;

        let code = std::fs::read_to_string(script_path).map_err(|err| {
            LuaError::external(format!("failed to read script file: {err}"))
        })?;

        // Optimization level 2: inlining, loop unrolling, constant folding.
        let compiler = Compiler::new().set_optimization_level(2).set_debug_level(1);
        let bytecode = compiler.compile(&code)?;

        let deadline = Instant::now() + LOAD_TIMEOUT;
        lua.set_interrupt(move |_| {
            if Instant::now() > deadline {
                return Err(LuaError::external("script load timeout"));
            }
            Ok(LuaVmState::Continue)
        });
        let result = lua.load(bytecode).set_name(script_name).eval::<LuaValue>();
        lua.remove_interrupt();
        let returned = result?;

        // Module-table shape: hoist recognized keys into globals so entry
        // point dispatch is uniform.
        let mut module = None;
        if let LuaValue::Table(table) = returned {
            for name in ENTRY_POINTS {
                if let Ok(LuaValue::Function(func)) = table.get::<LuaValue>(name) {
                    lua.globals().set(name, func)?;
                }
            }
            if let Ok(LuaValue::String(policy)) = table.get::<LuaValue>("RESTART_POLICY") {
                lua.globals().set("RESTART_POLICY", policy)?;
            }
            module = Some(lua.create_registry_value(table)?);
        }

        let meta = ScriptMeta {
            has_background: is_function(&lua, "background"),
            has_passive: is_function(&lua, "passive"),
            has_trigger: is_function(&lua, "trigger"),
            restart_policy: read_restart_policy(&lua),
        };
        debug!(
            "loaded {script_name}: background={} passive={} trigger={} policy={:?}",
            meta.has_background, meta.has_passive, meta.has_trigger, meta.restart_policy
        );

        let script_dir = script_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok((
            Self {
                lua,
                script_dir,
                state,
                module,
                background: None,
                background_fresh: false,
            },
            meta,
        ))
    }

    /// Resume (creating if necessary) the background coroutine.
    ///
    /// The caller holds the script mutex for exactly this call and releases
    /// it around whatever wait the returned step requests.
    pub fn resume_background(&mut self) -> LuaResult<BackgroundStep> {
        if self.background.is_none() {
            let func: LuaFunction = self.lua.globals().get("background")?;
            let thread = self.lua.create_thread(func)?;
            self.background = Some(self.lua.create_registry_value(thread)?);
            self.background_fresh = true;
        }

        let key = self.background.as_ref().expect("coroutine just ensured");
        let thread: LuaThread = self.lua.registry_value(key)?;

        let values: LuaMultiValue = if self.background_fresh {
            self.background_fresh = false;
            let state: LuaTable = self.lua.registry_value(&self.state)?;
            thread.resume(state)?
        } else {
            thread.resume(())?
        };

        match thread.status() {
            LuaThreadStatus::Resumable => {
                let sleep_ms = values.iter().next().map(sleep_millis).unwrap_or(0);
                Ok(BackgroundStep::Yielded(sleep_ms))
            }
            _ => Ok(BackgroundStep::Finished),
        }
    }

    /// Drop the current background coroutine (after finish or error).
    pub fn reset_background(&mut self) {
        if let Some(key) = self.background.take() {
            let _ = self.lua.remove_registry_value(key);
        }
        self.background_fresh = false;
    }

    /// Invoke `passive(key_index, state)` and parse its appearance.
    pub fn call_passive(&self, key_index: usize) -> LuaResult<Option<KeyAppearance>> {
        let Ok(func) = self.lua.globals().get::<LuaFunction>("passive") else {
            return Ok(None);
        };
        let state: LuaTable = self.lua.registry_value(&self.state)?;
        let value: LuaValue = func.call((key_index, state))?;
        match value {
            LuaValue::Table(table) => Ok(Some(KeyAppearance::from_lua_table(
                &table,
                &self.script_dir,
            )?)),
            _ => Ok(None),
        }
    }

    /// Invoke `trigger(state)`.
    pub fn call_trigger(&self) -> LuaResult<()> {
        let Ok(func) = self.lua.globals().get::<LuaFunction>("trigger") else {
            return Ok(());
        };
        let state: LuaTable = self.lua.registry_value(&self.state)?;
        func.call(state)
    }

    /// Invoke a function from the script's module table (boot scripts).
    pub fn call_module_entry(&self, name: &str) -> LuaResult<bool> {
        let Some(module) = &self.module else {
            return Ok(false);
        };
        let table: LuaTable = self.lua.registry_value(module)?;
        match table.get::<LuaValue>(name)? {
            LuaValue::Function(func) => {
                func.call::<()>(())?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Read a value out of the shared state table (tests and diagnostics).
    #[cfg(test)]
    pub fn state_value<T: mlua::FromLua>(&self, key: &str) -> LuaResult<T> {
        let state: LuaTable = self.lua.registry_value(&self.state)?;
        state.get(key)
    }
}

fn is_function(lua: &Lua, name: &str) -> bool {
    matches!(lua.globals().get::<LuaValue>(name), Ok(LuaValue::Function(_)))
}

fn read_restart_policy(lua: &Lua) -> RestartPolicy {
    match lua
        .globals()
        .get::<Option<String>>("RESTART_POLICY")
        .ok()
        .flatten()
        .as_deref()
    {
        Some("never") => RestartPolicy::Never,
        Some("once") => RestartPolicy::Once,
        _ => RestartPolicy::Always,
    }
}

fn sleep_millis(value: &LuaValue) -> u64 {
    match value {
        LuaValue::Integer(ms) => (*ms).max(0) as u64,
        LuaValue::Number(ms) if *ms > 0.0 => *ms as u64,
        _ => 0,
    }
}
