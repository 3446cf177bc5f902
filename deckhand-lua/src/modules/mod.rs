//! Capability libraries preloaded into every script state.
//!
//! Each module is installed both as a global table and through a `require`
//! shim, so `local shell = require("shell")` and plain `shell.exec(...)`
//! work the same. Luau has no `package.preload`, hence the shim.

use std::path::PathBuf;
use std::sync::Arc;

use deckhand_hid::Device;
use mlua::prelude::*;
use parking_lot::Mutex;

mod deck;
mod file;
mod http;
mod json;
mod log;
mod shell;
mod system;
mod time;

/// Registry slot holding the module name → table map for `require`.
const MODULES_REGISTRY_KEY: &str = "deckhand.modules";

/// Late-bound display refresh hook.
///
/// The module table is built before the manager wires callbacks, so the
/// refresh capability goes through this cell and is installed afterwards.
pub type RefreshHook = Arc<Mutex<Option<Box<dyn Fn() + Send + Sync>>>>;

/// Everything the capability libraries need from the host.
pub(crate) struct ModuleContext {
    pub device: Option<Arc<Device>>,
    pub config_dir: PathBuf,
    pub script_path: PathBuf,
    pub script_name: String,
    pub refresh: RefreshHook,
}

/// Install all capability libraries and the script identity globals.
pub(crate) fn register_all(lua: &Lua, ctx: &ModuleContext) -> LuaResult<()> {
    lua.globals()
        .set("SCRIPT_PATH", ctx.script_path.display().to_string())?;
    lua.globals().set("SCRIPT_NAME", ctx.script_name.as_str())?;
    lua.globals()
        .set("CONFIG_DIR", ctx.config_dir.display().to_string())?;

    let registry = lua.create_table()?;

    let modules: [(&str, LuaTable); 8] = [
        ("shell", shell::register(lua, ctx)?),
        ("http", http::register(lua, ctx)?),
        ("system", system::register(lua, ctx)?),
        ("streamdeck", deck::register(lua, ctx)?),
        ("file", file::register(lua, ctx)?),
        ("json", json::register(lua, ctx)?),
        ("time", time::register(lua, ctx)?),
        ("log", log::register(lua, ctx)?),
    ];

    for (name, table) in modules {
        registry.set(name, &table)?;
        lua.globals().set(name, table)?;
    }
    lua.set_named_registry_value(MODULES_REGISTRY_KEY, registry)?;

    let require = lua.create_function(|lua, name: String| {
        let registry: LuaTable = lua.named_registry_value(MODULES_REGISTRY_KEY)?;
        let module: LuaValue = registry.get(name.as_str())?;
        if module.is_nil() {
            return Err(LuaError::external(format!("module '{name}' not found")));
        }
        Ok(module)
    })?;
    lua.globals().set("require", require)?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A module context with no device, rooted at a temp-style path.
    pub fn context(config_dir: &std::path::Path) -> ModuleContext {
        ModuleContext {
            device: None,
            config_dir: config_dir.to_path_buf(),
            script_path: config_dir.join("test.lua"),
            script_name: "test".to_string(),
            refresh: Arc::new(Mutex::new(None)),
        }
    }

    /// A Lua state with every capability module registered.
    pub fn lua_with_modules(config_dir: &std::path::Path) -> Lua {
        let lua = Lua::new();
        lua.load_std_libs(LuaStdLib::ALL_SAFE).unwrap();
        register_all(&lua, &context(config_dir)).unwrap();
        lua
    }
}
