//! System information and the cooperative sleep capability.

use std::time::Duration;

use mlua::prelude::*;

use super::ModuleContext;

/// Cap for blocking sleeps outside the background coroutine. Passive and
/// trigger calls hold the script mutex, so they may only block briefly.
const MAX_BLOCKING_SLEEP_MS: u64 = 100;

pub(crate) fn register(lua: &Lua, ctx: &ModuleContext) -> LuaResult<LuaTable> {
    let module = lua.create_table()?;

    // system.os() -> "linux" | "macos" | "windows" | ...
    module.set(
        "os",
        lua.create_function(|_, ()| Ok(std::env::consts::OS))?,
    )?;

    // system.env(key) -> value | nil
    module.set(
        "env",
        lua.create_function(|_, key: String| Ok(std::env::var(&key).ok()))?,
    )?;

    // system.hostname() -> name | nil
    module.set(
        "hostname",
        lua.create_function(|_, ()| {
            Ok(nix::unistd::gethostname()
                .ok()
                .map(|name| name.to_string_lossy().into_owned()))
        })?,
    )?;

    // system.refresh() — request a display refresh; coalesced by the manager.
    let refresh = ctx.refresh.clone();
    module.set(
        "refresh",
        lua.create_function(move |_, ()| {
            if let Some(callback) = refresh.lock().as_ref() {
                callback();
            }
            Ok(())
        })?,
    )?;

    // system.sleep(ms)
    //
    // Inside the background coroutine this yields the duration to the host,
    // which releases the script mutex around the wait. Anywhere else it
    // blocks, capped so passive and trigger cannot stall the scheduler.
    let hard_sleep = lua.create_function(|_, ms: u64| {
        std::thread::sleep(Duration::from_millis(ms.min(MAX_BLOCKING_SLEEP_MS)));
        Ok(())
    })?;
    let sleep: LuaFunction = lua
        .load(
            r#"
            local hard_sleep = ...
            return function(ms)
                ms = math.max(math.floor(tonumber(ms) or 0), 0)
                if coroutine.isyieldable() then
                    return coroutine.yield(ms)
                end
                hard_sleep(ms)
            end
            "#,
        )
        .call(hard_sleep)?;
    module.set("sleep", sleep)?;

    Ok(module)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::modules::test_support::lua_with_modules;

    #[test]
    fn os_returns_current_platform() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let os: String = lua.load("return system.os()").eval().unwrap();
        assert_eq!(os, std::env::consts::OS);
    }

    #[test]
    fn env_returns_nil_for_unset() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let value: Option<String> = lua
            .load("return system.env('DECKHAND_UNSET_VARIABLE')")
            .eval()
            .unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn sleep_outside_coroutine_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let start = Instant::now();
        lua.load("system.sleep(5000)").exec().unwrap();
        assert!(start.elapsed().as_millis() < 1000, "sleep must be capped");
    }

    #[test]
    fn sleep_inside_coroutine_yields_duration() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let yielded: i64 = lua
            .load(
                r#"
                local co = coroutine.create(function()
                    system.sleep(1234)
                end)
                local ok, value = coroutine.resume(co)
                assert(ok)
                return value
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(yielded, 1234);
    }
}
