//! Logging capability, forwarded to the host logger.
//!
//! Messages are tagged with the script name as the log target so per-script
//! output can be filtered.

use mlua::prelude::*;

use super::ModuleContext;

pub(crate) fn register(lua: &Lua, ctx: &ModuleContext) -> LuaResult<LuaTable> {
    let module = lua.create_table()?;
    let target = format!("script::{}", ctx.script_name);

    for (name, level) in [
        ("info", ::log::Level::Info),
        ("warn", ::log::Level::Warn),
        ("error", ::log::Level::Error),
        ("debug", ::log::Level::Debug),
    ] {
        let target = target.clone();
        module.set(
            name,
            lua.create_function(move |_, message: String| {
                ::log::log!(target: target.as_str(), level, "{message}");
                Ok(())
            })?,
        )?;
    }

    // log.print(...) — tostring each argument, tab-separated, at info level.
    let print_target = target.clone();
    module.set(
        "print",
        lua.create_function(move |_, args: LuaMultiValue| {
            let parts: Vec<String> = args.iter().map(display_value).collect();
            ::log::info!(target: print_target.as_str(), "{}", parts.join("\t"));
            Ok(())
        })?,
    )?;

    // log.printf(fmt, ...) — string.format semantics.
    let string_format: LuaFunction = lua
        .globals()
        .get::<LuaTable>("string")?
        .get("format")?;
    module.set(
        "printf",
        lua.create_function(move |_, args: LuaMultiValue| {
            let message: String = string_format.call(args)?;
            ::log::info!(target: target.as_str(), "{message}");
            Ok(())
        })?,
    )?;

    Ok(module)
}

fn display_value(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        LuaValue::Table(_) => "[table]".to_string(),
        other => format!("[{}]", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use crate::modules::test_support::lua_with_modules;

    #[test]
    fn log_functions_are_callable() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        lua.load(
            r#"
            log.info("info message")
            log.warn("warn message")
            log.error("error message")
            log.debug("debug message")
            log.print("a", 1, true, nil, {})
            log.printf("%s=%d", "count", 3)
            "#,
        )
        .exec()
        .unwrap();
    }

    #[test]
    fn printf_bad_format_raises() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let result = lua.load("log.printf('%d', 'not a number')").exec();
        assert!(result.is_err());
    }
}
