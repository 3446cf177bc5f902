//! Device control capability (`streamdeck` module).
//!
//! All mutating calls return `(ok, err)`; query calls return plain values
//! (nil / zero when no device is attached), matching the script-facing
//! conventions of the other libraries.

use mlua::prelude::*;

use super::ModuleContext;

const NO_DEVICE: &str = "no device connected";

pub(crate) fn register(lua: &Lua, ctx: &ModuleContext) -> LuaResult<LuaTable> {
    let module = lua.create_table()?;

    // streamdeck.set_color(key, r, g, b) -> (ok, err)
    let device = ctx.device.clone();
    module.set(
        "set_color",
        lua.create_function(move |_, (key, r, g, b): (i64, i64, i64, i64)| {
            let Some(device) = &device else {
                return Ok((false, Some(NO_DEVICE.to_string())));
            };
            let Ok(key) = usize::try_from(key) else {
                return Ok((false, Some(format!("invalid key index {key}"))));
            };
            ok_err(device.set_key_color(key, clamp_rgb(r, g, b)))
        })?,
    )?;

    // streamdeck.set_brightness(percent) -> (ok, err)
    let device = ctx.device.clone();
    module.set(
        "set_brightness",
        lua.create_function(move |_, percent: i64| {
            let Some(device) = &device else {
                return Ok((false, Some(NO_DEVICE.to_string())));
            };
            ok_err(device.set_brightness(percent.clamp(0, 100) as u8))
        })?,
    )?;

    // streamdeck.clear() -> (ok, err)
    let device = ctx.device.clone();
    module.set(
        "clear",
        lua.create_function(move |_, ()| {
            let Some(device) = &device else {
                return Ok((false, Some(NO_DEVICE.to_string())));
            };
            ok_err(device.clear())
        })?,
    )?;

    // streamdeck.clear_key(key) -> (ok, err)
    let device = ctx.device.clone();
    module.set(
        "clear_key",
        lua.create_function(move |_, key: i64| {
            let Some(device) = &device else {
                return Ok((false, Some(NO_DEVICE.to_string())));
            };
            let Ok(key) = usize::try_from(key) else {
                return Ok((false, Some(format!("invalid key index {key}"))));
            };
            ok_err(device.set_key_color(key, [0, 0, 0]))
        })?,
    )?;

    // streamdeck.reset() -> (ok, err)
    let device = ctx.device.clone();
    module.set(
        "reset",
        lua.create_function(move |_, ()| {
            let Some(device) = &device else {
                return Ok((false, Some(NO_DEVICE.to_string())));
            };
            ok_err(device.reset())
        })?,
    )?;

    // streamdeck.get_model() -> name | nil
    let device = ctx.device.clone();
    module.set(
        "get_model",
        lua.create_function(move |_, ()| {
            Ok(device.as_ref().map(|d| d.model.name.to_string()))
        })?,
    )?;

    // streamdeck.get_keys() -> key count
    let device = ctx.device.clone();
    module.set(
        "get_keys",
        lua.create_function(move |_, ()| {
            Ok(device.as_ref().map(|d| d.model.keys as i64).unwrap_or(0))
        })?,
    )?;

    // streamdeck.get_layout() -> (cols, rows)
    let device = ctx.device.clone();
    module.set(
        "get_layout",
        lua.create_function(move |_, ()| match &device {
            Some(d) => Ok((d.model.cols as i64, d.model.rows as i64)),
            None => Ok((0, 0)),
        })?,
    )?;

    Ok(module)
}

fn clamp_rgb(r: i64, g: i64, b: i64) -> [u8; 3] {
    [
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    ]
}

fn ok_err(result: deckhand_hid::Result<()>) -> LuaResult<(bool, Option<String>)> {
    match result {
        Ok(()) => Ok((true, None)),
        Err(err) => Ok((false, Some(err.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use crate::modules::test_support::lua_with_modules;

    #[test]
    fn calls_without_device_return_errors() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (ok, err): (bool, String) = lua
            .load("return streamdeck.set_color(0, 255, 0, 0)")
            .eval()
            .unwrap();
        assert!(!ok);
        assert_eq!(err, "no device connected");
    }

    #[test]
    fn queries_without_device_return_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (model, keys): (Option<String>, i64) = lua
            .load("return streamdeck.get_model(), streamdeck.get_keys()")
            .eval()
            .unwrap();
        assert!(model.is_none());
        assert_eq!(keys, 0);

        let (cols, rows): (i64, i64) =
            lua.load("return streamdeck.get_layout()").eval().unwrap();
        assert_eq!((cols, rows), (0, 0));
    }
}
