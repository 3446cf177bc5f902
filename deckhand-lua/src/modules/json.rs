//! JSON encode/decode capability, backed by the shared Lua ⇄ JSON bridge.

use mlua::prelude::*;

use super::ModuleContext;
use crate::json::{json_to_lua, lua_to_json};

pub(crate) fn register(lua: &Lua, _ctx: &ModuleContext) -> LuaResult<LuaTable> {
    let module = lua.create_table()?;

    // json.encode(value) -> (string, err)
    module.set(
        "encode",
        lua.create_function(|lua, value: LuaValue| {
            let json = match lua_to_json(lua, &value) {
                Ok(json) => json,
                Err(err) => return Ok((None, Some(format!("JSON encode error: {err}")))),
            };
            match serde_json::to_string(&json) {
                Ok(text) => Ok((Some(text), None)),
                Err(err) => Ok((None, Some(format!("JSON encode error: {err}")))),
            }
        })?,
    )?;

    // json.decode(string) -> (value, err)
    module.set(
        "decode",
        lua.create_function(|lua, text: String| {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => Ok((json_to_lua(lua, &json)?, LuaValue::Nil)),
                Err(err) => Ok((
                    LuaValue::Nil,
                    LuaValue::String(lua.create_string(format!("JSON decode error: {err}"))?),
                )),
            }
        })?,
    )?;

    Ok(module)
}

#[cfg(test)]
mod tests {
    use crate::modules::test_support::lua_with_modules;

    #[test]
    fn encode_object() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (text, err): (Option<String>, Option<String>) = lua
            .load("return json.encode({ answer = 42 })")
            .eval()
            .unwrap();
        assert!(err.is_none());
        assert_eq!(text.as_deref(), Some(r#"{"answer":42}"#));
    }

    #[test]
    fn decode_roundtrip_through_lua() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let ok: bool = lua
            .load(
                r#"
                local value, err = json.decode('{"list": [1, 2, 3], "name": "deck"}')
                assert(value, err)
                local encoded = json.encode(value.list)
                return encoded == "[1,2,3]" and value.name == "deck"
                "#,
            )
            .eval()
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn decode_invalid_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (value, err): (Option<bool>, Option<String>) =
            lua.load("return json.decode('{nope')").eval().unwrap();
        assert!(value.is_none());
        assert!(err.unwrap().contains("decode error"));
    }

    #[test]
    fn encode_function_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (text, err): (Option<String>, Option<String>) = lua
            .load("return json.encode(function() end)")
            .eval()
            .unwrap();
        assert!(text.is_none());
        assert!(err.unwrap().contains("encode error"));
    }
}
