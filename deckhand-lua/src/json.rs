//! Conversion between Lua values and JSON.
//!
//! Tables whose keys are exactly the contiguous integers 1..n map to JSON
//! arrays; every other table maps to an object with stringified keys.
//! Functions, threads and userdata refuse to serialize.

use mlua::prelude::*;

/// Convert a Lua value to JSON.
pub fn lua_to_json(lua: &Lua, value: &LuaValue) -> LuaResult<serde_json::Value> {
    match value {
        LuaValue::Nil => Ok(serde_json::Value::Null),
        LuaValue::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        LuaValue::Integer(i) => Ok(serde_json::json!(*i)),
        LuaValue::Number(n) => {
            // JSON has no representation for these.
            if n.is_nan() || n.is_infinite() {
                Ok(serde_json::Value::Null)
            } else {
                Ok(serde_json::json!(*n))
            }
        }
        LuaValue::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_string())),
        LuaValue::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                // Candidate array: contiguous 1..len with no extra keys.
                let pairs_count = table.pairs::<LuaValue, LuaValue>().count();
                if pairs_count == len {
                    let mut array = Vec::with_capacity(len);
                    for i in 1..=len {
                        let item: LuaValue = table.raw_get(i)?;
                        array.push(lua_to_json(lua, &item)?);
                    }
                    return Ok(serde_json::Value::Array(array));
                }
            }

            let mut object = serde_json::Map::new();
            for pair in table.pairs::<LuaValue, LuaValue>() {
                let (key, item) = pair?;
                let key = match key {
                    LuaValue::String(s) => s.to_str()?.to_string(),
                    LuaValue::Integer(i) => i.to_string(),
                    // Other key types have no JSON counterpart.
                    _ => continue,
                };
                object.insert(key, lua_to_json(lua, &item)?);
            }
            Ok(serde_json::Value::Object(object))
        }
        LuaValue::Function(_) => Err(LuaError::external("cannot serialize function to JSON")),
        LuaValue::Thread(_) => Err(LuaError::external("cannot serialize thread to JSON")),
        LuaValue::UserData(_) | LuaValue::LightUserData(_) => {
            Err(LuaError::external("cannot serialize userdata to JSON"))
        }
        _ => Err(LuaError::external("cannot serialize value to JSON")),
    }
}

/// Convert a JSON value to Lua.
pub fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> LuaResult<LuaValue> {
    match value {
        serde_json::Value::Null => Ok(LuaValue::Nil),
        serde_json::Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i as mlua::Integer))
            } else if let Some(f) = n.as_f64() {
                Ok(LuaValue::Number(f))
            } else {
                Ok(LuaValue::Nil)
            }
        }
        serde_json::Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        serde_json::Value::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        serde_json::Value::Object(entries) => {
            let table = lua.create_table_with_capacity(0, entries.len())?;
            for (key, item) in entries {
                table.raw_set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}
