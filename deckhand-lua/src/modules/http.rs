//! HTTP client capability for scripts.
//!
//! Every call returns `(body, status)` on success or `(nil, err)` on a
//! transport failure, matching the two-value convention of the other
//! capability libraries. Requests share one client with a 30 s timeout.

use std::time::Duration;

use mlua::prelude::*;
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;

use super::ModuleContext;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn register(lua: &Lua, _ctx: &ModuleContext) -> LuaResult<LuaTable> {
    let module = lua.create_table()?;
    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(LuaError::external)?;

    // http.get(url) -> (body, status) | (nil, err)
    let get_client = client.clone();
    module.set(
        "get",
        lua.create_function(move |lua, url: String| {
            respond(lua, get_client.get(&url).send())
        })?,
    )?;

    // http.post(url, content_type, body) -> (body, status) | (nil, err)
    let post_client = client.clone();
    module.set(
        "post",
        lua.create_function(
            move |lua, (url, content_type, body): (String, String, String)| {
                respond(
                    lua,
                    post_client
                        .post(&url)
                        .header(CONTENT_TYPE, content_type)
                        .body(body)
                        .send(),
                )
            },
        )?,
    )?;

    // http.request(method, url, headers?, body?) -> (body, status) | (nil, err)
    module.set(
        "request",
        lua.create_function(
            move |lua,
                  (method, url, headers, body): (
                String,
                String,
                Option<LuaTable>,
                Option<String>,
            )| {
                let method = match Method::from_bytes(method.to_uppercase().as_bytes()) {
                    Ok(m) => m,
                    Err(err) => {
                        return Ok((
                            LuaValue::Nil,
                            LuaValue::String(lua.create_string(err.to_string())?),
                        ))
                    }
                };

                let mut request = client.request(method, &url);
                if let Some(headers) = headers {
                    for pair in headers.pairs::<String, String>() {
                        let (name, value) = pair?;
                        request = request.header(name, value);
                    }
                }
                if let Some(body) = body {
                    request = request.body(body);
                }
                respond(lua, request.send())
            },
        )?,
    )?;

    Ok(module)
}

fn respond(
    lua: &Lua,
    result: reqwest::Result<Response>,
) -> LuaResult<(LuaValue, LuaValue)> {
    let outcome = result.and_then(|response| {
        let status = response.status().as_u16();
        response.text().map(|body| (body, status))
    });
    match outcome {
        Ok((body, status)) => Ok((
            LuaValue::String(lua.create_string(&body)?),
            LuaValue::Integer(mlua::Integer::from(status)),
        )),
        Err(err) => Ok((
            LuaValue::Nil,
            LuaValue::String(lua.create_string(err.to_string())?),
        )),
    }
}
