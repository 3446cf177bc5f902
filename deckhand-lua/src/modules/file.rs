//! File access for scripts, restricted to the configuration root.
//!
//! Every operation checks the lexically normalized path against the config
//! root first; anything outside is refused with an error value rather than a
//! thrown Lua error.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use mlua::prelude::*;

use super::ModuleContext;

const ACCESS_DENIED: &str = "access denied: path is outside the config directory";

pub(crate) fn register(lua: &Lua, ctx: &ModuleContext) -> LuaResult<LuaTable> {
    let module = lua.create_table()?;
    let root = ctx.config_dir.clone();

    // file.read(path) -> (content, err)
    let read_root = root.clone();
    module.set(
        "read",
        lua.create_function(move |_, path: String| {
            if !within_root(&path, &read_root) {
                return Ok((None, Some(ACCESS_DENIED.to_string())));
            }
            match fs::read_to_string(&path) {
                Ok(content) => Ok((Some(content), None)),
                Err(err) => Ok((None, Some(err.to_string()))),
            }
        })?,
    )?;

    // file.write(path, content) -> (ok, err)
    let write_root = root.clone();
    module.set(
        "write",
        lua.create_function(move |_, (path, content): (String, String)| {
            if !within_root(&path, &write_root) {
                return Ok((false, Some(ACCESS_DENIED.to_string())));
            }
            match fs::write(&path, content) {
                Ok(()) => Ok((true, None)),
                Err(err) => Ok((false, Some(err.to_string()))),
            }
        })?,
    )?;

    // file.append(path, content) -> (ok, err)
    let append_root = root.clone();
    module.set(
        "append",
        lua.create_function(move |_, (path, content): (String, String)| {
            if !within_root(&path, &append_root) {
                return Ok((false, Some(ACCESS_DENIED.to_string())));
            }
            let result = fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .and_then(|mut f| f.write_all(content.as_bytes()));
            match result {
                Ok(()) => Ok((true, None)),
                Err(err) => Ok((false, Some(err.to_string()))),
            }
        })?,
    )?;

    // file.exists(path) -> boolean
    let exists_root = root.clone();
    module.set(
        "exists",
        lua.create_function(move |_, path: String| {
            Ok(within_root(&path, &exists_root) && Path::new(&path).exists())
        })?,
    )?;

    // file.mkdir(path) -> (ok, err)
    let mkdir_root = root.clone();
    module.set(
        "mkdir",
        lua.create_function(move |_, path: String| {
            if !within_root(&path, &mkdir_root) {
                return Ok((false, Some(ACCESS_DENIED.to_string())));
            }
            match fs::create_dir_all(&path) {
                Ok(()) => Ok((true, None)),
                Err(err) => Ok((false, Some(err.to_string()))),
            }
        })?,
    )?;

    // file.list(path) -> (entries, err); entries are {name, is_dir, size}
    let list_root = root.clone();
    module.set(
        "list",
        lua.create_function(move |lua, path: String| {
            if !within_root(&path, &list_root) {
                return Ok((None, Some(ACCESS_DENIED.to_string())));
            }
            let entries = match fs::read_dir(&path) {
                Ok(entries) => entries,
                Err(err) => return Ok((None, Some(err.to_string()))),
            };

            let list = lua.create_table()?;
            let mut index = 1;
            for entry in entries.flatten() {
                let record = lua.create_table()?;
                record.set("name", entry.file_name().to_string_lossy().into_owned())?;
                let metadata = entry.metadata().ok();
                record.set(
                    "is_dir",
                    metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false),
                )?;
                record.set("size", metadata.map(|m| m.len() as i64).unwrap_or(0))?;
                list.raw_set(index, record)?;
                index += 1;
            }
            Ok((Some(list), None))
        })?,
    )?;

    // file.remove(path) -> (ok, err)
    let remove_root = root.clone();
    module.set(
        "remove",
        lua.create_function(move |_, path: String| {
            if !within_root(&path, &remove_root) {
                return Ok((false, Some(ACCESS_DENIED.to_string())));
            }
            let target = Path::new(&path);
            let result = if target.is_dir() {
                fs::remove_dir(target)
            } else {
                fs::remove_file(target)
            };
            match result {
                Ok(()) => Ok((true, None)),
                Err(err) => Ok((false, Some(err.to_string()))),
            }
        })?,
    )?;

    // file.size(path) -> bytes | -1
    let size_root = root.clone();
    module.set(
        "size",
        lua.create_function(move |_, path: String| {
            if !within_root(&path, &size_root) {
                return Ok(-1);
            }
            Ok(fs::metadata(&path).map(|m| m.len() as i64).unwrap_or(-1))
        })?,
    )?;

    // file.is_dir(path) -> boolean
    module.set(
        "is_dir",
        lua.create_function(move |_, path: String| {
            Ok(within_root(&path, &root) && Path::new(&path).is_dir())
        })?,
    )?;

    Ok(module)
}

/// Lexical containment check; `..` components are resolved without touching
/// the filesystem so the check also holds for paths that do not exist yet.
fn within_root(path: &str, root: &Path) -> bool {
    normalize(Path::new(path)).starts_with(normalize(root))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
