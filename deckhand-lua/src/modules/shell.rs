//! Shell command execution for scripts.

use std::process::Command;

use mlua::prelude::*;

use super::ModuleContext;

pub(crate) fn register(lua: &Lua, _ctx: &ModuleContext) -> LuaResult<LuaTable> {
    let module = lua.create_table()?;

    // shell.exec(cmd) -> (stdout, stderr, exit_code)
    module.set(
        "exec",
        lua.create_function(|_, cmd: String| {
            match shell_command(&cmd).output() {
                Ok(output) => {
                    let code = i64::from(output.status.code().unwrap_or(-1));
                    Ok((
                        Some(String::from_utf8_lossy(&output.stdout).into_owned()),
                        Some(String::from_utf8_lossy(&output.stderr).into_owned()),
                        code,
                    ))
                }
                Err(err) => Ok((None, Some(err.to_string()), -1)),
            }
        })?,
    )?;

    // shell.exec_async(cmd) -> (ok, err)
    // Fire and forget; a reaper thread collects the exit status.
    module.set(
        "exec_async",
        lua.create_function(|_, cmd: String| match shell_command(&cmd).spawn() {
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
                Ok((true, None))
            }
            Err(err) => Ok((false, Some(err.to_string()))),
        })?,
    )?;

    // shell.open(target) -> (ok, err)
    // Opens a file or URL with the desktop's default handler.
    module.set(
        "open",
        lua.create_function(|_, target: String| {
            let mut cmd = if cfg!(target_os = "windows") {
                let mut c = Command::new("cmd");
                c.args(["/c", "start", "", &target]);
                c
            } else if cfg!(target_os = "macos") {
                let mut c = Command::new("open");
                c.arg(&target);
                c
            } else {
                let mut c = Command::new("xdg-open");
                c.arg(&target);
                c
            };
            spawn_detached(&mut cmd)
        })?,
    )?;

    // shell.terminal(cmd) -> (ok, err)
    // Runs the command in a freshly opened terminal window.
    module.set(
        "terminal",
        lua.create_function(|_, cmd_str: String| {
            if cfg!(target_os = "windows") {
                let mut c = Command::new("cmd");
                c.args(["/c", "start", &cmd_str]);
                return spawn_detached(&mut c);
            }
            if cfg!(target_os = "macos") {
                let script = format!(
                    "tell application \"Terminal\" to do script \"{}\"",
                    cmd_str.replace('"', "\\\"")
                );
                let mut c = Command::new("osascript");
                c.args(["-e", &script]);
                return spawn_detached(&mut c);
            }

            // Try common terminal emulators in order.
            let terminals: [(&str, &[&str]); 5] = [
                ("x-terminal-emulator", &["-e"]),
                ("gnome-terminal", &["--"]),
                ("konsole", &["-e"]),
                ("xfce4-terminal", &["-e"]),
                ("xterm", &["-e"]),
            ];
            for (term, args) in terminals {
                if which::which(term).is_ok() {
                    let mut c = Command::new(term);
                    c.args(args).args(["sh", "-c", &cmd_str]);
                    return spawn_detached(&mut c);
                }
            }
            Ok((false, Some("no terminal emulator found".to_string())))
        })?,
    )?;

    Ok(module)
}

fn shell_command(cmd: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/c", cmd]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", cmd]);
        c
    }
}

fn spawn_detached(cmd: &mut Command) -> LuaResult<(bool, Option<String>)> {
    match cmd.spawn() {
        Ok(mut child) => {
            std::thread::spawn(move || {
                let _ = child.wait();
            });
            Ok((true, None))
        }
        Err(err) => Ok((false, Some(err.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use crate::modules::test_support::lua_with_modules;

    #[test]
    fn exec_captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (stdout, _stderr, code): (String, String, i64) = lua
            .load("return shell.exec('echo hello')")
            .eval()
            .unwrap();
        assert_eq!(stdout.trim(), "hello");
        assert_eq!(code, 0);
    }

    #[test]
    fn exec_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (_stdout, _stderr, code): (String, String, i64) =
            lua.load("return shell.exec('exit 3')").eval().unwrap();
        assert_eq!(code, 3);
    }

    #[test]
    fn exec_async_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (ok, err): (bool, Option<String>) =
            lua.load("return shell.exec_async('true')").eval().unwrap();
        assert!(ok, "spawn failed: {err:?}");
    }
}
