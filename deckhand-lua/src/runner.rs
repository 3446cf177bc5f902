//! Per-script execution: background driver, passive and trigger entry.
//!
//! One mutex guards each script's interpreter. The background driver holds
//! it only while resuming the coroutine and releases it around every wait,
//! so passive (which only ever try-locks) can observe state between resumes
//! and is skipped, never queued, while a resume is in flight.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use deckhand_hid::Device;
use log::{info, warn};
use parking_lot::Mutex;

use crate::appearance::KeyAppearance;
use crate::cancel::{CancelToken, Cancellation};
use crate::error::{Result, ScriptError};
use crate::host::{BackgroundStep, ScriptHost};
use crate::modules::RefreshHook;

/// Pause before restarting a background coroutine that returned normally.
const QUIESCENT_PAUSE: Duration = Duration::from_millis(100);

/// Delay before retrying a background coroutine that errored.
const ERROR_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Minimum wait between resumes, also used when a yield names no duration.
const MIN_SLEEP_MS: u64 = 10;

/// How background errors affect restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Restart unbounded (the default).
    #[default]
    Always,
    /// First error terminates the background permanently.
    Never,
    /// One restart allowed; the second error terminates.
    Once,
}

/// Manages a single script's lifecycle.
pub struct ScriptRunner {
    pub script_path: PathBuf,
    pub script_name: String,

    host: Arc<Mutex<ScriptHost>>,

    has_background: bool,
    has_passive: bool,
    has_trigger: bool,
    restart_policy: RestartPolicy,

    cancellation: Cancellation,
    background_running: Arc<AtomicBool>,
    background_restarts: Arc<AtomicU32>,
    background_handle: Mutex<Option<JoinHandle<()>>>,

    refresh: RefreshHook,
}

impl std::fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRunner")
            .field("script_path", &self.script_path)
            .field("script_name", &self.script_name)
            .finish_non_exhaustive()
    }
}

impl ScriptRunner {
    /// Load a script: create its interpreter, preload the capability
    /// libraries and run the definitional pass.
    pub fn new(
        script_path: impl Into<PathBuf>,
        device: Option<Arc<Device>>,
        config_dir: &Path,
    ) -> Result<Self> {
        let script_path = script_path.into();
        let script_name = script_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| script_path.display().to_string());

        let refresh: RefreshHook = Arc::new(Mutex::new(None));
        let (host, meta) =
            ScriptHost::load(&script_path, &script_name, device, config_dir, refresh.clone())
                .map_err(|source| ScriptError::Load {
                    path: script_path.clone(),
                    source,
                })?;

        Ok(Self {
            script_path,
            script_name,
            host: Arc::new(Mutex::new(host)),
            has_background: meta.has_background,
            has_passive: meta.has_passive,
            has_trigger: meta.has_trigger,
            restart_policy: meta.restart_policy,
            cancellation: Cancellation::new(),
            background_running: Arc::new(AtomicBool::new(false)),
            background_restarts: Arc::new(AtomicU32::new(0)),
            background_handle: Mutex::new(None),
            refresh,
        })
    }

    pub fn has_background(&self) -> bool {
        self.has_background
    }

    pub fn has_passive(&self) -> bool {
        self.has_passive
    }

    pub fn has_trigger(&self) -> bool {
        self.has_trigger
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart_policy
    }

    /// Number of error restarts the background has gone through.
    pub fn background_restarts(&self) -> u32 {
        self.background_restarts.load(Ordering::Relaxed)
    }

    /// Install the callback invoked when the script requests a refresh.
    pub fn set_refresh_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.refresh.lock() = Some(Box::new(callback));
    }

    /// Start the background driver thread, if the script defines one.
    ///
    /// At most one driver per script: repeated calls are no-ops while it
    /// runs.
    pub fn start_background(&self) {
        if !self.has_background || self.background_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let host = self.host.clone();
        let token = self.cancellation.token();
        let policy = self.restart_policy;
        let name = self.script_name.clone();
        let restarts = self.background_restarts.clone();
        let running = self.background_running.clone();

        let handle = thread::Builder::new()
            .name(format!("bg::{name}"))
            .spawn(move || {
                background_loop(&host, &token, policy, &name, &restarts);
                running.store(false, Ordering::SeqCst);
            })
            .expect("spawn background thread");

        *self.background_handle.lock() = Some(handle);
    }

    /// Cancel the background driver and wait for it to exit.
    pub fn stop_background(&self) {
        self.cancellation.cancel();
        if let Some(handle) = self.background_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Run `passive(key_index, state)` without blocking.
    ///
    /// If the background driver currently holds the interpreter the tick is
    /// skipped and `Ok(None)` is returned; the next tick retries. This is the
    /// non-blocking half of the scheduling contract.
    pub fn run_passive(&self, key_index: usize) -> Result<Option<KeyAppearance>> {
        let Some(host) = self.host.try_lock() else {
            return Ok(None);
        };
        if !self.has_passive {
            return Ok(None);
        }
        host.call_passive(key_index).map_err(Into::into)
    }

    /// Run `trigger(state)`, blocking on the script mutex.
    pub fn run_trigger(&self) -> Result<()> {
        let host = self.host.lock();
        if !self.has_trigger {
            return Ok(());
        }
        host.call_trigger().map_err(Into::into)
    }

    /// Invoke an entry from the script's module table (used for `_boot.lua`).
    pub fn run_module_entry(&self, name: &str) -> Result<bool> {
        let host = self.host.lock();
        host.call_module_entry(name).map_err(Into::into)
    }

    /// Shut the runner down: cancel the background and drop the interpreter.
    pub fn close(&self) {
        self.stop_background();
    }
}

impl Drop for ScriptRunner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drive the background coroutine until cancellation or policy exhaustion.
///
/// The script mutex is held only inside `resume_background`; every wait
/// happens with the mutex released.
fn background_loop(
    host: &Mutex<ScriptHost>,
    token: &CancelToken,
    policy: RestartPolicy,
    name: &str,
    restarts: &AtomicU32,
) {
    loop {
        if token.is_cancelled() {
            return;
        }

        let step = host.lock().resume_background();

        match step {
            Err(err) => {
                warn!("background error in {name}: {err}");
                host.lock().reset_background();
                let attempt = restarts.fetch_add(1, Ordering::SeqCst) + 1;

                match policy {
                    RestartPolicy::Never => {
                        warn!("{name}: restart policy is 'never', stopping background");
                        return;
                    }
                    RestartPolicy::Once if attempt > 1 => {
                        warn!("{name}: restart policy is 'once', max restarts reached");
                        return;
                    }
                    _ => info!("{name}: restarting background (attempt {attempt})"),
                }

                if token.wait(ERROR_RESTART_DELAY) {
                    return;
                }
            }
            Ok(BackgroundStep::Finished) => {
                host.lock().reset_background();
                if token.wait(QUIESCENT_PAUSE) {
                    return;
                }
            }
            Ok(BackgroundStep::Yielded(sleep_ms)) => {
                if token.wait(Duration::from_millis(sleep_ms.max(MIN_SLEEP_MS))) {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn write_script(dir: &Path, name: &str, code: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, code).unwrap();
        path
    }

    fn load(dir: &Path, code: &str) -> ScriptRunner {
        let path = write_script(dir, "script.lua", code);
        ScriptRunner::new(path, None, dir).unwrap()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    #[test]
    fn load_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "bad.lua", "this is not lua (");
        let err = ScriptRunner::new(path, None, dir.path()).unwrap_err();
        assert!(matches!(err, ScriptError::Load { .. }));
    }

    #[test]
    fn script_name_strips_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "clock.lua", "function trigger(s) end");
        let runner = ScriptRunner::new(path, None, dir.path()).unwrap();
        assert_eq!(runner.script_name, "clock");
        assert!(runner.has_trigger());
        assert!(!runner.has_background());
    }

    // ========================================================================
    // Background scheduling
    // ========================================================================

    #[test]
    fn background_counts_while_sleeping() {
        let dir = tempfile::tempdir().unwrap();
        let runner = load(
            dir.path(),
            r#"
            function background(s)
                while true do
                    s.n = (s.n or 0) + 1
                    system.sleep(20)
                end
            end
            function passive(k, s)
                return { color = {50, 50, 50}, text = tostring(s.n or 0) }
            end
            "#,
        );

        runner.start_background();

        // Sample passive over ~300 ms; counters must be monotonic and grow.
        let deadline = Instant::now() + Duration::from_millis(300);
        let mut last = 0i64;
        let mut observed = 0;
        while Instant::now() < deadline {
            if let Some(appearance) = runner.run_passive(1).unwrap() {
                let n: i64 = appearance.text.parse().unwrap();
                assert!(n >= last, "counter went backwards: {n} < {last}");
                last = n;
                observed += 1;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(observed > 0, "passive never ran");
        assert!(last >= 3, "background made too little progress: {last}");

        runner.close();
    }

    #[test]
    fn finished_background_restarts_after_pause() {
        let dir = tempfile::tempdir().unwrap();
        let runner = load(
            dir.path(),
            r#"
            function background(s)
                s.runs = (s.runs or 0) + 1
            end
            function passive(k, s)
                return { text = tostring(s.runs or 0) }
            end
            "#,
        );

        runner.start_background();
        thread::sleep(Duration::from_millis(350));
        runner.close();

        let appearance = runner.run_passive(0).unwrap().unwrap();
        let runs: i64 = appearance.text.parse().unwrap();
        // 100 ms pause between runs: expect roughly three in 350 ms.
        assert!(runs >= 2, "expected repeated runs, got {runs}");
        // No error restarts happened.
        assert_eq!(runner.background_restarts(), 0);
    }

    #[test]
    fn restart_policy_never_stops_after_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = load(
            dir.path(),
            r#"
            RESTART_POLICY = "never"
            function background(s)
                error("always fails")
            end
            function trigger(s)
                s.triggered = true
            end
            "#,
        );

        runner.start_background();
        thread::sleep(Duration::from_millis(100));

        assert_eq!(runner.background_restarts(), 1);
        // Trigger still works after the background terminated.
        runner.run_trigger().unwrap();
        runner.close();
    }

    #[test]
    fn restart_policy_once_allows_single_restart() {
        let dir = tempfile::tempdir().unwrap();
        let runner = load(
            dir.path(),
            r#"
            RESTART_POLICY = "once"
            function background(s)
                error("always fails")
            end
            "#,
        );
        assert_eq!(runner.restart_policy(), RestartPolicy::Once);

        runner.start_background();
        // First failure restarts after 1 s; second failure terminates.
        thread::sleep(Duration::from_millis(1300));
        assert_eq!(runner.background_restarts(), 2);

        // Give it more time: the count must not grow further.
        thread::sleep(Duration::from_millis(1200));
        assert_eq!(runner.background_restarts(), 2);
        runner.close();
    }

    #[test]
    fn passive_skips_while_background_holds_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let runner = load(
            dir.path(),
            r#"
            function background(s)
                s.entered = true
                local deadline = os.clock() + 0.4
                while os.clock() < deadline do end
                system.sleep(10000)
            end
            function passive(k, s)
                return { text = "ran" }
            end
            "#,
        );

        runner.start_background();
        thread::sleep(Duration::from_millis(50));

        // Background busy-loops inside a single resume for ~400 ms: passive
        // must skip (None) and return promptly instead of queueing.
        let start = Instant::now();
        let result = runner.run_passive(0).unwrap();
        assert!(result.is_none(), "passive must be skipped, not queued");
        assert!(
            start.elapsed() < Duration::from_millis(100),
            "try-lock must not block"
        );

        // After the busy stretch, background sleeps and passive runs again.
        thread::sleep(Duration::from_millis(500));
        let result = runner.run_passive(0).unwrap();
        assert!(result.is_some());
        runner.close();
    }

    #[test]
    fn close_wakes_sleeping_background() {
        let dir = tempfile::tempdir().unwrap();
        let runner = load(
            dir.path(),
            r#"
            function background(s)
                while true do
                    system.sleep(60000)
                end
            end
            "#,
        );

        runner.start_background();
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        runner.close();
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "pending sleep must wake on cancellation"
        );
    }

    #[test]
    fn start_background_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runner = load(
            dir.path(),
            r#"
            function background(s)
                s.starts = (s.starts or 0) + 1
                system.sleep(50000)
            end
            "#,
        );

        runner.start_background();
        runner.start_background();
        runner.start_background();
        thread::sleep(Duration::from_millis(100));
        runner.close();

        let host = runner.host.lock();
        let starts: i64 = host.state_value("starts").unwrap();
        assert_eq!(starts, 1, "only one background coroutine may exist");
    }

    // ========================================================================
    // Trigger
    // ========================================================================

    #[test]
    fn trigger_errors_surface_to_caller() {
        let dir = tempfile::tempdir().unwrap();
        let runner = load(dir.path(), "function trigger(s) error('no') end");
        assert!(runner.run_trigger().is_err());
        // The runner stays usable.
        assert!(runner.run_passive(0).unwrap().is_none());
    }

    #[test]
    fn state_is_shared_between_trigger_and_passive() {
        let dir = tempfile::tempdir().unwrap();
        let runner = load(
            dir.path(),
            r#"
            function trigger(s) s.count = (s.count or 0) + 1 end
            function passive(k, s) return { text = tostring(s.count or 0) } end
            "#,
        );

        runner.run_trigger().unwrap();
        runner.run_trigger().unwrap();
        runner.run_trigger().unwrap();
        let appearance = runner.run_passive(0).unwrap().unwrap();
        assert_eq!(appearance.text, "3");
    }
}
