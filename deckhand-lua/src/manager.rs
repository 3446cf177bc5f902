//! Script registry and the passive update loop.
//!
//! The manager owns every loaded runner, tracks which scripts are visible on
//! the current page, and drives `passive` at a fixed cadence. Passive results
//! are batched and applied a few device writes per tick so a burst of
//! appearance changes cannot saturate the HID channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use deckhand_hid::Device;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::appearance::KeyAppearance;
use crate::cancel::Cancellation;
use crate::error::{Result, ScriptError};
use crate::runner::ScriptRunner;

/// Default rate at which passive callbacks run.
pub const DEFAULT_PASSIVE_FPS: u32 = 2;

/// Device writes applied per passive tick; the rest re-queue.
const MAX_UPDATES_PER_TICK: usize = 5;

/// Boot script run synchronously before anything else, when present.
const BOOT_SCRIPT: &str = "_boot.lua";

/// Sink for passive appearances; the application layer turns these into
/// device writes.
pub type KeyUpdateCallback = Arc<dyn Fn(usize, &KeyAppearance) + Send + Sync>;

/// Invoked (at most once per tick) when any script requested a refresh.
pub type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

struct ManagerInner {
    runners: HashMap<PathBuf, Arc<ScriptRunner>>,
    /// Script path → key index for the currently rendered page.
    visible: HashMap<PathBuf, usize>,
    /// Pending passive results, newest appearance per script.
    batch: HashMap<PathBuf, KeyAppearance>,
    on_key_update: Option<KeyUpdateCallback>,
    on_refresh: Option<RefreshCallback>,
    refresh_pending: bool,
    passive_handle: Option<JoinHandle<()>>,
}

/// Coordinates all script runners and the passive loop.
pub struct ScriptManager {
    device: Option<Arc<Device>>,
    config_dir: PathBuf,
    passive_fps: u32,
    cancellation: Cancellation,
    inner: Mutex<ManagerInner>,
}

impl ScriptManager {
    pub fn new(device: Option<Arc<Device>>, config_dir: impl Into<PathBuf>, passive_fps: u32) -> Self {
        Self {
            device,
            config_dir: config_dir.into(),
            passive_fps: if passive_fps == 0 {
                DEFAULT_PASSIVE_FPS
            } else {
                passive_fps
            },
            cancellation: Cancellation::new(),
            inner: Mutex::new(ManagerInner {
                runners: HashMap::new(),
                visible: HashMap::new(),
                batch: HashMap::new(),
                on_key_update: None,
                on_refresh: None,
                refresh_pending: false,
                passive_handle: None,
            }),
        }
    }

    /// Set the sink for passive key updates.
    pub fn set_key_update_callback(&self, callback: impl Fn(usize, &KeyAppearance) + Send + Sync + 'static) {
        self.inner.lock().on_key_update = Some(Arc::new(callback));
    }

    /// Set the handler for coalesced refresh requests.
    pub fn set_refresh_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.lock().on_refresh = Some(Arc::new(callback));
    }

    /// Run the boot script (if any), then discover and load every script
    /// under the config root and start their background workers.
    ///
    /// Individual load failures are logged and skipped; boot only fails when
    /// the config tree itself cannot be scanned.
    pub fn boot(self: &Arc<Self>) -> Result<()> {
        let boot_path = self.config_dir.join(BOOT_SCRIPT);
        if boot_path.is_file() {
            self.run_boot_script(&boot_path);
        }

        let mut scripts = Vec::new();
        collect_scripts(&self.config_dir, &mut scripts).map_err(|source| ScriptError::Scan {
            path: self.config_dir.clone(),
            source,
        })?;
        scripts.sort();

        info!("found {} scripts to load", scripts.len());
        let total = scripts.len();
        let mut loaded = 0;

        for path in scripts {
            let runner = match ScriptRunner::new(&path, self.device.clone(), &self.config_dir) {
                Ok(runner) => Arc::new(runner),
                Err(err) => {
                    warn!("failed to load {}: {err}", path.display());
                    continue;
                }
            };

            let weak = Arc::downgrade(self);
            runner.set_refresh_callback(move || {
                if let Some(manager) = weak.upgrade() {
                    manager.request_refresh();
                }
            });

            if runner.has_background() {
                info!("starting background worker: {}", runner.script_name);
                runner.start_background();
            }

            self.inner.lock().runners.insert(path, runner);
            loaded += 1;
        }
        info!("loaded {loaded}/{total} scripts");

        // Clear whatever the boot script left on the keys.
        if let Some(device) = &self.device {
            if let Err(err) = device.clear() {
                warn!("clear after boot failed: {err}");
            }
        }
        Ok(())
    }

    fn run_boot_script(&self, path: &Path) {
        match ScriptRunner::new(path, self.device.clone(), &self.config_dir) {
            Ok(runner) => {
                if let Err(err) = runner.run_module_entry("boot") {
                    warn!("boot animation error: {err}");
                }
            }
            Err(err) => warn!("boot animation failed: {err}"),
        }
    }

    /// Start the passive ticker at the configured FPS. Idempotent.
    pub fn start_passive_loop(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.passive_handle.is_some() {
            return;
        }

        let manager = self.clone();
        let token = self.cancellation.token();
        let interval = Duration::from_secs_f64(1.0 / f64::from(self.passive_fps));

        let handle = thread::Builder::new()
            .name("passive-loop".to_string())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => manager.passive_tick(),
                        recv(token.channel()) -> msg => {
                            if msg.is_err() {
                                return;
                            }
                        }
                    }
                }
            })
            .expect("spawn passive loop thread");
        inner.passive_handle = Some(handle);
    }

    /// One passive cycle: honor a pending refresh request, poll every
    /// visible script, flush a bounded number of batched updates.
    ///
    /// The passive loop calls this at the configured FPS; it is public so
    /// headless callers and tests can drive ticks themselves.
    pub fn passive_tick(&self) {
        let refresh = {
            let mut inner = self.inner.lock();
            if inner.refresh_pending {
                inner.refresh_pending = false;
                inner.on_refresh.clone()
            } else {
                None
            }
        };
        if let Some(callback) = refresh {
            callback();
        }

        self.run_passive_update();
        self.flush_batch(MAX_UPDATES_PER_TICK);
    }

    /// Call `passive` on every visible script against a snapshot of the
    /// visible map, batching results. Errors are at most debug-logged:
    /// passive runs at frame rate and must not flood the log.
    fn run_passive_update(&self) {
        let snapshot: Vec<(PathBuf, usize, Arc<ScriptRunner>)> = {
            let inner = self.inner.lock();
            inner
                .visible
                .iter()
                .filter_map(|(path, &key)| {
                    inner
                        .runners
                        .get(path)
                        .map(|runner| (path.clone(), key, runner.clone()))
                })
                .collect()
        };

        for (path, key_index, runner) in snapshot {
            if !runner.has_passive() {
                continue;
            }
            match runner.run_passive(key_index) {
                Ok(Some(appearance)) => {
                    self.inner.lock().batch.insert(path, appearance);
                }
                Ok(None) => {}
                Err(err) => debug!("passive error in {}: {err}", runner.script_name),
            }
        }
    }

    /// Apply at most `max_updates` batched appearances, re-queuing the rest.
    ///
    /// The key index is re-resolved against the visible map at write time, so
    /// updates for scripts that left the page are dropped, never written.
    fn flush_batch(&self, max_updates: usize) {
        let (batch, callback) = {
            let mut inner = self.inner.lock();
            (std::mem::take(&mut inner.batch), inner.on_key_update.clone())
        };
        if batch.is_empty() {
            return;
        }
        let Some(callback) = callback else {
            return;
        };

        let mut processed = 0;
        let mut requeue = Vec::new();
        for (path, appearance) in batch {
            if processed >= max_updates {
                requeue.push((path, appearance));
                continue;
            }
            let key_index = self.inner.lock().visible.get(&path).copied();
            if let Some(key_index) = key_index {
                callback(key_index, &appearance);
                processed += 1;
            }
        }

        if !requeue.is_empty() {
            let mut inner = self.inner.lock();
            for (path, appearance) in requeue {
                inner.batch.entry(path).or_insert(appearance);
            }
        }
    }

    /// Atomically replace the visible-script map.
    ///
    /// Call this with the new page's map before rendering it, so passive
    /// updates never target keys of the previous page.
    pub fn set_visible_scripts(&self, scripts: HashMap<PathBuf, usize>) {
        self.inner.lock().visible = scripts;
    }

    pub fn runner(&self, script_path: &Path) -> Option<Arc<ScriptRunner>> {
        self.inner.lock().runners.get(script_path).cloned()
    }

    pub fn runner_count(&self) -> usize {
        self.inner.lock().runners.len()
    }

    /// Invoke a script's trigger on the calling thread.
    pub fn trigger_script(&self, script_path: &Path) -> Result<()> {
        let runner = self
            .runner(script_path)
            .ok_or_else(|| ScriptError::NotLoaded(script_path.to_path_buf()))?;
        runner.run_trigger()
    }

    /// Request a display refresh; coalesced into the next passive tick no
    /// matter how many scripts ask.
    pub fn request_refresh(&self) {
        self.inner.lock().refresh_pending = true;
    }

    /// Stop the passive loop and every background worker, then drop all
    /// interpreter states.
    pub fn shutdown(&self) {
        self.cancellation.cancel();

        let (passive_handle, runners) = {
            let mut inner = self.inner.lock();
            (
                inner.passive_handle.take(),
                std::mem::take(&mut inner.runners),
            )
        };
        if let Some(handle) = passive_handle {
            let _ = handle.join();
        }
        for runner in runners.values() {
            runner.close();
        }
        info!("script manager shutdown complete");
    }
}

/// Recursively collect `.lua` files, skipping names starting with `.` or `_`
/// (which also excludes the boot script). Unreadable subdirectories are
/// skipped rather than failing the scan.
fn collect_scripts(dir: &Path, scripts: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            let _ = collect_scripts(&path, scripts);
        } else if path.extension().is_some_and(|ext| ext == "lua") {
            scripts.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Instant;

    use super::*;

    fn write(dir: &Path, rel: &str, code: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, code).unwrap();
    }

    fn manager(dir: &Path, fps: u32) -> Arc<ScriptManager> {
        Arc::new(ScriptManager::new(None, dir, fps))
    }

    const COUNTER_SCRIPT: &str = r#"
        function passive(k, s)
            s.n = (s.n or 0) + 1
            return { color = {10, 10, 10}, text = tostring(s.n) }
        end
    "#;

    // ========================================================================
    // Discovery and boot
    // ========================================================================

    #[test]
    fn boot_discovers_scripts_recursively() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "top.lua", "function trigger(s) end");
        write(dir.path(), "apps/nested.lua", "function trigger(s) end");
        write(dir.path(), "apps/readme.txt", "not a script");
        write(dir.path(), "_hidden.lua", "error('must not load')");
        write(dir.path(), ".dot.lua", "error('must not load')");

        let manager = manager(dir.path(), 2);
        manager.boot().unwrap();
        assert_eq!(manager.runner_count(), 2);
        assert!(manager.runner(&dir.path().join("top.lua")).is_some());
        assert!(manager.runner(&dir.path().join("apps/nested.lua")).is_some());
        manager.shutdown();
    }

    #[test]
    fn boot_skips_broken_scripts_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.lua", "this is not lua (");
        write(dir.path(), "good.lua", "function trigger(s) end");

        let manager = manager(dir.path(), 2);
        manager.boot().unwrap();
        assert_eq!(manager.runner_count(), 1);
        manager.shutdown();
    }

    #[test]
    fn boot_runs_boot_script_module_entry() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker.txt");
        write(
            dir.path(),
            "_boot.lua",
            &format!(
                r#"
                return {{
                    boot = function()
                        file.write("{}", "booted")
                    end,
                }}
                "#,
                marker.display()
            ),
        );

        let manager = manager(dir.path(), 2);
        manager.boot().unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), "booted");
        // The boot script itself is not registered as a runner.
        assert_eq!(manager.runner_count(), 0);
        manager.shutdown();
    }

    #[test]
    fn boot_fails_on_unreadable_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let manager = manager(&missing, 2);
        assert!(matches!(
            manager.boot().unwrap_err(),
            ScriptError::Scan { .. }
        ));
    }

    // ========================================================================
    // Passive updates and batching
    // ========================================================================

    #[test]
    fn passive_updates_only_visible_scripts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "seen.lua", COUNTER_SCRIPT);
        write(dir.path(), "unseen.lua", COUNTER_SCRIPT);

        let manager = manager(dir.path(), 2);
        manager.boot().unwrap();

        let updates: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        manager.set_key_update_callback(move |key, _| sink.lock().push(key));

        manager.set_visible_scripts(HashMap::from([(dir.path().join("seen.lua"), 3)]));
        manager.passive_tick();

        let keys = updates.lock().clone();
        assert_eq!(keys, vec![3]);
        manager.shutdown();
    }

    #[test]
    fn batch_flush_caps_writes_per_tick_and_requeues() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..7 {
            write(dir.path(), &format!("s{i}.lua"), COUNTER_SCRIPT);
        }

        let manager = manager(dir.path(), 2);
        manager.boot().unwrap();

        let updates: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        manager.set_key_update_callback(move |key, _| sink.lock().push(key));

        let visible: HashMap<PathBuf, usize> = (0..7)
            .map(|i| (dir.path().join(format!("s{i}.lua")), i + 1))
            .collect();
        manager.set_visible_scripts(visible);

        manager.run_passive_update();
        manager.flush_batch(5);
        assert_eq!(updates.lock().len(), 5, "first flush is capped at 5");

        manager.flush_batch(5);
        assert_eq!(updates.lock().len(), 7, "second flush drains the rest");
        manager.shutdown();
    }

    #[test]
    fn stale_batch_entries_never_reach_hidden_scripts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "s.lua", COUNTER_SCRIPT);

        let manager = manager(dir.path(), 2);
        manager.boot().unwrap();

        let updates: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        manager.set_key_update_callback(move |key, _| sink.lock().push(key));

        manager.set_visible_scripts(HashMap::from([(dir.path().join("s.lua"), 2)]));
        manager.run_passive_update();

        // Page changed before the batch was flushed.
        manager.set_visible_scripts(HashMap::new());
        manager.flush_batch(5);
        assert!(
            updates.lock().is_empty(),
            "no write may target a key outside the visible set"
        );
        manager.shutdown();
    }

    // ========================================================================
    // Refresh coalescing
    // ========================================================================

    #[test]
    fn refresh_requests_coalesce_into_one_callback() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2);

        let refreshes = Arc::new(Mutex::new(0u32));
        let sink = refreshes.clone();
        manager.set_refresh_callback(move || *sink.lock() += 1);

        manager.request_refresh();
        manager.request_refresh();
        manager.request_refresh();

        manager.passive_tick();
        assert_eq!(*refreshes.lock(), 1, "requests must coalesce");

        manager.passive_tick();
        assert_eq!(*refreshes.lock(), 1, "flag is consumed");
    }

    #[test]
    fn scripts_can_request_refresh() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "refresher.lua",
            "function trigger(s) system.refresh() end",
        );

        let manager = manager(dir.path(), 2);
        manager.boot().unwrap();

        let refreshes = Arc::new(Mutex::new(0u32));
        let sink = refreshes.clone();
        manager.set_refresh_callback(move || *sink.lock() += 1);

        manager
            .trigger_script(&dir.path().join("refresher.lua"))
            .unwrap();
        manager.passive_tick();
        assert_eq!(*refreshes.lock(), 1);
        manager.shutdown();
    }

    // ========================================================================
    // Trigger dispatch
    // ========================================================================

    #[test]
    fn trigger_unknown_script_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2);
        let err = manager
            .trigger_script(Path::new("/nope/missing.lua"))
            .unwrap_err();
        assert!(matches!(err, ScriptError::NotLoaded(_)));
    }

    #[test]
    fn trigger_failure_leaves_other_scripts_alone() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.lua", "function trigger(s) error('no') end");
        write(dir.path(), "good.lua", "function trigger(s) s.ok = true end");

        let manager = manager(dir.path(), 2);
        manager.boot().unwrap();

        assert!(manager.trigger_script(&dir.path().join("bad.lua")).is_err());
        assert!(manager.trigger_script(&dir.path().join("good.lua")).is_ok());
        manager.shutdown();
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[test]
    fn shutdown_stops_backgrounds_and_loop_promptly() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "sleeper.lua",
            r#"
            function background(s)
                while true do
                    system.sleep(60000)
                end
            end
            "#,
        );

        let manager = manager(dir.path(), 15);
        manager.boot().unwrap();
        manager.start_passive_loop();
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        manager.shutdown();
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "shutdown must cancel sleeps, not wait them out"
        );
        assert_eq!(manager.runner_count(), 0);
    }

    #[test]
    fn start_passive_loop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 15);
        manager.start_passive_loop();
        manager.start_passive_loop();
        manager.shutdown();
    }
}
