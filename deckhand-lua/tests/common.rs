//! Common test utilities for deckhand-lua integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use deckhand_lua::ScriptManager;

/// Write a script (creating parent directories) and return its path.
pub fn write_script(root: &Path, rel: &str, code: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, code).unwrap();
    path
}

/// A booted manager over `root` with no device attached.
pub fn booted_manager(root: &Path, fps: u32) -> Arc<ScriptManager> {
    let manager = Arc::new(ScriptManager::new(None, root, fps));
    manager.boot().expect("boot failed");
    manager
}
