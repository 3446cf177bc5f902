//! Embedded Luau script host and scheduler for deckhand.
//!
//! Every script gets an isolated interpreter with preloaded capability
//! libraries and a shared state table. Three entry points are scheduled per
//! script:
//!
//! - `background(state)` runs as a cooperative coroutine on its own thread;
//!   `system.sleep(ms)` yields the duration to the host, which releases the
//!   script mutex around the wait.
//! - `passive(key_index, state)` runs at the passive-loop cadence under a
//!   non-blocking try-lock, returning a [`KeyAppearance`]. It is skipped,
//!   never queued, while background holds the interpreter.
//! - `trigger(state)` runs on the key-dispatch thread under a blocking lock.
//!
//! The [`ScriptManager`] owns the runners, the visible-script map and the
//! passive loop; the application layer consumes appearances through a
//! callback and turns them into device writes.

mod appearance;
mod cancel;
mod error;
mod host;
mod images;
mod json;
mod manager;
mod modules;
mod runner;

pub use appearance::KeyAppearance;
pub use cancel::{CancelToken, Cancellation};
pub use error::{Result, ScriptError};
pub use images::{ImageCache, DEFAULT_CACHE_BUDGET_MIB};
pub use json::{json_to_lua, lua_to_json};
pub use manager::{KeyUpdateCallback, RefreshCallback, ScriptManager, DEFAULT_PASSIVE_FPS};
pub use runner::{RestartPolicy, ScriptRunner};
