//! Key state polling and event listening.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use log::warn;

use crate::device::Device;
use crate::error::Result;

/// Poll interval of the key listener (~100 Hz).
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Offset of key states inside an input report on current hardware.
const KEY_STATE_OFFSET: usize = 4;

/// A key press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: usize,
    pub pressed: bool,
}

impl Device {
    /// Poll one input report and return the pressed state of every key.
    ///
    /// A timeout with no data is not an error: it returns all keys
    /// unpressed.
    pub fn read_keys(&self) -> Result<Vec<bool>> {
        let mut buf = [0u8; 512];
        let n = self.hid().lock().read_timeout(&mut buf, 100)?;

        let mut keys = vec![false; self.model.keys];
        if n == 0 {
            return Ok(keys);
        }
        for (i, key) in keys.iter_mut().enumerate() {
            if KEY_STATE_OFFSET + i < n {
                *key = buf[KEY_STATE_OFFSET + i] != 0;
            }
        }
        Ok(keys)
    }

    /// Block until a key is newly pressed, or `stop` is raised.
    ///
    /// Returns `None` when stopped.
    pub fn wait_for_key_press(&self, stop: &AtomicBool) -> Result<Option<usize>> {
        let mut prev = vec![false; self.model.keys];
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let keys = self.read_keys()?;
            for (i, (&now, &was)) in keys.iter().zip(prev.iter()).enumerate() {
                if now && !was {
                    return Ok(Some(i));
                }
            }
            prev = keys;
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Start a background poll loop emitting edge-triggered key events.
    ///
    /// The loop runs until `stop` is raised or the receiving side hangs up;
    /// read errors are logged and the poll continues.
    pub fn listen_keys(
        self: &Arc<Self>,
        stop: Arc<AtomicBool>,
        events: Sender<KeyEvent>,
    ) -> JoinHandle<()> {
        let device = self.clone();
        thread::Builder::new()
            .name("key-listener".to_string())
            .spawn(move || {
                let mut prev = vec![false; device.model.keys];
                while !stop.load(Ordering::Relaxed) {
                    let keys = match device.read_keys() {
                        Ok(keys) => keys,
                        Err(err) => {
                            warn!("key poll failed: {err}");
                            thread::sleep(POLL_INTERVAL);
                            continue;
                        }
                    };

                    for (i, (&now, &was)) in keys.iter().zip(prev.iter()).enumerate() {
                        if now != was
                            && events.send(KeyEvent { key: i, pressed: now }).is_err()
                        {
                            return;
                        }
                    }
                    prev = keys;
                    thread::sleep(POLL_INTERVAL);
                }
            })
            .expect("spawn key listener thread")
    }

    /// Convert a key index to `(col, row)` coordinates.
    pub fn key_to_coord(&self, key_index: usize) -> (usize, usize) {
        if self.model.cols == 0 {
            return (0, 0);
        }
        (key_index % self.model.cols, key_index / self.model.cols)
    }

    /// Convert `(col, row)` coordinates to a key index.
    pub fn coord_to_key(&self, col: usize, row: usize) -> usize {
        row * self.model.cols + col
    }

    pub fn cols(&self) -> usize {
        self.model.cols
    }

    pub fn rows(&self) -> usize {
        self.model.rows
    }

    pub fn keys(&self) -> usize {
        self.model.keys
    }

    pub fn pixel_size(&self) -> usize {
        self.model.pixel_size
    }
}
