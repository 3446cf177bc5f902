//! Driver library for key-grid control surfaces.
//!
//! This crate covers the hardware-facing half of deckhand:
//!
//! - device discovery and HID I/O ([`Device`], [`enumerate`])
//! - the key image wire protocol (1024-byte pages, JPEG/BMP encoding)
//! - key press polling and event listening ([`KeyEvent`])
//! - folder-based page navigation and rendering ([`Navigator`])
//!
//! All device I/O is serialized through a single internal mutex; image
//! encoding is free-threaded so page renders can encode keys in parallel and
//! write them serially.

mod device;
mod error;
mod image;
mod keys;
mod models;
mod navigation;
mod text;

pub use device::{enumerate, Device, DeviceInfo};
pub use error::{DeviceError, Result};
pub use crate::image::{encode_image, prepare_image, DEFAULT_JPEG_QUALITY};
pub use keys::KeyEvent;
pub use models::{lookup_model, ImageFormat, Model, MODELS, VENDOR_ID};
pub use navigation::{Navigator, Page, PageItem};
pub use text::{create_text_image, truncate_name};
