//! Folder-based page navigation.
//!
//! The configuration tree under a fixed root is presented as pages of
//! buttons. Column 0 of the key grid is reserved: the top-left key navigates
//! back, the remaining column-0 keys are user toggles. All other keys show
//! the current directory's entries, folders first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;

use image::{DynamicImage, RgbaImage};
use log::warn;

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::models::Model;
use crate::text::{create_text_image, truncate_name};

const LABEL_MAX_LEN: usize = 8;

const COLOR_FOLDER: [u8; 3] = [30, 80, 180];
const COLOR_SCRIPT: [u8; 3] = [30, 130, 80];
const COLOR_BACK: [u8; 3] = [100, 100, 100];
const COLOR_HOME: [u8; 3] = [50, 50, 50];
const COLOR_TOGGLE_ON: [u8; 3] = [0, 150, 0];
const COLOR_TOGGLE_OFF: [u8; 3] = [80, 80, 80];
const WHITE: [u8; 3] = [255, 255, 255];

/// An entry on a page: a folder to enter or a script to trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageItem {
    /// Display name (script names have the `.lua` suffix stripped).
    pub name: String,
    /// Full path of the entry.
    pub path: PathBuf,
    pub is_folder: bool,
    /// Path to the script file, for script entries.
    pub script: Option<PathBuf>,
}

/// One page of the current directory listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub path: PathBuf,
    pub items: Vec<PageItem>,
    pub parent_path: Option<PathBuf>,
    pub page_index: usize,
    pub total_pages: usize,
}

/// Stateful cursor over the configuration tree.
///
/// The key layout is derived from the device model at construction; render
/// operations take the device explicitly so the cursor itself stays pure.
pub struct Navigator {
    root_path: PathBuf,
    current_dir: PathBuf,
    page_index: usize,
    cols: usize,
    rows: usize,
    pixel_size: usize,
    /// Key indices available for content (everything outside column 0).
    content_keys: Vec<usize>,
    /// Reserved key indices (column 0); index 0 is the Back key.
    reserved_keys: Vec<usize>,
    toggle_states: HashMap<usize, bool>,
}

impl Navigator {
    pub fn new(model: &Model, root_path: impl Into<PathBuf>) -> Self {
        let root_path = root_path.into();
        let (reserved_keys, content_keys) = key_layout(model.cols, model.rows);
        Self {
            current_dir: root_path.clone(),
            root_path,
            page_index: 0,
            cols: model.cols,
            rows: model.rows,
            pixel_size: model.pixel_size,
            content_keys,
            reserved_keys,
            toggle_states: HashMap::new(),
        }
    }

    /// Number of keys available for page content.
    pub fn content_key_count(&self) -> usize {
        self.content_keys.len()
    }

    pub fn current_path(&self) -> &Path {
        &self.current_dir
    }

    pub fn is_at_root(&self) -> bool {
        self.current_dir == self.root_path
    }

    fn back_key(&self) -> usize {
        self.reserved_keys.first().copied().unwrap_or(0)
    }

    /// Load the current page, clamping the page index into range.
    pub fn load_page(&mut self) -> Result<Page> {
        let items = list_items(&self.current_dir)?;

        let per_page = self.content_key_count().max(1);
        let total_pages = items.len().div_ceil(per_page).max(1);
        self.page_index = self.page_index.min(total_pages - 1);

        let start = self.page_index * per_page;
        let end = (start + per_page).min(items.len());
        let page_items = items.get(start..end).unwrap_or(&[]).to_vec();

        let parent_path = (!self.is_at_root())
            .then(|| self.current_dir.parent().map(Path::to_path_buf))
            .flatten();

        Ok(Page {
            path: self.current_dir.clone(),
            items: page_items,
            parent_path,
            page_index: self.page_index,
            total_pages,
        })
    }

    /// Enter a subdirectory and reset to its first page.
    pub fn navigate_into(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if !path.is_dir() {
            return Err(DeviceError::NotADirectory(path.display().to_string()));
        }
        self.current_dir = path;
        self.page_index = 0;
        Ok(())
    }

    /// Go to the parent directory. Returns false (and stays put) at the root.
    pub fn navigate_back(&mut self) -> bool {
        if self.is_at_root() {
            return false;
        }
        if let Some(parent) = self.current_dir.parent() {
            self.current_dir = parent.to_path_buf();
        }
        self.page_index = 0;
        true
    }

    /// Return to the root directory.
    pub fn navigate_to_root(&mut self) {
        self.current_dir = self.root_path.clone();
        self.page_index = 0;
    }

    pub fn next_page(&mut self) -> bool {
        match self.load_page() {
            Ok(page) if self.page_index < page.total_pages - 1 => {
                self.page_index += 1;
                true
            }
            _ => false,
        }
    }

    pub fn prev_page(&mut self) -> bool {
        if self.page_index > 0 {
            self.page_index -= 1;
            true
        } else {
            false
        }
    }

    /// Render the current page to the device.
    ///
    /// Every key gets exactly one write: reserved column, then content keys,
    /// then black for unused keys. Images are encoded concurrently; writes go
    /// through the device serially. No clear pass is needed since each key is
    /// overwritten unconditionally.
    pub fn render_page(&mut self, device: &Device) -> Result<()> {
        let page = self.load_page()?;
        let total_keys = self.cols * self.rows;

        let mut images: Vec<Option<RgbaImage>> = vec![None; total_keys];
        for (&key, image) in self.reserved_keys.iter().zip(self.reserved_key_images()) {
            images[key] = Some(image);
        }
        for (i, item) in page.items.iter().enumerate() {
            let Some(&key) = self.content_keys.get(i) else {
                break;
            };
            images[key] = Some(self.item_image(item));
        }

        let black = create_text_image("", [0, 0, 0], WHITE, self.pixel_size);

        // Encode all keys concurrently; HID writes stay serial.
        let mut frames: Vec<Result<Vec<u8>>> = Vec::with_capacity(total_keys);
        thread::scope(|s| {
            let handles: Vec<_> = images
                .iter()
                .map(|img| {
                    let img = img.as_ref().unwrap_or(&black);
                    s.spawn(move || {
                        device.encode_key_image(&DynamicImage::ImageRgba8(img.clone()))
                    })
                })
                .collect();
            frames = handles
                .into_iter()
                .map(|h| h.join().expect("encode worker panicked"))
                .collect();
        });

        for (key, frame) in frames.into_iter().enumerate() {
            device.write_key_data(key, &frame?)?;
        }
        Ok(())
    }

    /// Re-render only the reserved column (after a toggle flip).
    pub fn render_reserved_keys(&self, device: &Device) {
        for (&key, image) in self.reserved_keys.iter().zip(self.reserved_key_images()) {
            if let Err(err) = device.set_image(key, &DynamicImage::ImageRgba8(image)) {
                warn!("render reserved key {key}: {err}");
            }
        }
    }

    fn reserved_key_images(&self) -> Vec<RgbaImage> {
        self.reserved_keys
            .iter()
            .enumerate()
            .map(|(i, &key)| {
                if i == 0 {
                    if self.is_at_root() {
                        create_text_image("HOME", COLOR_HOME, WHITE, self.pixel_size)
                    } else {
                        create_text_image("<-", COLOR_BACK, WHITE, self.pixel_size)
                    }
                } else {
                    let row = key / self.cols.max(1);
                    if self.toggle_state(key) {
                        create_text_image(
                            &format!("T{row}:ON"),
                            COLOR_TOGGLE_ON,
                            WHITE,
                            self.pixel_size,
                        )
                    } else {
                        create_text_image(&format!("T{row}"), COLOR_TOGGLE_OFF, WHITE, self.pixel_size)
                    }
                }
            })
            .collect()
    }

    fn item_image(&self, item: &PageItem) -> RgbaImage {
        let label = truncate_name(&item.name, LABEL_MAX_LEN);
        let bg = if item.is_folder {
            COLOR_FOLDER
        } else {
            COLOR_SCRIPT
        };
        create_text_image(&label, bg, WHITE, self.pixel_size)
    }

    /// Dispatch a key press.
    ///
    /// Returns `(item, navigated)`: `navigated` is true when the visible page
    /// changed and needs re-rendering; a returned item is a script entry the
    /// caller should trigger. Reserved toggles are handled internally and
    /// re-render only the reserved column.
    pub fn handle_key_press(
        &mut self,
        device: &Device,
        key_index: usize,
    ) -> Result<(Option<PageItem>, bool)> {
        let page = self.load_page()?;

        if key_index == self.back_key() {
            return Ok((None, self.navigate_back()));
        }

        if self.reserved_keys.contains(&key_index) {
            let state = self.toggle_state(key_index);
            self.toggle_states.insert(key_index, !state);
            self.render_reserved_keys(device);
            return Ok((None, false));
        }

        if let Some(slot) = self.content_keys.iter().position(|&k| k == key_index) {
            if let Some(item) = page.items.get(slot) {
                if item.is_folder {
                    self.navigate_into(item.path.clone())?;
                    return Ok((None, true));
                }
                return Ok((Some(item.clone()), false));
            }
        }

        Ok((None, false))
    }

    pub fn toggle_state(&self, key_index: usize) -> bool {
        self.toggle_states.get(&key_index).copied().unwrap_or(false)
    }

    pub fn set_toggle_state(&mut self, key_index: usize, state: bool) {
        self.toggle_states.insert(key_index, state);
    }

    /// Scripts on the current page, mapped to their key indices.
    pub fn visible_scripts(&mut self) -> HashMap<PathBuf, usize> {
        let mut result = HashMap::new();
        let Ok(page) = self.load_page() else {
            return result;
        };
        for (i, item) in page.items.iter().enumerate() {
            let Some(&key) = self.content_keys.get(i) else {
                break;
            };
            if let Some(script) = &item.script {
                result.insert(script.clone(), key);
            }
        }
        result
    }
}

/// Partition the key grid into reserved (column 0) and content keys.
fn key_layout(cols: usize, rows: usize) -> (Vec<usize>, Vec<usize>) {
    let mut reserved = Vec::new();
    let mut content = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            let key = row * cols + col;
            if col == 0 {
                reserved.push(key);
            } else {
                content.push(key);
            }
        }
    }
    (reserved, content)
}

/// List a directory as page items: hidden entries skipped, folders first,
/// then lexicographic.
fn list_items(dir: &Path) -> Result<Vec<PageItem>> {
    let entries = std::fs::read_dir(dir).map_err(|source| DeviceError::ReadDir {
        path: dir.display().to_string(),
        source,
    })?;

    let mut items = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        let path = entry.path();
        let is_folder = path.is_dir();

        let mut item = PageItem {
            name,
            path: path.clone(),
            is_folder,
            script: None,
        };
        if !is_folder {
            if let Some(stem) = item.name.strip_suffix(".lua") {
                item.name = stem.to_string();
                item.script = Some(path);
            }
        }
        items.push(item);
    }

    items.sort_by(|a, b| {
        b.is_folder
            .cmp(&a.is_folder)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(items)
}
