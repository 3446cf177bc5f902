//! Application wiring: device, navigator and script manager.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use deckhand_hid::{create_text_image, Device, KeyEvent, Navigator};
use deckhand_lua::{ImageCache, KeyAppearance, ScriptManager};
use log::{info, warn};
use parking_lot::Mutex;

use crate::config::Config;

pub struct App {
    device: Arc<Device>,
    manager: Arc<ScriptManager>,
    nav: Arc<Mutex<Navigator>>,
    config_dir: PathBuf,
}

impl App {
    /// Boot the script manager, wire callbacks and start the passive loop.
    pub fn new(device: Arc<Device>, config: &Config, config_dir: PathBuf) -> Result<Self> {
        info!("config directory: {}", config_dir.display());

        let manager = Arc::new(ScriptManager::new(
            Some(device.clone()),
            &config_dir,
            config.passive_fps,
        ));
        let nav = Arc::new(Mutex::new(Navigator::new(&device.model, &config_dir)));
        let cache = Arc::new(ImageCache::new(config.image_cache_mib));

        // Passive appearances become device writes: image if it resolves,
        // otherwise text-on-color, otherwise a plain color fill.
        {
            let device = device.clone();
            manager.set_key_update_callback(move |key_index, appearance| {
                apply_appearance(&device, &cache, key_index, appearance);
            });
        }

        // Script-requested refreshes re-render the current page. Runs on the
        // passive-loop thread, coalesced to at most once per tick.
        {
            let device = device.clone();
            let nav = nav.clone();
            let manager_ref = Arc::downgrade(&manager);
            manager.set_refresh_callback(move || {
                let Some(manager) = manager_ref.upgrade() else {
                    return;
                };
                manager.set_visible_scripts(HashMap::new());
                let mut nav = nav.lock();
                if let Err(err) = nav.render_page(&device) {
                    warn!("refresh render failed: {err}");
                }
                manager.set_visible_scripts(nav.visible_scripts());
            });
        }

        info!("booting script manager");
        manager.boot().context("script boot failed")?;
        manager.start_passive_loop();

        Ok(Self {
            device,
            manager,
            nav,
            config_dir,
        })
    }

    /// Render the initial page and process key events until shutdown.
    pub fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        self.manager.set_visible_scripts(HashMap::new());
        {
            let mut nav = self.nav.lock();
            if let Err(err) = nav.render_page(&self.device) {
                warn!("initial render failed: {err}");
            }
            if let Ok(page) = nav.load_page() {
                info!(
                    "current: {} ({} items, page {}/{})",
                    page.path.display(),
                    page.items.len(),
                    page.page_index + 1,
                    page.total_pages
                );
            }
            self.manager.set_visible_scripts(nav.visible_scripts());
        }
        info!("navigation ready (ctrl-c to exit)");

        let (events_tx, events_rx) = crossbeam_channel::bounded::<KeyEvent>(16);
        let listener = self.device.listen_keys(shutdown, events_tx);

        // The listener drops its sender on shutdown, ending this loop.
        while let Ok(event) = events_rx.recv() {
            if !event.pressed {
                continue;
            }
            if let Err(err) = self.handle_key_press(event.key) {
                warn!("key {} press failed: {err}", event.key);
            }
        }

        let _ = listener.join();
        Ok(())
    }

    fn handle_key_press(&self, key_index: usize) -> Result<()> {
        let (item, navigated) = {
            let mut nav = self.nav.lock();
            nav.handle_key_press(&self.device, key_index)?
        };

        if navigated {
            // Clear the visible set before rendering so no passive write can
            // target a key of the page we are leaving.
            self.manager.set_visible_scripts(HashMap::new());
            let mut nav = self.nav.lock();
            if let Err(err) = nav.render_page(&self.device) {
                warn!("render failed: {err}");
            }
            self.manager.set_visible_scripts(nav.visible_scripts());

            if let Ok(page) = nav.load_page() {
                let shown = page
                    .path
                    .strip_prefix(&self.config_dir)
                    .map(|rel| format!("/{}", rel.display()))
                    .unwrap_or_else(|_| page.path.display().to_string());
                info!("navigated to {} ({} items)", shown, page.items.len());
            }
        } else if let Some(item) = item {
            if let Some(script) = &item.script {
                info!("action triggered: {}", item.name);
                if let Err(err) = self.manager.trigger_script(script) {
                    warn!("script error: {err}");
                }
                // The trigger may have drawn over the page; restore it.
                let mut nav = self.nav.lock();
                if let Err(err) = nav.render_page(&self.device) {
                    warn!("render failed: {err}");
                }
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}

/// Turn one appearance into a device write.
fn apply_appearance(
    device: &Device,
    cache: &ImageCache,
    key_index: usize,
    appearance: &KeyAppearance,
) {
    if let Some(source) = &appearance.image {
        match cache.load(source) {
            Ok(img) => {
                if let Err(err) = device.set_image(key_index, &img) {
                    warn!("image write for key {key_index} failed: {err}");
                }
                return;
            }
            // Fall through to the color/text path.
            Err(err) => warn!("image load failed: {err}"),
        }
    }

    if appearance.text.is_empty() {
        if let Err(err) = device.set_key_color(key_index, appearance.color) {
            warn!("color write for key {key_index} failed: {err}");
        }
    } else {
        let img = create_text_image(
            &appearance.text,
            appearance.color,
            appearance.text_color,
            device.pixel_size(),
        );
        if let Err(err) = device.set_image(key_index, &image::DynamicImage::ImageRgba8(img)) {
            warn!("text write for key {key_index} failed: {err}");
        }
    }
}
