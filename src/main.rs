//! deckhand: a Lua-scriptable runtime for key-grid control surfaces.
//!
//! Opens the first attached device with key displays, loads the script tree
//! from the config directory and runs until interrupted. Exits non-zero on
//! init failure (no device, unreadable config), zero on a clean shutdown.

mod app;
mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{bail, Context, Result};
use deckhand_hid::{enumerate, Device};
use hidapi::HidApi;
use log::{error, info};
use nix::libc::c_int;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::app::App;
use crate::config::{resolve_config_dir, Config};

static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_shutdown_signal(_: c_int) {
    if let Some(flag) = SHUTDOWN.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn install_signal_handlers() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    SHUTDOWN
        .set(flag.clone())
        .ok()
        .context("signal handler installed twice")?;

    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action).context("install SIGINT handler")?;
        sigaction(Signal::SIGTERM, &action).context("install SIGTERM handler")?;
    }
    Ok(flag)
}

fn run() -> Result<()> {
    let api = HidApi::new().context("failed to init HID")?;

    info!("scanning for devices...");
    let devices = enumerate(&api);
    if devices.is_empty() {
        bail!("no devices found");
    }
    for (i, dev) in devices.iter().enumerate() {
        info!(
            "device #{}: {} ({}, serial {}, firmware {}, {}x{} keys, {} px)",
            i + 1,
            dev.model.name,
            dev.product,
            dev.serial,
            dev.firmware,
            dev.model.cols,
            dev.model.rows,
            dev.model.pixel_size,
        );
    }

    let info = devices
        .iter()
        .find(|d| d.model.pixel_size > 0)
        .context("no device with key displays found")?;
    info!("opening {}...", info.model.name);

    let config_dir = resolve_config_dir()?;
    let config = Config::load(&config_dir)?;

    let mut device = Device::open(&api, info).context("failed to open device")?;
    device.set_jpeg_quality(config.jpeg_quality);
    device.set_smooth_resize(config.smooth_resize);
    let device = Arc::new(device);

    if let Err(err) = device.set_brightness(config.brightness) {
        log::warn!("set brightness failed: {err}");
    }

    let shutdown = install_signal_handlers()?;

    let app = App::new(device, &config, config_dir)?;
    app.run(shutdown)?;

    info!("exiting...");
    app.shutdown();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        error!("{err:#}");
        std::process::exit(1);
    }
}
