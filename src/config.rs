//! Application configuration.
//!
//! Read from `config.json` in the config root. A missing file is created
//! with defaults; an unparseable file is a fatal init error so a typo never
//! silently reverts settings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Display brightness in percent.
    pub brightness: u8,
    /// Rate of the passive update loop.
    pub passive_fps: u32,
    /// JPEG quality for key image encoding (1-100).
    pub jpeg_quality: u8,
    /// Use bilinear resampling for key images instead of nearest-neighbour.
    pub smooth_resize: bool,
    /// Decoded-image cache budget in MiB.
    pub image_cache_mib: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            brightness: 75,
            passive_fps: deckhand_lua::DEFAULT_PASSIVE_FPS,
            jpeg_quality: deckhand_hid::DEFAULT_JPEG_QUALITY,
            smooth_resize: false,
            image_cache_mib: deckhand_lua::DEFAULT_CACHE_BUDGET_MIB,
        }
    }
}

impl Config {
    /// Load the config from `config_dir`, writing defaults if absent.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Config::default();
            config.save(&path)?;
            return Ok(config);
        }

        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Resolve the configuration root: `$DECKHAND_CONFIG_DIR` if set, otherwise
/// `<user config dir>/deckhand`. The directory is created if missing.
pub fn resolve_config_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os("DECKHAND_CONFIG_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::config_dir()
            .context("cannot determine user config directory")?
            .join("deckhand"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.brightness, 75);
        assert_eq!(config.passive_fps, 2);
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"passive_fps": 15}"#).unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.passive_fps, 15);
        assert_eq!(config.jpeg_quality, 90);
    }

    #[test]
    fn invalid_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{nope").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn saved_defaults_reload_identically() {
        let dir = tempfile::tempdir().unwrap();
        let first = Config::load(dir.path()).unwrap();
        let second = Config::load(dir.path()).unwrap();
        assert_eq!(first.brightness, second.brightness);
        assert_eq!(first.image_cache_mib, second.image_cache_mib);
    }
}
