use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScriptError>;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to load script {path}: {source}")]
    Load { path: PathBuf, source: mlua::Error },

    #[error("script not loaded: {0}")]
    NotLoaded(PathBuf),

    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("failed to fetch image: {0}")]
    ImageFetch(#[from] reqwest::Error),

    #[error("HTTP {0} fetching image")]
    ImageStatus(u16),

    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("failed to scan config directory {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
