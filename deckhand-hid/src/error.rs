use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeviceError>;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("key index {key} out of range (0-{max})")]
    KeyOutOfRange { key: usize, max: usize },

    #[error("device has no key displays")]
    NoDisplay,

    #[error("no supported device found")]
    NoDevice,

    #[error("failed to encode key image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("write page {page} for key {key}: {source}")]
    WritePage {
        key: usize,
        page: usize,
        source: hidapi::HidError,
    },

    #[error("hid error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("read dir {path}: {source}")]
    ReadDir {
        path: String,
        source: std::io::Error,
    },

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
