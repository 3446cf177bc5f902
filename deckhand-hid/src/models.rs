//! Device model table.
//!
//! Every supported key-grid model is identified by its USB product ID and
//! carries a fixed key layout, display resolution and image wire format.
//! Unknown product IDs get a placeholder model with `pixel_size == 0`, which
//! the driver treats as displayless.

/// USB vendor ID shared by all supported devices.
pub const VENDOR_ID: u16 = 0x0fd9;

/// Image encoding expected by a device for key image uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Bmp,
    /// Displayless model; image operations are refused.
    None,
}

/// Fixed specification of one device model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub name: &'static str,
    pub product_id: u16,
    pub cols: usize,
    pub rows: usize,
    pub keys: usize,
    /// Square key display dimension in pixels (0 = no display).
    pub pixel_size: usize,
    pub image_format: ImageFormat,
    /// Whether the decoded image must be rotated 180° before encoding.
    pub rotate_180: bool,
}

/// Known models indexed by USB product ID.
pub const MODELS: &[Model] = &[
    Model {
        name: "Deck Original",
        product_id: 0x0060,
        cols: 5,
        rows: 3,
        keys: 15,
        pixel_size: 72,
        image_format: ImageFormat::Bmp,
        rotate_180: true,
    },
    Model {
        name: "Deck Mini",
        product_id: 0x0063,
        cols: 3,
        rows: 2,
        keys: 6,
        pixel_size: 80,
        image_format: ImageFormat::Bmp,
        rotate_180: true,
    },
    Model {
        name: "Deck XL",
        product_id: 0x006c,
        cols: 8,
        rows: 4,
        keys: 32,
        pixel_size: 96,
        image_format: ImageFormat::Jpeg,
        rotate_180: true,
    },
    Model {
        name: "Deck Original V2",
        product_id: 0x006d,
        cols: 5,
        rows: 3,
        keys: 15,
        pixel_size: 72,
        image_format: ImageFormat::Jpeg,
        rotate_180: true,
    },
    Model {
        name: "Deck MK.2",
        product_id: 0x0080,
        cols: 5,
        rows: 3,
        keys: 15,
        pixel_size: 72,
        image_format: ImageFormat::Jpeg,
        rotate_180: true,
    },
    Model {
        name: "Deck XL V2",
        product_id: 0x0084,
        cols: 8,
        rows: 4,
        keys: 32,
        pixel_size: 96,
        image_format: ImageFormat::Jpeg,
        rotate_180: true,
    },
    Model {
        name: "Deck Pedal",
        product_id: 0x0086,
        cols: 3,
        rows: 1,
        keys: 3,
        pixel_size: 0,
        image_format: ImageFormat::None,
        rotate_180: false,
    },
    Model {
        name: "Deck Neo",
        product_id: 0x0090,
        cols: 4,
        rows: 2,
        keys: 8,
        pixel_size: 96,
        image_format: ImageFormat::Jpeg,
        rotate_180: true,
    },
    Model {
        name: "Deck +",
        product_id: 0x009a,
        cols: 4,
        rows: 2,
        keys: 8,
        pixel_size: 120,
        image_format: ImageFormat::Jpeg,
        rotate_180: true,
    },
];

/// Look up the model for a product ID.
///
/// Unknown IDs produce a displayless placeholder so callers can still show
/// identifying information without enabling image operations.
pub fn lookup_model(product_id: u16) -> Model {
    MODELS
        .iter()
        .find(|m| m.product_id == product_id)
        .cloned()
        .unwrap_or(Model {
            name: "Unknown device",
            product_id,
            cols: 0,
            rows: 0,
            keys: 0,
            pixel_size: 0,
            image_format: ImageFormat::None,
            rotate_180: false,
        })
}
