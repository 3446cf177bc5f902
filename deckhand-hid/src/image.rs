//! Key image preparation and wire encoding.
//!
//! Devices expect a square image per key, uploaded as JPEG or as a 24-bit
//! bottom-up BMP depending on the model. Most models additionally require the
//! image to be rotated 180° before encoding.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};

use crate::error::Result;
use crate::models::{ImageFormat, Model};

/// Default JPEG quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Resize and orient an image for one key display.
///
/// Images already at the target size skip the resample pass. Resampling uses
/// nearest-neighbour by default; `smooth` switches to bilinear for callers
/// that prefer quality over per-frame cost.
pub fn prepare_image(src: &DynamicImage, model: &Model, smooth: bool) -> RgbaImage {
    let size = model.pixel_size as u32;
    let rgba = src.to_rgba8();

    let mut prepared = if rgba.width() == size && rgba.height() == size {
        rgba
    } else {
        let filter = if smooth {
            FilterType::Triangle
        } else {
            FilterType::Nearest
        };
        imageops::resize(&rgba, size, size, filter)
    };

    if model.rotate_180 {
        prepared = imageops::rotate180(&prepared);
    }
    prepared
}

/// Encode a prepared image into the device's wire format.
pub fn encode_image(img: &RgbaImage, format: ImageFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
    match format {
        ImageFormat::Bmp => Ok(encode_bmp(img)),
        // JPEG is also the fallback for the placeholder format; callers gate
        // displayless models before reaching this point.
        ImageFormat::Jpeg | ImageFormat::None => encode_jpeg(img, jpeg_quality),
    }
}

fn encode_jpeg(img: &RgbaImage, quality: u8) -> Result<Vec<u8>> {
    let quality = if quality == 0 {
        DEFAULT_JPEG_QUALITY
    } else {
        quality.min(100)
    };
    let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode_image(&rgb)?;
    Ok(out)
}

/// Encode a 24-bit uncompressed BMP, bottom-up, rows padded to 4 bytes.
///
/// Older devices consume this layout directly; the `image` crate's BMP writer
/// is not used because the header fields here are fixed by the hardware.
fn encode_bmp(img: &RgbaImage) -> Vec<u8> {
    let width = img.width() as usize;
    let height = img.height() as usize;

    let row_size = (width * 3).div_ceil(4) * 4;
    let image_size = row_size * height;
    let file_size = 54 + image_size;

    let mut out = Vec::with_capacity(file_size);

    // File header (14 bytes)
    out.extend_from_slice(b"BM");
    write_le32(&mut out, file_size as u32);
    write_le16(&mut out, 0);
    write_le16(&mut out, 0);
    write_le32(&mut out, 54); // offset to pixel data

    // BITMAPINFOHEADER (40 bytes)
    write_le32(&mut out, 40);
    write_le32(&mut out, width as u32);
    write_le32(&mut out, height as u32); // positive height = bottom-up
    write_le16(&mut out, 1); // color planes
    write_le16(&mut out, 24); // bits per pixel
    write_le32(&mut out, 0); // no compression
    write_le32(&mut out, image_size as u32);
    write_le32(&mut out, 2835); // 72 DPI
    write_le32(&mut out, 2835);
    write_le32(&mut out, 0);
    write_le32(&mut out, 0);

    let mut row = vec![0u8; row_size];
    for y in (0..height).rev() {
        for x in 0..width {
            let px = img.get_pixel(x as u32, y as u32);
            row[x * 3] = px[2];
            row[x * 3 + 1] = px[1];
            row[x * 3 + 2] = px[0];
        }
        out.extend_from_slice(&row);
    }

    out
}

fn write_le16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_le32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
