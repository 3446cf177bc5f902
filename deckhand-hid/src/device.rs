//! Device access over HID.
//!
//! All device I/O goes through a single mutex: the HID channel is not safe
//! for concurrent writers, and the image page protocol requires all pages of
//! one key to be written back to back.

use std::ffi::CString;

use hidapi::{HidApi, HidDevice};
use image::{DynamicImage, Rgba, RgbaImage};
use log::debug;
use parking_lot::Mutex;

use crate::error::{DeviceError, Result};
use crate::image::{encode_image, prepare_image, DEFAULT_JPEG_QUALITY};
use crate::models::{lookup_model, Model, VENDOR_ID};

/// Image upload page layout: 1024-byte reports with an 8-byte header.
const PAGE_SIZE: usize = 1024;
const PAGE_HEADER_SIZE: usize = 8;
const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Identity of a connected device, gathered during enumeration.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: CString,
    pub serial: String,
    pub manufacturer: String,
    pub product: String,
    pub firmware: String,
    pub model: Model,
}

/// An opened key-grid device.
pub struct Device {
    hid: Mutex<HidDevice>,
    pub model: Model,
    pub info: DeviceInfo,
    jpeg_quality: u8,
    smooth_resize: bool,
}

/// List connected devices of the supported vendor.
///
/// Devices that cannot be opened for the firmware query are still listed,
/// with the firmware reported as unknown.
pub fn enumerate(api: &HidApi) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    for info in api.device_list() {
        if info.vendor_id() != VENDOR_ID {
            continue;
        }
        let model = lookup_model(info.product_id());
        let firmware = api
            .open_path(info.path())
            .map(|dev| read_firmware_version(&dev))
            .unwrap_or_else(|_| "unknown".to_string());

        devices.push(DeviceInfo {
            path: info.path().to_owned(),
            serial: info.serial_number().unwrap_or("").to_string(),
            manufacturer: info.manufacturer_string().unwrap_or("").to_string(),
            product: info.product_string().unwrap_or("").to_string(),
            firmware,
            model,
        });
    }
    devices
}

/// Read the firmware version feature report (command 0x05).
///
/// The version string starts at offset 6 on current hardware revisions.
fn read_firmware_version(dev: &HidDevice) -> String {
    let mut data = [0u8; 32];
    data[0] = 0x05;
    if dev.get_feature_report(&mut data).is_err() {
        return "unknown".to_string();
    }
    let tail = &data[6..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

impl Device {
    /// Open a device from its enumeration record.
    pub fn open(api: &HidApi, info: &DeviceInfo) -> Result<Self> {
        let hid = api.open_path(&info.path)?;
        debug!(
            "opened {} ({} keys, {} px)",
            info.model.name, info.model.keys, info.model.pixel_size
        );
        Ok(Self {
            hid: Mutex::new(hid),
            model: info.model.clone(),
            info: info.clone(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            smooth_resize: false,
        })
    }

    /// Open the first enumerated device that has key displays.
    pub fn open_first(api: &HidApi) -> Result<Self> {
        let devices = enumerate(api);
        let info = devices
            .iter()
            .find(|d| d.model.pixel_size > 0)
            .ok_or(DeviceError::NoDevice)?;
        Self::open(api, info)
    }

    /// Set the JPEG quality used for key image encoding (clamped to 1-100).
    pub fn set_jpeg_quality(&mut self, quality: u8) {
        self.jpeg_quality = quality.clamp(1, 100);
    }

    /// Enable bilinear resampling instead of nearest-neighbour.
    pub fn set_smooth_resize(&mut self, smooth: bool) {
        self.smooth_resize = smooth;
    }

    /// Set the display brightness, clamped to 0-100 percent.
    pub fn set_brightness(&self, percent: u8) -> Result<()> {
        let mut data = [0u8; 32];
        data[0] = 0x03;
        data[1] = 0x08;
        data[2] = percent.min(100);

        self.hid.lock().send_feature_report(&data)?;
        Ok(())
    }

    /// Reset the device to its factory default display.
    pub fn reset(&self) -> Result<()> {
        let mut data = [0u8; 32];
        data[0] = 0x03;
        data[1] = 0x02;

        self.hid.lock().send_feature_report(&data)?;
        Ok(())
    }

    /// Set the image shown on one key.
    ///
    /// The image is resized to the key display and rotated for the model
    /// before encoding.
    pub fn set_image(&self, key_index: usize, img: &DynamicImage) -> Result<()> {
        self.check_key(key_index)?;
        let data = self.encode_key_image(img)?;
        self.write_key_data(key_index, &data)
    }

    /// Write pre-encoded image bytes to a key, bypassing preparation.
    pub fn set_image_raw(&self, key_index: usize, data: &[u8]) -> Result<()> {
        self.check_key(key_index)?;
        self.write_key_data(key_index, data)
    }

    /// Set a key to a solid color.
    pub fn set_key_color(&self, key_index: usize, color: [u8; 3]) -> Result<()> {
        let size = self.model.pixel_size as u32;
        if size == 0 {
            return Err(DeviceError::NoDisplay);
        }
        let img = RgbaImage::from_pixel(size, size, Rgba([color[0], color[1], color[2], 255]));
        self.set_image(key_index, &DynamicImage::ImageRgba8(img))
    }

    /// Write black to every key. No-op for displayless models.
    pub fn clear(&self) -> Result<()> {
        if self.model.pixel_size == 0 {
            return Ok(());
        }
        // Encode once, write to every key.
        let size = self.model.pixel_size as u32;
        let black = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 255]));
        let data = encode_image(&black, self.model.image_format, self.jpeg_quality)?;
        for key in 0..self.model.keys {
            self.write_key_data(key, &data)?;
        }
        Ok(())
    }

    /// Prepare and encode an image for this device without writing it.
    ///
    /// This is the parallelizable half of a page render; the serial half is
    /// [`Device::write_key_data`].
    pub fn encode_key_image(&self, img: &DynamicImage) -> Result<Vec<u8>> {
        if self.model.pixel_size == 0 {
            return Err(DeviceError::NoDisplay);
        }
        let prepared = prepare_image(img, &self.model, self.smooth_resize);
        encode_image(&prepared, self.model.image_format, self.jpeg_quality)
    }

    /// Write encoded image bytes to a key as a sequence of pages.
    ///
    /// All pages for the key are written in order while the device mutex is
    /// held, so writes to different keys never interleave.
    pub fn write_key_data(&self, key_index: usize, data: &[u8]) -> Result<()> {
        self.check_key(key_index)?;

        let hid = self.hid.lock();
        let total_pages = data.len().div_ceil(PAGE_PAYLOAD_SIZE).max(1);

        for (page, chunk) in data.chunks(PAGE_PAYLOAD_SIZE).enumerate() {
            let mut report = [0u8; PAGE_SIZE];
            report[0] = 0x02; // image report ID
            report[1] = 0x07; // set-image command
            report[2] = key_index as u8;
            report[3] = u8::from(page == total_pages - 1);
            report[4..6].copy_from_slice(&(chunk.len() as u16).to_le_bytes());
            report[6..8].copy_from_slice(&(page as u16).to_le_bytes());
            report[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);

            hid.write(&report).map_err(|source| DeviceError::WritePage {
                key: key_index,
                page,
                source,
            })?;
        }
        Ok(())
    }

    pub(crate) fn hid(&self) -> &Mutex<HidDevice> {
        &self.hid
    }

    fn check_key(&self, key_index: usize) -> Result<()> {
        if key_index >= self.model.keys {
            return Err(DeviceError::KeyOutOfRange {
                key: key_index,
                max: self.model.keys.saturating_sub(1),
            });
        }
        Ok(())
    }
}
