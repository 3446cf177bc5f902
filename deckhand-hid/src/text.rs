//! Text-on-color key images.
//!
//! Key labels use the built-in 7x13 monospace bitmap font, drawn roughly
//! centered on a solid background. Rendering goes through an
//! `embedded-graphics` draw target backed by an RGBA buffer so no font assets
//! are shipped.

use embedded_graphics::mono_font::ascii::FONT_7X13;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;
use image::{Rgba, RgbaImage};

/// Approximate glyph advance of the built-in font, used for centering.
const GLYPH_WIDTH: usize = 7;

/// RGBA buffer adapter for `embedded-graphics` drawing.
struct Canvas<'a> {
    img: &'a mut RgbaImage,
}

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.img.width(), self.img.height())
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = std::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (w, h) = (self.img.width() as i32, self.img.height() as i32);
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 && point.x < w && point.y < h {
                self.img.put_pixel(
                    point.x as u32,
                    point.y as u32,
                    Rgba([color.r(), color.g(), color.b(), 255]),
                );
            }
        }
        Ok(())
    }
}

/// Render `text` centered on a solid `bg` square of `size` pixels.
pub fn create_text_image(text: &str, bg: [u8; 3], fg: [u8; 3], size: usize) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(size as u32, size as u32, Rgba([bg[0], bg[1], bg[2], 255]));

    if !text.is_empty() && size > 0 {
        let text_width = text.chars().count() * GLYPH_WIDTH;
        let x = ((size.saturating_sub(text_width)) / 2).max(2) as i32;
        let y = (size / 2 + 4) as i32; // baseline, roughly vertically centered

        let style = MonoTextStyle::new(&FONT_7X13, Rgb888::new(fg[0], fg[1], fg[2]));
        let mut canvas = Canvas { img: &mut img };
        // Canvas clips out-of-bounds pixels, so drawing cannot fail.
        let _ = Text::new(text, Point::new(x, y), style).draw(&mut canvas);
    }

    img
}

/// Trim a name so it fits on one button, marking truncation with a dot.
pub fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let mut out: String = name.chars().take(max_len.saturating_sub(1)).collect();
    out.push('.');
    out
}
