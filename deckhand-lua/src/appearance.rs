//! Key appearance values returned by passive callbacks.

use std::path::Path;

use mlua::prelude::*;

/// How a key should look, as described by a script's `passive` return value.
///
/// Absent fields fall back to a black background, no text, white text color
/// and no image. A resolvable image takes precedence over color and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAppearance {
    pub color: [u8; 3],
    pub text: String,
    pub text_color: [u8; 3],
    /// Absolute path or URL of an image to show, if any.
    pub image: Option<String>,
}

impl Default for KeyAppearance {
    fn default() -> Self {
        Self {
            color: [0, 0, 0],
            text: String::new(),
            text_color: [255, 255, 255],
            image: None,
        }
    }
}

impl KeyAppearance {
    /// Parse a `passive` return table.
    ///
    /// Relative image paths are resolved against `script_dir`; URLs pass
    /// through untouched.
    pub fn from_lua_table(table: &LuaTable, script_dir: &Path) -> LuaResult<Self> {
        let mut appearance = KeyAppearance::default();

        if let Ok(LuaValue::Table(rgb)) = table.get::<LuaValue>("color") {
            appearance.color = parse_rgb(&rgb);
        }

        if let Ok(LuaValue::String(text)) = table.get::<LuaValue>("text") {
            appearance.text = text.to_str()?.to_string();
        }

        if let Ok(LuaValue::Table(rgb)) = table.get::<LuaValue>("text_color") {
            appearance.text_color = parse_rgb(&rgb);
        }

        if let Ok(LuaValue::String(image)) = table.get::<LuaValue>("image") {
            let image = image.to_str()?.to_string();
            appearance.image = Some(resolve_image_source(&image, script_dir));
        }

        Ok(appearance)
    }
}

fn parse_rgb(table: &LuaTable) -> [u8; 3] {
    let mut rgb = [0u8; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        let value: f64 = table.raw_get(i + 1).unwrap_or(0.0);
        *channel = value.clamp(0.0, 255.0) as u8;
    }
    rgb
}

fn resolve_image_source(src: &str, script_dir: &Path) -> String {
    if src.starts_with("http://") || src.starts_with("https://") {
        return src.to_string();
    }
    let path = Path::new(src);
    if path.is_absolute() {
        src.to_string()
    } else {
        script_dir.join(path).display().to_string()
    }
}
