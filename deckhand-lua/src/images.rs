//! Decoded-image cache and loader for script-referenced images.
//!
//! Scripts may point a key at a file or URL; decoding (and fetching) is paid
//! once and the decoded image is kept in an LRU cache bounded by an estimated
//! byte budget.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{Result, ScriptError};

/// Default cache budget in MiB.
pub const DEFAULT_CACHE_BUDGET_MIB: usize = 100;

/// Timeout for fetching an image over HTTP.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

struct CacheInner {
    entries: LruCache<String, Arc<DynamicImage>>,
    used_bytes: usize,
    budget_bytes: usize,
}

/// LRU map from image source (path or URL) to its decoded image.
pub struct ImageCache {
    inner: Mutex<CacheInner>,
}

fn estimate_size(img: &DynamicImage) -> usize {
    img.width() as usize * img.height() as usize * 4
}

impl ImageCache {
    /// Create a cache bounded by `budget_mib` mebibytes of decoded pixels.
    pub fn new(budget_mib: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                used_bytes: 0,
                budget_bytes: budget_mib * 1024 * 1024,
            }),
        }
    }

    /// Fetch a cached image, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<Arc<DynamicImage>> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Insert an image, evicting least-recently-used entries until the new
    /// total fits the byte budget.
    pub fn set(&self, key: &str, img: Arc<DynamicImage>) {
        let size = estimate_size(&img);
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.pop(key) {
            inner.used_bytes -= estimate_size(&old);
        }
        while inner.used_bytes + size > inner.budget_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.used_bytes -= estimate_size(&evicted),
                None => break,
            }
        }

        inner.entries.put(key.to_string(), img);
        inner.used_bytes += size;
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.used_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load an image from a file path or `http(s)://` URL, via the cache.
    ///
    /// Failed fetches or decodes are returned to the caller and never cached.
    pub fn load(&self, source: &str) -> Result<Arc<DynamicImage>> {
        if let Some(img) = self.get(source) {
            return Ok(img);
        }

        let bytes = if source.starts_with("http://") || source.starts_with("https://") {
            fetch_bytes(source)?
        } else {
            std::fs::read(source)?
        };

        let img = Arc::new(decode_image(source, &bytes)?);
        self.set(source, img.clone());
        Ok(img)
    }
}

fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()?;
    let response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(ScriptError::ImageStatus(status.as_u16()));
    }
    Ok(response.bytes()?.to_vec())
}

/// Decode by extension, with format sniffing as the fallback.
fn decode_image(source: &str, bytes: &[u8]) -> Result<DynamicImage> {
    let ext = Path::new(source)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());

    let img = match ext.as_deref() {
        Some("png") => image::load_from_memory_with_format(bytes, image::ImageFormat::Png)?,
        Some("jpg") | Some("jpeg") => {
            image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)?
        }
        Some("gif") => image::load_from_memory_with_format(bytes, image::ImageFormat::Gif)?,
        _ => image::load_from_memory(bytes)?,
    };
    Ok(img)
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;

    use super::*;

    fn img(width: u32, height: u32) -> Arc<DynamicImage> {
        Arc::new(DynamicImage::ImageRgba8(RgbaImage::new(width, height)))
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        DynamicImage::ImageRgba8(RgbaImage::new(width, height))
            .save_with_format(path, image::ImageFormat::Png)
            .unwrap();
    }

    // ========================================================================
    // Cache behavior
    // ========================================================================

    #[test]
    fn get_miss_then_hit() {
        let cache = ImageCache::new(10);
        assert!(cache.get("a").is_none());
        cache.set("a", img(8, 8));
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used_first() {
        // Budget of exactly two 512x512 images (1 MiB each).
        let cache = ImageCache::new(2);
        cache.set("first", img(512, 512));
        cache.set("second", img(512, 512));

        // Touch "first" so "second" becomes the eviction candidate.
        assert!(cache.get("first").is_some());

        cache.set("third", img(512, 512));
        assert!(cache.get("second").is_none());
        assert!(cache.get("first").is_some());
        assert!(cache.get("third").is_some());
    }

    #[test]
    fn replacing_a_key_does_not_double_count() {
        let cache = ImageCache::new(1);
        cache.set("a", img(256, 256)); // 256 KiB
        cache.set("a", img(256, 256));
        cache.set("b", img(256, 256));
        // Both fit: 512 KiB used of 1 MiB.
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = ImageCache::new(10);
        cache.set("a", img(8, 8));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    // ========================================================================
    // Loading
    // ========================================================================

    #[test]
    fn load_decodes_once_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icon.png");
        write_png(&path, 16, 16);

        let cache = ImageCache::new(10);
        let source = path.display().to_string();
        let first = cache.load(&source).unwrap();
        let second = cache.load(&source).unwrap();
        assert!(Arc::ptr_eq(&first, &second), "second load must hit cache");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn load_missing_file_errors_and_caches_nothing() {
        let cache = ImageCache::new(10);
        assert!(cache.load("/nonexistent/icon.png").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn load_undecodable_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.png");
        std::fs::write(&path, b"not an image").unwrap();

        let cache = ImageCache::new(10);
        assert!(cache.load(&path.display().to_string()).is_err());
        assert!(cache.is_empty());
    }
}
