use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::{loader, preview};
use crate::error::{CacheError, Result};
use crate::scan::is_raw;

/// Decoded RGBA8 pixels ready for upload by the renderer
#[derive(Clone, PartialEq, Eq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8, `width * height * 4` bytes
    pub pixels: Arc<[u8]>,
}

impl Texture {
    pub fn from_image(img: &DynamicImage) -> Self {
        let rgba = img.to_rgba8();
        Self {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw().into(),
        }
    }

    pub fn aspect(&self) -> f32 {
        aspect_of(self.width, self.height)
    }
}

// Pixel buffers are too large to print
impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// A freshly generated thumbnail: texture for the LRU plus the encoded
/// bytes to persist
#[derive(Debug, Clone)]
pub struct GeneratedThumbnail {
    pub texture: Texture,
    /// JPEG bytes written to the disk cache
    pub encoded: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub aspect: f32,
}

/// Produces thumbnails from source files and decodes cached ones.
///
/// Both calls block; the loader runs them on the blocking pool.
pub trait ThumbnailSource: Send + Sync {
    /// Decode `path` and shrink it to fit `max_pixel_size` on the long edge
    fn generate(&self, path: &Path, max_pixel_size: u32) -> Result<GeneratedThumbnail>;

    /// Decode cached bytes, failing unless they are exactly
    /// `expected_width` x `expected_height`
    fn decode(&self, bytes: &[u8], expected_width: u32, expected_height: u32) -> Result<Texture>;
}

/// Default source backed by the `image` crate, with embedded-preview and
/// sensor-decode paths for RAW files
#[derive(Debug, Clone)]
pub struct ImageThumbnailer {
    jpeg_quality: u8,
}

impl Default for ImageThumbnailer {
    fn default() -> Self {
        Self { jpeg_quality: 85 }
    }
}

impl ImageThumbnailer {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    fn open_source(&self, path: &Path, max_pixel_size: u32) -> Result<DynamicImage> {
        if !is_raw(path) {
            return Ok(image::open(path)?);
        }

        // Embedded JPEG first, sensor decode only when there is none
        match preview::extract_embedded_preview(path, max_pixel_size)? {
            Some(img) => Ok(img),
            None => {
                debug!(path = %path.display(), "no embedded preview, decoding sensor data");
                loader::decode_sensor_preview(path)
            }
        }
    }
}

impl ThumbnailSource for ImageThumbnailer {
    fn generate(&self, path: &Path, max_pixel_size: u32) -> Result<GeneratedThumbnail> {
        let max_pixel_size = max_pixel_size.max(1);
        let img = self.open_source(path, max_pixel_size)?;

        // Resize maintaining aspect ratio, never upscale
        let thumbnail = if img.width() > max_pixel_size || img.height() > max_pixel_size {
            img.resize(max_pixel_size, max_pixel_size, FilterType::Triangle)
        } else {
            img
        };

        let rgb = thumbnail.to_rgb8();
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.jpeg_quality).encode_image(&rgb)?;

        let texture = Texture::from_image(&thumbnail);
        let (width, height) = (texture.width, texture.height);

        Ok(GeneratedThumbnail {
            texture,
            encoded,
            width,
            height,
            aspect: aspect_of(width, height),
        })
    }

    fn decode(&self, bytes: &[u8], expected_width: u32, expected_height: u32) -> Result<Texture> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;

        if img.width() != expected_width || img.height() != expected_height {
            return Err(CacheError::DimensionMismatch {
                expected_width,
                expected_height,
                actual_width: img.width(),
                actual_height: img.height(),
            });
        }

        Ok(Texture::from_image(&img))
    }
}

/// Cheap header probe of a file's pixel dimensions.
/// RAW files are not probed; their dimensions are filled in lazily.
pub fn probe_dimensions(path: &Path) -> Option<(u32, u32)> {
    if is_raw(path) {
        return None;
    }
    image::image_dimensions(path).ok()
}

pub fn aspect_of(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, image::Rgb([10, 200, 90]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_generate_fits_long_edge() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_png(temp_dir.path(), "wide.png", 1200, 800);

        let thumb = ImageThumbnailer::default().generate(&path, 256).unwrap();
        assert_eq!((thumb.width, thumb.height), (256, 171));
        assert!((thumb.aspect - 256.0 / 171.0).abs() < 1e-6);
        assert_eq!(thumb.texture.pixels.len(), 256 * 171 * 4);
        assert!(thumb.encoded.starts_with(&[0xFF, 0xD8]));
    }

    #[test]
    fn test_generate_never_upscales() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_png(temp_dir.path(), "tiny.png", 40, 30);

        let thumb = ImageThumbnailer::default().generate(&path, 256).unwrap();
        assert_eq!((thumb.width, thumb.height), (40, 30));
    }

    #[test]
    fn test_decode_verifies_dimensions() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_png(temp_dir.path(), "a.png", 300, 200);
        let source = ImageThumbnailer::default();
        let thumb = source.generate(&path, 150).unwrap();

        let texture = source.decode(&thumb.encoded, thumb.width, thumb.height).unwrap();
        assert_eq!((texture.width, texture.height), (150, 100));

        let mismatch = source.decode(&thumb.encoded, 100, 150);
        assert!(matches!(mismatch, Err(CacheError::DimensionMismatch { .. })));

        assert!(source.decode(b"garbage", 150, 100).is_err());
    }

    #[test]
    fn test_generate_unreadable_source() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();

        assert!(ImageThumbnailer::default().generate(&path, 256).is_err());
    }

    #[test]
    fn test_probe_dimensions() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_png(temp_dir.path(), "p.png", 64, 48);

        assert_eq!(probe_dimensions(&path), Some((64, 48)));
        assert_eq!(probe_dimensions(Path::new("/x/IMG_1.CR2")), None);
    }
}
