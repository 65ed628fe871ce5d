/// Embedded preview extraction from RAW files
///
/// Most RAW containers carry one or more baseline JPEGs (a tiny EXIF
/// thumbnail, a screen-sized preview, sometimes a full-size render).
/// Decoding one of those is far cheaper than demosaicing the sensor data.
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// A JPEG stream found inside a RAW container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmbeddedJpeg {
    start: usize,
    /// One past the EOI marker
    end: usize,
    width: u32,
    height: u32,
}

impl EmbeddedJpeg {
    fn long_edge(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Extract the embedded preview best suited to a thumbnail of `min_edge`
/// pixels: the smallest one whose long edge reaches `min_edge`, otherwise
/// the largest one available.
///
/// Returns `Ok(None)` when the file holds no decodable JPEG.
pub fn extract_embedded_preview(raw_path: &Path, min_edge: u32) -> Result<Option<DynamicImage>> {
    let data = fs::read(raw_path)?;

    let mut candidates = find_embedded_jpegs(&data);
    candidates.sort_by_key(|c| c.long_edge());

    // Preferred first, then everything else from largest down
    let preferred = candidates.iter().position(|c| c.long_edge() >= min_edge);
    let order: Vec<EmbeddedJpeg> = match preferred {
        Some(i) => std::iter::once(candidates[i])
            .chain(candidates.iter().rev().filter(|c| **c != candidates[i]).copied())
            .collect(),
        None => candidates.iter().rev().copied().collect(),
    };

    for jpeg in order {
        match image::load_from_memory_with_format(&data[jpeg.start..jpeg.end], ImageFormat::Jpeg) {
            Ok(img) => {
                debug!(
                    path = %raw_path.display(),
                    width = jpeg.width,
                    height = jpeg.height,
                    bytes = jpeg.end - jpeg.start,
                    "📦 using embedded preview"
                );
                return Ok(Some(img));
            }
            Err(e) => {
                debug!(path = %raw_path.display(), offset = jpeg.start, error = %e, "embedded JPEG did not decode");
            }
        }
    }

    Ok(None)
}

/// Scan for every well-formed JPEG stream in `data`
fn find_embedded_jpegs(data: &[u8]) -> Vec<EmbeddedJpeg> {
    let jpeg_start = b"\xff\xd8\xff"; // JPEG Start Of Image (SOI)

    let mut found = Vec::new();
    let mut pos = 0;
    while pos + 3 <= data.len() {
        if data[pos..].starts_with(jpeg_start) {
            if let Some(jpeg) = parse_jpeg(data, pos) {
                found.push(jpeg);
                pos = jpeg.end;
                continue;
            }
        }
        pos += 1;
    }
    found
}

/// Walk the marker segments of the JPEG starting at `start`.
///
/// Segments are skipped by their length field, so an EXIF thumbnail nested
/// inside APP1 does not end the outer stream early.
fn parse_jpeg(data: &[u8], start: usize) -> Option<EmbeddedJpeg> {
    let mut pos = start + 2;
    let mut dims = None;

    loop {
        // Markers may be preceded by fill bytes
        while *data.get(pos)? == 0xFF && *data.get(pos + 1)? == 0xFF {
            pos += 1;
        }
        if *data.get(pos)? != 0xFF {
            return None;
        }
        let marker = *data.get(pos + 1)?;
        pos += 2;

        match marker {
            // Standalone markers
            0x01 | 0xD0..=0xD7 => continue,
            0xD9 => return None,
            _ => {}
        }

        let length = u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize;
        if length < 2 {
            return None;
        }
        let segment = data.get(pos + 2..pos + length)?;

        // SOF0-SOF15, excluding DHT (C4), JPG (C8) and DAC (CC)
        if matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) && segment.len() >= 5 {
            let height = u16::from_be_bytes([segment[1], segment[2]]) as u32;
            let width = u16::from_be_bytes([segment[3], segment[4]]) as u32;
            dims = Some((width, height));
        }

        pos += length;

        if marker == 0xDA {
            let end = scan_entropy_data(data, pos)?;
            let (width, height) = dims?;
            if width == 0 || height == 0 {
                return None;
            }
            return Some(EmbeddedJpeg {
                start,
                end,
                width,
                height,
            });
        }
    }
}

/// Find the end of entropy-coded data, returning the offset past EOI.
/// Progressive files have several scans; their SOS segments are skipped.
fn scan_entropy_data(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let offset = data.get(pos..)?.iter().position(|&b| b == 0xFF)?;
        pos += offset;
        let next = *data.get(pos + 1)?;
        match next {
            // Stuffed byte or restart marker
            0x00 | 0xD0..=0xD7 | 0xFF => pos += 1,
            0xD9 => return Some(pos + 2),
            _ => {
                // Another segment between scans (DHT, SOS, ...)
                let length = u16::from_be_bytes([*data.get(pos + 2)?, *data.get(pos + 3)?]) as usize;
                pos += 2 + length;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::RgbImage;
    use tempfile::TempDir;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 80).encode_image(&img).unwrap();
        out
    }

    /// A fake RAW container: header bytes, two previews, trailing "sensor data"
    fn fake_raw(previews: &[Vec<u8>]) -> Vec<u8> {
        let mut data = b"II*\0fake-tiff-header".to_vec();
        for p in previews {
            data.extend_from_slice(&[0u8; 64]);
            data.extend_from_slice(p);
        }
        data.extend(std::iter::repeat(0x5A).take(4096));
        data
    }

    #[test]
    fn test_finds_all_embedded_jpegs() {
        let data = fake_raw(&[jpeg(160, 120), jpeg(640, 427)]);
        let found = find_embedded_jpegs(&data);

        assert_eq!(found.len(), 2);
        assert_eq!((found[0].width, found[0].height), (160, 120));
        assert_eq!((found[1].width, found[1].height), (640, 427));
    }

    #[test]
    fn test_prefers_smallest_sufficient_preview() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("IMG_0001.CR2");
        fs::write(&path, fake_raw(&[jpeg(1200, 800), jpeg(160, 120), jpeg(400, 300)])).unwrap();

        let img = extract_embedded_preview(&path, 256).unwrap().unwrap();
        assert_eq!((img.width(), img.height()), (400, 300));

        // Nothing is big enough: take the largest
        let img = extract_embedded_preview(&path, 4000).unwrap().unwrap();
        assert_eq!((img.width(), img.height()), (1200, 800));
    }

    #[test]
    fn test_no_preview() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.nef");
        fs::write(&path, b"\xff\xd8\xff\xe0 truncated").unwrap();

        assert!(extract_embedded_preview(&path, 256).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(extract_embedded_preview(Path::new("/nonexistent/path.nef"), 256).is_err());
    }
}
