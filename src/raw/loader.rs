/// RAW sensor data loader
///
/// Last-resort thumbnail source for RAW files with no usable embedded
/// preview. The sensor data is decoded with rawloader and binned 2x2 into a
/// half-resolution RGB image, which is plenty for a thumbnail.

use image::{DynamicImage, RgbImage};
use std::path::Path;
use tracing::debug;

use crate::error::{CacheError, Result};

/// Display gamma applied to linear sensor values
const GAMMA: f32 = 1.0 / 2.2;

/// Decode the sensor data of a RAW file into a half-size RGB image
pub fn decode_sensor_preview(path: &Path) -> Result<DynamicImage> {
    // Verify file exists
    if !path.exists() {
        return Err(CacheError::Raw(format!("File not found: {}", path.display())));
    }

    // Decode the RAW file
    let raw_image = rawloader::decode_file(path).map_err(|e| CacheError::Raw(format!("{:?}", e)))?;

    // Normalize every sample to 0.0-1.0
    let samples: Vec<f32> = match &raw_image.data {
        rawloader::RawImageData::Integer(values) => values.iter().map(|&v| v as f32).collect(),
        rawloader::RawImageData::Float(values) => values.clone(),
    };
    let is_float = matches!(raw_image.data, rawloader::RawImageData::Float(_));

    let levels = |color: usize| -> (f32, f32) {
        if is_float {
            (0.0, 1.0)
        } else {
            let black = raw_image.blacklevels[color] as f32;
            let white = (raw_image.whitelevels[color] as f32).max(black + 1.0);
            (black, white)
        }
    };

    let wb = white_balance(&raw_image.wb_coeffs);

    // crops = [top, right, bottom, left]
    let [top, right, bottom, left] = raw_image.crops;
    let full_width = raw_image.width;
    let active_width = full_width.saturating_sub(left + right);
    let active_height = raw_image.height.saturating_sub(top + bottom);
    let out_width = (active_width / 2) as u32;
    let out_height = (active_height / 2) as u32;

    if out_width == 0 || out_height == 0 {
        return Err(CacheError::Raw(format!("empty sensor area in {}", path.display())));
    }

    let cpp = raw_image.cpp.max(1);
    let mut out = RgbImage::new(out_width, out_height);

    for y in 0..out_height as usize {
        for x in 0..out_width as usize {
            let mut sums = [0.0f32; 3];
            let mut counts = [0u32; 3];

            for dy in 0..2 {
                for dx in 0..2 {
                    let row = top + y * 2 + dy;
                    let col = left + x * 2 + dx;
                    let base = (row * full_width + col) * cpp;

                    if cpp >= 3 {
                        for c in 0..3 {
                            let (black, white) = levels(c);
                            if let Some(&v) = samples.get(base + c) {
                                sums[c] += ((v - black) / (white - black)).clamp(0.0, 1.0);
                                counts[c] += 1;
                            }
                        }
                    } else {
                        // Second green (index 3) counts as green
                        let color = raw_image.cfa.color_at(row, col).min(3);
                        let channel = if color == 3 { 1 } else { color };
                        let (black, white) = levels(color);
                        if let Some(&v) = samples.get(base) {
                            sums[channel] += ((v - black) / (white - black)).clamp(0.0, 1.0);
                            counts[channel] += 1;
                        }
                    }
                }
            }

            let mut pixel = [0u8; 3];
            for c in 0..3 {
                let linear = if counts[c] > 0 {
                    sums[c] / counts[c] as f32 * wb[c]
                } else {
                    0.0
                };
                pixel[c] = (linear.clamp(0.0, 1.0).powf(GAMMA) * 255.0).round() as u8;
            }
            out.put_pixel(x as u32, y as u32, image::Rgb(pixel));
        }
    }

    debug!(
        path = %path.display(),
        sensor_width = raw_image.width,
        sensor_height = raw_image.height,
        "🔥 decoded sensor data for thumbnail"
    );

    Ok(DynamicImage::ImageRgb8(out))
}

/// As-shot white balance normalized so green = 1.0.
/// Missing or invalid coefficients fall back to neutral.
fn white_balance(coeffs: &[f32; 4]) -> [f32; 3] {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if !(valid(coeffs[0]) && valid(coeffs[1]) && valid(coeffs[2])) {
        return [1.0, 1.0, 1.0];
    }

    let g_ref = coeffs[1].max(0.001); // Avoid division by zero
    [coeffs[0] / g_ref, 1.0, coeffs[2] / g_ref]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let result = decode_sensor_preview(Path::new("/nonexistent/path.nef"));
        assert!(matches!(result, Err(CacheError::Raw(_))));
    }

    #[test]
    fn test_not_a_raw_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("fake.nef");
        std::fs::write(&path, b"definitely not sensor data").unwrap();

        assert!(decode_sensor_preview(&path).is_err());
    }

    #[test]
    fn test_white_balance() {
        assert_eq!(white_balance(&[2.0, 1.0, 1.5, f32::NAN]), [2.0, 1.0, 1.5]);
        assert_eq!(white_balance(&[4.0, 2.0, 3.0, 2.0]), [2.0, 1.0, 1.5]);
        assert_eq!(white_balance(&[f32::NAN, 1.0, 1.0, 1.0]), [1.0, 1.0, 1.0]);
    }
}
