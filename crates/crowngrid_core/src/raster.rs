//! Raster I/O and the pixel-space operations behind normalization and
//! synthesis.
//!
//! # Responsibility
//! - Read and write RGB rasters on disk.
//! - Downscale crops to the canonical size through pyramid halving.
//! - Blend two same-sized rasters for level synthesis.
//!
//! # Invariants
//! - All pixel math happens on 8-bit RGB buffers.
//! - Pyramid halving only runs while both dimensions stay above twice the
//!   target, so the final resampling step never jumps more than 2x.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{ImageReader, Rgb, RgbImage};

/// Raster I/O or geometry failure.
#[derive(Debug)]
pub enum RasterError {
    Read {
        path: PathBuf,
        source: image::ImageError,
    },
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    DimensionMismatch {
        left: (u32, u32),
        right: (u32, u32),
    },
}

impl fmt::Display for RasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterError::Read { path, source } => {
                write!(f, "failed to read raster {}: {source}", path.display())
            }
            RasterError::Write { path, source } => {
                write!(f, "failed to write raster {}: {source}", path.display())
            }
            RasterError::CreateDir { path, source } => {
                write!(f, "failed to create directory {}: {source}", path.display())
            }
            RasterError::DimensionMismatch { left, right } => write!(
                f,
                "raster dimensions differ: {}x{} vs {}x{}",
                left.0, left.1, right.0, right.1
            ),
        }
    }
}

impl Error for RasterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RasterError::Read { source, .. } => Some(source),
            RasterError::Write { source, .. } => Some(source),
            RasterError::CreateDir { source, .. } => Some(source),
            RasterError::DimensionMismatch { .. } => None,
        }
    }
}

/// Decodes a raster into 8-bit RGB.
pub fn read_rgb(path: &Path) -> Result<RgbImage, RasterError> {
    let reader = ImageReader::open(path).map_err(|err| RasterError::Read {
        path: path.to_path_buf(),
        source: image::ImageError::IoError(err),
    })?;
    let decoded = reader.decode().map_err(|err| RasterError::Read {
        path: path.to_path_buf(),
        source: err,
    })?;
    Ok(decoded.to_rgb8())
}

/// Writes a raster as PNG, creating parent directories as needed.
pub fn write_png(path: &Path, image: &RgbImage) -> Result<(), RasterError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| RasterError::CreateDir {
            path: parent.to_path_buf(),
            source: err,
        })?;
    }
    image.save(path).map_err(|err| RasterError::Write {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Rescales a crop to the canonical `(width, height)`.
///
/// While both dimensions exceed twice the target, the image is halved step
/// by step; each halving averages 2x2 neighborhoods, which keeps texture
/// from aliasing the way a single large resize would. One final triangle
/// resize lands on the exact target.
pub fn normalize_size(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let mut current = image.clone();
    while current.width() > width.saturating_mul(2) && current.height() > height.saturating_mul(2)
    {
        let (w, h) = current.dimensions();
        current = imageops::resize(&current, (w / 2).max(1), (h / 2).max(1), FilterType::Triangle);
    }

    if current.dimensions() == (width, height) {
        return current;
    }
    imageops::resize(&current, width, height, FilterType::Triangle)
}

/// Per-pixel linear blend: `alpha = 0` returns `low`, `alpha = 1` returns
/// `high`. `alpha` is clamped to `[0, 1]`.
pub fn blend(low: &RgbImage, high: &RgbImage, alpha: f64) -> Result<RgbImage, RasterError> {
    if low.dimensions() != high.dimensions() {
        return Err(RasterError::DimensionMismatch {
            left: low.dimensions(),
            right: high.dimensions(),
        });
    }

    let alpha = alpha.clamp(0.0, 1.0);
    let (width, height) = low.dimensions();
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let a = low.get_pixel(x, y);
        let b = high.get_pixel(x, y);
        Rgb([
            blend_channel(a[0], b[0], alpha),
            blend_channel(a[1], b[1], alpha),
            blend_channel(a[2], b[2], alpha),
        ])
    }))
}

fn blend_channel(low: u8, high: u8, alpha: f64) -> u8 {
    (f64::from(low) * (1.0 - alpha) + f64::from(high) * alpha).round() as u8
}

/// Mean and population standard deviation of the grayscale projection.
pub fn gray_stats(image: &RgbImage) -> (f64, f64) {
    let gray = imageops::grayscale(image);
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return (0.0, 0.0);
    }

    let count = pixels.len() as f64;
    let mean = pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / count;
    let variance = pixels
        .iter()
        .map(|&p| {
            let d = f64::from(p) - mean;
            d * d
        })
        .sum::<f64>()
        / count;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn normalize_reaches_exact_target() {
        let img = solid(1000, 800, 120);
        let out = normalize_size(&img, 128, 128);
        assert_eq!(out.dimensions(), (128, 128));
    }

    #[test]
    fn normalize_upscales_small_inputs() {
        let img = solid(30, 20, 10);
        let out = normalize_size(&img, 128, 128);
        assert_eq!(out.dimensions(), (128, 128));
    }

    #[test]
    fn normalize_is_identity_at_target_size() {
        let img = solid(128, 128, 77);
        let out = normalize_size(&img, 128, 128);
        assert_eq!(out, img);
    }

    #[test]
    fn blend_midpoint_averages_channels() {
        let low = solid(4, 4, 10);
        let high = solid(4, 4, 30);
        let out = blend(&low, &high, 0.5).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([20, 20, 20]));
    }

    #[test]
    fn blend_endpoints_return_inputs() {
        let low = solid(4, 4, 10);
        let high = solid(4, 4, 30);
        assert_eq!(blend(&low, &high, 0.0).unwrap(), low);
        assert_eq!(blend(&low, &high, 1.0).unwrap(), high);
    }

    #[test]
    fn blend_clamps_alpha() {
        let low = solid(2, 2, 10);
        let high = solid(2, 2, 30);
        assert_eq!(blend(&low, &high, -0.4).unwrap(), low);
        assert_eq!(blend(&low, &high, 1.7).unwrap(), high);
    }

    #[test]
    fn blend_rejects_mismatched_dimensions() {
        let low = solid(4, 4, 10);
        let high = solid(4, 5, 30);
        assert!(matches!(
            blend(&low, &high, 0.5),
            Err(RasterError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn gray_stats_of_flat_image() {
        let img = solid(8, 8, 100);
        let (mean, std) = gray_stats(&img);
        assert_eq!(mean, 100.0);
        assert_eq!(std, 0.0);
    }
}
