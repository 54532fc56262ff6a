//! Axis-aligned patch extraction.
//!
//! Each region of a [`RegionConfig`] is mapped to pixel space, reduced to
//! its axis-aligned bounding box, clamped to the image, and cropped. The
//! crop is PNG-encoded so any alpha channel survives the round trip to
//! the remote service.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat};
use serde::Serialize;

use crate::error::CoreError;
use crate::region::{to_pixel, CoordOrigin, Region, RegionConfig, MIN_REGION_POINTS};
use crate::types::PartKey;

/// Pixel-space box, half-open: `[x_min, x_max) × [y_min, y_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> u32 {
        self.y_max - self.y_min
    }
}

/// One cropped region ready to be sent to the remote service.
#[derive(Debug, Clone)]
pub struct Patch {
    /// The region's index in the config, as a string.
    pub part_id: PartKey,
    pub prompt: String,
    pub bbox: BoundingBox,
    /// PNG-encoded crop.
    pub png: Vec<u8>,
}

/// Compute the clamped bounding box of a region.
///
/// Returns `None` for regions with fewer than [`MIN_REGION_POINTS`]
/// points, or whose box is empty once clamped to `[0,W]×[0,H]`.
pub fn region_bounds(
    region: &Region,
    width: u32,
    height: u32,
    origin: CoordOrigin,
) -> Option<BoundingBox> {
    if region.points.len() < MIN_REGION_POINTS {
        return None;
    }

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in &region.points {
        let px = to_pixel(*p, width, height, origin);
        min_x = min_x.min(px.x);
        min_y = min_y.min(px.y);
        max_x = max_x.max(px.x);
        max_y = max_y.max(px.y);
    }

    // `as i64` saturates, so infinities from NaN-only input clamp safely.
    let x_min = (min_x.floor() as i64).max(0);
    let y_min = (min_y.floor() as i64).max(0);
    let x_max = (max_x.ceil() as i64).min(i64::from(width));
    let y_max = (max_y.ceil() as i64).min(i64::from(height));

    if x_max <= x_min || y_max <= y_min {
        return None;
    }

    // All four values are now within 0..=u32::MAX.
    Some(BoundingBox {
        x_min: x_min as u32,
        y_min: y_min as u32,
        x_max: x_max as u32,
        y_max: y_max as u32,
    })
}

/// Extract one PNG patch per usable region, in config order.
///
/// Degenerate regions are skipped, so the result may be shorter than
/// `config.differences`; part ids keep the original indices.
pub fn extract_patches(
    image: &DynamicImage,
    config: &RegionConfig,
    origin: CoordOrigin,
) -> Result<Vec<Patch>, CoreError> {
    let (width, height) = (image.width(), image.height());
    let mut patches = Vec::with_capacity(config.differences.len());

    for (idx, region) in config.differences.iter().enumerate() {
        let Some(bbox) = region_bounds(region, width, height, origin) else {
            continue;
        };

        let crop = image.crop_imm(bbox.x_min, bbox.y_min, bbox.width(), bbox.height());
        patches.push(Patch {
            part_id: idx.to_string(),
            prompt: region.text.clone(),
            bbox,
            png: encode_png(&crop)?,
        });
    }

    Ok(patches)
}

/// Load the image and region config from disk, then extract patches.
pub fn extract_patches_from_paths(
    image_path: &Path,
    config_path: &Path,
    origin: CoordOrigin,
) -> Result<Vec<Patch>, CoreError> {
    let image = load_image(image_path)?;
    let config = RegionConfig::load(config_path)?;
    extract_patches(&image, &config, origin)
}

/// Decode an image file, keeping its native color type.
pub fn load_image(path: &Path) -> Result<DynamicImage, CoreError> {
    let bytes = std::fs::read(path).map_err(|e| CoreError::io(path, e))?;
    image::load_from_memory(&bytes).map_err(CoreError::Decode)
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(CoreError::Encode)?;
    Ok(buf)
}

/// Make encoded image bytes match the format named by `path`'s
/// extension.
///
/// Bytes already in that format pass through untouched, as do paths
/// whose extension is not a writable image format. Anything else is
/// decoded and re-encoded; JPEG output drops alpha.
pub fn encode_for_path(bytes: Vec<u8>, path: &Path) -> Result<Vec<u8>, CoreError> {
    let Some(target) = ImageFormat::from_path(path)
        .ok()
        .filter(|f| f.writing_enabled())
    else {
        return Ok(bytes);
    };
    if image::guess_format(&bytes).ok() == Some(target) {
        return Ok(bytes);
    }

    let decoded = image::load_from_memory(&bytes).map_err(CoreError::Decode)?;
    let decoded = match target {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(decoded.to_rgb8()),
        ImageFormat::WebP => DynamicImage::ImageRgba8(decoded.to_rgba8()),
        _ => decoded,
    };
    let mut buf = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut buf), target)
        .map_err(CoreError::Encode)?;
    Ok(buf)
}
