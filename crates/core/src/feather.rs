//! Edge feathering for re-generated patches.
//!
//! A patch returned by the remote service is pasted back over the region
//! it was cut from. To hide the seam, its alpha channel is faded from
//! fully opaque in the interior to fully transparent at the outermost
//! pixel ring, over `radius` pixels, using the Euclidean distance to the
//! border.

use image::{DynamicImage, GrayImage, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::morphology::{distance_transform, erode_ellipse};
use crate::patch::encode_png;

/// Default fade width in pixels.
pub const DEFAULT_FEATHER_RADIUS: u32 = 8;

/// Images at or below this size on either axis get no transparent border.
const MIN_CARVABLE_SIZE: u32 = 2;

/// Tuning for [`feather_image`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatherParams {
    /// Fade width in pixels; `0` keeps the binary border mask.
    pub radius: u32,
    /// Erode the mask by this many pixels before fading.
    pub shrink: u32,
    /// Alpha curve exponent: `< 1` softer, `> 1` harder. Ignored when
    /// unset, non-positive, or exactly `1.0`.
    pub gamma: Option<f32>,
}

impl Default for FeatherParams {
    fn default() -> Self {
        Self {
            radius: DEFAULT_FEATHER_RADIUS,
            shrink: 0,
            gamma: None,
        }
    }
}

impl FeatherParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(g) = self.gamma {
            if !g.is_finite() {
                return Err(CoreError::Validation(format!(
                    "Feather gamma must be a finite number, got {g}"
                )));
            }
        }
        Ok(())
    }

    fn effective_gamma(&self) -> Option<f32> {
        self.gamma.filter(|g| *g > 0.0 && *g != 1.0)
    }
}

/// Binary mask that is `0` on the outermost pixel ring and `255` inside.
///
/// Images of [`MIN_CARVABLE_SIZE`] pixels or fewer on either axis are
/// left entirely opaque.
pub fn border_mask(width: u32, height: u32) -> GrayImage {
    if width <= MIN_CARVABLE_SIZE || height <= MIN_CARVABLE_SIZE {
        return GrayImage::from_pixel(width, height, Luma([255]));
    }
    GrayImage::from_fn(width, height, |x, y| {
        let edge = x == 0 || y == 0 || x == width - 1 || y == height - 1;
        Luma([if edge { 0 } else { 255 }])
    })
}

/// Computed feather alpha in `0.0..=1.0`, row-major, before it is
/// combined with any alpha the image already has.
pub fn feather_alpha(width: u32, height: u32, params: &FeatherParams) -> Vec<f32> {
    let mut mask = border_mask(width, height);
    if params.shrink > 0 {
        mask = erode_ellipse(&mask, params.shrink);
    }

    let mut alpha: Vec<f32> = if params.radius > 0 {
        let radius = f64::from(params.radius);
        distance_transform(&mask)
            .into_iter()
            .map(|d| (d / radius).clamp(0.0, 1.0) as f32)
            .collect()
    } else {
        mask.pixels()
            .map(|p| if p[0] > 0 { 1.0 } else { 0.0 })
            .collect()
    };

    if let Some(gamma) = params.effective_gamma() {
        alpha.iter_mut().for_each(|a| *a = a.powf(gamma));
    }
    alpha
}

/// Feather an image of any color type into RGBA.
///
/// Color channels are carried over unchanged; the output alpha is the
/// product of the computed feather alpha and the source alpha (opaque if
/// the source has none).
pub fn feather_image(image: &DynamicImage, params: &FeatherParams) -> Result<RgbaImage, CoreError> {
    params.validate()?;
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(CoreError::Validation("Cannot feather an empty image".into()));
    }

    let alpha = feather_alpha(width, height, params);
    let mut out = image.to_rgba8();
    for (px, a) in out.pixels_mut().zip(alpha) {
        let existing = f32::from(px[3]) / 255.0;
        let combined = (a * existing).clamp(0.0, 1.0);
        px[3] = (combined * 255.0 + 0.5) as u8;
    }
    Ok(out)
}

/// Decode `bytes`, feather, and re-encode as PNG.
pub fn feather_bytes(bytes: &[u8], params: &FeatherParams) -> Result<Vec<u8>, CoreError> {
    let image = image::load_from_memory(bytes).map_err(CoreError::Decode)?;
    let feathered = feather_image(&image, params)?;
    encode_png(&DynamicImage::ImageRgba8(feathered))
}
