//! Binary morphology on single-channel masks.
//!
//! Masks are [`GrayImage`]s where `0` is background and any non-zero
//! value is foreground. Erosion and the distance transform are
//! delegated to `imageproc`.

use image::{GrayImage, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use imageproc::morphology::{grayscale_erode, Mask};

/// Largest erosion radius; `imageproc` masks are at most 511 pixels wide.
pub const MAX_ERODE_RADIUS: u32 = 255;

/// Offsets `(dx, dy)` covered by an elliptical structuring element of
/// the given radius (a `(2r+1) × (2r+1)` ellipse, centre at `(0, 0)`).
///
/// Row half-widths are `round(sqrt(r² - dy²))`, which yields a cross
/// for `r = 1`.
pub fn ellipse_offsets(radius: u32) -> Vec<(i64, i64)> {
    let r = i64::from(radius);
    let mut offsets = Vec::new();
    for dy in -r..=r {
        let half = (((r * r - dy * dy) as f64).sqrt()).round() as i64;
        for dx in -half..=half {
            offsets.push((dx, dy));
        }
    }
    offsets
}

/// The elliptical element as an `imageproc` mask centred on the origin.
fn ellipse_mask(radius: u32) -> Mask {
    let side = 2 * radius + 1;
    let mut image = GrayImage::new(side, side);
    for (dx, dy) in ellipse_offsets(radius) {
        let x = (dx + i64::from(radius)) as u32;
        let y = (dy + i64::from(radius)) as u32;
        image.put_pixel(x, y, Luma([255]));
    }
    // radius <= MAX_ERODE_RADIUS, so the centre fits in a u8.
    Mask::from_image(&image, radius as u8, radius as u8)
}

/// Erode `mask` with an elliptical structuring element of `radius`,
/// capped at [`MAX_ERODE_RADIUS`].
///
/// Each output pixel is the minimum of the input over the element.
/// Element pixels falling outside the image are ignored.
pub fn erode_ellipse(mask: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    grayscale_erode(mask, &ellipse_mask(radius.min(MAX_ERODE_RADIUS)))
}

/// Exact Euclidean distance from every pixel to the nearest background
/// (zero) pixel, row-major, one value per pixel.
///
/// Background pixels are `0.0`. If the mask has no background at all,
/// every value is larger than any realistic feather radius.
pub fn distance_transform(mask: &GrayImage) -> Vec<f64> {
    // imageproc measures distance to the nearest non-zero pixel, so the
    // background becomes the foreground of the input.
    let background = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if mask.get_pixel(x, y)[0] == 0 { 255 } else { 0 }])
    });
    euclidean_squared_distance_transform(&background)
        .pixels()
        .map(|p| p[0].sqrt())
        .collect()
}
