//! Region config parsing and normalized → pixel coordinate mapping.
//!
//! A region config is a JSON document of the shape
//!
//! ```json
//! { "differences": [ { "points": [{"x": 0.1, "y": 0.2}, ...], "text": "prompt" } ] }
//! ```
//!
//! where every point is normalized to `0.0..=1.0` on both axes.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Minimum number of points a region needs to describe an area.
pub const MIN_REGION_POINTS: usize = 4;

/// Which image corner the normalized `y` axis starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoordOrigin {
    /// `y = 0` is the top row (image convention).
    #[default]
    #[serde(rename = "top-left")]
    TopLeft,
    /// `y = 0` is the bottom row (plot convention); `y` is flipped.
    #[serde(rename = "bottom-left")]
    BottomLeft,
}

impl CoordOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            CoordOrigin::TopLeft => "top-left",
            CoordOrigin::BottomLeft => "bottom-left",
        }
    }
}

impl fmt::Display for CoordOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordOrigin {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top-left" => Ok(CoordOrigin::TopLeft),
            "bottom-left" => Ok(CoordOrigin::BottomLeft),
            other => Err(CoreError::Validation(format!(
                "Unknown coordinate origin: '{other}'. Valid origins: top-left, bottom-left"
            ))),
        }
    }
}

/// A point with both axes normalized to the image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormPoint {
    pub x: f64,
    pub y: f64,
}

/// A point in pixel space (not rounded).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

/// One region to re-generate, with the prompt describing the edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(default)]
    pub points: Vec<NormPoint>,
    #[serde(default)]
    pub text: String,
}

/// Top-level region config document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    #[serde(default)]
    pub differences: Vec<Region>,
}

impl RegionConfig {
    /// Parse a region config from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a region config file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        Self::from_json(&text)
    }
}

/// Map a normalized point to pixel space for an image of `width` × `height`.
///
/// Both axes scale by `size - 1`, so `1.0` lands on the last pixel
/// centre rather than one past it.
pub fn to_pixel(point: NormPoint, width: u32, height: u32, origin: CoordOrigin) -> PixelPoint {
    let max_x = f64::from(width.saturating_sub(1));
    let max_y = f64::from(height.saturating_sub(1));
    let y = match origin {
        CoordOrigin::TopLeft => point.y * max_y,
        CoordOrigin::BottomLeft => (1.0 - point.y) * max_y,
    };
    PixelPoint {
        x: point.x * max_x,
        y,
    }
}
