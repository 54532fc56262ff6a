//! Output path conventions for remote results.
//!
//! Results land next to the source image:
//!
//! - whole-image job: `{dir}/{stem}_proto.{ext}` (source extension kept)
//! - batch patch: `{dir}/{stem}_region{part}.png` (always PNG, it carries alpha)

use std::path::{Path, PathBuf};

/// Extension used when the source has none, and for every patch.
const PATCH_EXTENSION: &str = "png";

/// Output path for the result of a whole-image job.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use diffserver_core::naming::whole_image_output;
///
/// assert_eq!(
///     whole_image_output(Path::new("/data/cat.jpg")),
///     Path::new("/data/cat_proto.jpg"),
/// );
/// ```
pub fn whole_image_output(source: &Path) -> PathBuf {
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(PATCH_EXTENSION);
    source.with_file_name(format!("{}_proto.{ext}", stem(source)))
}

/// Output path for the result of one batch patch.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use diffserver_core::naming::patch_output;
///
/// assert_eq!(
///     patch_output(Path::new("/data/cat.jpg"), "3"),
///     Path::new("/data/cat_region3.png"),
/// );
/// ```
pub fn patch_output(source: &Path, part_id: &str) -> PathBuf {
    source.with_file_name(format!(
        "{}_region{part_id}.{PATCH_EXTENSION}",
        stem(source)
    ))
}

fn stem(source: &Path) -> String {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}
