//! Output title derivation.

use crate::types::RESULT_SUFFIX;

/// Strip the trailing extension from an image title.
///
/// Only the segment after the last `.` is removed, so `scan.v1.tif`
/// becomes `scan.v1`. Titles without a `.` are returned unchanged and
/// `None` passes through.
#[must_use]
pub fn strip_extension(name: Option<&str>) -> Option<&str> {
    name.map(|n| n.rfind('.').map_or(n, |dot| &n[..dot]))
}

/// Title given to the final image of a run whose source was `source_title`.
#[must_use]
pub fn result_title(source_title: &str) -> String {
    let stem = strip_extension(Some(source_title)).unwrap_or_default();
    format!("{stem}{RESULT_SUFFIX}")
}
