//! File names of captured calibration images and stored calibrations.
//!
//! Names carry the camera id explicitly so files are grouped by identity,
//! never by position in a directory listing.

use pixvox_core::CameraId;

const IMAGE_PREFIX: &str = "calibration_cam-";
const SEQ_TAG: &str = "_seq-";
const CALIBRATION_PREFIX: &str = "calibration_cam-";
const CALIBRATION_EXT: &str = "json";

/// Image extensions the session reads back.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// `calibration_cam-<id>_seq-<k>.<ext>`
pub fn image_file_name(camera: CameraId, sequence: u32, ext: &str) -> String {
    format!("{IMAGE_PREFIX}{}{SEQ_TAG}{sequence}.{ext}", camera.index())
}

/// `calibration_cam-<id>.json`
pub fn calibration_file_name(camera: CameraId) -> String {
    format!("{CALIBRATION_PREFIX}{}.{CALIBRATION_EXT}", camera.index())
}

fn parse_sequence(digits: &str) -> Option<u32> {
    let canonical = !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'));
    canonical.then(|| digits.parse().ok()).flatten()
}

/// Parse an image file name into `(camera, sequence)`.
///
/// Anything that is not exactly the canonical form is rejected, including
/// leading zeros and unknown extensions.
pub fn parse_image_file_name(name: &str) -> Option<(CameraId, u32)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if !IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return None;
    }
    let rest = stem.strip_prefix(IMAGE_PREFIX)?;
    let (id, seq) = rest.split_once(SEQ_TAG)?;
    let camera = CameraId::parse_index(id).ok()?;
    Some((camera, parse_sequence(seq)?))
}

/// Parse a stored calibration file name into its camera id.
pub fn parse_calibration_file_name(name: &str) -> Option<CameraId> {
    let stem = name.strip_suffix(CALIBRATION_EXT)?.strip_suffix('.')?;
    let id = stem.strip_prefix(CALIBRATION_PREFIX)?;
    CameraId::parse_index(id).ok()
}
