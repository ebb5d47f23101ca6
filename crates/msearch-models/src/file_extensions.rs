//! Single source of truth for supported file extensions, shared by the
//! scanner, proxy workers, and repair passes.

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov"];

const COMMON_IMAGE: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];
pub const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "crw", // Canon
    "nef", "nrw", // Nikon
    "arw", "sr2", "srf", // Sony
    "raf", // Fuji
    "orf", // Olympus
    "rw2", "raw", // Panasonic
    "rwl", // Leica
];
const UNIVERSAL_IMAGE: &[&str] = &["dng", "tif", "tiff"];

/// Raster + RAW + universal image extensions, lowercase without a leading dot.
pub fn image_extensions() -> Vec<&'static str> {
    let mut out = Vec::new();
    out.extend_from_slice(COMMON_IMAGE);
    out.extend_from_slice(RAW_EXTENSIONS);
    out.extend_from_slice(UNIVERSAL_IMAGE);
    out
}

/// True if `extension` (case-insensitive, without a leading dot) names an
/// image format this system claims and proxies.
pub fn is_image_extension(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    image_extensions().contains(&lower.as_str())
}

/// True if `extension` (case-insensitive, without a leading dot) names a
/// video format this system scans and segments.
pub fn is_video_extension(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    VIDEO_EXTENSIONS.contains(&lower.as_str())
}

/// True if `extension` names a RAW camera format, which gets an
/// embedded-preview-first proxy path instead of a full demosaic.
pub fn is_raw_extension(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    RAW_EXTENSIONS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_and_raw_images() {
        assert!(is_image_extension("JPG"));
        assert!(is_image_extension("cr2"));
        assert!(is_raw_extension("NEF"));
        assert!(!is_raw_extension("jpg"));
    }

    #[test]
    fn classifies_video() {
        assert!(is_video_extension("mov"));
        assert!(!is_video_extension("jpg"));
    }
}
