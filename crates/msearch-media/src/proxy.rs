//! Image proxy/thumbnail derivation: source -> proxy (<=768x768 WebP q85) ->
//! thumbnail (<=320x320 JPEG q85, derived from the proxy rather than the
//! source). Neither derivative is ever upscaled past the source/proxy size.
//!
//! RAW sources prefer an embedded EXIF preview over a full demosaic, since
//! this crate has no RAW decoder and a decent in-camera JPEG preview is
//! almost always good enough for a search-result thumbnail.

use std::io::BufReader;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

use msearch_models::file_extensions::is_raw_extension;

use crate::error::{MediaError, MediaResult};

pub const THUMBNAIL_MAX: u32 = 320;
pub const PROXY_MAX: u32 = 768;
const JPEG_QUALITY: u8 = 85;
const WEBP_QUALITY: f32 = 85.0;

fn encode_webp(img: &DynamicImage) -> MediaResult<Vec<u8>> {
    let rgb = img.to_rgb8();
    let encoder = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height());
    let encoded = encoder.encode(WEBP_QUALITY);
    Ok(encoded.to_vec())
}

/// Encoded proxy (WebP) and thumbnail (JPEG) bytes, ready to hand to
/// [`crate::store::MediaStore::write_atomic`].
pub struct ProxyAndThumbnail {
    pub proxy_bytes: Vec<u8>,
    pub thumbnail_bytes: Vec<u8>,
}

/// Load `source_path`, then cascade source -> proxy -> thumbnail.
///
/// For RAW extensions, an embedded EXIF preview/thumbnail is decoded first;
/// only non-RAW sources (and RAW files with no usable embedded preview) go
/// through the general-purpose `image` decode path.
pub fn generate_proxy_and_thumbnail(source_path: &Path) -> MediaResult<ProxyAndThumbnail> {
    let extension = source_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let source = if is_raw_extension(extension) {
        load_raw_preview(source_path)?.map_or_else(|| load_via_image_crate(source_path), Ok)?
    } else {
        load_via_image_crate(source_path)?
    };

    let proxy = fit_within_no_upscale(&source, PROXY_MAX);
    let proxy_bytes = encode_webp(&proxy)?;
    let thumbnail = fit_within_no_upscale(&proxy, THUMBNAIL_MAX);
    let thumbnail_bytes = encode_jpeg(&thumbnail)?;

    Ok(ProxyAndThumbnail {
        proxy_bytes,
        thumbnail_bytes,
    })
}

fn load_via_image_crate(source_path: &Path) -> MediaResult<DynamicImage> {
    let img = image::open(source_path)?;
    Ok(apply_exif_orientation(source_path, img))
}

/// EXIF-embedded preview/thumbnail, without a full RAW demosaic. Returns
/// `Ok(None)` when the file carries no extractable preview so the caller
/// falls back to the general decode path (which will usually also fail for
/// RAW, but that failure is then reported honestly rather than masked).
fn load_raw_preview(source_path: &Path) -> MediaResult<Option<DynamicImage>> {
    let file = std::fs::File::open(source_path)?;
    let mut reader = BufReader::new(file);
    let exif_reader = exif::Reader::new();
    let exif_data = match exif_reader.read_from_container(&mut reader) {
        Ok(data) => data,
        Err(_) => return Ok(None),
    };
    let Some(thumb_offset) = exif_data.get_field(exif::Tag::JPEGInterchangeFormat, exif::In::THUMBNAIL)
    else {
        return Ok(None);
    };
    let Some(thumb_len) =
        exif_data.get_field(exif::Tag::JPEGInterchangeFormatLength, exif::In::THUMBNAIL)
    else {
        return Ok(None);
    };
    let offset = thumb_offset.value.get_uint(0).unwrap_or(0) as usize;
    let len = thumb_len.value.get_uint(0).unwrap_or(0) as usize;
    let buf = exif_data.buf();
    if offset == 0 || len == 0 || offset + len > buf.len() {
        return Ok(None);
    }
    let thumb_bytes = &buf[offset..offset + len];
    match image::load_from_memory_with_format(thumb_bytes, ImageFormat::Jpeg) {
        Ok(img) => Ok(Some(img)),
        Err(_) => Ok(None),
    }
}

/// Re-orient an already-decoded image per its EXIF `Orientation` tag; the
/// `image` crate's generic decoders don't apply this automatically.
fn apply_exif_orientation(source_path: &Path, img: DynamicImage) -> DynamicImage {
    let Ok(file) = std::fs::File::open(source_path) else {
        return img;
    };
    let mut reader = BufReader::new(file);
    let Ok(exif_data) = exif::Reader::new().read_from_container(&mut reader) else {
        return img;
    };
    let Some(field) = exif_data.get_field(exif::Tag::Orientation, exif::In::PRIMARY) else {
        return img;
    };
    match field.value.get_uint(0) {
        Some(2) => img.fliph(),
        Some(3) => img.rotate180(),
        Some(4) => img.flipv(),
        Some(5) => img.rotate90().fliph(),
        Some(6) => img.rotate90(),
        Some(7) => img.rotate270().fliph(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}

/// Resize to fit within a `max x max` box, preserving aspect ratio and never
/// upscaling past the source's own resolution.
fn fit_within_no_upscale(img: &DynamicImage, max: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max && height <= max {
        return img.clone();
    }
    img.resize(max, max, FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage) -> MediaResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    let rgb = img.to_rgb8();
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
        .map_err(MediaError::Image)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn fit_within_no_upscale_keeps_small_images_at_source_size() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        let fitted = fit_within_no_upscale(&img, PROXY_MAX);
        assert_eq!(fitted.dimensions(), (100, 50));
    }

    #[test]
    fn fit_within_no_upscale_downscales_larger_images() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(1600, 800));
        let fitted = fit_within_no_upscale(&img, PROXY_MAX);
        assert!(fitted.width() <= PROXY_MAX && fitted.height() <= PROXY_MAX);
        assert!(fitted.width() == PROXY_MAX || fitted.height() == PROXY_MAX);
    }

    #[test]
    fn encode_webp_and_jpeg_produce_nonempty_bytes() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(32, 32));
        assert!(!encode_webp(&img).unwrap().is_empty());
        assert!(!encode_jpeg(&img).unwrap().is_empty());
    }
}
