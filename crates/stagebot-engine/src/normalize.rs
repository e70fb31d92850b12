use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use stagebot_contracts::jobs::{DegradeReason, StageOutcome};
use tracing::warn;

use crate::http::error_chain_text;

pub const MAX_WIDTH: u32 = 1920;
pub const MAX_HEIGHT: u32 = 1080;
pub const JPEG_QUALITY: u8 = 95;
/// Longest side a style reference is sent at.
pub const REFERENCE_MAX_SIDE: u32 = 2048;

/// Brings the image at `path` to the staged form (upright, RGB, within
/// 1920×1080, JPEG q95), rewriting the file in place.
///
/// Best effort: on any failure the file is left untouched and the same path
/// comes back as `Degraded`.
pub fn normalize_in_place(path: &Path) -> StageOutcome<PathBuf> {
    match rewrite_normalized(path, MAX_WIDTH, MAX_HEIGHT) {
        Ok(()) => StageOutcome::Ok(path.to_path_buf()),
        Err(err) => {
            let reason = error_chain_text(&err, 300);
            warn!(path = %path.display(), %reason, "normalization skipped");
            StageOutcome::Degraded {
                value: path.to_path_buf(),
                reason: DegradeReason::NormalizeFailed(reason),
            }
        }
    }
}

/// Writes a copy of `source` that fits within the reference bound to `dest`.
/// The asset itself is never modified.
pub fn prepare_reference(source: &Path, dest: &Path) -> Result<PathBuf> {
    let bytes = fs::read(source).with_context(|| format!("failed reading {}", source.display()))?;
    let image = decode_upright(&bytes)?;
    let fitted = fit_within(image, REFERENCE_MAX_SIDE, REFERENCE_MAX_SIDE);
    let encoded = encode_jpeg(&fitted.to_rgb8(), JPEG_QUALITY)?;
    fs::write(dest, encoded).with_context(|| format!("failed to write {}", dest.display()))?;
    Ok(dest.to_path_buf())
}

fn rewrite_normalized(path: &Path, max_width: u32, max_height: u32) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let image = decode_upright(&bytes)?;
    let fitted = fit_within(image, max_width, max_height);
    let encoded = encode_jpeg(&fitted.to_rgb8(), JPEG_QUALITY)?;

    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("image");
    let staging = path.with_file_name(format!(".{file_name}.normalizing"));
    if let Err(err) = fs::write(&staging, &encoded) {
        let _ = fs::remove_file(&staging);
        return Err(err).with_context(|| format!("failed to write {}", staging.display()));
    }
    if let Err(err) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(err).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

/// Decodes by sniffing the content (generated payloads are not always what
/// their extension says) and applies the EXIF orientation.
fn decode_upright(bytes: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(bytes).context("image decode failed")?;
    Ok(apply_orientation(image, read_exif_orientation(bytes)))
}

/// EXIF orientation tag (0x0112); 1 when absent or unreadable.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let Ok(reader) = exif::Reader::new().read_from_container(&mut cursor) else {
        return 1;
    };
    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

pub fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Proportional downscale into `max_width`×`max_height`; smaller images are
/// returned as they are.
pub fn fit_within(image: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if image.width() <= max_width && image.height() <= max_height {
        return image;
    }
    image.resize(max_width, max_height, FilterType::Lanczos3)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(image.clone()))
        .context("jpeg encode failed")?;
    Ok(bytes)
}

/// Mime type implied by a file extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}
