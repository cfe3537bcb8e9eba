use anyhow::{Result, anyhow};
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;

/// Thumbnail bound (max width or height).
pub const THUMB_MAX_DIM: u32 = 300;

/// JPEG quality for the thumbnail variant on disk.
pub const THUMB_JPEG_QUALITY: u8 = 70;

/// JPEG quality for the full-size variant on disk.
pub const FULL_JPEG_QUALITY: u8 = 95;

/// JPEG quality for outbound uploads.
pub const UPLOAD_JPEG_QUALITY: u8 = 80;

/// Encode to baseline JPEG at the given quality. JPEG carries neither alpha
/// nor wide color, so everything is flattened to 8-bit RGB first.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| anyhow!("Failed to encode JPEG: {}", e))?;
    Ok(out)
}

fn downscale(img: &DynamicImage, max_dim: u32) -> DynamicImage {
    if img.width().max(img.height()) <= max_dim {
        img.clone()
    } else {
        img.thumbnail(max_dim, max_dim)
    }
}

/// Deterministic thumbnail derivation: downscale to `max_dim` on the longest
/// side, re-encode lossy.
pub fn derive_thumbnail(data: &[u8], max_dim: u32, quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data).map_err(|e| anyhow!("Failed to load image: {}", e))?;
    encode_jpeg(&downscale(&img, max_dim), quality)
}

/// Re-encode arbitrary image bytes as JPEG (upload normalization).
pub fn reencode_jpeg(data: &[u8], quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data).map_err(|e| anyhow!("Failed to load image: {}", e))?;
    encode_jpeg(&img, quality)
}

/// Produce both cacheable variants from freshly fetched original bytes in a
/// single decode pass.
pub fn process_original(
    data: &[u8],
    thumb_max_dim: u32,
    thumb_quality: u8,
    full_quality: u8,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let img = image::load_from_memory(data).map_err(|e| anyhow!("Failed to load image: {}", e))?;
    let full = encode_jpeg(&img, full_quality)?;
    let thumb = encode_jpeg(&downscale(&img, thumb_max_dim), thumb_quality)?;
    Ok((full, thumb))
}
