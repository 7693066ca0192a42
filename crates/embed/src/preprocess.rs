use std::borrow::Cow;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Size limits applied to uploads before they are sent for embedding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PreprocessConfig {
    /// Skip preprocessing entirely when `false`.
    #[serde(default = "PreprocessConfig::default_enabled")]
    pub enabled: bool,
    /// Re-encode images whose encoded size exceeds this many bytes.
    #[serde(default = "PreprocessConfig::default_max_bytes")]
    pub max_bytes: usize,
    /// Downscale images whose longest side exceeds this many pixels.
    #[serde(default = "PreprocessConfig::default_max_side")]
    pub max_side: u32,
    #[serde(default = "PreprocessConfig::default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl PreprocessConfig {
    pub(crate) fn default_enabled() -> bool {
        true
    }

    pub(crate) fn default_max_bytes() -> usize {
        20 * 1024 * 1024
    }

    pub(crate) fn default_max_side() -> u32 {
        2048
    }

    pub(crate) fn default_jpeg_quality() -> u8 {
        85
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_bytes: Self::default_max_bytes(),
            max_side: Self::default_max_side(),
            jpeg_quality: Self::default_jpeg_quality(),
        }
    }
}

/// Target size keeping aspect ratio, longest side clamped to `max_side`.
fn scaled_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    if width > height {
        let new_width = width.min(max_side);
        let new_height = (height as f64 * new_width as f64 / width as f64) as u32;
        (new_width, new_height.max(1))
    } else {
        let new_height = height.min(max_side);
        let new_width = (width as f64 * new_height as f64 / height.max(1) as f64) as u32;
        (new_width.max(1), new_height)
    }
}

/// Shrink oversized images to RGB JPEG.
///
/// Images within both limits are returned as-is. Anything that cannot be
/// decoded is also returned unchanged; the provider gets to reject it.
pub fn prepare_image<'a>(bytes: &'a [u8], cfg: &PreprocessConfig) -> Cow<'a, [u8]> {
    if !cfg.enabled {
        return Cow::Borrowed(bytes);
    }
    match try_prepare(bytes, cfg) {
        Ok(Some(resized)) => Cow::Owned(resized),
        Ok(None) => Cow::Borrowed(bytes),
        Err(err) => {
            warn!(error = %err, "could not preprocess image, using original bytes");
            Cow::Borrowed(bytes)
        }
    }
}

fn try_prepare(bytes: &[u8], cfg: &PreprocessConfig) -> image::ImageResult<Option<Vec<u8>>> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    let needs_resize = bytes.len() > cfg.max_bytes || width.max(height) > cfg.max_side;
    if !needs_resize {
        return Ok(None);
    }

    let (new_width, new_height) = scaled_dimensions(width, height, cfg.max_side);
    let img = image::load_from_memory(bytes)?;
    let resized = img.resize_exact(new_width, new_height, FilterType::Lanczos3);
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, cfg.jpeg_quality))?;
    debug!(
        from_bytes = bytes.len(),
        to_bytes = out.len(),
        from = %format!("{width}x{height}"),
        to = %format!("{new_width}x{new_height}"),
        "resized image before embedding"
    );
    Ok(Some(out))
}
