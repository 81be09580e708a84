use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use tracing::warn;

use crate::errors::{CutoutError, Result};

const PNG_PREFIX: &str = "data:image/png;base64,";

/// Encodes an image as a `data:image/png;base64,...` URL.
pub fn encode_png(image: &RgbaImage) -> Result<String> {
    let bytes = png_bytes(image)?;
    Ok(format!("{PNG_PREFIX}{}", STANDARD.encode(bytes)))
}

pub fn png_bytes(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| CutoutError::ImageProcessing {
            operation: "png encoding".to_string(),
            source: Box::new(e),
        })?;
    Ok(bytes)
}

/// Payload bytes of a base64 data URL of any media type.
pub fn decode_bytes(data_url: &str) -> Result<Vec<u8>> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| CutoutError::validation("data url", "must start with `data:`"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| CutoutError::validation("data url", "has no `,` separator"))?;
    if !header.ends_with(";base64") {
        return Err(CutoutError::validation(
            "data url",
            format!("`{header}` is not base64 encoded"),
        ));
    }

    STANDARD
        .decode(payload.trim())
        .map_err(|e| CutoutError::ImageProcessing {
            operation: "base64 decoding".to_string(),
            source: Box::new(e),
        })
}

pub fn decode(data_url: &str) -> Result<DynamicImage> {
    let bytes = decode_bytes(data_url)?;
    image::load_from_memory(&bytes).map_err(|e| CutoutError::ImageProcessing {
        operation: "data url image decoding".to_string(),
        source: Box::new(e),
    })
}

/// Stretches the image in `data_url` to `width x height` and re-encodes it
/// as PNG.
///
/// Lenient: when anything fails the input is returned unchanged and a
/// warning is logged. Strict consumers must validate the result themselves.
pub fn resize_data_url(data_url: &str, width: u32, height: u32) -> String {
    let resized = decode(data_url).and_then(|image| {
        let resized = image.resize_exact(width, height, FilterType::Lanczos3);
        encode_png(&resized.to_rgba8())
    });

    match resized {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, width, height, "keeping data url at its original size");
            data_url.to_string()
        }
    }
}

/// Lenient resize of raw image bytes, see [`resize_data_url`].
pub fn resize_bytes(bytes: Vec<u8>, width: u32, height: u32) -> Vec<u8> {
    let resized = image::load_from_memory(&bytes)
        .map_err(CutoutError::from)
        .and_then(|image| png_bytes(&image.resize_exact(width, height, FilterType::Lanczos3).to_rgba8()));

    match resized {
        Ok(resized) => resized,
        Err(e) => {
            warn!(error = %e, width, height, "keeping fill response at its original size");
            bytes
        }
    }
}
