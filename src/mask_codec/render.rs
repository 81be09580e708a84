use clap::ValueEnum;
use image::{GrayImage, Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mask_codec::BestMask;

/// Colour of the selection overlay drawn on top of the background.
pub const OVERLAY_COLOR: Rgba<u8> = Rgba([0, 114, 189, 255]);

/// Colour of the selected region in a paint-out stencil. The rest of the
/// stencil is always fully transparent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StencilColor {
    #[default]
    White,
    Black,
}

impl StencilColor {
    pub const fn pixel(self) -> Rgba<u8> {
        match self {
            Self::White => Rgba([255, 255, 255, 255]),
            Self::Black => Rgba([0, 0, 0, 255]),
        }
    }
}

/// Paints `color` where the mask is set, transparent elsewhere.
pub fn render_overlay(mask: &BestMask, color: Rgba<u8>) -> RgbaImage {
    paint(mask, color)
}

/// Opaque stencil used to cut the selection out of the background.
pub fn render_paint_out(mask: &BestMask, color: StencilColor) -> RgbaImage {
    paint(mask, color.pixel())
}

/// Alpha stencil: 255 where the mask is set, 0 elsewhere.
pub fn render_stencil(mask: &BestMask) -> GrayImage {
    mask.to_luma()
}

fn paint(mask: &BestMask, color: Rgba<u8>) -> RgbaImage {
    let mut raw = vec![0u8; mask.data.len() * 4];
    raw.par_chunks_exact_mut(4)
        .zip(mask.data.par_iter())
        .filter(|(_, label)| **label != 0)
        .for_each(|(pixel, _)| pixel.copy_from_slice(&color.0));

    // Length follows from the mask's own dimensions.
    RgbaImage::from_raw(mask.width, mask.height, raw)
        .unwrap_or_else(|| RgbaImage::new(mask.width, mask.height))
}
