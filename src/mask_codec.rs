mod bounding_box;
mod candidates;
mod dilate;
mod render;

pub use bounding_box::{bounding_box_of, bounding_box_of_rgba, BoundingBox};
pub use candidates::{select_best_candidate, MaskCandidateSet};
pub use dilate::dilate;
pub use render::{render_overlay, render_paint_out, render_stencil, StencilColor, OVERLAY_COLOR};

use crate::errors::{CutoutError, Result};
use image::{GrayImage, Luma};

/// Single binary mask picked out of a candidate set.
///
/// `data` holds one 0/1 label per pixel in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMask {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub score: f32,
}

impl BestMask {
    pub fn new(data: Vec<u8>, width: u32, height: u32, score: f32) -> Result<Self> {
        check_len("mask data", data.len(), width, height, 1)?;
        Ok(Self {
            data,
            width,
            height,
            score,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_set(&self, x: u32, y: u32) -> bool {
        x < self.width
            && y < self.height
            && self.data[(y as usize) * (self.width as usize) + x as usize] != 0
    }

    pub fn count_set(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&v| v == 0)
    }

    /// Returns a copy grown by `radius` pixels, see [`dilate`].
    pub fn dilated(&self, radius: u32) -> Result<Self> {
        Ok(Self {
            data: dilate(&self.data, self.width, self.height, radius)?,
            width: self.width,
            height: self.height,
            score: self.score,
        })
    }

    /// 0/255 grayscale view of the labels.
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.is_set(x, y) { u8::MAX } else { 0 }])
        })
    }
}

pub(crate) fn check_len(
    field: &str,
    actual: usize,
    width: u32,
    height: u32,
    planes: usize,
) -> Result<()> {
    let expected = (width as usize) * (height as usize) * planes;
    if actual != expected {
        return Err(CutoutError::InvalidMask {
            reason: format!(
                "{field} has {actual} entries, expected {expected} ({width}x{height}x{planes})"
            ),
        });
    }
    Ok(())
}
