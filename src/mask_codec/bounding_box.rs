use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::mask_codec::check_len;

/// Inclusive pixel bounds of the non-transparent part of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    pub const fn point(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    pub const fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub const fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    fn union(self, other: Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Bounds of every pixel whose alpha is non-zero.
///
/// `None` means nothing qualified. That case must be treated as an empty
/// selection by the caller, never as a zero-sized rectangle. A buffer that
/// is not `width * height` long is [`crate::CutoutError::InvalidMask`].
pub fn bounding_box_of(alpha: &[u8], width: u32, height: u32) -> Result<Option<BoundingBox>> {
    check_len("alpha", alpha.len(), width, height, 1)?;
    Ok(scan(alpha, width, height))
}

/// [`bounding_box_of`] over the alpha channel of an RGBA image.
pub fn bounding_box_of_rgba(image: &RgbaImage) -> Option<BoundingBox> {
    let alpha = image
        .as_raw()
        .chunks_exact(4)
        .map(|pixel| pixel[3])
        .collect::<Vec<u8>>();
    scan(&alpha, image.width(), image.height())
}

fn scan(alpha: &[u8], width: u32, height: u32) -> Option<BoundingBox> {
    if width == 0 || height == 0 {
        return None;
    }

    alpha
        .par_chunks_exact(width as usize)
        .take(height as usize)
        .enumerate()
        .filter_map(|(y, row)| {
            let first = row.iter().position(|&a| a != 0)?;
            let last = row.iter().rposition(|&a| a != 0)?;
            Some(BoundingBox {
                min_x: first as u32,
                min_y: y as u32,
                max_x: last as u32,
                max_y: y as u32,
            })
        })
        .reduce_with(BoundingBox::union)
}
