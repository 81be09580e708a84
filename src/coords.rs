//! Coordinate spaces.
//!
//! Masks, bounding boxes and cutouts live in *source* space: pixels of the
//! background image. Anything shown on screen lives in *display* space,
//! which depends on the viewport. Prompts travel to the worker as
//! *normalized* fractions of the image. Conversions between the three are
//! explicit so that extraction never depends on the current zoom.

use serde::{Deserialize, Serialize};

use crate::errors::{CutoutError, Result};
use crate::mask_codec::BoundingBox;

/// Position in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourcePoint {
    pub x: f32,
    pub y: f32,
}

/// Position in display pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayPoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: f32,
    pub height: f32,
}

/// Axis-aligned rectangle in display pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Point as a fraction of the image size, both axes in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f32; 2]", into = "[f32; 2]")]
pub struct NormalizedPoint {
    x: f32,
    y: f32,
}

impl NormalizedPoint {
    pub fn new(x: f32, y: f32) -> Result<Self> {
        let valid = |v: f32| (0.0..=1.0).contains(&v);
        if !valid(x) || !valid(y) {
            return Err(CutoutError::validation(
                "point",
                format!("({x}, {y}) is outside the unit square"),
            ));
        }
        Ok(Self { x, y })
    }

    /// Click position relative to the displayed image.
    pub fn from_display(point: DisplayPoint, size: DisplaySize) -> Result<Self> {
        if size.width <= 0.0 || size.height <= 0.0 {
            return Err(CutoutError::validation(
                "display size",
                "must be positive on both axes",
            ));
        }
        Self::new(point.x / size.width, point.y / size.height)
    }

    pub fn from_source(point: SourcePoint, (width, height): (u32, u32)) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CutoutError::validation("image size", "must be non-zero"));
        }
        Self::new(point.x / width as f32, point.y / height as f32)
    }

    pub fn to_source(self, (width, height): (u32, u32)) -> SourcePoint {
        SourcePoint {
            x: self.x * width as f32,
            y: self.y * height as f32,
        }
    }

    pub const fn x(self) -> f32 {
        self.x
    }

    pub const fn y(self) -> f32 {
        self.y
    }
}

impl TryFrom<[f32; 2]> for NormalizedPoint {
    type Error = CutoutError;

    fn try_from([x, y]: [f32; 2]) -> Result<Self> {
        Self::new(x, y)
    }
}

impl From<NormalizedPoint> for [f32; 2] {
    fn from(point: NormalizedPoint) -> Self {
        [point.x, point.y]
    }
}

/// Per-axis factor from source pixels to display pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayScale {
    pub x: f32,
    pub y: f32,
}

impl DisplayScale {
    pub const IDENTITY: Self = Self { x: 1.0, y: 1.0 };

    /// Shrinks an image to fit the viewport, keeping its aspect ratio.
    /// Images that already fit are shown at their natural size.
    pub fn fit((width, height): (u32, u32), viewport: DisplaySize) -> Result<(DisplaySize, Self)> {
        if width == 0 || height == 0 {
            return Err(CutoutError::validation("image size", "must be non-zero"));
        }

        let aspect = width as f32 / height as f32;
        let mut size = DisplaySize {
            width: width as f32,
            height: height as f32,
        };
        if size.width > viewport.width {
            size.width = viewport.width;
            size.height = size.width / aspect;
        }
        if size.height > viewport.height {
            size.height = viewport.height;
            size.width = size.height * aspect;
        }

        let scale = Self {
            x: size.width / width as f32,
            y: size.height / height as f32,
        };
        Ok((size, scale))
    }

    pub fn to_display(self, point: SourcePoint) -> DisplayPoint {
        DisplayPoint {
            x: point.x * self.x,
            y: point.y * self.y,
        }
    }

    pub fn to_source(self, point: DisplayPoint) -> SourcePoint {
        SourcePoint {
            x: point.x / self.x,
            y: point.y / self.y,
        }
    }

    pub fn box_to_display(self, bbox: &BoundingBox) -> DisplayRect {
        DisplayRect {
            x: bbox.min_x as f32 * self.x,
            y: bbox.min_y as f32 * self.y,
            width: bbox.width() as f32 * self.x,
            height: bbox.height() as f32 * self.y,
        }
    }
}
