use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageBuffer, Luma, Pixel, Primitive, Rgba, RgbaImage};
use num_traits::AsPrimitive;

use crate::coords::{DisplayRect, DisplayScale};
use crate::errors::{CutoutError, Result};
use crate::mask_codec::{bounding_box_of_rgba, render_stencil, BestMask, BoundingBox};

/// Selected object cut out of the background, ready to be placed as a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CutoutObject {
    pub image: RgbaImage,
    /// Where the crop came from, in source image pixels.
    pub bounding_box: BoundingBox,
}

impl CutoutObject {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// On-screen rectangle of the object for a background shown at `scale`.
    pub fn placement(&self, scale: DisplayScale) -> DisplayRect {
        scale.box_to_display(&self.bounding_box)
    }
}

/// Keeps `image` only where `stencil` is opaque (canvas "destination-in").
///
/// Colour is untouched; the output alpha is the image alpha scaled by the
/// stencil coverage.
pub fn destination_in<I, M, SI, SM>(image: &I, stencil: &M) -> Result<ImageBuffer<Rgba<SI>, Vec<SI>>>
where
    I: GenericImageView<Pixel = Rgba<SI>>,
    M: GenericImageView<Pixel = Luma<SM>>,
    Rgba<SI>: Pixel<Subpixel = SI>,
    SI: Primitive + AsPrimitive<f32> + 'static,
    SM: Primitive + AsPrimitive<f32> + 'static,
    f32: AsPrimitive<SI>,
{
    if image.dimensions() != stencil.dimensions() {
        return Err(CutoutError::validation(
            "stencil",
            format!(
                "is {:?} but the image is {:?}",
                stencil.dimensions(),
                image.dimensions()
            ),
        ));
    }

    let sm_max: f32 = SM::DEFAULT_MAX_VALUE.as_();

    let processed_pixels = image
        .pixels()
        .zip(stencil.pixels())
        .flat_map(|((_, _, image_pixel), (_, _, mask_pixel))| {
            let Rgba([red, green, blue, alpha]) = image_pixel;
            let Luma([coverage]) = mask_pixel;
            let alpha: SI = (alpha.as_() * (coverage.as_() / sm_max)).as_();
            [red, green, blue, alpha]
        })
        .collect::<Vec<SI>>();

    let (width, height) = image.dimensions();
    ImageBuffer::from_raw(width, height, processed_pixels).ok_or_else(|| {
        CutoutError::InvalidMask {
            reason: "failed to create image buffer from composited pixels".to_string(),
        }
    })
}

/// Cuts the masked object out of `source`.
///
/// The mask is stretched onto the source when the two differ in size. The
/// result is cropped to the tight bounding box of what stayed visible, so
/// its size is always `bounding_box.width() x bounding_box.height()`.
pub fn extract(source: &RgbaImage, mask: &BestMask) -> Result<CutoutObject> {
    if mask.is_empty() {
        return Err(CutoutError::NoSelection);
    }

    let (width, height) = source.dimensions();
    let mut stencil = render_stencil(mask);
    if stencil.dimensions() != (width, height) {
        stencil = imageops::resize(&stencil, width, height, FilterType::Nearest);
    }

    let composite = destination_in(source, &stencil)?;
    let bounding_box = bounding_box_of_rgba(&composite).ok_or(CutoutError::NoSelection)?;

    let image = imageops::crop_imm(
        &composite,
        bounding_box.min_x,
        bounding_box.min_y,
        bounding_box.width(),
        bounding_box.height(),
    )
    .to_image();

    Ok(CutoutObject {
        image,
        bounding_box,
    })
}

/// [`extract`] for any decoded image.
pub fn extract_dynamic(source: &DynamicImage, mask: &BestMask) -> Result<CutoutObject> {
    extract(&source.to_rgba8(), mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 7, 255]))
    }

    fn rect_mask(width: u32, height: u32, bbox: BoundingBox) -> BestMask {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| u8::from(bbox.contains(x, y))))
            .collect();
        BestMask::new(data, width, height, 1.0).unwrap()
    }

    #[test]
    fn test_extract_crops_to_mask() -> Result<()> {
        let source = gradient(30, 20);
        let bbox = BoundingBox {
            min_x: 4,
            min_y: 6,
            max_x: 12,
            max_y: 9,
        };
        let object = extract(&source, &rect_mask(30, 20, bbox))?;

        assert_eq!(object.bounding_box, bbox);
        assert_eq!((object.width(), object.height()), (9, 4));
        assert_eq!(object.image.get_pixel(0, 0), &Rgba([4, 6, 7, 255]));
        assert_eq!(object.image.get_pixel(8, 3), &Rgba([12, 9, 7, 255]));
        Ok(())
    }

    #[test]
    fn test_pixels_outside_mask_are_transparent() -> Result<()> {
        let source = gradient(10, 10);
        let mut data = vec![0u8; 100];
        data[2 * 10 + 2] = 1;
        data[5 * 10 + 6] = 1;
        let mask = BestMask::new(data, 10, 10, 1.0)?;

        let object = extract(&source, &mask)?;
        assert_eq!((object.width(), object.height()), (5, 4));
        assert_eq!(object.image.get_pixel(0, 0)[3], 255);
        assert_eq!(object.image.get_pixel(1, 0)[3], 0);
        assert_eq!(object.image.get_pixel(4, 3), &Rgba([6, 5, 7, 255]));
        Ok(())
    }

    #[test]
    fn test_empty_mask_is_no_selection() {
        let source = gradient(8, 8);
        let mask = BestMask::new(vec![0; 64], 8, 8, 0.4).unwrap();
        assert!(matches!(extract(&source, &mask), Err(CutoutError::NoSelection)));
    }

    #[test]
    fn test_transparent_source_is_no_selection() {
        let source = RgbaImage::from_pixel(4, 4, Rgba([10, 10, 10, 0]));
        let mask = BestMask::new(vec![1; 16], 4, 4, 0.4).unwrap();
        assert!(matches!(extract(&source, &mask), Err(CutoutError::NoSelection)));
    }

    #[test]
    fn test_mask_is_stretched_to_source() -> Result<()> {
        let source = gradient(20, 20);
        // top-left quadrant of a 2x2 mask covers 10x10 source pixels
        let mask = BestMask::new(vec![1, 0, 0, 0], 2, 2, 1.0)?;

        let object = extract(&source, &mask)?;
        assert_eq!(
            object.bounding_box,
            BoundingBox {
                min_x: 0,
                min_y: 0,
                max_x: 9,
                max_y: 9
            }
        );
        Ok(())
    }

    #[test]
    fn test_cropping_is_idempotent() -> Result<()> {
        let source = gradient(16, 16);
        let full = BestMask::new(vec![1; 256], 16, 16, 1.0)?;

        let object = extract(&source, &full)?;
        let again = bounding_box_of_rgba(&object.image).unwrap();
        assert_eq!(again.width(), object.bounding_box.width());
        assert_eq!(again.height(), object.bounding_box.height());
        assert_eq!(object.bounding_box, BoundingBox {
            min_x: 0,
            min_y: 0,
            max_x: 15,
            max_y: 15
        });
        Ok(())
    }

    #[test]
    fn test_placement_uses_display_scale() -> Result<()> {
        let source = gradient(40, 40);
        let bbox = BoundingBox {
            min_x: 10,
            min_y: 20,
            max_x: 19,
            max_y: 29,
        };
        let object = extract(&source, &rect_mask(40, 40, bbox))?;
        let rect = object.placement(DisplayScale { x: 0.5, y: 2.0 });
        assert_eq!(
            rect,
            DisplayRect {
                x: 5.0,
                y: 40.0,
                width: 5.0,
                height: 20.0
            }
        );
        Ok(())
    }
}
