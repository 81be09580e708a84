use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use rayon::prelude::*;

use crate::errors::{CutoutError, Result};
use crate::mask_codec::check_len;

/// Grows every set pixel of `mask` into a `(2 * radius + 1)²` square,
/// clipped to the image bounds.
///
/// The result is a superset of `mask` and grows monotonically with
/// `radius`; `radius == 0` returns the labels unchanged. Radii the distance
/// transform can represent (below 255) go through it, larger ones through
/// a separable row and column window.
pub fn dilate(mask: &[u8], width: u32, height: u32, radius: u32) -> Result<Vec<u8>> {
    check_len("mask data", mask.len(), width, height, 1)?;
    let labels = mask.iter().map(|&v| u8::from(v != 0)).collect::<Vec<u8>>();

    // An empty mask has no foreground to measure distances from.
    if radius == 0 || labels.iter().all(|&v| v == 0) {
        return Ok(labels);
    }

    match u8::try_from(radius) {
        Ok(radius) if radius < u8::MAX => transform(labels, width, height, radius),
        _ => Ok(separable(&labels, width as usize, height as usize, radius as usize)),
    }
}

fn transform(labels: Vec<u8>, width: u32, height: u32, radius: u8) -> Result<Vec<u8>> {
    let luma = labels.into_iter().map(|v| v * u8::MAX).collect::<Vec<u8>>();
    let image = GrayImage::from_raw(width, height, luma).ok_or_else(|| {
        CutoutError::InvalidMask {
            reason: format!("cannot view mask as {width}x{height} image"),
        }
    })?;

    let dilated = morphology::dilate(&image, Norm::LInf, radius);

    Ok(dilated
        .into_raw()
        .into_iter()
        .map(|v| u8::from(v != 0))
        .collect())
}

/// Square dilation as a horizontal pass followed by a vertical one.
fn separable(labels: &[u8], width: usize, height: usize, radius: usize) -> Vec<u8> {
    let mut rows = vec![0u8; labels.len()];
    rows.par_chunks_exact_mut(width)
        .zip(labels.par_chunks_exact(width))
        .for_each(|(dst, src)| dst.copy_from_slice(&spread(src, radius)));

    let columns = (0..width)
        .into_par_iter()
        .map(|x| {
            let column = (0..height).map(|y| rows[y * width + x]).collect::<Vec<u8>>();
            spread(&column, radius)
        })
        .collect::<Vec<Vec<u8>>>();

    let mut out = vec![0u8; labels.len()];
    for (x, column) in columns.iter().enumerate() {
        for (y, &v) in column.iter().enumerate() {
            out[y * width + x] = v;
        }
    }
    out
}

/// 1 wherever a set label lies within `radius` along the line.
fn spread(line: &[u8], radius: usize) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(line.len() + 1);
    prefix.push(0usize);
    for &v in line {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + usize::from(v != 0));
    }

    (0..line.len())
        .map(|i| {
            let start = i.saturating_sub(radius);
            let end = i.saturating_add(radius).saturating_add(1).min(line.len());
            u8::from(prefix[end] > prefix[start])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_pixel(width: u32, height: u32, x: u32, y: u32) -> Vec<u8> {
        let mut mask = vec![0u8; (width * height) as usize];
        mask[(y * width + x) as usize] = 1;
        mask
    }

    fn is_subset(a: &[u8], b: &[u8]) -> bool {
        a.iter().zip(b).all(|(&x, &y)| x == 0 || y != 0)
    }

    #[test]
    fn test_radius_ten_makes_square() -> Result<()> {
        let mask = single_pixel(100, 100, 50, 50);
        let dilated = dilate(&mask, 100, 100, 10)?;

        for y in 0..100u32 {
            for x in 0..100u32 {
                let inside = (40..=60).contains(&x) && (40..=60).contains(&y);
                assert_eq!(
                    dilated[(y * 100 + x) as usize],
                    u8::from(inside),
                    "pixel ({x}, {y})"
                );
            }
        }
        assert_eq!(dilated.iter().filter(|&&v| v == 1).count(), 21 * 21);
        Ok(())
    }

    #[test]
    fn test_clipped_at_edges() -> Result<()> {
        let mask = single_pixel(100, 100, 2, 97);
        let dilated = dilate(&mask, 100, 100, 10)?;

        // x spans 0..=12, y spans 87..=99
        assert_eq!(dilated.iter().filter(|&&v| v == 1).count(), 13 * 13);
        assert_eq!(dilated[(99 * 100) as usize], 1);
        assert_eq!(dilated[(86 * 100) as usize], 0);
        Ok(())
    }

    #[test]
    fn test_radius_zero_is_identity() -> Result<()> {
        let mask = vec![0, 1, 0, 1, 1, 0];
        assert_eq!(dilate(&mask, 3, 2, 0)?, mask);
        Ok(())
    }

    #[test]
    fn test_monotonic_in_radius() -> Result<()> {
        let mut mask = single_pixel(40, 30, 5, 5);
        mask[(20 * 40 + 33) as usize] = 1;

        let mut previous = mask.clone();
        for radius in [0u32, 1, 2, 5, 9, 20, 254, 255, 300] {
            let dilated = dilate(&mask, 40, 30, radius)?;
            assert!(is_subset(&mask, &dilated));
            assert!(is_subset(&previous, &dilated), "radius {radius}");
            previous = dilated;
        }
        Ok(())
    }

    #[test]
    fn test_empty_mask_stays_empty() -> Result<()> {
        let mask = vec![0u8; 64];
        assert_eq!(dilate(&mask, 8, 8, 10)?, mask);
        Ok(())
    }

    #[test]
    fn test_large_radius_makes_square() -> Result<()> {
        let mask = single_pixel(700, 700, 350, 340);
        let dilated = dilate(&mask, 700, 700, 300)?;

        // x spans 50..=650, y spans 40..=640
        assert_eq!(dilated.iter().filter(|&&v| v == 1).count(), 601 * 601);
        assert_eq!(dilated[(40 * 700 + 50) as usize], 1);
        assert_eq!(dilated[(39 * 700 + 50) as usize], 0);
        assert_eq!(dilated[(640 * 700 + 651) as usize], 0);
        Ok(())
    }

    #[test]
    fn test_separable_pass_matches_transform() -> Result<()> {
        let mut mask = single_pixel(60, 50, 4, 7);
        mask[(31 * 60 + 44) as usize] = 1;
        mask[(49 * 60 + 59) as usize] = 1;

        for radius in [1usize, 3, 12] {
            assert_eq!(
                separable(&mask, 60, 50, radius),
                dilate(&mask, 60, 50, radius as u32)?,
                "radius {radius}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_radius_past_image_fills_it() -> Result<()> {
        let mask = single_pixel(9, 4, 8, 0);
        assert_eq!(dilate(&mask, 9, 4, u32::MAX)?, vec![1u8; 36]);
        Ok(())
    }
}
