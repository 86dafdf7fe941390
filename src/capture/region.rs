//! Pure region cropping logic — functional core.
//!
//! This module has zero infrastructure dependencies.
//! It maps a logical selection onto a native-resolution screen image,
//! crops it, and returns PNG bytes.

use super::CaptureBounds;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// A rectangle in native (physical) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Native pixel size of a display at the given scale factor.
///
/// Both dimensions are scaled and rounded the same way as the crop rect,
/// so a full-display selection always maps onto the whole image.
pub fn native_size(display: &CaptureBounds, scale_factor: f64) -> (u32, u32) {
    (
        scale_round(display.width, scale_factor),
        scale_round(display.height, scale_factor),
    )
}

/// Maps a logical selection onto native pixels.
///
/// Origin and size are each `round(value * scale_factor)`. Rounding both the
/// origin and the size can overshoot the image edge by one pixel; in that case
/// the origin is pulled back so the output keeps its rounded dimensions.
pub fn scaled_crop_rect(
    selection: &CaptureBounds,
    scale_factor: f64,
    image_size: (u32, u32),
) -> Result<PixelRect, CropError> {
    if selection.width == 0 || selection.height == 0 {
        return Err(CropError::ZeroDimension);
    }
    if !(scale_factor.is_finite() && scale_factor > 0.0) {
        return Err(CropError::InvalidScale(scale_factor));
    }

    let width = scale_round(selection.width, scale_factor);
    let height = scale_round(selection.height, scale_factor);
    let (img_width, img_height) = image_size;

    if width == 0 || height == 0 {
        return Err(CropError::ZeroDimension);
    }
    if width > img_width || height > img_height {
        return Err(CropError::OutOfBounds {
            requested: (0, 0, width, height),
            image_size,
        });
    }

    let x = scale_round(selection.x, scale_factor).min(img_width - width);
    let y = scale_round(selection.y, scale_factor).min(img_height - height);

    Ok(PixelRect {
        x,
        y,
        width,
        height,
    })
}

/// Crops a `DynamicImage` to the specified native rectangle and returns PNG bytes.
///
/// This is a pure function with no side effects. PNG is lossless, so decoding
/// the result yields exactly the cropped pixels.
pub fn crop_to_png_bytes(image: &DynamicImage, rect: PixelRect) -> Result<Vec<u8>, CropError> {
    let PixelRect {
        x,
        y,
        width,
        height,
    } = rect;

    if width == 0 || height == 0 {
        return Err(CropError::ZeroDimension);
    }

    let (img_width, img_height) = (image.width(), image.height());

    if x + width > img_width || y + height > img_height {
        return Err(CropError::OutOfBounds {
            requested: (x, y, width, height),
            image_size: (img_width, img_height),
        });
    }

    let cropped = image.crop_imm(x, y, width, height);

    let mut png_bytes: Vec<u8> = Vec::new();
    cropped
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(|e| CropError::EncodingFailed(e.to_string()))?;

    Ok(png_bytes)
}

/// Brings a screen image to exactly `size` without resampling.
///
/// Pixels keep their coordinates: surplus edge rows/columns are dropped and
/// missing ones repeat the last row/column.
pub fn fit_to_native_size(image: &DynamicImage, size: (u32, u32)) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if (width, height) == size || width == 0 || height == 0 {
        return image.clone();
    }

    let source = image.to_rgba8();
    let fitted = RgbaImage::from_fn(size.0, size.1, |x, y| {
        *source.get_pixel(x.min(width - 1), y.min(height - 1))
    });
    DynamicImage::ImageRgba8(fitted)
}

fn scale_round(value: u32, scale_factor: f64) -> u32 {
    (f64::from(value) * scale_factor).round() as u32
}

#[derive(Debug, thiserror::Error)]
pub enum CropError {
    #[error("Crop rectangle has zero width or height")]
    ZeroDimension,

    #[error("Scale factor must be a positive number, got {0}")]
    InvalidScale(f64),

    #[error(
        "Crop rectangle ({},{},{},{}) exceeds image bounds ({}x{})",
        requested.0, requested.1, requested.2, requested.3,
        image_size.0, image_size.1
    )]
    OutOfBounds {
        requested: (u32, u32, u32, u32),
        image_size: (u32, u32),
    },

    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbaImage};

    fn bounds(x: u32, y: u32, width: u32, height: u32) -> CaptureBounds {
        CaptureBounds {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn crop_valid_region() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(100, 100));
        let rect = PixelRect {
            x: 10,
            y: 10,
            width: 50,
            height: 50,
        };
        let bytes = crop_to_png_bytes(&img, rect).unwrap();
        // PNG magic bytes
        assert_eq!(&bytes[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    fn crop_out_of_bounds_fails() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(100, 100));
        let rect = PixelRect {
            x: 80,
            y: 80,
            width: 30,
            height: 30,
        };
        let result = crop_to_png_bytes(&img, rect);
        assert!(matches!(result, Err(CropError::OutOfBounds { .. })));
    }

    #[test]
    fn scaling_applies_to_origin_and_size() {
        let rect = scaled_crop_rect(&bounds(10, 20, 30, 40), 2.0, (200, 200)).unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x: 20,
                y: 40,
                width: 60,
                height: 80
            }
        );
    }

    #[test]
    fn fractional_scale_rounds_to_nearest_pixel() {
        let rect = scaled_crop_rect(&bounds(3, 5, 7, 9), 1.25, (100, 100)).unwrap();
        // 3.75 -> 4, 6.25 -> 6, 8.75 -> 9, 11.25 -> 11
        assert_eq!(
            rect,
            PixelRect {
                x: 4,
                y: 6,
                width: 9,
                height: 11
            }
        );
    }

    #[test]
    fn rounding_overshoot_pulls_origin_back() {
        // Display 4x4 at 1.5 => 6x6 native.
        let size = native_size(&bounds(0, 0, 4, 4), 1.5);
        assert_eq!(size, (6, 6));
        // x: 1.5 -> 2, w: 4.5 -> 5, and 2 + 5 > 6, so x is pulled back to 1.
        let rect = scaled_crop_rect(&bounds(1, 1, 3, 3), 1.5, size).unwrap();
        assert_eq!((rect.x, rect.width), (1, 5));
        assert_eq!((rect.y, rect.height), (1, 5));
    }

    #[test]
    fn fitting_keeps_pixels_in_place() {
        let mut src = RgbaImage::new(5, 4);
        for (x, y, px) in src.enumerate_pixels_mut() {
            *px = image::Rgba([x as u8, y as u8, 7, 255]);
        }
        let src = DynamicImage::ImageRgba8(src);

        let grown = fit_to_native_size(&src, (6, 3)).to_rgba8();
        assert_eq!(grown.dimensions(), (6, 3));
        for y in 0..3 {
            for x in 0..5 {
                assert_eq!(grown.get_pixel(x, y).0, [x as u8, y as u8, 7, 255]);
            }
            // The added column repeats the old edge.
            assert_eq!(grown.get_pixel(5, y).0, [4, y as u8, 7, 255]);
        }
    }

    #[test]
    fn zero_dimension_selection_fails() {
        let result = scaled_crop_rect(&bounds(0, 0, 0, 10), 1.0, (10, 10));
        assert!(matches!(result, Err(CropError::ZeroDimension)));
    }

    #[test]
    fn non_positive_scale_fails() {
        let result = scaled_crop_rect(&bounds(0, 0, 5, 5), 0.0, (10, 10));
        assert!(matches!(result, Err(CropError::InvalidScale(_))));
    }
}
