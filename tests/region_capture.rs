//! Integration tests for region capture.
//!
//! Drives `RegionCapturer` against an in-memory screen source so scaling,
//! source selection and PNG fidelity are checked without a display.

use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use send_to_crm_lib::capture::{
    CaptureBounds, CaptureError, DisplayGeometry, RegionCapturer, ScreenSource, ScreenThumbnail,
};
use send_to_crm_lib::host::{AssumeGranted, PermissionStatus, ScreenPermission};
use std::sync::Arc;

fn pixel(x: u32, y: u32) -> Rgba<u8> {
    Rgba([(x % 256) as u8, (y % 256) as u8, ((x * 7 + y * 13) % 256) as u8, 255])
}

fn patterned(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, pixel))
}

/// A primary display plus a second, differently sized one listed first.
struct FakeScreens {
    display: DisplayGeometry,
}

impl ScreenSource for FakeScreens {
    fn primary_display(&self) -> Result<DisplayGeometry, CaptureError> {
        Ok(self.display)
    }

    fn screens(&self, thumbnail_size: (u32, u32)) -> Result<Vec<ScreenThumbnail>, CaptureError> {
        Ok(vec![
            ScreenThumbnail {
                name: "Built-in Retina Display".into(),
                is_primary: false,
                image: DynamicImage::ImageRgba8(RgbaImage::new(64, 48)),
            },
            ScreenThumbnail {
                name: "Entire screen".into(),
                is_primary: true,
                image: patterned(thumbnail_size.0, thumbnail_size.1),
            },
        ])
    }
}

struct Denied;

impl ScreenPermission for Denied {
    fn status(&self) -> PermissionStatus {
        PermissionStatus::Denied
    }
    fn prompt(&self) -> PermissionStatus {
        PermissionStatus::Denied
    }
}

fn display(width: u32, height: u32, scale_factor: f64) -> DisplayGeometry {
    DisplayGeometry {
        bounds: CaptureBounds {
            x: 0,
            y: 0,
            width,
            height,
        },
        scale_factor,
    }
}

fn capturer(display: DisplayGeometry) -> RegionCapturer {
    RegionCapturer::new(Arc::new(FakeScreens { display }), Arc::new(AssumeGranted))
}

fn rect(x: u32, y: u32, width: u32, height: u32) -> CaptureBounds {
    CaptureBounds {
        x,
        y,
        width,
        height,
    }
}

// ── Scaling ─────────────────────────────────────────────────────────

#[test]
fn output_dimensions_follow_scale_factor() {
    let selections = [rect(0, 0, 1, 1), rect(10, 20, 33, 17), rect(5, 5, 195, 95)];

    for scale in [1.0, 1.25, 1.5, 2.0, 3.0] {
        let geometry = display(200, 100, scale);
        let capturer = capturer(geometry);

        for selection in selections {
            let result = capturer
                .capture(&geometry.bounds, selection, scale)
                .unwrap_or_else(|e| panic!("{:?} @ {}: {}", selection, scale, e));
            let decoded = image::load_from_memory(&result.png_bytes).unwrap();

            let expected = (
                (f64::from(selection.width) * scale).round() as u32,
                (f64::from(selection.height) * scale).round() as u32,
            );
            assert_eq!(decoded.dimensions(), expected, "{:?} @ {}", selection, scale);
            assert_eq!(result.bounds, selection);
        }
    }
}

#[test]
fn full_display_selection_maps_to_whole_screen() {
    let geometry = display(1440, 900, 2.0);
    let result = capturer(geometry)
        .capture(&geometry.bounds, geometry.bounds, 2.0)
        .unwrap();
    let decoded = image::load_from_memory(&result.png_bytes).unwrap();
    assert_eq!(decoded.dimensions(), (2880, 1800));
}

// ── PNG fidelity ────────────────────────────────────────────────────

#[test]
fn png_round_trip_matches_scaled_source_region() {
    let geometry = display(200, 100, 1.5);
    let selection = rect(10, 20, 33, 17);
    let result = capturer(geometry)
        .capture(&geometry.bounds, selection, 1.5)
        .unwrap();
    let decoded = image::load_from_memory(&result.png_bytes).unwrap().to_rgba8();

    // Origin scaled too: (15, 30), not (10, 20).
    assert_eq!(decoded.dimensions(), (50, 26));
    for (x, y, p) in decoded.enumerate_pixels() {
        assert_eq!(*p, pixel(15 + x, 30 + y), "pixel ({}, {})", x, y);
    }
}

// ── Failures ────────────────────────────────────────────────────────

#[test]
fn denied_permission_fails_without_capturing() {
    let geometry = display(200, 100, 1.0);
    let capturer = RegionCapturer::new(Arc::new(FakeScreens { display: geometry }), Arc::new(Denied));
    assert!(matches!(
        capturer.capture(&geometry.bounds, rect(0, 0, 10, 10), 1.0),
        Err(CaptureError::PermissionDenied)
    ));
}

#[test]
fn selection_outside_display_is_rejected() {
    let geometry = display(200, 100, 1.0);
    assert!(matches!(
        capturer(geometry).capture(&geometry.bounds, rect(150, 50, 60, 10), 1.0),
        Err(CaptureError::SelectionOutsideDisplay { .. })
    ));
}

#[test]
fn no_matching_source_is_unavailable() {
    struct Mismatched;
    impl ScreenSource for Mismatched {
        fn primary_display(&self) -> Result<DisplayGeometry, CaptureError> {
            Ok(display(200, 100, 1.0))
        }
        fn screens(&self, _size: (u32, u32)) -> Result<Vec<ScreenThumbnail>, CaptureError> {
            Ok(vec![ScreenThumbnail {
                name: "Entire screen".into(),
                is_primary: true,
                image: patterned(10, 10),
            }])
        }
    }

    let geometry = display(200, 100, 1.0);
    let capturer = RegionCapturer::new(Arc::new(Mismatched), Arc::new(AssumeGranted));
    assert!(matches!(
        capturer.capture(&geometry.bounds, rect(0, 0, 10, 10), 1.0),
        Err(CaptureError::CaptureSourceUnavailable(_))
    ));
}
