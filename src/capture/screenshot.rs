//! Full-screen sources and the region capturer built on top of them.
//!
//! This is the infrastructure layer — it talks to the OS through a
//! [`ScreenSource`]. The `xcap` backend is compiled with the
//! `native-capture` feature; without it, captures fail with
//! [`CaptureError::CaptureSourceUnavailable`].

use super::region::{self, PixelRect};
use super::{CaptureBounds, CaptureError, CaptureResult, DisplayGeometry};
use crate::host::{PermissionStatus, ScreenPermission};
use chrono::Utc;
use image::DynamicImage;
use std::sync::Arc;

/// One enumerated screen, rendered at the requested thumbnail size.
pub struct ScreenThumbnail {
    pub name: String,
    pub is_primary: bool,
    pub image: DynamicImage,
}

/// Anything that can enumerate full-screen sources.
pub trait ScreenSource: Send + Sync {
    /// Geometry of the primary display in logical coordinates.
    fn primary_display(&self) -> Result<DisplayGeometry, CaptureError>;

    /// Enumerates screens, each rendered at `thumbnail_size` native pixels
    /// when the backend supports resizing.
    fn screens(&self, thumbnail_size: (u32, u32)) -> Result<Vec<ScreenThumbnail>, CaptureError>;
}

/// Picks the source covering the full target display.
///
/// Sources are matched by pixel dimensions against the display's native
/// size, never by their OS-provided name. When several screens share the same
/// size, the primary one wins.
pub fn select_full_screen_source(
    sources: Vec<ScreenThumbnail>,
    native_size: (u32, u32),
) -> Option<ScreenThumbnail> {
    let mut matching: Vec<ScreenThumbnail> = sources
        .into_iter()
        .filter(|s| (s.image.width(), s.image.height()) == native_size)
        .collect();

    match matching.iter().position(|s| s.is_primary) {
        Some(index) => Some(matching.swap_remove(index)),
        None => matching.into_iter().next(),
    }
}

/// Produces cropped PNG captures of a display region.
///
/// Does not prompt for permission — callers check (and prompt) first.
pub struct RegionCapturer {
    source: Arc<dyn ScreenSource>,
    permission: Arc<dyn ScreenPermission>,
}

impl RegionCapturer {
    pub fn new(source: Arc<dyn ScreenSource>, permission: Arc<dyn ScreenPermission>) -> Self {
        Self { source, permission }
    }

    /// Geometry of the display selections are made on.
    pub fn primary_display(&self) -> Result<DisplayGeometry, CaptureError> {
        self.source.primary_display()
    }

    /// Captures `selection` (logical coordinates relative to `display`).
    ///
    /// The screen is enumerated at native resolution and the crop rect is
    /// scaled by `scale_factor` on both origin and size.
    pub fn capture(
        &self,
        display: &CaptureBounds,
        selection: CaptureBounds,
        scale_factor: f64,
    ) -> Result<CaptureResult, CaptureError> {
        let start = std::time::Instant::now();

        if self.permission.status() == PermissionStatus::Denied {
            return Err(CaptureError::PermissionDenied);
        }
        if !selection.fits_within(display) {
            return Err(CaptureError::SelectionOutsideDisplay {
                selection,
                display: *display,
            });
        }

        let native_size = region::native_size(display, scale_factor);
        let sources = self.source.screens(native_size)?;
        let source_count = sources.len();

        let screen = select_full_screen_source(sources, native_size).ok_or_else(|| {
            CaptureError::CaptureSourceUnavailable(format!(
                "no screen among {} matches {}x{}",
                source_count, native_size.0, native_size.1
            ))
        })?;

        let rect: PixelRect = region::scaled_crop_rect(&selection, scale_factor, native_size)?;
        let png_bytes = region::crop_to_png_bytes(&screen.image, rect)?;

        log::info!(
            "[CAPTURE] Cropped {}x{} at {},{} from '{}' in {}ms — {} bytes",
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            screen.name,
            start.elapsed().as_millis(),
            png_bytes.len()
        );

        Ok(CaptureResult {
            png_bytes,
            bounds: selection,
            captured_at: Utc::now(),
        })
    }
}

/// Screen source used when the build has no capture backend.
pub struct UnavailableScreenSource;

impl ScreenSource for UnavailableScreenSource {
    fn primary_display(&self) -> Result<DisplayGeometry, CaptureError> {
        Err(CaptureError::CaptureSourceUnavailable(
            "built without the native-capture feature".to_string(),
        ))
    }

    fn screens(&self, _thumbnail_size: (u32, u32)) -> Result<Vec<ScreenThumbnail>, CaptureError> {
        Ok(Vec::new())
    }
}

/// Returns the best screen source this build supports.
pub fn default_screen_source() -> Arc<dyn ScreenSource> {
    #[cfg(feature = "native-capture")]
    {
        return Arc::new(xcap_source::XcapScreenSource);
    }

    #[cfg(not(feature = "native-capture"))]
    Arc::new(UnavailableScreenSource)
}

#[cfg(feature = "native-capture")]
mod xcap_source {
    use super::*;
    use crate::capture::fit_to_native_size;
    use xcap::Monitor;

    /// Monitor capture using the `xcap` crate.
    pub struct XcapScreenSource;

    fn primary_monitor() -> Result<Monitor, CaptureError> {
        let monitors = Monitor::all()
            .map_err(|e| CaptureError::CaptureSourceUnavailable(e.to_string()))?;

        let mut fallback = None;
        for monitor in monitors {
            if monitor.is_primary().unwrap_or(false) {
                return Ok(monitor);
            }
            if fallback.is_none() {
                fallback = Some(monitor);
            }
        }
        fallback.ok_or_else(|| {
            CaptureError::CaptureSourceUnavailable("no monitors reported by the OS".to_string())
        })
    }

    impl ScreenSource for XcapScreenSource {
        fn primary_display(&self) -> Result<DisplayGeometry, CaptureError> {
            let monitor = primary_monitor()?;
            let backend = |e: xcap::XCapError| CaptureError::Backend(e.to_string());

            let scale_factor = f64::from(monitor.scale_factor().map_err(backend)?);
            let width = monitor.width().map_err(backend)?;
            let height = monitor.height().map_err(backend)?;

            // xcap reports native pixels; selections arrive in logical ones.
            Ok(DisplayGeometry {
                bounds: CaptureBounds {
                    x: 0,
                    y: 0,
                    width: (f64::from(width) / scale_factor).round() as u32,
                    height: (f64::from(height) / scale_factor).round() as u32,
                },
                scale_factor,
            })
        }

        fn screens(
            &self,
            thumbnail_size: (u32, u32),
        ) -> Result<Vec<ScreenThumbnail>, CaptureError> {
            let monitors = Monitor::all()
                .map_err(|e| CaptureError::CaptureSourceUnavailable(e.to_string()))?;

            let mut screens = Vec::with_capacity(monitors.len());
            for monitor in monitors {
                let name = monitor.name().unwrap_or_else(|_| "unknown".to_string());
                let image = match monitor.capture_image() {
                    Ok(image) => image,
                    Err(e) => {
                        log::warn!("[CAPTURE] Skipping monitor '{}': {}", name, e);
                        continue;
                    }
                };

                let mut image = DynamicImage::ImageRgba8(image);
                let (w, h) = (image.width(), image.height());
                // Off-by-one differences come from rounding the logical size back up.
                let near = w.abs_diff(thumbnail_size.0) <= 1 && h.abs_diff(thumbnail_size.1) <= 1;
                if (w, h) != thumbnail_size && near {
                    image = fit_to_native_size(&image, thumbnail_size);
                }

                screens.push(ScreenThumbnail {
                    name,
                    is_primary: monitor.is_primary().unwrap_or(false),
                    image,
                });
            }

            Ok(screens)
        }
    }
}
