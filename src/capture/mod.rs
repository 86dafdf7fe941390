//! Screen capture domain — public API.
//!
//! This module owns all screen capture functionality.
//! External code should only use the types and functions exported here.

mod persist;
mod region;
mod screenshot;

pub use persist::{persist_if_enabled, screenshots_dir};
pub use region::{
    crop_to_png_bytes, fit_to_native_size, native_size, scaled_crop_rect, CropError, PixelRect,
};
pub use screenshot::{
    default_screen_source, select_full_screen_source, RegionCapturer, ScreenSource,
    ScreenThumbnail, UnavailableScreenSource,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// A rectangle in logical (unscaled) screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CaptureBounds {
    /// `true` when this rectangle is non-empty and lies inside `display`.
    ///
    /// Both rectangles are compared relative to the display origin.
    pub fn fits_within(&self, display: &CaptureBounds) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(display.width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(display.height)
    }
}

/// Logical bounds plus device pixel ratio of one display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayGeometry {
    pub bounds: CaptureBounds,
    pub scale_factor: f64,
}

/// A finished capture, handed to delivery exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub png_bytes: Vec<u8>,
    pub bounds: CaptureBounds,
    pub captured_at: DateTime<Utc>,
}

/// Receiving half of one capture: yields its result exactly once.
pub struct CaptureSession {
    rx: oneshot::Receiver<Result<CaptureResult, CaptureError>>,
}

/// Sending half of one capture.
pub struct CaptureCompleter {
    tx: oneshot::Sender<Result<CaptureResult, CaptureError>>,
}

impl CaptureSession {
    pub fn new() -> (CaptureSession, CaptureCompleter) {
        let (tx, rx) = oneshot::channel();
        (CaptureSession { rx }, CaptureCompleter { tx })
    }

    /// Waits for the capture to finish. Consumes the session.
    pub async fn await_result(self) -> Result<CaptureResult, CaptureError> {
        self.rx.await.unwrap_or(Err(CaptureError::Abandoned))
    }
}

impl CaptureCompleter {
    pub fn complete(self, result: Result<CaptureResult, CaptureError>) {
        // The receiver is gone only if delivery was torn down; nothing to report to.
        let _ = self.tx.send(result);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Screen recording permission has not been granted")]
    PermissionDenied,

    #[error("No full-screen capture source available: {0}")]
    CaptureSourceUnavailable(String),

    #[error("Selection {selection:?} lies outside display {display:?}")]
    SelectionOutsideDisplay {
        selection: CaptureBounds,
        display: CaptureBounds,
    },

    #[error(transparent)]
    Crop(#[from] CropError),

    #[error("Screen capture failed: {0}")]
    Backend(String),

    #[error("Capture was abandoned before producing a result")]
    Abandoned,
}
