//! Capture session gate.
//!
//! Open from the moment the selection overlay is shown until the capture is
//! delivered or abandoned. While open, an expiring install countdown defers
//! instead of restarting under the user's cursor.

use crate::update::{UpdateHost, UpdateLifecycleController};

#[derive(Debug, Default)]
pub struct SessionGate {
    open: bool,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a capture as in progress. Returns `false` if one already was.
    pub fn open(&mut self) -> bool {
        if self.open {
            return false;
        }
        log::info!("[SESSION] Capture session opened");
        self.open = true;
        true
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Closes the gate and, before returning, runs any install that was
    /// deferred while it was open. Closing an already-closed gate is a no-op.
    ///
    /// Returns `true` if a deferred install ran.
    pub fn close(
        &mut self,
        updates: &mut UpdateLifecycleController,
        host: &mut dyn UpdateHost,
    ) -> bool {
        if !self.open {
            return false;
        }
        self.open = false;
        log::info!("[SESSION] Capture session closed");
        updates.on_session_closed(host)
    }
}
