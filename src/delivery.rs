//! Delivery — turns one upload outcome into exactly one user-facing effect.

use crate::capture::{CaptureError, CaptureResult, CaptureSession};
use crate::host::{Notifier, PromptKind, PromptState, UiHost};
use crate::redact::redact_secrets;
use crate::settings::SettingsStore;
use crate::upload::{UploadClient, UploadOutcome};
use std::future::Future;
use std::sync::Arc;

const FAILURE_TITLE: &str = "Capture not sent";
const FAILURE_BODY: &str = "Something went wrong sending your capture. Please try again.";

/// Owns the quota prompt and the user-visible consequences of uploads.
///
/// Captures are not queued: each capture is delivered independently, and
/// outcomes of concurrent captures may arrive in any order.
pub struct DeliveryCoordinator {
    uploader: UploadClient,
    ui: Arc<dyn UiHost>,
    notifier: Arc<dyn Notifier>,
    quota_prompt_open: bool,
}

impl DeliveryCoordinator {
    pub fn new(uploader: UploadClient, ui: Arc<dyn UiHost>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            uploader,
            ui,
            notifier,
            quota_prompt_open: false,
        }
    }

    /// Client used for uploads and pairing checks.
    pub fn uploader(&self) -> &UploadClient {
        &self.uploader
    }

    pub fn quota_prompt_open(&self) -> bool {
        self.quota_prompt_open
    }

    /// Consumes a capture session, yielding its result once.
    pub fn receive(
        &self,
        session: CaptureSession,
    ) -> impl Future<Output = Result<CaptureResult, CaptureError>> + Send + 'static {
        session.await_result()
    }

    /// The upload half of a delivery, detached from `self` so the app loop can
    /// spawn it. Its outcome must come back through [`Self::handle_outcome`].
    pub fn upload_task(
        &self,
        capture: CaptureResult,
        token: Option<String>,
        api_base_url: String,
    ) -> impl Future<Output = UploadOutcome> + Send + 'static {
        let uploader = self.uploader.clone();
        async move {
            let outcome = uploader
                .upload(&capture, token.as_deref(), &api_base_url)
                .await;
            log::info!("[DELIVERY] Upload finished: {}", outcome.label());
            outcome
        }
    }

    /// Uploads one capture and applies its outcome.
    pub async fn deliver(
        &mut self,
        capture: &CaptureResult,
        settings: &mut dyn SettingsStore,
        api_base_url: &str,
    ) -> UploadOutcome {
        let token = settings.auth_token().map(str::to_string);
        let outcome = self
            .upload_task(capture.clone(), token, api_base_url.to_string())
            .await;
        self.handle_outcome(&outcome, settings);
        outcome
    }

    /// Applies the single effect for `outcome`.
    pub fn handle_outcome(&mut self, outcome: &UploadOutcome, settings: &mut dyn SettingsStore) {
        match outcome {
            UploadOutcome::Success(_) => {
                log::info!("[DELIVERY] Capture delivered");
                self.notifier
                    .notify("Capture sent", "Your screenshot was sent to your CRM.");
            }
            UploadOutcome::QuotaExceeded(info) => {
                log::info!(
                    "[DELIVERY] Quota exceeded ({:?}/{:?})",
                    info.current_count,
                    info.quota_limit
                );
                self.notifier.notify("Capture limit reached", &info.user_message);
                // An open prompt is refreshed in place rather than stacked.
                self.ui.show_prompt_surface(&PromptState::Quota(info.clone()));
                self.quota_prompt_open = true;
            }
            UploadOutcome::AuthInvalid => {
                log::warn!("[DELIVERY] Token rejected — clearing it and asking to re-pair");
                if let Err(e) = settings.clear_auth_token() {
                    log::error!("[DELIVERY] Failed to clear token: {}", e);
                }
                self.notifier.notify(
                    "Reconnect Send to CRM",
                    "Your pairing has expired. Pair this device again to keep sending captures.",
                );
                self.ui.show_prompt_surface(&PromptState::Pairing {
                    reason: Some("Your previous pairing is no longer valid.".to_string()),
                });
            }
            UploadOutcome::NotPaired => {
                log::info!("[DELIVERY] Not paired — showing pairing prompt");
                self.ui
                    .show_prompt_surface(&PromptState::Pairing { reason: None });
            }
            UploadOutcome::Forbidden(body) => {
                log::warn!("[DELIVERY] Upload forbidden: {}", redact_secrets(body));
                self.notifier.notify(FAILURE_TITLE, FAILURE_BODY);
            }
            UploadOutcome::TransientFailure { reason, details } => {
                log::warn!(
                    "[DELIVERY] Upload failed ({:?}): {}",
                    reason,
                    redact_secrets(details)
                );
                self.notifier.notify(FAILURE_TITLE, FAILURE_BODY);
            }
        }
    }

    /// The user dismissed the quota prompt.
    pub fn quota_prompt_closed(&mut self) {
        if self.quota_prompt_open {
            self.quota_prompt_open = false;
            self.ui.close_prompt_surface(PromptKind::Quota);
        }
    }
}
