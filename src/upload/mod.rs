//! Capture-ingest client — one multipart upload per capture, typed outcomes.
//!
//! Every call resolves to exactly one [`UploadOutcome`]. The client only
//! reports; side effects such as clearing a revoked token belong to
//! [`DeliveryCoordinator`](crate::delivery::DeliveryCoordinator).

mod response;
mod transport;

pub use response::{
    classify_upload_error, classify_upload_response, classify_verify_error,
    classify_verify_response, DEFAULT_QUOTA_MESSAGE, DEFAULT_UPGRADE_LABEL, OPEN_URL_ACTION,
};
pub use transport::{
    FormField, HttpRequest, HttpResponse, HttpTransport, RequestBody, ReqwestTransport,
    TransportError, CONNECT_TIMEOUT,
};

use crate::capture::CaptureResult;
use chrono::SecondsFormat;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Total budget for one capture upload.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(20);
/// Total budget for auxiliary calls such as token verification.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(12);

const CAPTURE_PATH: &str = "screenshot-capture";
const VERIFY_PATH: &str = "desktop-verify-token";

/// Upgrade path offered with a quota error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Option<String>,
    pub label: String,
}

/// Quota details, defaults already filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    pub current_count: Option<u64>,
    pub quota_limit: Option<u64>,
    pub user_message: String,
    pub action: QuotaAction,
}

/// Why a transient failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    HttpStatus(u16),
    Timeout,
    Network,
    /// The upload never left the machine: the API base URL is unusable.
    Configuration,
}

/// Result of exactly one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// 2xx; the parsed JSON body when there was one.
    Success(Option<serde_json::Value>),
    /// 401 — the token was revoked or expired.
    AuthInvalid,
    /// 403 with a `quota_exceeded` error code.
    QuotaExceeded(QuotaInfo),
    /// Any other 403, with the raw body.
    Forbidden(String),
    /// No token configured; nothing was sent.
    NotPaired,
    /// Any other failure, with diagnostics.
    TransientFailure {
        reason: FailureReason,
        details: String,
    },
}

impl UploadOutcome {
    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            UploadOutcome::Success(_) => "success",
            UploadOutcome::AuthInvalid => "auth_invalid",
            UploadOutcome::QuotaExceeded(_) => "quota_exceeded",
            UploadOutcome::Forbidden(_) => "forbidden",
            UploadOutcome::NotPaired => "not_paired",
            UploadOutcome::TransientFailure { .. } => "transient_failure",
        }
    }

    /// The upload could not be attempted because of local configuration.
    pub fn misconfigured(error: &crate::config::ConfigError) -> Self {
        UploadOutcome::TransientFailure {
            reason: FailureReason::Configuration,
            details: error.to_string(),
        }
    }
}

/// Why token verification failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    InvalidToken,
    HttpStatus(u16),
    Timeout,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    Failed(VerifyFailure),
}

impl VerifyOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, VerifyOutcome::Ok)
    }

    /// Wire-style reason: `invalid_token` or `verify_failed_<status>`.
    pub fn reason(&self) -> Option<String> {
        match self {
            VerifyOutcome::Ok => None,
            VerifyOutcome::Failed(VerifyFailure::InvalidToken) => Some("invalid_token".to_string()),
            VerifyOutcome::Failed(VerifyFailure::HttpStatus(status)) => {
                Some(format!("verify_failed_{}", status))
            }
            VerifyOutcome::Failed(VerifyFailure::Timeout) => {
                Some("verify_failed_timeout".to_string())
            }
            VerifyOutcome::Failed(VerifyFailure::Network) => {
                Some("verify_failed_network".to_string())
            }
        }
    }
}

/// Hex SHA-256 of the image bytes, sent for server-side content addressing.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Joins `path` onto the API base URL, tolerating a trailing slash.
pub fn endpoint(api_base_url: &str, path: &str) -> String {
    format!("{}/{}", api_base_url.trim_end_matches('/'), path)
}

/// Client for the capture-ingest API.
#[derive(Clone)]
pub struct UploadClient {
    transport: Arc<dyn HttpTransport>,
    client_os: String,
    client_version: String,
}

impl UploadClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        client_os: impl Into<String>,
        client_version: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            client_os: client_os.into(),
            client_version: client_version.into(),
        }
    }

    /// Builds the multipart fields for one capture.
    pub fn capture_fields(&self, capture: &CaptureResult) -> Vec<FormField> {
        let captured_at = capture
            .captured_at
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let bounds = serde_json::to_string(&capture.bounds).unwrap_or_else(|_| "null".to_string());

        vec![
            FormField::File {
                name: "image",
                file_name: format!("capture_{}.png", capture.captured_at.timestamp_millis()),
                mime: "image/png",
                bytes: capture.png_bytes.clone(),
            },
            FormField::Text {
                name: "captured_at",
                value: captured_at,
            },
            FormField::Text {
                name: "client_os",
                value: self.client_os.clone(),
            },
            FormField::Text {
                name: "client_version",
                value: self.client_version.clone(),
            },
            FormField::Text {
                name: "bounds",
                value: bounds,
            },
            FormField::Text {
                name: "sha256",
                value: sha256_hex(&capture.png_bytes),
            },
        ]
    }

    /// Uploads one capture. Single attempt, never retried.
    ///
    /// A missing or blank token short-circuits to [`UploadOutcome::NotPaired`]
    /// without touching the network.
    pub async fn upload(
        &self,
        capture: &CaptureResult,
        token: Option<&str>,
        api_base_url: &str,
    ) -> UploadOutcome {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            log::info!("[UPLOAD] No token configured — skipping upload");
            return UploadOutcome::NotPaired;
        };

        let start = std::time::Instant::now();
        let request = HttpRequest {
            url: endpoint(api_base_url, CAPTURE_PATH),
            bearer_token: token.to_string(),
            body: RequestBody::Multipart(self.capture_fields(capture)),
            timeout: UPLOAD_TIMEOUT,
        };

        let outcome = match self.transport.send(request).await {
            Ok(response) => classify_upload_response(response),
            Err(e) => classify_upload_error(e),
        };

        log::info!(
            "[UPLOAD] {} bytes -> {} in {}ms",
            capture.png_bytes.len(),
            outcome.label(),
            start.elapsed().as_millis()
        );
        outcome
    }

    /// Checks a token during pairing. Never used on the capture path.
    pub async fn verify(&self, token: &str, api_base_url: &str) -> VerifyOutcome {
        let token = token.trim();
        if token.is_empty() {
            return VerifyOutcome::Failed(VerifyFailure::InvalidToken);
        }

        let request = HttpRequest {
            url: endpoint(api_base_url, VERIFY_PATH),
            bearer_token: token.to_string(),
            body: RequestBody::Empty,
            timeout: VERIFY_TIMEOUT,
        };

        match self.transport.send(request).await {
            Ok(response) => classify_verify_response(&response),
            Err(e) => {
                log::warn!("[UPLOAD] Token verification failed: {}", e);
                classify_verify_error(&e)
            }
        }
    }
}
