//! Maps raw ingest-API responses onto [`UploadOutcome`].
//!
//! Order matters: the most specific classification is checked first.
//! Optional server fields are filled with defaults here, once, so the rest of
//! the app never inspects raw JSON.

use super::transport::{HttpResponse, TransportError};
use super::{FailureReason, QuotaAction, QuotaInfo, UploadOutcome, VerifyFailure, VerifyOutcome};
use serde::Deserialize;

/// Shown when the server's quota error carries no message.
pub const DEFAULT_QUOTA_MESSAGE: &str = "Monthly capture limit reached.";
/// Label for the upgrade action when the server sends none.
pub const DEFAULT_UPGRADE_LABEL: &str = "Upgrade to Pro";
/// Action type for opening a link in the browser.
pub const OPEN_URL_ACTION: &str = "open_url";

const QUOTA_EXCEEDED_CODE: &str = "quota_exceeded";

/// Structured 403 body. Every field is optional on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForbiddenBody {
    error: Option<String>,
    current_count: Option<u64>,
    #[serde(alias = "quota_limit")]
    quota: Option<u64>,
    #[serde(alias = "user_message")]
    message: Option<String>,
    billing_url: Option<String>,
    action: Option<RawAction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAction {
    #[serde(rename = "type")]
    kind: Option<String>,
    url: Option<String>,
    label: Option<String>,
}

impl ForbiddenBody {
    fn into_quota_info(self) -> QuotaInfo {
        let raw = self.action.unwrap_or_default();
        let action = QuotaAction {
            kind: non_blank(raw.kind).unwrap_or_else(|| OPEN_URL_ACTION.to_string()),
            url: non_blank(raw.url).or_else(|| non_blank(self.billing_url)),
            label: non_blank(raw.label).unwrap_or_else(|| DEFAULT_UPGRADE_LABEL.to_string()),
        };

        QuotaInfo {
            current_count: self.current_count,
            quota_limit: self.quota,
            user_message: non_blank(self.message)
                .unwrap_or_else(|| DEFAULT_QUOTA_MESSAGE.to_string()),
            action,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Classifies an upload response.
pub fn classify_upload_response(response: HttpResponse) -> UploadOutcome {
    let HttpResponse { status, body } = response;

    match status {
        200..=299 => UploadOutcome::Success(serde_json::from_str(&body).ok()),
        401 => UploadOutcome::AuthInvalid,
        403 => match serde_json::from_str::<ForbiddenBody>(&body) {
            Ok(parsed) if parsed.error.as_deref() == Some(QUOTA_EXCEEDED_CODE) => {
                UploadOutcome::QuotaExceeded(parsed.into_quota_info())
            }
            _ => UploadOutcome::Forbidden(body),
        },
        _ => UploadOutcome::TransientFailure {
            reason: FailureReason::HttpStatus(status),
            details: body,
        },
    }
}

/// Classifies a transport failure during upload.
pub fn classify_upload_error(error: TransportError) -> UploadOutcome {
    let reason = match &error {
        TransportError::Timeout => FailureReason::Timeout,
        TransportError::Network(_) | TransportError::InvalidRequest(_) => FailureReason::Network,
    };
    UploadOutcome::TransientFailure {
        reason,
        details: error.to_string(),
    }
}

/// Classifies a token verification response.
pub fn classify_verify_response(response: &HttpResponse) -> VerifyOutcome {
    match response.status {
        200..=299 => VerifyOutcome::Ok,
        401 => VerifyOutcome::Failed(VerifyFailure::InvalidToken),
        status => VerifyOutcome::Failed(VerifyFailure::HttpStatus(status)),
    }
}

/// Classifies a transport failure during verification.
pub fn classify_verify_error(error: &TransportError) -> VerifyOutcome {
    match error {
        TransportError::Timeout => VerifyOutcome::Failed(VerifyFailure::Timeout),
        _ => VerifyOutcome::Failed(VerifyFailure::Network),
    }
}
