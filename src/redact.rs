//! Secret redaction for log lines — scrubs tokens and keys out of server
//! bodies and error text before they are written anywhere.

use regex::Regex;
use std::sync::LazyLock;

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // Authorization headers echoed back in error bodies
        (
            Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]{8,}").unwrap(),
            "bearer",
        ),
        // JSON token fields: "token": "...", "authToken": "...", "access_token": "..."
        (
            Regex::new(r#"(?i)"(auth_?token|access_?token|refresh_?token|token)"\s*:\s*"[^"]*""#)
                .unwrap(),
            "token_field",
        ),
        // JWTs
        (
            Regex::new(r"\beyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\b").unwrap(),
            "jwt",
        ),
        // API keys (common formats: sk-..., pk-..., api-..., etc.)
        (
            Regex::new(r"\b(sk|pk|api|key|token|secret)[-_][a-zA-Z0-9_-]{20,}\b").unwrap(),
            "api_key",
        ),
    ]
});

/// Replaces secrets in `text` with `[REDACTED:<label>]` placeholders.
pub fn redact_secrets(text: &str) -> String {
    let mut cleaned = text.to_string();
    for (pattern, label) in SECRET_PATTERNS.iter() {
        if pattern.is_match(&cleaned) {
            cleaned = pattern
                .replace_all(&cleaned, format!("[REDACTED:{}]", label).as_str())
                .into_owned();
        }
    }
    cleaned
}
