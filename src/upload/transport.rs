//! HTTP transport seam for the capture-ingest API.
//!
//! [`UploadClient`](super::UploadClient) builds transport-agnostic requests;
//! [`ReqwestTransport`] sends them. Tests substitute their own transport.

use async_trait::async_trait;
use std::time::Duration;

/// Connect (DNS + TCP + TLS) budget applied to every request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(12);

/// One multipart form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Text {
        name: &'static str,
        value: String,
    },
    File {
        name: &'static str,
        file_name: String,
        mime: &'static str,
        bytes: Vec<u8>,
    },
}

impl FormField {
    pub fn name(&self) -> &'static str {
        match self {
            FormField::Text { name, .. } | FormField::File { name, .. } => name,
        }
    }
}

/// Request body variants used by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    Multipart(Vec<FormField>),
}

/// A bearer-authenticated POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub bearer_token: String,
    pub body: RequestBody,
    /// Total budget for the request, including reading the body.
    pub timeout: Duration,
}

/// Status plus raw body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Sends one request and returns whatever the server answered.
///
/// Non-2xx statuses are responses, not errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("send-to-crm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

fn into_form(fields: Vec<FormField>) -> Result<reqwest::multipart::Form, TransportError> {
    let mut form = reqwest::multipart::Form::new();
    for field in fields {
        form = match field {
            FormField::Text { name, value } => form.text(name, value),
            FormField::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(mime)
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                form.part(name, part)
            }
        };
    }
    Ok(form)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .post(&request.url)
            .bearer_auth(&request.bearer_token)
            .timeout(request.timeout);

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Multipart(fields) => builder.multipart(into_form(fields)?),
        };

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;

        Ok(HttpResponse { status, body })
    }
}
