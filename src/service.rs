//! The remote conversion service.
//!
//! [`ConversionService`] is the seam the engine talks through: submit bytes,
//! get a request id; ask about a request id, get a [`RemoteStatus`]. The
//! production implementation is [`MarkerClient`]; tests script their own.
//!
//! Raw responses are decoded exactly once, here, into the closed
//! [`RemoteStatus`] variant. Nothing past this module looks at status strings.

use crate::config::ConversionOptions;
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// A remote capability that converts documents asynchronously.
#[async_trait]
pub trait ConversionService: Send + Sync {
    /// Upload a document. Returns the service's request id.
    async fn submit(
        &self,
        file_name: &str,
        bytes: &[u8],
        mime: &str,
        options: &ConversionOptions,
    ) -> Result<String, ServiceError>;

    /// Ask for the state of a previously submitted request.
    async fn status(&self, request_id: &str) -> Result<RemoteStatus, ServiceError>;
}

/// Decoded state of a remote request.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    /// Still queued or processing.
    Pending,
    /// Finished; carries the converted content.
    Complete(RemoteOutput),
    /// Finished unsuccessfully.
    Failed(String),
}

/// Result payload of a completed request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteOutput {
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub json_data: Option<serde_json::Value>,
    /// File name → base64 content.
    pub images: BTreeMap<String, String>,
    pub page_count: Option<usize>,
}

impl RemoteOutput {
    /// Textual content in whichever format the service returned, or `None` if empty.
    pub fn content(&self) -> Option<String> {
        let text = if let Some(ref md) = self.markdown {
            Some(md.clone())
        } else if let Some(ref html) = self.html {
            Some(html.clone())
        } else {
            self.json_data.as_ref().map(|v| v.to_string())
        };
        text.filter(|t| !t.trim().is_empty())
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: WireStatus,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    json: Option<serde_json::Value>,
    #[serde(default)]
    json_data: Option<serde_json::Value>,
    #[serde(default)]
    images: Option<BTreeMap<String, String>>,
    #[serde(default)]
    page_count: Option<usize>,
}

/// Decode a submission response body.
pub fn decode_submit(http_status: u16, body: &[u8]) -> Result<String, ServiceError> {
    if !(200..300).contains(&http_status) {
        return Err(ServiceError::Http {
            status: http_status,
            body: snippet(body),
        });
    }
    let resp: SubmitResponse = serde_json::from_slice(body)
        .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
    if !resp.success {
        return Err(ServiceError::Rejected(
            resp.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    match resp.request_id {
        Some(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        _ => Err(ServiceError::MalformedResponse(
            "success without request_id".into(),
        )),
    }
}

/// Decode a status response body for `request_id`.
pub fn decode_status(
    request_id: &str,
    http_status: u16,
    body: &[u8],
) -> Result<RemoteStatus, ServiceError> {
    if http_status == 404 {
        return Err(ServiceError::NotFound {
            request_id: request_id.to_string(),
        });
    }
    if !(200..300).contains(&http_status) {
        return Err(ServiceError::Http {
            status: http_status,
            body: snippet(body),
        });
    }
    let trimmed = String::from_utf8_lossy(body);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "{}" {
        return Err(ServiceError::NotFound {
            request_id: request_id.to_string(),
        });
    }

    let resp: StatusResponse = serde_json::from_str(trimmed)
        .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;

    Ok(match resp.status {
        WireStatus::Pending | WireStatus::Processing => RemoteStatus::Pending,
        WireStatus::Failed => RemoteStatus::Failed(
            resp.error
                .unwrap_or_else(|| "service reported failure".to_string()),
        ),
        WireStatus::Complete if resp.success == Some(false) => RemoteStatus::Failed(
            resp.error
                .unwrap_or_else(|| "service reported failure".to_string()),
        ),
        WireStatus::Complete => RemoteStatus::Complete(RemoteOutput {
            markdown: resp.markdown,
            html: resp.html,
            json_data: resp.json_data.or(resp.json),
            images: resp.images.unwrap_or_default(),
            page_count: resp.page_count,
        }),
    })
}

fn snippet(body: &[u8]) -> String {
    let s = String::from_utf8_lossy(body);
    let s = s.trim();
    if s.chars().count() > 200 {
        format!("{}\u{2026}", s.chars().take(199).collect::<String>())
    } else {
        s.to_string()
    }
}

// ── HTTP client ──────────────────────────────────────────────────────────

/// reqwest-backed client for the Marker API.
#[derive(Debug, Clone)]
pub struct MarkerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl MarkerClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout_secs,
        })
    }

    fn map_err(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout {
                secs: self.timeout_secs,
            }
        } else if e.is_decode() {
            ServiceError::MalformedResponse(e.to_string())
        } else {
            ServiceError::Network(e.to_string())
        }
    }

    fn build_form(
        file_name: &str,
        bytes: &[u8],
        mime: &str,
        options: &ConversionOptions,
    ) -> Result<Form, ServiceError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| ServiceError::Rejected(format!("invalid MIME type '{mime}': {e}")))?;

        let flag = |b: bool| if b { "true" } else { "false" };
        Ok(Form::new()
            .part("file", part)
            .text("langs", options.langs.clone())
            .text("force_ocr", flag(options.force_ocr))
            .text("paginate", flag(options.paginate))
            .text("strip_existing_ocr", flag(options.strip_existing_ocr))
            .text(
                "disable_image_extraction",
                flag(options.disable_image_extraction),
            )
            .text("use_llm", flag(options.use_llm))
            .text("output_format", options.output_format.as_str()))
    }
}

#[async_trait]
impl ConversionService for MarkerClient {
    async fn submit(
        &self,
        file_name: &str,
        bytes: &[u8],
        mime: &str,
        options: &ConversionOptions,
    ) -> Result<String, ServiceError> {
        let form = Self::build_form(file_name, bytes, mime, options)?;
        debug!("POST {} ({} bytes, {})", self.base_url, bytes.len(), mime);

        let response = self
            .http
            .post(&self.base_url)
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.map_err(e))?;
        decode_submit(status, &body)
    }

    async fn status(&self, request_id: &str) -> Result<RemoteStatus, ServiceError> {
        let url = format!("{}/{}", self.base_url, request_id);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.map_err(e))?;
        decode_status(request_id, status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_success() {
        let body = br#"{"success": true, "request_id": "abc", "request_check_url": "https://x/abc"}"#;
        assert_eq!(decode_submit(200, body), Ok("abc".to_string()));
    }

    #[test]
    fn submit_rejected() {
        let body = br#"{"success": false, "error": "Invalid API key", "request_id": ""}"#;
        assert_eq!(
            decode_submit(200, body),
            Err(ServiceError::Rejected("Invalid API key".into()))
        );
    }

    #[test]
    fn submit_garbage_is_transient() {
        let err = decode_submit(200, b"<html>oops</html>").unwrap_err();
        assert!(matches!(err, ServiceError::MalformedResponse(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn submit_server_error() {
        let err = decode_submit(502, b"bad gateway").unwrap_err();
        assert_eq!(
            err,
            ServiceError::Http {
                status: 502,
                body: "bad gateway".into()
            }
        );
        assert!(err.is_transient());
    }

    #[test]
    fn status_pending_and_processing() {
        assert_eq!(
            decode_status("r", 200, br#"{"status": "processing"}"#),
            Ok(RemoteStatus::Pending)
        );
        assert_eq!(
            decode_status("r", 200, br#"{"status": "pending"}"#),
            Ok(RemoteStatus::Pending)
        );
    }

    #[test]
    fn status_complete_with_images() {
        let body = br#"{
            "status": "complete",
            "output_format": "markdown",
            "success": true,
            "markdown": "hello ![](_page_1_Figure_0.jpeg)",
            "images": {"_page_1_Figure_0.jpeg": "aGk="},
            "page_count": 3
        }"#;
        match decode_status("r", 200, body).unwrap() {
            RemoteStatus::Complete(out) => {
                assert_eq!(out.content().as_deref(), Some("hello ![](_page_1_Figure_0.jpeg)"));
                assert_eq!(out.images.len(), 1);
                assert_eq!(out.page_count, Some(3));
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn status_complete_but_unsuccessful_is_failed() {
        let body = br#"{"status": "complete", "success": false, "error": "Could not parse"}"#;
        assert_eq!(
            decode_status("r", 200, body),
            Ok(RemoteStatus::Failed("Could not parse".into()))
        );
    }

    #[test]
    fn status_not_found() {
        assert!(matches!(
            decode_status("gone", 404, b"{}"),
            Err(ServiceError::NotFound { .. })
        ));
        assert!(matches!(
            decode_status("gone", 200, b"null"),
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[test]
    fn status_unknown_value_is_malformed() {
        let err = decode_status("r", 200, br#"{"status": "exploded"}"#).unwrap_err();
        assert!(matches!(err, ServiceError::MalformedResponse(_)));
    }

    #[test]
    fn json_content_is_serialised() {
        let out = RemoteOutput {
            json_data: Some(serde_json::json!({"blocks": []})),
            ..Default::default()
        };
        assert_eq!(out.content().as_deref(), Some(r#"{"blocks":[]}"#));
    }

    #[test]
    fn blank_content_is_none() {
        let out = RemoteOutput {
            markdown: Some("   \n".into()),
            ..Default::default()
        };
        assert!(out.content().is_none());
    }
}
