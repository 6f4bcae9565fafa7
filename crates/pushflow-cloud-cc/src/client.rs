//! HTTP plumbing: auth, warnings header and error mapping

use crate::api::{ErrorResponse, UNIQUENESS_ERROR};
use pushflow_cloud::{CloudError, Result};
use pushflow_core::Warnings;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Header carrying comma-separated, percent-encoded warnings
const WARNINGS_HEADER: &str = "X-Cf-Warnings";

/// Connection settings for a Cloud Controller
#[derive(Debug, Clone)]
pub struct CcConfig {
    /// API root, e.g. `https://api.example.com`
    pub api: String,
    pub token: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl CcConfig {
    pub fn new(api: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api: api.into().trim_end_matches('/').to_string(),
            token: token.into(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Thin wrapper over `reqwest::Client` speaking the v3 JSON conventions
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: reqwest::Client,
    config: CcConfig,
}

impl HttpClient {
    pub(crate) fn new(config: CcConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("pushflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(map_reqwest)?;
        Ok(Self { client, config })
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.api, path);
        tracing::debug!("{} {}", method, url);
        self.client
            .request(method, url)
            .bearer_auth(&self.config.token)
    }

    /// Send a request and decode the JSON body.
    pub(crate) async fn json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<(T, Warnings)> {
        let (response, warnings) = self.send(request).await?;
        let body = response.bytes().await.map_err(map_reqwest)?;
        let value = serde_json::from_slice(&body)?;
        Ok((value, warnings))
    }

    /// Send a request and discard the body.
    pub(crate) async fn empty(&self, request: RequestBuilder) -> Result<((), Warnings)> {
        let (_, warnings) = self.send(request).await?;
        Ok(((), warnings))
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<(T, Warnings)> {
        self.json(self.request(Method::GET, path)).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(T, Warnings)> {
        self.json(self.request(Method::POST, path).json(body)).await
    }

    pub(crate) async fn patch<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<((), Warnings)> {
        self.empty(self.request(Method::PATCH, path).json(body)).await
    }

    /// Send and turn non-success statuses into [`CloudError`]s.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<(Response, Warnings)> {
        let response = request.send().await.map_err(map_reqwest)?;
        let warnings = warnings_of(&response);
        let status = response.status();
        if status.is_success() {
            return Ok((response, warnings));
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

fn warnings_of(response: &Response) -> Warnings {
    response
        .headers()
        .get_all(WARNINGS_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|w| percent_decode(w.trim()))
        .filter(|w| !w.is_empty())
        .collect()
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Map a non-success response to a [`CloudError`].
pub(crate) fn status_error(status: StatusCode, body: &str) -> CloudError {
    let parsed: ErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .errors
        .iter()
        .map(|e| {
            if e.detail.is_empty() {
                e.title.clone()
            } else {
                e.detail.clone()
            }
        })
        .collect::<Vec<_>>()
        .join("; ");
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("unknown error").to_string()
    } else {
        message
    };

    if parsed.errors.iter().any(|e| e.code == UNIQUENESS_ERROR) {
        return CloudError::AlreadyExists(message);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CloudError::Unauthorized(message),
        StatusCode::NOT_FOUND => CloudError::NotFound(message),
        StatusCode::UNPROCESSABLE_ENTITY => CloudError::UnprocessableEntity(message),
        _ => CloudError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Map a transport-level reqwest failure.
pub(crate) fn map_reqwest(e: reqwest::Error) -> CloudError {
    if e.is_timeout() {
        CloudError::Timeout(e.to_string())
    } else if e.is_decode() {
        CloudError::InvalidResponse(e.to_string())
    } else {
        CloudError::Transport(e.to_string())
    }
}

/// Like [`map_reqwest`], but a broken request body becomes a retryable
/// upload error.
pub(crate) fn map_upload_error(e: reqwest::Error) -> CloudError {
    if e.is_body() || e.is_request() || e.is_connect() {
        CloudError::UploadInterrupted(e.to_string())
    } else {
        map_reqwest(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_mapping() {
        let uniqueness = r#"{"errors":[{"code":10016,"title":"CF-UniquenessError","detail":"Route already exists"}]}"#;
        assert_eq!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, uniqueness),
            CloudError::AlreadyExists("Route already exists".to_string())
        );

        let invalid = r#"{"errors":[{"code":10008,"title":"CF-UnprocessableEntity","detail":"memory must be positive"}]}"#;
        assert_eq!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, invalid),
            CloudError::UnprocessableEntity("memory must be positive".to_string())
        );

        assert_eq!(
            status_error(StatusCode::NOT_FOUND, ""),
            CloudError::NotFound("Not Found".to_string())
        );
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "oops"),
            CloudError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("stack%20cflinuxfs3%20is%20deprecated"), "stack cflinuxfs3 is deprecated");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("a+b"), "a b");
    }
}
