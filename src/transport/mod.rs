//! HTTP transport
//!
//! Raw request primitives against one base URL. Knows nothing about chat
//! semantics: JSON in, JSON (or a stream of SSE JSON payloads) out.

pub mod sse;

pub use sse::{SseFrame, parse_line, sse_json_stream};

use reqwest::Url;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use std::time::Instant;

use crate::error::LlmError;
use crate::observability::format_headers_for_logging;
use crate::stream::JsonStream;
use crate::types::LlmConfig;
use crate::utils::CancelHandle;

/// HTTP client bound to a server base URL.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    page_origin: Option<Url>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
            page_origin: None,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        let mut transport = Self::new(config.base_url.clone());
        transport.api_key = config.api_key().map(str::to_string);
        transport
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Origin of the page hosting the client, used by the mixed-content check.
    pub fn with_page_origin(mut self, origin: Option<Url>) -> Self {
        self.page_origin = origin;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve `path` against the base URL and run the mixed-content check.
    pub fn url_for(&self, path: &str) -> Result<Url, LlmError> {
        let raw = format!("{}{}", self.base_url, path);
        let url = Url::parse(&raw)
            .map_err(|e| LlmError::config(format!("Invalid request URL {raw}: {e}")))?;
        ensure_not_mixed_content(self.page_origin.as_ref(), &url)?;
        Ok(url)
    }

    fn build_headers(&self, stream: bool) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(if stream {
                "text/event-stream"
            } else {
                "application/json"
            }),
        );
        if let Some(key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| LlmError::config(format!("Invalid API key: {e}")))?,
            );
        }
        Ok(headers)
    }

    /// Send and classify the response. Non-2xx statuses become [`LlmError::ApiError`].
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
        cancel: &CancelHandle,
    ) -> Result<reqwest::Response, LlmError> {
        cancel.check()?;
        let started = Instant::now();
        let response = cancel
            .run(async {
                request
                    .send()
                    .await
                    .map_err(|e| LlmError::HttpError(format!("Failed to send request: {e}")))
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("").to_string();
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() { reason } else { body };
            tracing::error!(
                url = %url,
                status_code = status.as_u16(),
                duration_ms = started.elapsed().as_millis() as u64,
                error_text = %message,
                "Request failed"
            );
            return Err(LlmError::api_error(status.as_u16(), message));
        }

        tracing::debug!(
            url = %url,
            status_code = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Response received"
        );
        Ok(response)
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        cancel: &CancelHandle,
    ) -> Result<T, LlmError> {
        let url = self.url_for(path)?;
        let headers = self.build_headers(false)?;
        tracing::info!(method = "POST", url = %url, stream = false, "Request started");
        tracing::debug!(request_headers = %format_headers_for_logging(&headers), "Request details");

        let request = self.client.post(url.clone()).headers(headers).json(body);
        let response = self.send(request, &url, cancel).await?;
        let text = cancel
            .run(async {
                response
                    .text()
                    .await
                    .map_err(|e| LlmError::HttpError(format!("Failed to read response: {e}")))
            })
            .await?;
        serde_json::from_str(&text)
            .map_err(|e| LlmError::ParseError(format!("Invalid JSON response from {url}: {e}")))
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancelHandle,
    ) -> Result<T, LlmError> {
        let url = self.url_for(path)?;
        let mut headers = self.build_headers(false)?;
        headers.remove(CONTENT_TYPE);
        tracing::info!(method = "GET", url = %url, "Request started");

        let request = self.client.get(url.clone()).headers(headers);
        let response = self.send(request, &url, cancel).await?;
        let text = cancel
            .run(async {
                response
                    .text()
                    .await
                    .map_err(|e| LlmError::HttpError(format!("Failed to read response: {e}")))
            })
            .await?;
        serde_json::from_str(&text)
            .map_err(|e| LlmError::ParseError(format!("Invalid JSON response from {url}: {e}")))
    }

    /// POST a JSON body and stream the SSE `data:` payloads of the response.
    pub async fn post_stream(
        &self,
        path: &str,
        body: &serde_json::Value,
        cancel: &CancelHandle,
    ) -> Result<JsonStream, LlmError> {
        let url = self.url_for(path)?;
        let headers = self.build_headers(true)?;
        tracing::info!(method = "POST", url = %url, stream = true, "Request started");
        tracing::debug!(request_headers = %format_headers_for_logging(&headers), "Request details");

        let request = self.client.post(url.clone()).headers(headers).json(body);
        let response = self.send(request, &url, cancel).await?;
        Ok(sse_json_stream(response.bytes_stream(), cancel.clone()))
    }
}

/// Reject plain-http targets from an https page unless the target is loopback.
///
/// Browsers block such requests silently; failing here gives a clear error.
pub fn ensure_not_mixed_content(page_origin: Option<&Url>, target: &Url) -> Result<(), LlmError> {
    let Some(page) = page_origin else {
        return Ok(());
    };
    if page.scheme() != "https" || target.scheme() != "http" {
        return Ok(());
    }
    if target.host_str().is_some_and(is_loopback_host) {
        return Ok(());
    }
    Err(LlmError::MixedContent(format!(
        "{target} uses http while the page is served over https; use https or a loopback address"
    )))
}

fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
