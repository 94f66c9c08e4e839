//! Legacy completions adapter

use serde_json::Value;

use super::{AdapterOutput, decode_stream, legacy_chunk};
use crate::error::LlmError;
use crate::transport::HttpTransport;
use crate::types::LlmConfig;
use crate::utils::CancelHandle;

/// Posts a rendered prompt to the completions endpoint.
///
/// Only reached through the template adapters, which supply the prompt.
#[derive(Debug, Clone)]
pub struct CompletionsAdapter {
    transport: HttpTransport,
    config: LlmConfig,
    path: String,
}

impl CompletionsAdapter {
    pub fn new(transport: HttpTransport, config: LlmConfig) -> Result<Self, LlmError> {
        let path = config
            .completions_path()
            .ok_or_else(|| {
                LlmError::config(
                    "A completions path is required when the chat endpoint cannot serve this request",
                )
            })?
            .to_string();
        Ok(Self {
            transport,
            config,
            path,
        })
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        self.transport.url_for(&self.path)?;
        Ok(())
    }

    pub fn build_body(&self, prompt: &str, stream: bool) -> Result<Value, LlmError> {
        let mut body = self.config.request_params()?;
        body.insert("prompt".to_string(), Value::String(prompt.to_string()));
        body.insert("stream".to_string(), Value::Bool(stream));
        Ok(Value::Object(body))
    }

    pub async fn complete(
        &self,
        prompt: &str,
        stream: bool,
        cancel: &CancelHandle,
    ) -> Result<AdapterOutput, LlmError> {
        let body = self.build_body(prompt, stream)?;
        tracing::debug!(path = %self.path, prompt_chars = prompt.chars().count(), "Sending completion");

        if stream {
            let json = self.transport.post_stream(&self.path, &body, cancel).await?;
            Ok(AdapterOutput::Stream(decode_stream(json, legacy_chunk)))
        } else {
            let value: Value = self.transport.post_json(&self.path, &body, cancel).await?;
            Ok(AdapterOutput::Complete(legacy_chunk(value)?.into_delta()))
        }
    }
}
