//! Native chat-completions adapter

use async_trait::async_trait;
use serde_json::Value;

use super::{AdapterOutput, ProtocolAdapter, decode_stream, native_chunk};
use crate::error::LlmError;
use crate::transport::HttpTransport;
use crate::types::{LlmConfig, PendingRequest, PrefixMode, WireMessage};
use crate::utils::CancelHandle;

/// Posts the message array to the chat-completions endpoint.
///
/// A continuation is marked according to the preset's [`PrefixMode`]:
/// `prefix: true` on the last message, or a top-level
/// `continue_final_message: true`.
#[derive(Debug, Clone)]
pub struct NativeChatAdapter {
    transport: HttpTransport,
    config: LlmConfig,
    path: String,
}

impl NativeChatAdapter {
    pub fn new(transport: HttpTransport, config: LlmConfig) -> Result<Self, LlmError> {
        let path = config
            .chat_completions_path()
            .ok_or_else(|| LlmError::config("No chat completions path configured"))?
            .to_string();
        Ok(Self {
            transport,
            config,
            path,
        })
    }

    /// Request body for `request`.
    pub fn build_body(&self, request: &PendingRequest, stream: bool) -> Result<Value, LlmError> {
        let mut body = self.config.request_params()?;
        let mut messages: Vec<WireMessage> = request.history.iter().map(WireMessage::from).collect();

        if let Some(continuation) = &request.continuation {
            let mut last = WireMessage::from(continuation);
            match self.config.prefix_mode {
                PrefixMode::Prefix => last.prefix = Some(true),
                PrefixMode::ContinueFinalMessage => {
                    body.insert("continue_final_message".to_string(), Value::Bool(true));
                }
                PrefixMode::Implied | PrefixMode::None => {}
            }
            messages.push(last);
        }

        body.insert("messages".to_string(), serde_json::to_value(messages)?);
        body.insert("stream".to_string(), Value::Bool(stream));
        Ok(Value::Object(body))
    }
}

#[async_trait]
impl ProtocolAdapter for NativeChatAdapter {
    fn name(&self) -> &'static str {
        "chat-completions"
    }

    fn validate(&self, request: &PendingRequest) -> Result<(), LlmError> {
        if request.is_continuation() && self.config.sampling.has_constraint() {
            return Err(LlmError::config(
                "Cannot continue an assistant message while a grammar or JSON schema is set",
            ));
        }
        self.transport.url_for(&self.path)?;
        Ok(())
    }

    async fn create(
        &self,
        request: &PendingRequest,
        stream: bool,
        cancel: &CancelHandle,
    ) -> Result<AdapterOutput, LlmError> {
        self.validate(request)?;
        let body = self.build_body(request, stream)?;
        tracing::debug!(
            path = %self.path,
            messages = request.history.len() + usize::from(request.is_continuation()),
            continuation = request.is_continuation(),
            prefix_mode = ?self.config.prefix_mode,
            "Sending chat completion"
        );

        if stream {
            let json = self.transport.post_stream(&self.path, &body, cancel).await?;
            Ok(AdapterOutput::Stream(decode_stream(json, native_chunk)))
        } else {
            let value: Value = self.transport.post_json(&self.path, &body, cancel).await?;
            Ok(AdapterOutput::Complete(native_chunk(value)?.into_delta()))
        }
    }
}
