//! Protocol Adapters
//!
//! One adapter per way of asking a server for the next assistant turn:
//!
//! - [`NativeChatAdapter`]: `POST chatCompletionsPath` with a message array
//! - [`RemoteTemplateAdapter`]: server-side template application, then completions
//! - [`LocalTemplateAdapter`]: minijinja rendering, then completions
//!
//! The two template adapters hand their rendered prompt to
//! [`CompletionsAdapter`]. Every adapter converts its responses into
//! [`AssistantDelta`] values before they leave this module.

use async_trait::async_trait;
use futures::{TryStreamExt, future};
use serde_json::Value;

use crate::error::LlmError;
use crate::stream::{DeltaStream, JsonStream};
use crate::types::{AssistantDelta, PendingRequest, RawProviderChunk};
use crate::utils::CancelHandle;

pub mod chat;
pub mod completions;
pub mod local_template;
pub mod remote_template;
pub mod template;

pub use chat::NativeChatAdapter;
pub use completions::CompletionsAdapter;
pub use local_template::{LocalTemplateAdapter, TemplateSource};
pub use remote_template::RemoteTemplateAdapter;
pub use template::TemplateRenderer;

/// What an adapter produced for one request.
pub enum AdapterOutput {
    /// Streaming response, one delta per server chunk.
    Stream(DeltaStream),
    /// Whole response of a non-streaming request.
    Complete(AssistantDelta),
}

impl std::fmt::Debug for AdapterOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("AdapterOutput::Stream(..)"),
            Self::Complete(delta) => f.debug_tuple("AdapterOutput::Complete").field(delta).finish(),
        }
    }
}

/// Common contract of the request paths.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Checks that need no network I/O. Run before any request is issued.
    fn validate(&self, request: &PendingRequest) -> Result<(), LlmError>;

    /// Issue the request and return its response.
    async fn create(
        &self,
        request: &PendingRequest,
        stream: bool,
        cancel: &CancelHandle,
    ) -> Result<AdapterOutput, LlmError>;
}

/// Decode SSE payloads into deltas. Payloads that do not fit the expected
/// shape are logged and skipped like malformed frames; empty deltas are dropped.
pub(crate) fn decode_stream(
    json: JsonStream,
    decode: fn(Value) -> Result<RawProviderChunk, serde_json::Error>,
) -> DeltaStream {
    let deltas = json.try_filter_map(move |value| {
        let delta = match decode(value) {
            Ok(chunk) => Some(chunk.into_delta()).filter(|d| !d.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping chunk with unexpected shape");
                None
            }
        };
        future::ready(Ok(delta))
    });
    Box::pin(deltas)
}

pub(crate) fn native_chunk(value: Value) -> Result<RawProviderChunk, serde_json::Error> {
    serde_json::from_value(value).map(RawProviderChunk::Native)
}

pub(crate) fn legacy_chunk(value: Value) -> Result<RawProviderChunk, serde_json::Error> {
    serde_json::from_value(value).map(RawProviderChunk::Legacy)
}
