//! Stream type aliases shared across the request pipeline.

use futures::Stream;
use std::pin::Pin;

use crate::error::LlmError;
use crate::types::AssistantDelta;

/// Parsed JSON payloads of an SSE response, in arrival order.
pub type JsonStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value, LlmError>> + Send>>;

/// Normalized deltas produced by a protocol adapter.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<AssistantDelta, LlmError>> + Send>>;

/// Display text after thinking markers have been injected.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;
