//! SSE line framing
//!
//! Servers emit `data: {json}` lines ending with `data: [DONE]`. The body is
//! split into lines by `LinesCodec`, which keeps partial lines and split
//! multi-byte characters buffered across network reads and strips `\r`.
//!
//! A last line without a terminating newline is still parsed when the body
//! closes, so a server that omits the final `\n` loses no text.

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use crate::error::LlmError;
use crate::stream::JsonStream;
use crate::utils::CancelHandle;

/// One meaningful line of an event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Data(Value),
    Done,
}

/// Interpret one line. Blank, comment and non-`data:` lines yield `None`, as
/// does malformed JSON, which is logged and skipped.
pub fn parse_line(line: &str) -> Option<SseFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Some(payload) = trimmed.strip_prefix("data:") else {
        tracing::trace!(line = %trimmed, "Ignoring non-data SSE line");
        return None;
    };
    let payload = payload.trim_start();
    if payload == "[DONE]" {
        return Some(SseFrame::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Some(SseFrame::Data(value)),
        Err(e) => {
            tracing::warn!(error = %e, payload = %payload, "Skipping malformed SSE frame");
            None
        }
    }
}

/// Surface an in-band `{"error": {...}}` payload as an API error.
fn in_band_error(value: &Value) -> Option<LlmError> {
    let err = value.get("error")?;
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    let code = err
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(500);
    Some(LlmError::api_error(code, message))
}

/// Turn a response body into parsed JSON payloads.
///
/// Ends without error at `[DONE]` or when the body closes. Cancellation makes
/// the pending read resolve with [`LlmError::Aborted`].
pub fn sse_json_stream<S, E>(bytes: S, cancel: CancelHandle) -> JsonStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let reader = StreamReader::new(bytes.map_err(|e| std::io::Error::other(e.to_string())));
    let mut lines = Box::pin(FramedRead::new(reader, LinesCodec::new()));

    let out = async_stream::stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = lines.next() => Some(item),
            };
            let line = match next {
                None => {
                    yield Err(LlmError::Aborted);
                    return;
                }
                Some(None) => return,
                Some(Some(Err(e))) => {
                    yield Err(LlmError::StreamError(e.to_string()));
                    return;
                }
                Some(Some(Ok(line))) => line,
            };

            match parse_line(&line) {
                Some(SseFrame::Done) => return,
                Some(SseFrame::Data(value)) => {
                    if let Some(err) = in_band_error(&value) {
                        yield Err(err);
                        return;
                    }
                    yield Ok(value);
                }
                None => {}
            }
        }
    };

    Box::pin(out)
}
