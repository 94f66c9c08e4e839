//! Wire formats
//!
//! Request and response shapes exchanged with the server, and the canonical
//! [`AssistantDelta`] every adapter converts its responses into.

use serde::{Deserialize, Serialize};

use super::message::{Message, Role};

/// A chat message as sent to the chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<bool>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.sender,
            content: message.content.clone(),
            prefix: None,
        }
    }
}

/// Text fields of a chat `delta` or `message` object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatFields {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Older servers name the reasoning field this way.
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub delta: Option<ChatFields>,
    #[serde(default)]
    pub message: Option<ChatFields>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A chat-completions response or stream chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionPayload {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A completions response or stream chunk.
///
/// OpenAI-style servers put the text in `choices[0].text`; the llama.cpp
/// native endpoint uses a top-level `content`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionPayload {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A provider response before normalization.
#[derive(Debug, Clone)]
pub enum RawProviderChunk {
    Native(ChatCompletionPayload),
    Legacy(CompletionPayload),
}

/// The one shape adapters hand upward: role, visible text and reasoning text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantDelta {
    pub role: Role,
    pub content: Option<String>,
    pub reasoning: Option<String>,
}

impl AssistantDelta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.into()),
            reasoning: None,
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            reasoning: Some(text.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty)
            && self.reasoning.as_deref().is_none_or(str::is_empty)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl RawProviderChunk {
    /// Normalize into an [`AssistantDelta`], reading the streaming `delta`
    /// object first and falling back to a whole `message`.
    pub fn into_delta(self) -> AssistantDelta {
        match self {
            RawProviderChunk::Native(payload) => {
                let fields = payload
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.or(c.message))
                    .unwrap_or_default();
                let reasoning = non_empty(fields.reasoning).or(non_empty(fields.reasoning_content));
                AssistantDelta {
                    role: Role::Assistant,
                    content: non_empty(fields.content),
                    reasoning,
                }
            }
            RawProviderChunk::Legacy(payload) => {
                let text = payload
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.text)
                    .or(payload.content);
                AssistantDelta {
                    role: Role::Assistant,
                    content: non_empty(text),
                    reasoning: None,
                }
            }
        }
    }
}

/// Body of the template-application endpoint's response.
#[derive(Debug, Clone, Deserialize)]
pub struct AppliedTemplate {
    pub prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn native(value: serde_json::Value) -> RawProviderChunk {
        RawProviderChunk::Native(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn prefix_flag_is_omitted_unless_set() {
        let mut msg = WireMessage::from(&Message::assistant("Once"));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"role": "assistant", "content": "Once"})
        );
        msg.prefix = Some(true);
        assert_eq!(serde_json::to_value(&msg).unwrap()["prefix"], json!(true));
    }

    #[test]
    fn native_delta_and_message_shapes() {
        let streamed = native(json!({"choices": [{"delta": {"content": "Hi"}}]})).into_delta();
        assert_eq!(streamed, AssistantDelta::content("Hi"));

        let whole = native(json!({"choices": [{"message": {"role": "assistant", "content": "Hello"}}]}))
            .into_delta();
        assert_eq!(whole.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn reasoning_content_is_aliased() {
        let delta = native(json!({"choices": [{"delta": {"reasoning_content": "hmm"}}]})).into_delta();
        assert_eq!(delta, AssistantDelta::reasoning("hmm"));

        let both = native(json!({"choices": [{"delta": {"reasoning": "a", "reasoning_content": "b"}}]}))
            .into_delta();
        assert_eq!(both.reasoning.as_deref(), Some("a"));
    }

    #[test]
    fn legacy_text_and_content_shapes() {
        let oai: CompletionPayload = serde_json::from_value(json!({"choices": [{"text": "abc"}]})).unwrap();
        assert_eq!(
            RawProviderChunk::Legacy(oai).into_delta(),
            AssistantDelta::content("abc")
        );

        let native_cpp: CompletionPayload = serde_json::from_value(json!({"content": "xyz", "stop": false})).unwrap();
        assert_eq!(
            RawProviderChunk::Legacy(native_cpp).into_delta(),
            AssistantDelta::content("xyz")
        );
    }

    #[test]
    fn empty_chunks_normalize_to_empty_delta() {
        assert!(native(json!({"choices": []})).into_delta().is_empty());
        assert!(native(json!({"choices": [{"delta": {"content": ""}}]})).into_delta().is_empty());
    }
}
