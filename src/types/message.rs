//! Conversation message types

use serde::{Deserialize, Serialize};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a conversation. Order within a chat is the prompt order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Role,
    pub content: String,
}

impl Message {
    pub fn new(sender: Role, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// The placeholder appended before each generation, seeded with the preset's response prefix.
    pub fn starter(seed: &str) -> Self {
        Self::assistant(seed)
    }

    pub fn is_assistant(&self) -> bool {
        self.sender == Role::Assistant
    }
}

/// The history sent to the server plus the assistant turn being resumed, if any.
///
/// A `continuation` is an assistant message with existing content that the
/// model should extend rather than answer from scratch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingRequest {
    pub history: Vec<Message>,
    pub continuation: Option<Message>,
}

impl PendingRequest {
    pub fn new(history: Vec<Message>) -> Self {
        Self {
            history,
            continuation: None,
        }
    }

    pub fn with_continuation(mut self, message: Message) -> Self {
        self.continuation = Some(message);
        self
    }

    /// Split a message list whose last entry is the assistant turn being generated.
    ///
    /// An empty trailing assistant message is a fresh starter and is dropped;
    /// a non-empty one becomes the continuation.
    pub fn from_messages(mut messages: Vec<Message>) -> Self {
        match messages.last() {
            Some(last) if last.is_assistant() => {
                let last = messages.pop().unwrap_or_else(|| Message::assistant(""));
                if last.content.is_empty() {
                    Self::new(messages)
                } else {
                    Self::new(messages).with_continuation(last)
                }
            }
            _ => Self::new(messages),
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.continuation.is_some()
    }

    /// Text already written for the turn being generated.
    pub fn seed_content(&self) -> &str {
        self.continuation
            .as_ref()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// History followed by the continuation, as sent to chat-style endpoints.
    pub fn messages(&self) -> Vec<Message> {
        let mut out = self.history.clone();
        if let Some(cont) = &self.continuation {
            out.push(cont.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"sender":"assistant","content":"hi"}"#);
    }

    #[test]
    fn empty_starter_is_dropped() {
        let pending = PendingRequest::from_messages(vec![
            Message::user("hi"),
            Message::starter(""),
        ]);
        assert_eq!(pending.history, vec![Message::user("hi")]);
        assert!(!pending.is_continuation());
    }

    #[test]
    fn seeded_assistant_becomes_continuation() {
        let pending = PendingRequest::from_messages(vec![
            Message::user("hi"),
            Message::assistant("<think>\n"),
        ]);
        assert_eq!(pending.history.len(), 1);
        assert_eq!(pending.seed_content(), "<think>\n");
        assert_eq!(pending.messages().len(), 2);
    }

    #[test]
    fn trailing_user_message_has_no_continuation() {
        let pending = PendingRequest::from_messages(vec![Message::user("hi")]);
        assert_eq!(pending.history.len(), 1);
        assert!(pending.continuation.is_none());
    }
}
