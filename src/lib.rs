//! # llmchat
//!
//! Streaming chat client core for OpenAI-compatible and llama.cpp-compatible
//! inference servers.
//!
#![deny(unsafe_code)]

//! ## Features
//!
//! - **Automatic protocol selection**: native chat completions, or a
//!   completions fallback driven by a remote, server-provided or custom chat
//!   template when the chat endpoint cannot continue an assistant turn.
//! - **Continuation**: resume a partial assistant message with `prefix`,
//!   `continue_final_message` or sentinel-truncated templates.
//! - **Reasoning markup**: separately reported reasoning is folded into the
//!   text between configurable thinking markers, and can be masked from
//!   history.
//! - **Frame-coalesced streaming**: a per-chat controller buffers tokens and
//!   writes them at most once per frame, with cancellation and a guard against
//!   writes into a chat the user has left.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llmchat::prelude::*;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ChatObserver for Printer {
//!     fn on_messages_changed(&self, _chat_id: uuid::Uuid, messages: &[Message]) {
//!         if let Some(last) = messages.last() {
//!             println!("{}: {}", last.sender, last.content);
//!         }
//!     }
//!
//!     fn on_error(&self, header: &str, content: &str) {
//!         eprintln!("{header}: {content}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LlmError> {
//!     let config = LlmConfig::default_preset();
//!     let chat = Chat::new("Chat 1", Some(&config));
//!     let controller =
//!         ConversationController::open(&chat, config, ConversationGuard::new(), Arc::new(Printer));
//!
//!     controller.send_message("Hello!").await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod storage;
pub mod stream;
pub mod thinking;
pub mod transport;
pub mod types;
pub mod utils;

pub use error::LlmError;

/// Commonly used types.
pub mod prelude {
    pub use crate::controller::{
        ChatObserver, ControllerOptions, ConversationController, ConversationGuard,
    };
    pub use crate::dispatch::{Dispatcher, Protocol, select_protocol};
    pub use crate::error::LlmError;
    pub use crate::storage::{FileStore, KeyValueStore, Library, MemoryStore};
    pub use crate::thinking::{ThinkingInjector, mask_history, strip_thinking};
    pub use crate::types::{
        AppSettings, Chat, ChatTemplateSpec, LlmConfig, Message, PendingRequest, PrefixMode, Role,
        SamplingParams, ThinkingEscapes,
    };
    pub use crate::utils::CancelHandle;
}
