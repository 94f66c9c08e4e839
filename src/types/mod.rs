//! Core data types: messages, presets, chats and wire shapes.

pub mod chat;
pub mod config;
pub mod message;
pub mod wire;

pub use chat::{AppSettings, Chat, unique_chat_name, unique_preset_name};
pub use config::{ChatTemplateSpec, LlmConfig, PrefixMode, SamplingParams, ThinkingEscapes};
pub use message::{Message, PendingRequest, Role};
pub use wire::{AssistantDelta, RawProviderChunk, WireMessage};
