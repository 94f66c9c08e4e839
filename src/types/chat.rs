//! Chats and application settings

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

use super::config::LlmConfig;
use super::message::{Message, Role};

/// A conversation bound to one preset by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub name: String,
    pub config_id: Option<Uuid>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Chat {
    /// Create an empty chat, seeded with the preset's default system prompt.
    pub fn new(name: impl Into<String>, config: Option<&LlmConfig>) -> Self {
        let messages = config
            .and_then(|c| c.default_system_prompt.as_deref())
            .filter(|p| !p.is_empty())
            .map(|p| vec![Message::system(p)])
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            config_id: config.map(|c| c.id),
            messages,
        }
    }

    /// Bind this chat to another preset.
    ///
    /// Only the relation changes. With `replace_system_prompt`, a leading
    /// system message is swapped for the new preset's default (or removed when
    /// the preset has none), and one is inserted if the chat had none.
    pub fn rebind(&mut self, config: &LlmConfig, replace_system_prompt: bool) {
        self.config_id = Some(config.id);
        if !replace_system_prompt {
            return;
        }

        let prompt = config
            .default_system_prompt
            .as_deref()
            .filter(|p| !p.is_empty());
        let has_system = self
            .messages
            .first()
            .is_some_and(|m| m.sender == Role::System);

        match (has_system, prompt) {
            (true, Some(p)) => self.messages[0].content = p.to_string(),
            (true, None) => {
                self.messages.remove(0);
            }
            (false, Some(p)) => self.messages.insert(0, Message::system(p)),
            (false, None) => {}
        }
    }
}

/// User-interface preferences persisted alongside chats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub show_system_prompt: bool,
    pub expand_thinking_by_default: bool,
    pub wide_assistant_messages: bool,
    pub border_assistant_messages: bool,
    pub theme: u8,
    pub replace_system_prompt_on_config_change: bool,
    pub markdown_for_user_messages: bool,
    pub smooth_animations: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            show_system_prompt: true,
            expand_thinking_by_default: true,
            wide_assistant_messages: false,
            border_assistant_messages: true,
            theme: 0,
            replace_system_prompt_on_config_change: true,
            markdown_for_user_messages: false,
            smooth_animations: false,
        }
    }
}

static COPY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" \(copy (\d+)\)$").expect("static regex"));

/// "Chat 1", "Chat 2", ... skipping names already taken.
pub fn unique_chat_name(existing: &[String], base: &str) -> String {
    let mut n = 1;
    loop {
        let candidate = format!("{base} {n}");
        if !existing.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Keep `name` if free, else append or bump a " (copy N)" suffix.
pub fn unique_preset_name(existing: &[String], name: &str) -> String {
    if !existing.iter().any(|e| e == name) {
        return name.to_string();
    }

    let (base, mut n) = match COPY_SUFFIX.captures(name) {
        Some(caps) => {
            let current = caps[1].parse::<u32>().unwrap_or(0);
            (COPY_SUFFIX.replace(name, "").into_owned(), current + 1)
        }
        None => (name.to_string(), 1),
    };

    loop {
        let candidate = format!("{base} (copy {n})");
        if !existing.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
