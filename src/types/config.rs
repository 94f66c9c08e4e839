//! Preset configuration
//!
//! An [`LlmConfig`] ("preset") bundles the server connection, the endpoint
//! paths available on that server, thinking-markup handling and the sampling
//! parameters forwarded verbatim with every request. Field names follow the
//! JSON shape presets are stored in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::LlmError;

/// How a trailing assistant message is continued on the chat-completions endpoint.
///
/// Stored as an integer: 0 = none, 1 = `"prefix": true` on the message,
/// 2 = top-level `"continue_final_message": true`, 3 = implied by the trailing role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PrefixMode {
    None,
    #[default]
    Prefix,
    ContinueFinalMessage,
    Implied,
}

impl TryFrom<u8> for PrefixMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Prefix),
            2 => Ok(Self::ContinueFinalMessage),
            3 => Ok(Self::Implied),
            other => Err(format!("unknown prefix mode {other}")),
        }
    }
}

impl From<PrefixMode> for u8 {
    fn from(mode: PrefixMode) -> Self {
        match mode {
            PrefixMode::None => 0,
            PrefixMode::Prefix => 1,
            PrefixMode::ContinueFinalMessage => 2,
            PrefixMode::Implied => 3,
        }
    }
}

/// Markers delimiting reasoning spans inside assistant content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingEscapes {
    pub start: String,
    pub end: String,
}

impl ThinkingEscapes {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.start.is_empty() && !self.end.is_empty()
    }
}

/// A tokenizer-config style chat template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTemplateSpec {
    pub chat_template: String,
    #[serde(default)]
    pub bos_token: String,
    #[serde(default)]
    pub eos_token: String,
}

/// Sampling and server parameters passed through with every request.
///
/// Unset fields are omitted from the request body. Keys this struct does not
/// know about are kept in `extra` and passed through as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_predict: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typical_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_keep: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_indent: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynatemp_range: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynatemp_exponent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat_tau: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat_eta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_last_n: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_base: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_allowed_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_penalty_last_n: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_sequence_breakers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xtc_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xtc_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_eos: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_probs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_keep: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_max_predict_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_slot: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_prompt: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_tokens: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samplers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings_per_token: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_sampling_probs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_reasoning: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SamplingParams {
    /// Whether output is constrained by a grammar or a JSON schema.
    pub fn has_constraint(&self) -> bool {
        let grammar = self.grammar.as_deref().is_some_and(|g| !g.trim().is_empty());
        let schema = self.json_schema.as_ref().is_some_and(|s| !s.is_null());
        grammar || schema
    }

    /// Serialize into a JSON object for merging into a request body.
    pub fn to_body(&self) -> Result<Map<String, Value>, LlmError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(LlmError::ParseError(format!(
                "sampling parameters serialized to {other}"
            ))),
        }
    }
}

/// A named preset: server, endpoints and generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_completions_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completions_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "chatCompletionsPrefixAllowed", default)]
    pub prefix_mode: PrefixMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_prefix: Option<String>,
    /// Raw so that a malformed value only disables this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_template: Option<Value>,
    #[serde(rename = "thinking_escapes", default, skip_serializing_if = "Option::is_none")]
    pub thinking_escapes: Option<Value>,
    #[serde(rename = "mask_thinking", default)]
    pub mask_thinking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

impl LlmConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            base_url: base_url.into(),
            chat_completions_path: None,
            completions_path: None,
            template_path: None,
            props_path: None,
            api_key: None,
            model: None,
            prefix_mode: PrefixMode::default(),
            response_prefix: None,
            chat_template: None,
            thinking_escapes: None,
            mask_thinking: false,
            default_system_prompt: None,
            stream: None,
            sampling: SamplingParams::default(),
        }
    }

    /// The preset created when none exist yet.
    pub fn default_preset() -> Self {
        Self::new("Default", "http://localhost:8080")
            .with_chat_completions_path("/v1/chat/completions")
            .with_default_system_prompt("You are a helpful assistant.")
    }

    pub fn with_chat_completions_path(mut self, path: impl Into<String>) -> Self {
        self.chat_completions_path = Some(path.into());
        self
    }

    pub fn with_completions_path(mut self, path: impl Into<String>) -> Self {
        self.completions_path = Some(path.into());
        self
    }

    pub fn with_template_path(mut self, path: impl Into<String>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    pub fn with_props_path(mut self, path: impl Into<String>) -> Self {
        self.props_path = Some(path.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_prefix_mode(mut self, mode: PrefixMode) -> Self {
        self.prefix_mode = mode;
        self
    }

    pub fn with_response_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.response_prefix = Some(prefix.into());
        self
    }

    pub fn with_chat_template(mut self, template: ChatTemplateSpec) -> Self {
        self.chat_template = serde_json::to_value(template).ok();
        self
    }

    pub fn with_thinking_escapes(mut self, escapes: ThinkingEscapes) -> Self {
        self.thinking_escapes = serde_json::to_value(escapes).ok();
        self
    }

    pub fn with_mask_thinking(mut self, mask: bool) -> Self {
        self.mask_thinking = mask;
        self
    }

    pub fn with_default_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.default_system_prompt = Some(prompt.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn chat_completions_path(&self) -> Option<&str> {
        non_empty(&self.chat_completions_path)
    }

    pub fn completions_path(&self) -> Option<&str> {
        non_empty(&self.completions_path)
    }

    pub fn template_path(&self) -> Option<&str> {
        non_empty(&self.template_path)
    }

    pub fn props_path(&self) -> Option<&str> {
        non_empty(&self.props_path)
    }

    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    pub fn response_prefix(&self) -> &str {
        self.response_prefix.as_deref().unwrap_or("")
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream.unwrap_or(true)
    }

    /// Thinking markers, when configured with both a start and an end.
    pub fn thinking_escapes(&self) -> Option<ThinkingEscapes> {
        decode_field::<ThinkingEscapes>("thinking_escapes", self.thinking_escapes.as_ref())
            .filter(ThinkingEscapes::is_usable)
    }

    /// Custom chat template, when configured and well-formed.
    pub fn chat_template(&self) -> Option<ChatTemplateSpec> {
        decode_field::<ChatTemplateSpec>("chatTemplate", self.chat_template.as_ref())
            .filter(|t| !t.chat_template.trim().is_empty())
    }

    /// Parse JSON-typed fields that were stored as JSON text.
    ///
    /// Each field is decoded on its own; a field that fails to parse is left
    /// as text and a warning is logged.
    pub fn decode_json_fields(&mut self) {
        decode_text_in_place("thinking_escapes", &mut self.thinking_escapes);
        decode_text_in_place("chatTemplate", &mut self.chat_template);
        decode_text_in_place("json_schema", &mut self.sampling.json_schema);
        decode_text_in_place("logit_bias", &mut self.sampling.logit_bias);
        decode_text_in_place("lora", &mut self.sampling.lora);
    }

    /// Sampling parameters plus the model name, ready to merge into a request body.
    pub fn request_params(&self) -> Result<Map<String, Value>, LlmError> {
        let mut body = self.sampling.to_body()?;
        if let Some(model) = non_empty(&self.model) {
            body.insert("model".to_string(), Value::String(model.to_string()));
        }
        Ok(body)
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if self.base_url.trim().is_empty() {
            return Err(LlmError::config("Base URL cannot be empty"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(LlmError::config(
                "Base URL must start with http:// or https://",
            ));
        }
        Ok(())
    }
}

fn decode_field<T: serde::de::DeserializeOwned>(name: &str, value: Option<&Value>) -> Option<T> {
    let value = value?;
    let parsed = match value {
        Value::Null => return None,
        Value::String(text) if text.trim().is_empty() => return None,
        Value::String(text) => serde_json::from_str::<T>(text),
        other => serde_json::from_value::<T>(other.clone()),
    };
    match parsed {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(field = name, error = %e, "Ignoring malformed config field");
            None
        }
    }
}

fn decode_text_in_place(name: &str, slot: &mut Option<Value>) {
    let Some(Value::String(text)) = slot.as_ref() else {
        return;
    };
    if text.trim().is_empty() {
        *slot = None;
        return;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => *slot = Some(parsed),
        Err(e) => tracing::warn!(field = name, error = %e, "Field is not valid JSON; keeping text"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_stored_preset_shape() {
        let config: LlmConfig = serde_json::from_value(json!({
            "id": "6f1c2b7e-8f43-4a7e-9b0e-2d0b3c9a1f10",
            "name": "Local",
            "baseURL": "http://localhost:8080",
            "chatCompletionsPath": "/v1/chat/completions",
            "chatCompletionsPrefixAllowed": 2,
            "thinking_escapes": {"start": "<think>", "end": "</think>"},
            "mask_thinking": true,
            "temperature": 0.7,
            "mirostat": 2,
            "custom_knob": "x"
        }))
        .unwrap();

        assert_eq!(config.prefix_mode, PrefixMode::ContinueFinalMessage);
        assert_eq!(config.chat_completions_path(), Some("/v1/chat/completions"));
        assert_eq!(config.completions_path(), None);
        assert_eq!(
            config.thinking_escapes(),
            Some(ThinkingEscapes::new("<think>", "</think>"))
        );
        assert_eq!(config.sampling.temperature, Some(0.7));
        assert_eq!(config.sampling.extra.get("custom_knob"), Some(&json!("x")));
    }

    #[test]
    fn prefix_mode_defaults_to_prefix() {
        let config: LlmConfig = serde_json::from_value(json!({
            "id": "6f1c2b7e-8f43-4a7e-9b0e-2d0b3c9a1f10",
            "baseURL": "http://localhost:8080"
        }))
        .unwrap();
        assert_eq!(config.prefix_mode, PrefixMode::Prefix);
        assert!(config.stream_enabled());
    }

    #[test]
    fn request_params_omit_unset_fields() {
        let config = LlmConfig::new("t", "http://localhost:8080")
            .with_model("llama3")
            .with_sampling(SamplingParams {
                top_k: Some(40),
                ..Default::default()
            });
        let body = config.request_params().unwrap();
        assert_eq!(body.get("top_k"), Some(&json!(40)));
        assert_eq!(body.get("model"), Some(&json!("llama3")));
        assert!(!body.contains_key("temperature"));
        assert!(!body.contains_key("thinking_escapes"));
    }

    #[test]
    fn malformed_json_field_is_localized() {
        let mut config = LlmConfig::new("t", "http://localhost:8080");
        config.thinking_escapes = Some(json!("{\"start\": \"<think>\""));
        config.sampling.logit_bias = Some(json!("[[15043, 1.0]]"));

        config.decode_json_fields();

        assert_eq!(config.sampling.logit_bias, Some(json!([[15043, 1.0]])));
        assert!(matches!(config.thinking_escapes, Some(Value::String(_))));
        assert_eq!(config.thinking_escapes(), None);
    }

    #[test]
    fn thinking_escapes_stored_as_text_are_decoded() {
        let mut config = LlmConfig::new("t", "http://localhost:8080");
        config.thinking_escapes = Some(json!("{\"start\": \"<T>\", \"end\": \"</T>\"}"));
        assert_eq!(config.thinking_escapes(), Some(ThinkingEscapes::new("<T>", "</T>")));
    }

    #[test]
    fn constraint_detection() {
        let mut params = SamplingParams::default();
        assert!(!params.has_constraint());
        params.grammar = Some("   ".into());
        assert!(!params.has_constraint());
        params.json_schema = Some(json!({"type": "object"}));
        assert!(params.has_constraint());
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        assert!(LlmConfig::new("t", "localhost:8080").validate().is_err());
        assert!(LlmConfig::new("t", "").validate().is_err());
        assert!(LlmConfig::default_preset().validate().is_ok());
    }

    #[test]
    fn roundtrip_keeps_prefix_mode_numeric() {
        let config = LlmConfig::default_preset().with_prefix_mode(PrefixMode::Implied);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["chatCompletionsPrefixAllowed"], json!(3));
        assert_eq!(value["baseURL"], json!("http://localhost:8080"));
    }
}
