//! Local chat-template rendering and sentinel truncation
//!
//! Completions endpoints take a single prompt string, so a chat history has to
//! be rendered with the model's chat template first. Templates are written for
//! a whole conversation and usually append turn terminators after the last
//! message. To find the point where generation should resume, a unique
//! sentinel is appended to the assistant turn and the rendered text is cut at
//! its first occurrence.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use minijinja::{Environment, ErrorKind, Value, context};
use uuid::Uuid;

use crate::error::LlmError;
use crate::types::{ChatTemplateSpec, Message, PendingRequest, WireMessage};

/// A marker that cannot plausibly occur in user text.
pub fn new_sentinel() -> String {
    format!("<|llmchat-sentinel-{}|>", Uuid::new_v4().simple())
}

/// History followed by the assistant turn being generated, with `sentinel`
/// appended to that turn's existing text.
pub fn messages_with_sentinel(request: &PendingRequest, sentinel: &str) -> Vec<WireMessage> {
    let mut messages: Vec<WireMessage> = request.history.iter().map(WireMessage::from).collect();
    let seed = request.seed_content();
    messages.push(WireMessage::from(&Message::assistant(format!("{seed}{sentinel}"))));
    messages
}

/// Keep everything before the first occurrence of `sentinel`.
pub fn truncate_at_sentinel(prompt: &str, sentinel: &str) -> Result<String, LlmError> {
    match prompt.find(sentinel) {
        Some(idx) => Ok(prompt[..idx].to_string()),
        None => Err(LlmError::ParseError(
            "Rendered prompt does not contain the generation marker; the chat template dropped the last assistant message".to_string(),
        )),
    }
}

/// Renders a tokenizer-style chat template with minijinja.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    spec: ChatTemplateSpec,
    now: Option<DateTime<Local>>,
}

impl TemplateRenderer {
    pub fn new(spec: ChatTemplateSpec) -> Self {
        Self { spec, now: None }
    }

    /// Pin the clock seen by `strftime_now`.
    pub fn with_now(mut self, now: DateTime<Local>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn spec(&self) -> &ChatTemplateSpec {
        &self.spec
    }

    /// Render `messages` with `add_generation_prompt` off.
    pub fn render(&self, messages: &[WireMessage]) -> Result<String, LlmError> {
        let mut env = Environment::new();
        env.set_unknown_method_callback(string_methods);
        env.add_function("raise_exception", |message: String| -> Result<String, minijinja::Error> {
            Err(minijinja::Error::new(ErrorKind::InvalidOperation, message))
        });

        let now = self.now.unwrap_or_else(Local::now);
        env.add_function(
            "strftime_now",
            move |format: String| -> Result<String, minijinja::Error> {
                if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
                    return Err(minijinja::Error::new(
                        ErrorKind::InvalidOperation,
                        format!("invalid strftime format {format:?}"),
                    ));
                }
                Ok(now.format(&format).to_string())
            },
        );

        let template = env.template_from_str(&self.spec.chat_template)?;
        let rendered = template.render(context! {
            messages => Value::from_serialize(messages),
            bos_token => self.spec.bos_token.as_str(),
            eos_token => self.spec.eos_token.as_str(),
            add_generation_prompt => false,
        })?;
        Ok(rendered)
    }

    /// Render with a sentinel, cut at the generation point and drop a leading
    /// BOS token (the completions endpoint adds its own).
    pub fn render_prompt(&self, request: &PendingRequest) -> Result<String, LlmError> {
        let sentinel = new_sentinel();
        let rendered = self.render(&messages_with_sentinel(request, &sentinel))?;
        let prompt = truncate_at_sentinel(&rendered, &sentinel)?;
        let bos = self.spec.bos_token.as_str();
        if !bos.is_empty() {
            if let Some(rest) = prompt.strip_prefix(bos) {
                return Ok(rest.to_string());
            }
        }
        Ok(prompt)
    }
}

/// Python string methods that Jinja2 chat templates call but minijinja lacks.
fn string_methods(
    _state: &minijinja::State,
    value: &Value,
    method: &str,
    args: &[Value],
) -> Result<Value, minijinja::Error> {
    let Some(s) = value.as_str() else {
        return Err(unknown_method(method));
    };
    match method {
        "startswith" => Ok(Value::from(s.starts_with(str_arg(args, method)?))),
        "endswith" => Ok(Value::from(s.ends_with(str_arg(args, method)?))),
        "strip" | "lstrip" | "rstrip" => {
            let chars: Option<Vec<char>> = args
                .first()
                .and_then(|v| v.as_str())
                .map(|c| c.chars().collect());
            let strip = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let out = match method {
                "strip" => s.trim_matches(strip),
                "lstrip" => s.trim_start_matches(strip),
                _ => s.trim_end_matches(strip),
            };
            Ok(Value::from(out))
        }
        "split" => {
            let parts: Vec<String> = match args.first().and_then(|v| v.as_str()) {
                Some(sep) => s.split(sep).map(str::to_string).collect(),
                None => s.split_whitespace().map(str::to_string).collect(),
            };
            Ok(Value::from(parts))
        }
        _ => Err(unknown_method(method)),
    }
}

fn str_arg<'a>(args: &'a [Value], method: &str) -> Result<&'a str, minijinja::Error> {
    args.first().and_then(|v| v.as_str()).ok_or_else(|| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("{method} requires a string argument"),
        )
    })
}

fn unknown_method(method: &str) -> minijinja::Error {
    minijinja::Error::new(
        ErrorKind::UnknownMethod,
        format!("object has no method named {method}"),
    )
}
