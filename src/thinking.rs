//! Reasoning markup
//!
//! Servers report reasoning in a separate `reasoning` field. For display it is
//! folded into the content as an inline span delimited by the preset's
//! thinking escapes, e.g. `<think>...</think>answer`. The reverse direction,
//! [`mask_history`], removes those spans from earlier turns before they are
//! sent back as context.

use futures::{TryStreamExt, future};

use crate::stream::{DeltaStream, TextStream};
use crate::types::{AssistantDelta, Message, ThinkingEscapes};

/// Per-stream state machine turning deltas into display text.
#[derive(Debug, Clone)]
pub struct ThinkingInjector {
    escapes: Option<ThinkingEscapes>,
    in_reasoning: bool,
}

impl ThinkingInjector {
    pub fn new(escapes: Option<ThinkingEscapes>) -> Self {
        Self {
            escapes,
            in_reasoning: false,
        }
    }

    /// Start in the reasoning state when `seed` ends inside an unclosed span.
    pub fn resuming(escapes: Option<ThinkingEscapes>, seed: &str) -> Self {
        let in_reasoning = escapes
            .as_ref()
            .is_some_and(|e| ends_inside_span(seed, e));
        Self {
            escapes,
            in_reasoning,
        }
    }

    pub fn is_reasoning(&self) -> bool {
        self.in_reasoning
    }

    /// Text to append for one streamed delta.
    ///
    /// Without escapes the reasoning text is not displayed.
    pub fn inject(&mut self, delta: &AssistantDelta) -> String {
        let reasoning = delta.reasoning.as_deref().filter(|r| !r.is_empty());
        let content = delta.content.as_deref().filter(|c| !c.is_empty());

        let Some(escapes) = &self.escapes else {
            return content.unwrap_or_default().to_string();
        };

        let mut out = String::new();
        if let Some(reasoning) = reasoning {
            if !self.in_reasoning {
                out.push_str(&escapes.start);
                self.in_reasoning = true;
            }
            out.push_str(reasoning);
        }
        if let Some(content) = content {
            if self.in_reasoning {
                out.push_str(&escapes.end);
                self.in_reasoning = false;
            }
            out.push_str(content);
        }
        out
    }

    /// Display text for a whole (non-streamed) response.
    pub fn wrap_complete(&mut self, delta: &AssistantDelta) -> String {
        let mut out = self.inject(delta);
        if self.in_reasoning && delta.reasoning.as_deref().is_some_and(|r| !r.is_empty()) {
            if let Some(escapes) = &self.escapes {
                out.push_str(&escapes.end);
            }
            self.in_reasoning = false;
        }
        out
    }

    /// Apply this injector to a delta stream, dropping empty outputs.
    pub fn into_text_stream(mut self, deltas: DeltaStream) -> TextStream {
        let text = deltas
            .map_ok(move |delta| self.inject(&delta))
            .try_filter(|text| future::ready(!text.is_empty()));
        Box::pin(text)
    }
}

fn ends_inside_span(seed: &str, escapes: &ThinkingEscapes) -> bool {
    match seed.rfind(&escapes.start) {
        Some(idx) => !seed[idx + escapes.start.len()..].contains(&escapes.end),
        None => false,
    }
}

/// Remove every `start...end` span (inclusive) and trim the result.
///
/// A start marker without a matching end discards the rest of the text.
/// Applied until nothing changes, so stripping twice equals stripping once.
pub fn strip_thinking(content: &str, escapes: &ThinkingEscapes) -> String {
    if !escapes.is_usable() {
        return content.trim().to_string();
    }
    let mut current = strip_once(content, escapes);
    loop {
        let next = strip_once(&current, escapes);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_once(content: &str, escapes: &ThinkingEscapes) -> String {
    let mut sections = content.split(escapes.start.as_str());
    let mut cleaned = sections.next().unwrap_or_default().to_string();
    for section in sections {
        if let Some(end) = section.find(&escapes.end) {
            cleaned.push_str(&section[end + escapes.end.len()..]);
        }
    }
    cleaned.trim().to_string()
}

/// Strip thinking spans from the assistant turns of a completed history.
///
/// Only pass finished turns: the message being generated is never masked.
pub fn mask_history(messages: &[Message], escapes: &ThinkingEscapes) -> Vec<Message> {
    messages
        .iter()
        .map(|m| {
            if m.is_assistant() {
                Message::assistant(strip_thinking(&m.content, escapes))
            } else {
                m.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;

    fn tags() -> ThinkingEscapes {
        ThinkingEscapes::new("<T>", "</T>")
    }

    #[test]
    fn reasoning_then_content_is_wrapped_once() {
        let mut injector = ThinkingInjector::new(Some(tags()));
        let deltas = [
            AssistantDelta::reasoning("a"),
            AssistantDelta::reasoning("b"),
            AssistantDelta::reasoning("c"),
            AssistantDelta::content("d"),
            AssistantDelta::content("e"),
        ];
        let text: String = deltas.iter().map(|d| injector.inject(d)).collect();
        assert_eq!(text, "<T>abc</T>de");
        assert!(!injector.is_reasoning());
    }

    #[test]
    fn reasoning_without_escapes_is_hidden() {
        let mut injector = ThinkingInjector::new(None);
        assert_eq!(injector.inject(&AssistantDelta::reasoning("hmm")), "");
        assert_eq!(injector.inject(&AssistantDelta::content("hi")), "hi");
    }

    #[test]
    fn resumes_inside_open_span() {
        let injector = ThinkingInjector::resuming(Some(tags()), "<T>\nlet me see");
        assert!(injector.is_reasoning());

        let closed = ThinkingInjector::resuming(Some(tags()), "<T>x</T>answer");
        assert!(!closed.is_reasoning());

        let reopened = ThinkingInjector::resuming(Some(tags()), "<T>x</T>y<T>z");
        assert!(reopened.is_reasoning());
    }

    #[test]
    fn resumed_reasoning_does_not_repeat_start_marker() {
        let mut injector = ThinkingInjector::resuming(Some(tags()), "<T>");
        let mut text = injector.inject(&AssistantDelta::reasoning("more"));
        text.push_str(&injector.inject(&AssistantDelta::content("done")));
        assert_eq!(text, "more</T>done");
    }

    #[test]
    fn whole_response_is_wrapped_in_one_shot() {
        let mut injector = ThinkingInjector::new(Some(tags()));
        let delta = AssistantDelta {
            role: crate::types::Role::Assistant,
            content: Some("answer".into()),
            reasoning: Some("why".into()),
        };
        assert_eq!(injector.wrap_complete(&delta), "<T>why</T>answer");

        let mut only_reasoning = ThinkingInjector::new(Some(tags()));
        assert_eq!(
            only_reasoning.wrap_complete(&AssistantDelta::reasoning("why")),
            "<T>why</T>"
        );
    }

    #[test]
    fn strip_removes_spans_and_trims() {
        assert_eq!(strip_thinking("<T>plan</T>\n\nAnswer ", &tags()), "Answer");
        assert_eq!(strip_thinking("a<T>x</T>b<T>y</T>c", &tags()), "abc");
        assert_eq!(strip_thinking("keep<T>unterminated", &tags()), "keep");
        assert_eq!(strip_thinking("no markers", &tags()), "no markers");
    }

    #[test]
    fn strip_is_idempotent() {
        let samples = [
            "<T>a</T>b",
            "<<T>x</T>T>y</T>z",
            " lead <T>q</T> trail ",
            "</T>stray end",
            "",
        ];
        for s in samples {
            let once = strip_thinking(s, &tags());
            assert_eq!(strip_thinking(&once, &tags()), once, "sample {s:?}");
        }
    }

    #[test]
    fn mask_only_touches_assistant_turns() {
        let history = vec![
            Message::system("<T>sys</T>"),
            Message::user("<T>u</T>q"),
            Message::assistant("<T>r</T> reply"),
        ];
        let masked = mask_history(&history, &tags());
        assert_eq!(masked[0].content, "<T>sys</T>");
        assert_eq!(masked[1].content, "<T>u</T>q");
        assert_eq!(masked[2].content, "reply");
    }

    #[tokio::test]
    async fn text_stream_skips_empty_outputs() {
        let deltas: DeltaStream = Box::pin(futures::stream::iter(vec![
            Ok(AssistantDelta::reasoning("r")),
            Ok::<_, LlmError>(AssistantDelta::content("")),
            Ok(AssistantDelta::content("c")),
        ]));
        let out: Vec<String> = ThinkingInjector::new(Some(tags()))
            .into_text_stream(deltas)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(out, vec!["<T>r".to_string(), "</T>c".to_string()]);
    }
}
