//! Per-stream write state

use uuid::Uuid;

use super::guard::{ConversationGuard, GuardTicket};
use crate::types::Message;
use crate::utils::CancelHandle;

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Buffered text was appended to the assistant message.
    Applied,
    /// Nothing was buffered.
    Empty,
    /// The conversation is no longer active. The request was aborted and the
    /// buffer dropped without touching the messages.
    Superseded,
}

/// Text received but not yet written, plus what is needed to decide whether
/// it may still be written.
#[derive(Debug)]
pub struct StreamSession {
    ticket: GuardTicket,
    guard: ConversationGuard,
    cancel: CancelHandle,
    buffer: String,
    superseded: bool,
}

impl StreamSession {
    /// `ticket` is the guard ticket of the opening the stream belongs to.
    pub fn new(ticket: GuardTicket, guard: ConversationGuard, cancel: CancelHandle) -> Self {
        Self {
            ticket,
            guard,
            cancel,
            buffer: String::new(),
            superseded: false,
        }
    }

    pub fn chat_id(&self) -> Uuid {
        self.ticket.chat_id()
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded
    }

    /// Append the buffer to the trailing assistant message of `messages`.
    pub fn flush(&mut self, messages: &mut Vec<Message>) -> FlushOutcome {
        if self.superseded || !self.guard.is_current(self.ticket) {
            if !self.superseded {
                tracing::info!(chat_id = %self.chat_id(), "Conversation switched during generation, aborting stream");
            }
            self.superseded = true;
            self.cancel.cancel();
            self.buffer.clear();
            return FlushOutcome::Superseded;
        }
        if self.buffer.is_empty() {
            return FlushOutcome::Empty;
        }

        let text = std::mem::take(&mut self.buffer);
        match messages.last_mut() {
            Some(last) if last.is_assistant() => last.content.push_str(&text),
            _ => messages.push(Message::assistant(text)),
        }
        FlushOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn session() -> (StreamSession, ConversationGuard, Uuid) {
        let guard = ConversationGuard::new();
        let chat = Uuid::new_v4();
        let ticket = guard.switch_to(chat);
        (StreamSession::new(ticket, guard.clone(), CancelHandle::new()), guard, chat)
    }

    #[test]
    fn coalesced_chunks_are_written_in_order() {
        let (mut session, _, _) = session();
        let mut messages = vec![Message::user("hi"), Message::starter("")];

        for chunk in ["Hel", "lo", ", ", "wor"] {
            session.push(chunk);
        }
        assert_eq!(session.flush(&mut messages), FlushOutcome::Applied);
        session.push("ld");
        assert_eq!(session.flush(&mut messages), FlushOutcome::Applied);
        assert_eq!(session.flush(&mut messages), FlushOutcome::Empty);

        assert_eq!(messages[1].content, "Hello, world");
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn flush_extends_seeded_starter() {
        let (mut session, _, _) = session();
        let mut messages = vec![Message::user("hi"), Message::starter("<think>\n")];
        session.push("ok");
        session.flush(&mut messages);
        assert_eq!(messages[1].content, "<think>\nok");
    }

    #[test]
    #[traced_test]
    fn superseded_flush_aborts_and_leaves_messages_alone() {
        let (mut session, guard, _) = session();
        let before = vec![Message::user("hi"), Message::starter("")];
        let mut messages = before.clone();

        session.push("stale");
        guard.switch_to(Uuid::new_v4());

        assert_eq!(session.flush(&mut messages), FlushOutcome::Superseded);
        assert_eq!(messages, before);
        assert!(session.cancel_handle().is_cancelled());
        assert!(session.pending().is_empty());
        assert!(logs_contain("Conversation switched during generation"));

        session.push("later");
        assert_eq!(session.flush(&mut messages), FlushOutcome::Superseded);
        assert_eq!(messages, before);
    }

    #[test]
    fn switching_back_does_not_revive_a_superseded_stream() {
        let (mut session, guard, chat) = session();
        let mut messages = vec![Message::starter("")];
        guard.switch_to(Uuid::new_v4());
        session.push("x");
        session.flush(&mut messages);

        guard.switch_to(chat);
        session.push("y");
        assert_eq!(session.flush(&mut messages), FlushOutcome::Superseded);
        assert_eq!(messages[0].content, "");
    }

    #[test]
    fn reopening_the_chat_before_the_first_write_still_supersedes() {
        let (mut session, guard, chat) = session();
        let mut messages = vec![Message::user("hi"), Message::starter("")];

        guard.switch_to(Uuid::new_v4());
        guard.switch_to(chat);
        assert!(guard.is_active(chat));

        session.push("stale");
        assert_eq!(session.flush(&mut messages), FlushOutcome::Superseded);
        assert_eq!(messages[1].content, "");
        assert!(session.cancel_handle().is_cancelled());
    }
}
