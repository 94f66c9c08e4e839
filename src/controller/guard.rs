//! Active-conversation guard

use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Proof of one opening of a conversation.
///
/// Every [`ConversationGuard::switch_to`] issues a new ticket, even for a chat
/// that was active before, so reopening a chat invalidates the old ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardTicket {
    chat_id: Uuid,
    epoch: u64,
}

impl GuardTicket {
    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }
}

#[derive(Debug, Default)]
struct GuardState {
    active: Option<GuardTicket>,
    epoch: u64,
}

/// The conversation currently on screen, shared by every controller of one
/// application.
///
/// A stream started under a ticket keeps writing only while that ticket is
/// current. After any later [`switch_to`](Self::switch_to), its next flush
/// aborts instead.
#[derive(Debug, Clone, Default)]
pub struct ConversationGuard {
    state: Arc<RwLock<GuardState>>,
}

impl ConversationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn switch_to(&self, chat_id: Uuid) -> GuardTicket {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.epoch += 1;
        let ticket = GuardTicket {
            chat_id,
            epoch: state.epoch,
        };
        state.active = Some(ticket);
        ticket
    }

    /// No conversation is open.
    pub fn clear(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .active = None;
    }

    pub fn active(&self) -> Option<Uuid> {
        self.current().map(|t| t.chat_id)
    }

    pub fn is_active(&self, chat_id: Uuid) -> bool {
        self.active() == Some(chat_id)
    }

    /// Whether `ticket` is the latest one issued and nothing was opened or
    /// cleared since.
    pub fn is_current(&self, ticket: GuardTicket) -> bool {
        self.current() == Some(ticket)
    }

    fn current(&self) -> Option<GuardTicket> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_active_id() {
        let guard = ConversationGuard::new();
        let view = guard.clone();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        guard.switch_to(a);
        assert!(view.is_active(a));
        view.switch_to(b);
        assert!(!guard.is_active(a));
        assert!(guard.is_active(b));
        guard.clear();
        assert_eq!(view.active(), None);
    }

    #[test]
    fn reopening_a_chat_issues_a_new_ticket() {
        let guard = ConversationGuard::new();
        let a = Uuid::new_v4();

        let first = guard.switch_to(a);
        assert!(guard.is_current(first));
        guard.switch_to(Uuid::new_v4());
        let second = guard.switch_to(a);

        assert_eq!(first.chat_id(), second.chat_id());
        assert_ne!(first, second);
        assert!(guard.is_active(a));
        assert!(!guard.is_current(first));
        assert!(guard.is_current(second));
    }
}
