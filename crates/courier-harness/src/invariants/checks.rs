//! Standard invariant checks.
//!
//! These capture what must be true of a displayed set, not specific
//! scenarios.

use std::collections::HashSet;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// No message id appears twice in a displayed set.
///
/// A push and a snapshot often carry the same message. Showing it twice
/// means a merge treated identity as anything other than `id`.
pub struct MessagesDeduplicated;

impl Invariant for MessagesDeduplicated {
    fn name(&self) -> &'static str {
        "messages_deduplicated"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for view in &state.views {
            let mut seen = HashSet::with_capacity(view.messages.len());
            for message in &view.messages {
                if !seen.insert(message.id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "conversation {}: message {} shown twice",
                            view.conversation.conversation_id, message.id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Displayed messages are ordered by `sent_at`, ties by `id`.
pub struct MessagesOrdered;

impl Invariant for MessagesOrdered {
    fn name(&self) -> &'static str {
        "messages_ordered"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for view in &state.views {
            for pair in view.messages.windows(2) {
                if pair[1].order_key() < pair[0].order_key() {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "conversation {}: message {} ({}) shown before message {} ({})",
                            view.conversation.conversation_id,
                            pair[0].id,
                            pair[0].sent_at,
                            pair[1].id,
                            pair[1].sent_at
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A view shows only messages of the conversation it has open.
pub struct ConversationIsolation;

impl Invariant for ConversationIsolation {
    fn name(&self) -> &'static str {
        "conversation_isolation"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for view in &state.views {
            if let Some(stray) = view.messages.iter().find(|m| !m.belongs_to(&view.conversation)) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "conversation {}: shows message {} of conversation {:?} ({} -> {})",
                        view.conversation.conversation_id,
                        stray.id,
                        stray.conversation_id,
                        stray.sender_id,
                        stray.receiver_id
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use courier_core::ConversationHandle;

    use super::*;
    use crate::{fixtures::message, invariants::ViewSnapshot};

    fn handle() -> ConversationHandle {
        ConversationHandle::new(42, 1, 2)
    }

    fn state(messages: Vec<courier_core::Message>) -> SystemSnapshot {
        SystemSnapshot::single(ViewSnapshot::new(handle(), messages))
    }

    #[test]
    fn duplicate_id_violates_dedup() {
        let s = state(vec![message(1, 42, 2, 1, 0), message(1, 42, 2, 1, 5)]);
        assert!(MessagesDeduplicated.check(&s).is_err());
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let ordered = state(vec![message(1, 42, 2, 1, 0), message(2, 42, 1, 2, 0)]);
        assert!(MessagesOrdered.check(&ordered).is_ok());

        let swapped = state(vec![message(2, 42, 2, 1, 0), message(1, 42, 1, 2, 0)]);
        assert!(MessagesOrdered.check(&swapped).is_err());
    }

    #[test]
    fn foreign_conversation_violates_isolation() {
        let s = state(vec![message(1, 42, 2, 1, 0), message(2, 7, 2, 1, 5)]);
        let violation = ConversationIsolation.check(&s).unwrap_err();
        assert!(violation.message.contains("message 2"));
    }

    #[test]
    fn pair_match_satisfies_isolation() {
        let mut pushed = message(3, 42, 2, 1, 0);
        pushed.conversation_id = None;
        assert!(ConversationIsolation.check(&state(vec![pushed])).is_ok());
    }
}
