//! Observable state snapshots for invariant checking.
//!
//! Invariants operate on snapshots rather than live views so that every
//! check sees the same state.

use courier_client::ChatSnapshot;
use courier_core::{ConversationHandle, Message};

/// Snapshot of every open view.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-view state.
    pub views: Vec<ViewSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no views).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single view.
    pub fn single(view: ViewSnapshot) -> Self {
        Self { views: vec![view] }
    }

    /// Create a snapshot from a rendered view.
    pub fn from_chat(chat: &ChatSnapshot) -> Self {
        Self::single(ViewSnapshot::from(chat))
    }

    /// Add a view snapshot.
    pub fn add_view(&mut self, view: ViewSnapshot) {
        self.views.push(view);
    }
}

/// Displayed set of one view.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    /// Conversation the view has open.
    pub conversation: ConversationHandle,
    /// Displayed messages, in display order.
    pub messages: Vec<Message>,
}

impl ViewSnapshot {
    /// Create a view snapshot.
    pub fn new(conversation: ConversationHandle, messages: Vec<Message>) -> Self {
        Self { conversation, messages }
    }
}

impl From<&ChatSnapshot> for ViewSnapshot {
    fn from(chat: &ChatSnapshot) -> Self {
        Self::new(chat.conversation, chat.messages.clone())
    }
}
