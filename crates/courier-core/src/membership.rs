//! Conversation membership controller.
//!
//! Scopes push delivery to the conversation currently open. At most one
//! conversation is targeted at a time; targeting a new one leaves the old one
//! first. Join failures only mark push as unavailable, the poller covers for
//! it.

use crate::{connection::ConnectionState, message::ConversationId};

/// Actions produced by the membership controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipAction {
    /// Bring the connection up. The join follows once it is connected.
    Connect,
    /// Join the conversation's room on the transport.
    Join(ConversationId),
    /// Leave the conversation's room. Best-effort.
    Leave(ConversationId),
}

/// Membership controller.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    /// Conversation that should be joined.
    target: Option<ConversationId>,
    /// Join sent, result pending.
    pending: Option<ConversationId>,
    /// Join confirmed on the current connection.
    joined: Option<ConversationId>,
    /// Whether the last join for `target` failed.
    join_failed: bool,
}

impl Membership {
    /// Create a controller with nothing joined.
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversation joined on the current connection.
    pub fn joined(&self) -> Option<ConversationId> {
        self.joined
    }

    /// Whether push delivery is expected for the targeted conversation.
    pub fn push_available(&self) -> bool {
        self.target.is_some() && self.joined == self.target && !self.join_failed
    }

    /// Target `conversation_id`, leaving any previous conversation first.
    pub fn join(
        &mut self,
        conversation_id: ConversationId,
        connection: ConnectionState,
    ) -> Vec<MembershipAction> {
        let mut actions = Vec::new();

        match self.target {
            Some(current) if current == conversation_id => {
                if self.joined.is_some() || self.pending.is_some() {
                    return actions;
                }
            },
            Some(previous) => actions.extend(self.leave(previous)),
            None => {},
        }

        self.target = Some(conversation_id);
        self.join_failed = false;

        if connection == ConnectionState::Connected {
            self.pending = Some(conversation_id);
            actions.push(MembershipAction::Join(conversation_id));
        } else {
            tracing::debug!(conversation_id, "not connected, connecting before join");
            actions.push(MembershipAction::Connect);
        }

        actions
    }

    /// Stop targeting `conversation_id`.
    pub fn leave(&mut self, conversation_id: ConversationId) -> Vec<MembershipAction> {
        if self.target != Some(conversation_id) {
            return vec![];
        }

        self.target = None;
        self.join_failed = false;
        let was_joined = self.joined.take().is_some() | self.pending.take().is_some();

        if was_joined { vec![MembershipAction::Leave(conversation_id)] } else { vec![] }
    }

    /// Drop `conversation_id` after another owner took its membership over.
    ///
    /// Unlike [`Membership::leave`] nothing is sent: the room is no longer
    /// ours to leave. Returns whether anything changed.
    pub fn revoke(&mut self, conversation_id: ConversationId) -> bool {
        if self.target != Some(conversation_id) {
            return false;
        }
        tracing::info!(conversation_id, "membership taken over, relying on polling");
        self.target = None;
        self.pending = None;
        self.joined = None;
        self.join_failed = false;
        true
    }

    /// Track connection changes. Room membership does not survive a new
    /// connection, so reaching `Connected` re-joins the target.
    pub fn handle_connection_changed(&mut self, state: ConnectionState) -> Vec<MembershipAction> {
        if state != ConnectionState::Connected {
            self.joined = None;
            self.pending = None;
            return vec![];
        }

        match self.target {
            Some(target) if self.joined.is_none() && self.pending.is_none() => {
                self.pending = Some(target);
                vec![MembershipAction::Join(target)]
            },
            _ => vec![],
        }
    }

    /// Report the outcome of a [`MembershipAction::Join`].
    pub fn handle_join_result(&mut self, conversation_id: ConversationId, result: Result<(), String>) {
        if self.pending != Some(conversation_id) {
            tracing::debug!(conversation_id, "ignoring stale join result");
            return;
        }
        self.pending = None;

        match result {
            Ok(()) => {
                tracing::debug!(conversation_id, "joined conversation");
                self.joined = Some(conversation_id);
                self.join_failed = false;
            },
            Err(reason) => {
                tracing::warn!(conversation_id, %reason, "join failed, relying on polling");
                self.join_failed = true;
            },
        }
    }
}
