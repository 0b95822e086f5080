//! Push transport events and their fan-out form.

use crate::{
    connection::ConnectionState,
    message::{ConversationId, Message, UserId},
};

/// Inbound events produced by a push transport.
///
/// Message payloads stay raw JSON here: validation happens once, where the
/// event is fanned out, so a malformed payload is dropped before it can reach
/// any merge logic.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A message was pushed.
    Message(serde_json::Value),

    /// A participant started or stopped typing.
    Typing {
        /// Conversation the signal belongs to, when the server includes it.
        conversation_id: Option<ConversationId>,
        /// Typing participant.
        user_id: UserId,
        /// Started (`true`) or stopped (`false`).
        is_typing: bool,
    },

    /// A participant came online or went offline.
    Presence {
        /// Participant.
        user_id: UserId,
        /// Online status.
        is_online: bool,
    },

    /// The connection was closed by the peer or the network.
    Closed {
        /// Reason, if the transport knows one.
        reason: Option<String>,
    },

    /// The transport lost its connection and is restoring it on its own.
    Reconnecting,

    /// A self-restored connection is back.
    Reconnected,
}

/// Events the connection service publishes to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A validated message arrived.
    Message(Message),

    /// Connection state changed.
    StateChanged(ConnectionState),

    /// A participant started or stopped typing.
    Typing {
        /// Conversation the signal belongs to, when known.
        conversation_id: Option<ConversationId>,
        /// Typing participant.
        user_id: UserId,
        /// Started (`true`) or stopped (`false`).
        is_typing: bool,
    },

    /// A participant's online status changed.
    Presence {
        /// Participant.
        user_id: UserId,
        /// Online status.
        is_online: bool,
    },

    /// Membership of a conversation passed to a newer claim. Whoever held it
    /// no longer receives pushes for it and falls back to polling.
    MembershipReleased(ConversationId),
}
