//! Chat data model.
//!
//! [`Message`] is the server-confirmed message as the backend serializes it.
//! Push payloads are less trustworthy than REST snapshots, so they enter
//! through [`WireMessage`], where every field is optional and validation
//! happens once in [`Message::from_push`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// Server-assigned message identifier.
pub type MessageId = i64;

/// Conversation identifier.
pub type ConversationId = i64;

/// User identifier.
pub type UserId = i64;

/// A chat message.
///
/// Identity is `id`. Ordering is by `sent_at`, ties broken by `id`. Only
/// `is_read` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Owning conversation. Some push payloads omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Author.
    pub sender_id: UserId,
    /// Recipient.
    pub receiver_id: UserId,
    /// Message text.
    pub content: String,
    /// Server timestamp, the ordering key.
    pub sent_at: DateTime<Utc>,
    /// Read receipt.
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Sort key: `sent_at`, then `id` for equal timestamps.
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.sent_at, self.id)
    }

    /// Whether this message belongs to the conversation behind `handle`.
    ///
    /// Matches on `conversation_id` when present. Payloads without one fall
    /// back to participant pair equality in either direction.
    pub fn belongs_to(&self, handle: &ConversationHandle) -> bool {
        match self.conversation_id {
            Some(conversation_id) => conversation_id == handle.conversation_id,
            None => {
                let (local, remote) = (handle.local_participant_id, handle.remote_participant_id);
                (self.sender_id == local && self.receiver_id == remote)
                    || (self.sender_id == remote && self.receiver_id == local)
            },
        }
    }

    /// Parse and validate a push payload.
    ///
    /// # Errors
    ///
    /// - `PayloadError::Malformed` if the JSON does not have message shape
    /// - `PayloadError::MissingField` if a required field is absent
    pub fn from_push(value: serde_json::Value) -> Result<Self, PayloadError> {
        let wire: WireMessage =
            serde_json::from_value(value).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        Self::try_from(wire)
    }
}

/// Loosely-typed message as received from the push transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Server-assigned identifier.
    pub id: Option<MessageId>,
    /// Owning conversation.
    pub conversation_id: Option<ConversationId>,
    /// Author.
    pub sender_id: Option<UserId>,
    /// Recipient.
    pub receiver_id: Option<UserId>,
    /// Message text.
    pub content: Option<String>,
    /// Server timestamp.
    pub sent_at: Option<DateTime<Utc>>,
    /// Read receipt.
    pub is_read: Option<bool>,
}

impl TryFrom<WireMessage> for Message {
    type Error = PayloadError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            id: wire.id.ok_or(PayloadError::MissingField("id"))?,
            conversation_id: wire.conversation_id,
            sender_id: wire.sender_id.ok_or(PayloadError::MissingField("senderId"))?,
            receiver_id: wire.receiver_id.ok_or(PayloadError::MissingField("receiverId"))?,
            content: wire.content.ok_or(PayloadError::MissingField("content"))?,
            sent_at: wire.sent_at.ok_or(PayloadError::MissingField("sentAt"))?,
            is_read: wire.is_read.unwrap_or(false),
        })
    }
}

/// Identifies the conversation a chat view has open.
///
/// Owned by exactly one view and dropped when it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationHandle {
    /// Conversation being displayed.
    pub conversation_id: ConversationId,
    /// The user of this device.
    pub local_participant_id: UserId,
    /// The other participant.
    pub remote_participant_id: UserId,
}

impl ConversationHandle {
    /// Create a handle.
    pub fn new(
        conversation_id: ConversationId,
        local_participant_id: UserId,
        remote_participant_id: UserId,
    ) -> Self {
        Self { conversation_id, local_participant_id, remote_participant_id }
    }
}

/// Body of the REST send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Recipient.
    pub receiver_id: UserId,
    /// Message text.
    pub content: String,
}
