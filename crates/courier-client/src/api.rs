//! REST backend collaborator.

use async_trait::async_trait;
use courier_core::{ConversationId, Message, OutgoingMessage};

use crate::error::ApiError;

/// The three message endpoints the chat core consumes.
///
/// Implementations attach the host's auth credential to every request. The
/// core performs no auth logic of its own.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// `GET messages(conversation_id)`: full snapshot, ordered.
    async fn fetch_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ApiError>;

    /// `POST message`: returns the created message.
    async fn send_message(&self, message: &OutgoingMessage) -> Result<Message, ApiError>;

    /// `PUT conversation(conversation_id)/read`.
    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), ApiError>;
}
