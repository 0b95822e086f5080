//! Push transport collaborator.
//!
//! The transport is a thin I/O layer: it moves invocations out and events in.
//! Connection policy (when to start, when to retry, when to ping) stays in
//! [`courier_core::ConnectionManager`].

use async_trait::async_trait;
use courier_core::{ConversationId, PushEvent, TransportMode};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Hub method names understood by the backend.
pub mod methods {
    /// Send a chat message: `[conversation_id, content]`.
    pub const SEND_MESSAGE: &str = "SendMessage";
    /// Keep-alive: `[]`.
    pub const PING: &str = "Ping";
    /// Typing signal: `[conversation_id, is_typing]`.
    pub const TYPING: &str = "Typing";
}

/// Persistent push connection.
///
/// # Invariants
///
/// - `start` on a started transport restarts it.
/// - Inbound events, lifecycle events included, go to the sender given to
///   the most recent `start`.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Connect and begin forwarding events to `events`.
    async fn start(
        &self,
        mode: TransportMode,
        events: mpsc::Sender<PushEvent>,
    ) -> Result<(), TransportError>;

    /// Disconnect. Idempotent.
    async fn stop(&self);

    /// Join a conversation's room.
    async fn join(&self, conversation_id: ConversationId) -> Result<(), TransportError>;

    /// Leave a conversation's room.
    async fn leave(&self, conversation_id: ConversationId) -> Result<(), TransportError>;

    /// Invoke a hub method.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError>;
}

/// Arguments for [`methods::SEND_MESSAGE`].
pub(crate) fn send_message_args(conversation_id: ConversationId, content: &str) -> Vec<Value> {
    vec![json!(conversation_id), json!(content)]
}

/// Arguments for [`methods::TYPING`].
pub(crate) fn typing_args(conversation_id: ConversationId, is_typing: bool) -> Vec<Value> {
    vec![json!(conversation_id), json!(is_typing)]
}
