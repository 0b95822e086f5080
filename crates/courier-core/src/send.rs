//! Send pipeline.
//!
//! Dual-path dispatch for the composer: push transport first when it is up,
//! REST as the fallback. No optimistic echo is inserted. A push-sent message
//! comes back through the push channel and a REST-sent one through the
//! refresh that follows, so the displayed set only ever holds
//! server-confirmed messages.
//!
//! One send is in flight per composer. Submitting again while it is pending
//! is ignored.

use crate::{
    error::SendError,
    message::{ConversationId, Message, OutgoingMessage, UserId},
};

/// What the composer knows about where a message can go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendRoute {
    /// Whether the push connection is up.
    pub connected: bool,
    /// Open conversation, if any.
    pub conversation_id: Option<ConversationId>,
    /// Recipient for the REST path.
    pub receiver_id: Option<UserId>,
}

/// Actions produced by the composer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendAction {
    /// Invoke the send method on the push transport and report via
    /// [`Composer::handle_push_result`].
    PushSend {
        /// Send to report back.
        send_id: u64,
        /// Target conversation.
        conversation_id: ConversationId,
        /// Trimmed content.
        content: String,
    },

    /// POST the message and report via [`Composer::handle_rest_result`].
    RestSend {
        /// Send to report back.
        send_id: u64,
        /// Request body.
        message: OutgoingMessage,
    },

    /// The REST send succeeded. Fetch a fresh snapshot to pick it up.
    Refresh,

    /// Send finished. Composer state changed.
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Push,
    Rest,
}

#[derive(Debug, Clone)]
struct PendingSend {
    send_id: u64,
    content: String,
    receiver_id: Option<UserId>,
    stage: Stage,
}

/// Composer state and the send pipeline behind it.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    draft: String,
    in_flight: Option<PendingSend>,
    last_error: Option<SendError>,
    next_send_id: u64,
}

impl Composer {
    /// Create an empty composer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current composer text.
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Replace the composer text.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Whether a send is in flight.
    pub fn is_sending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Error of the last failed send, cleared by the next submit.
    pub fn last_error(&self) -> Option<&SendError> {
        self.last_error.as_ref()
    }

    /// Send the current draft.
    ///
    /// The draft is cleared once the message is dispatched and restored if
    /// both paths fail. Returns no actions if a send is already in flight.
    ///
    /// # Errors
    ///
    /// - `SendError::EmptyContent` if the draft is blank
    /// - `SendError::NoRecipient` if neither path has a destination
    pub fn submit(&mut self, route: SendRoute) -> Result<Vec<SendAction>, SendError> {
        if self.in_flight.is_some() {
            tracing::debug!("send already in flight, ignoring");
            return Ok(vec![]);
        }

        let content = self.draft.trim();
        if content.is_empty() {
            return Err(SendError::EmptyContent);
        }
        let content = content.to_owned();

        let push_target = route.conversation_id.filter(|_| route.connected);
        if push_target.is_none() && route.receiver_id.is_none() {
            return Err(SendError::NoRecipient);
        }

        self.next_send_id += 1;
        let send_id = self.next_send_id;
        self.draft.clear();
        self.last_error = None;

        let action = match push_target {
            Some(conversation_id) => {
                self.in_flight = Some(PendingSend {
                    send_id,
                    content: content.clone(),
                    receiver_id: route.receiver_id,
                    stage: Stage::Push,
                });
                SendAction::PushSend { send_id, conversation_id, content }
            },
            None => {
                let receiver_id = route.receiver_id.ok_or(SendError::NoRecipient)?;
                self.rest_send(send_id, receiver_id, content)
            },
        };

        Ok(vec![action])
    }

    /// Report the outcome of a [`SendAction::PushSend`].
    ///
    /// A failed push falls through to REST.
    pub fn handle_push_result(&mut self, send_id: u64, result: Result<(), String>) -> Vec<SendAction> {
        let Some(pending) = self.pending(send_id, Stage::Push) else {
            return vec![];
        };

        match result {
            Ok(()) => {
                tracing::debug!(send_id, "sent over push transport");
                self.in_flight = None;
                vec![SendAction::Settled]
            },
            Err(reason) => {
                tracing::warn!(send_id, %reason, "push send failed, falling back to REST");
                match pending.receiver_id {
                    Some(receiver_id) => vec![self.rest_send(send_id, receiver_id, pending.content)],
                    None => self.fail(reason),
                }
            },
        }
    }

    /// Report the outcome of a [`SendAction::RestSend`].
    pub fn handle_rest_result(
        &mut self,
        send_id: u64,
        result: Result<Message, String>,
    ) -> Vec<SendAction> {
        if self.pending(send_id, Stage::Rest).is_none() {
            return vec![];
        }

        match result {
            Ok(message) => {
                tracing::debug!(send_id, message_id = message.id, "sent over REST");
                self.in_flight = None;
                vec![SendAction::Refresh, SendAction::Settled]
            },
            Err(reason) => self.fail(reason),
        }
    }

    /// Drop composer state, e.g. when the view closes. A pending send's
    /// result will be ignored.
    pub fn reset(&mut self) {
        self.draft.clear();
        self.in_flight = None;
        self.last_error = None;
    }

    fn pending(&self, send_id: u64, stage: Stage) -> Option<PendingSend> {
        match &self.in_flight {
            Some(pending) if pending.send_id == send_id && pending.stage == stage => {
                Some(pending.clone())
            },
            _ => {
                tracing::debug!(send_id, "ignoring stale send result");
                None
            },
        }
    }

    fn rest_send(&mut self, send_id: u64, receiver_id: UserId, content: String) -> SendAction {
        self.in_flight = Some(PendingSend {
            send_id,
            content: content.clone(),
            receiver_id: Some(receiver_id),
            stage: Stage::Rest,
        });
        SendAction::RestSend { send_id, message: OutgoingMessage { receiver_id, content } }
    }

    fn fail(&mut self, reason: String) -> Vec<SendAction> {
        let Some(pending) = self.in_flight.take() else {
            return vec![];
        };
        tracing::warn!(send_id = pending.send_id, %reason, "send failed, restoring draft");

        self.draft = if self.draft.is_empty() {
            pending.content
        } else {
            format!("{} {}", pending.content, self.draft)
        };
        self.last_error = Some(SendError::Rejected { reason });
        vec![SendAction::Settled]
    }
}
