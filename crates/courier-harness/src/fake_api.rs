//! In-memory REST backend.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use courier_client::{ApiError, MessageApi};
use courier_core::{ConversationId, Message, MessageId, OutgoingMessage, UserId};

use crate::fixtures::timestamp;

/// Ids handed out to messages created through `send_message`.
const FIRST_CREATED_ID: MessageId = 1_000;

struct ApiState {
    local_user: UserId,
    conversations: HashMap<ConversationId, Vec<Message>>,
    routes: HashMap<UserId, ConversationId>,
    next_id: MessageId,
    fetches: Vec<ConversationId>,
    sent: Vec<OutgoingMessage>,
    reads: Vec<ConversationId>,
    fail_fetches: bool,
    fail_sends: bool,
}

/// In-memory [`MessageApi`] acting for `local_user`.
///
/// Created messages are appended to the conversation routed to their
/// receiver and returned, the way the backend answers `POST message`.
pub struct FakeApi {
    state: Mutex<ApiState>,
}

impl FakeApi {
    /// Backend with no conversations.
    pub fn new(local_user: UserId) -> Self {
        Self {
            state: Mutex::new(ApiState {
                local_user,
                conversations: HashMap::new(),
                routes: HashMap::new(),
                next_id: FIRST_CREATED_ID,
                fetches: Vec::new(),
                sent: Vec::new(),
                reads: Vec::new(),
                fail_fetches: false,
                fail_sends: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ApiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the conversation between the local user and `remote`.
    pub fn add_conversation(&self, conversation_id: ConversationId, remote: UserId) {
        let mut state = self.lock();
        state.routes.insert(remote, conversation_id);
        state.conversations.entry(conversation_id).or_default();
    }

    /// Replace a conversation's stored messages.
    pub fn set_messages(&self, conversation_id: ConversationId, messages: Vec<Message>) {
        self.lock().conversations.insert(conversation_id, messages);
    }

    /// Append one message to a conversation.
    pub fn append(&self, message: Message) {
        let Some(conversation_id) = message.conversation_id else {
            return;
        };
        self.lock().conversations.entry(conversation_id).or_default().push(message);
    }

    /// Stored messages of a conversation.
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.lock().conversations.get(&conversation_id).cloned().unwrap_or_default()
    }

    /// Make fetches fail.
    pub fn set_fail_fetches(&self, fail: bool) {
        self.lock().fail_fetches = fail;
    }

    /// Make sends fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Number of fetches of `conversation_id`, failed ones included.
    pub fn fetch_count(&self, conversation_id: ConversationId) -> usize {
        self.lock().fetches.iter().filter(|id| **id == conversation_id).count()
    }

    /// Total number of fetches.
    pub fn total_fetches(&self) -> usize {
        self.lock().fetches.len()
    }

    /// Bodies of every accepted send.
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.lock().sent.clone()
    }

    /// Conversations marked read, in order.
    pub fn reads(&self) -> Vec<ConversationId> {
        self.lock().reads.clone()
    }
}

#[async_trait]
impl MessageApi for FakeApi {
    async fn fetch_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ApiError> {
        let mut state = self.lock();
        state.fetches.push(conversation_id);
        if state.fail_fetches {
            return Err(ApiError::Status { status: 503, body: "unavailable".into() });
        }
        Ok(state.conversations.get(&conversation_id).cloned().unwrap_or_default())
    }

    async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<Message, ApiError> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(ApiError::Network("connection reset".into()));
        }

        let id = state.next_id;
        state.next_id += 1;
        let message = Message {
            id,
            conversation_id: state.routes.get(&outgoing.receiver_id).copied(),
            sender_id: state.local_user,
            receiver_id: outgoing.receiver_id,
            content: outgoing.content.clone(),
            sent_at: timestamp(id),
            is_read: false,
        };

        state.sent.push(outgoing.clone());
        if let Some(conversation_id) = message.conversation_id {
            state.conversations.entry(conversation_id).or_default().push(message.clone());
        }
        Ok(message)
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), ApiError> {
        self.lock().reads.push(conversation_id);
        Ok(())
    }
}
