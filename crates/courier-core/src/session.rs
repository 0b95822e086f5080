//! Chat session: one open chat view.
//!
//! Composes the membership controller, sync engine, composer and typing
//! tracker behind a single event handler, the way a view consumes them. The
//! connection manager is not part of the session. It is shared process-wide,
//! and the session only sees its state through
//! [`ChatEvent::ConnectionChanged`].
//!
//! ```text
//! ChatEvent ──> ChatSession::handle() ──> Vec<ChatAction> ──> runtime
//!                      ↑                                          │
//!                      └──────────── results as ChatEvent ────────┘
//! ```

use crate::{
    config::ChatConfig,
    connection::ConnectionState,
    env::TimePoint,
    error::SendError,
    membership::{Membership, MembershipAction},
    message::{ConversationHandle, ConversationId, Message, OutgoingMessage, UserId},
    send::{Composer, SendAction, SendRoute},
    sync::{FetchRequest, LoadState, SyncAction, SyncEngine},
    typing::{TypingAction, TypingTracker},
};

/// Inputs to a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Shared connection changed state.
    ConnectionChanged(ConnectionState),
    /// Validated message pushed by the transport.
    MessagePushed(Message),
    /// Typing signal from the transport.
    TypingSignal {
        /// Conversation, when the server includes it.
        conversation_id: Option<ConversationId>,
        /// Typing participant.
        user_id: UserId,
        /// Started or stopped.
        is_typing: bool,
    },
    /// Presence signal from the transport.
    PresenceSignal {
        /// Participant.
        user_id: UserId,
        /// Online status.
        is_online: bool,
    },
    /// Result of [`ChatAction::Join`].
    JoinCompleted {
        /// Conversation joined.
        conversation_id: ConversationId,
        /// Outcome.
        result: Result<(), String>,
    },
    /// Result of [`ChatAction::FetchMessages`].
    FetchCompleted {
        /// The request being answered.
        request: FetchRequest,
        /// Snapshot or failure reason.
        result: Result<Vec<Message>, String>,
    },
    /// Result of [`ChatAction::PushSend`].
    PushSendCompleted {
        /// Send being answered.
        send_id: u64,
        /// Outcome.
        result: Result<(), String>,
    },
    /// Result of [`ChatAction::RestSend`].
    RestSendCompleted {
        /// Send being answered.
        send_id: u64,
        /// Created message or failure reason.
        result: Result<Message, String>,
    },
    /// Another view took over push membership of this conversation.
    MembershipRevoked(ConversationId),
    /// View became visible or hidden.
    VisibilityChanged(bool),
    /// View gained focus.
    FocusGained,
    /// Periodic timer.
    Tick,
}

/// Actions for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    /// Ask the shared connection to connect.
    Connect,
    /// Join a conversation on the push transport.
    Join(ConversationId),
    /// Leave a conversation on the push transport. Best-effort.
    Leave(ConversationId),
    /// Fetch a snapshot over REST.
    FetchMessages(FetchRequest),
    /// Mark a conversation read over REST.
    MarkRead(ConversationId),
    /// Send over the push transport.
    PushSend {
        /// Send to report back.
        send_id: u64,
        /// Target conversation.
        conversation_id: ConversationId,
        /// Content.
        content: String,
    },
    /// Send over REST.
    RestSend {
        /// Send to report back.
        send_id: u64,
        /// Request body.
        message: OutgoingMessage,
    },
    /// Send a typing signal. Failures are ignored.
    SendTyping {
        /// Conversation.
        conversation_id: ConversationId,
        /// Started or stopped.
        is_typing: bool,
    },
    /// View state changed, re-render.
    Render,
}

/// State machine behind one chat view.
#[derive(Debug, Clone)]
pub struct ChatSession<I: TimePoint> {
    connection: ConnectionState,
    membership: Membership,
    sync: SyncEngine<I>,
    composer: Composer,
    typing: TypingTracker<I>,
    remote_online: Option<bool>,
}

impl<I: TimePoint> ChatSession<I> {
    /// Create a session with no conversation open.
    ///
    /// `connection` is the shared connection's state at creation time.
    pub fn new(config: &ChatConfig, connection: ConnectionState) -> Self {
        Self {
            connection,
            membership: Membership::new(),
            sync: SyncEngine::new(config),
            composer: Composer::new(),
            typing: TypingTracker::new(config),
            remote_online: None,
        }
    }

    /// Open conversation.
    pub fn conversation(&self) -> Option<&ConversationHandle> {
        self.sync.handle()
    }

    /// Displayed messages.
    pub fn messages(&self) -> &[Message] {
        self.sync.messages()
    }

    /// Initial load progress.
    pub fn load_state(&self) -> LoadState {
        self.sync.load_state()
    }

    /// Last known connection state.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Whether pushes for the open conversation are expected. When not, the
    /// poller alone keeps the view current.
    pub fn push_available(&self) -> bool {
        self.membership.push_available()
    }

    /// Composer text.
    pub fn draft(&self) -> &str {
        self.composer.draft()
    }

    /// Whether a send is in flight.
    pub fn is_sending(&self) -> bool {
        self.composer.is_sending()
    }

    /// Last send failure.
    pub fn send_error(&self) -> Option<&SendError> {
        self.composer.last_error()
    }

    /// Whether the remote participant is shown as typing.
    pub fn remote_typing(&self) -> bool {
        self.typing.remote().is_some()
    }

    /// Remote participant's online status, once known.
    pub fn remote_online(&self) -> Option<bool> {
        self.remote_online
    }

    /// Open `handle`. A previously open conversation is closed first.
    pub fn open(&mut self, handle: ConversationHandle, now: I) -> Vec<ChatAction> {
        let mut actions = Vec::new();
        if self.sync.handle().is_some() {
            actions.extend(self.close());
        }

        tracing::info!(conversation_id = handle.conversation_id, "chat opened");

        let joins = self.membership.join(handle.conversation_id, self.connection);
        actions.extend(joins.into_iter().map(ChatAction::from));
        let syncs = self.sync.open(handle, now);
        apply_sync(syncs, &mut actions);

        finish(actions)
    }

    /// Close the open conversation and release everything tied to it.
    pub fn close(&mut self) -> Vec<ChatAction> {
        let Some(handle) = self.sync.handle().copied() else {
            return vec![];
        };
        tracing::info!(conversation_id = handle.conversation_id, "chat closed");

        let mut actions = Vec::new();
        let typing = self.typing.stop();
        apply_typing(typing, &mut actions);
        self.typing.clear_remote();

        let leaves = self.membership.leave(handle.conversation_id);
        actions.extend(leaves.into_iter().map(ChatAction::from));

        self.sync.close();
        self.composer.reset();
        self.remote_online = None;

        actions
    }

    /// Composer text changed.
    pub fn input_changed(&mut self, text: impl Into<String>, now: I) -> Vec<ChatAction> {
        let text = text.into();
        let blank = text.trim().is_empty();
        self.composer.set_draft(text);

        let typing = if blank {
            self.typing.stop()
        } else {
            let joined = self.membership.joined().filter(|_| self.is_connected());
            self.typing.input_changed(joined, now)
        };

        let mut actions = Vec::new();
        apply_typing(typing, &mut actions);
        actions.push(ChatAction::Render);
        finish(actions)
    }

    /// Send the composer text.
    ///
    /// # Errors
    ///
    /// Validation failures from [`Composer::submit`]. Nothing is sent.
    pub fn send(&mut self, now: I) -> Result<Vec<ChatAction>, SendError> {
        let handle = self.sync.handle().copied();
        let route = SendRoute {
            connected: self.is_connected(),
            conversation_id: handle.map(|h| h.conversation_id),
            receiver_id: handle.map(|h| h.remote_participant_id),
        };

        let sends = self.composer.submit(route)?;
        if sends.is_empty() {
            return Ok(vec![]);
        }

        let mut actions = Vec::new();
        let typing = self.typing.stop();
        apply_typing(typing, &mut actions);
        self.apply_send(sends, now, &mut actions);
        actions.push(ChatAction::Render);
        Ok(finish(actions))
    }

    /// Retry a failed initial load.
    pub fn retry_load(&mut self, now: I) -> Vec<ChatAction> {
        let mut actions = Vec::new();
        let syncs = self.sync.retry(now);
        apply_sync(syncs, &mut actions);
        finish(actions)
    }

    /// Process an event.
    pub fn handle(&mut self, event: ChatEvent, now: I) -> Vec<ChatAction> {
        let mut actions = Vec::new();

        match event {
            ChatEvent::ConnectionChanged(state) => {
                if state == self.connection {
                    return actions;
                }
                self.connection = state;
                if state != ConnectionState::Connected {
                    self.typing.forget_local();
                }
                if self.sync.handle().is_some() {
                    let joins = self.membership.handle_connection_changed(state);
                    actions.extend(joins.into_iter().map(ChatAction::from));
                }
                actions.push(ChatAction::Render);
            },
            ChatEvent::MessagePushed(message) => {
                let syncs = self.sync.handle_push(message);
                apply_sync(syncs, &mut actions);
            },
            ChatEvent::TypingSignal { conversation_id, user_id, is_typing } => {
                if let Some(handle) = self.sync.handle().copied() {
                    let typing =
                        self.typing.handle_remote(&handle, conversation_id, user_id, is_typing, now);
                    apply_typing(typing, &mut actions);
                }
            },
            ChatEvent::PresenceSignal { user_id, is_online } => {
                let remote = self.sync.handle().map(|h| h.remote_participant_id);
                if remote == Some(user_id) && self.remote_online != Some(is_online) {
                    self.remote_online = Some(is_online);
                    actions.push(ChatAction::Render);
                }
            },
            ChatEvent::JoinCompleted { conversation_id, result } => {
                let joined = self.membership.joined();
                self.membership.handle_join_result(conversation_id, result);
                if self.membership.joined() != joined {
                    actions.push(ChatAction::Render);
                }
            },
            ChatEvent::MembershipRevoked(conversation_id) => {
                if self.membership.revoke(conversation_id) {
                    self.typing.forget_local();
                    actions.push(ChatAction::Render);
                }
            },
            ChatEvent::FetchCompleted { request, result } => {
                let syncs = self.sync.handle_fetch_result(request, result, now);
                apply_sync(syncs, &mut actions);
            },
            ChatEvent::PushSendCompleted { send_id, result } => {
                let sends = self.composer.handle_push_result(send_id, result);
                self.apply_send(sends, now, &mut actions);
            },
            ChatEvent::RestSendCompleted { send_id, result } => {
                let sends = self.composer.handle_rest_result(send_id, result);
                self.apply_send(sends, now, &mut actions);
            },
            ChatEvent::VisibilityChanged(visible) => {
                let syncs = self.sync.set_visible(visible, now);
                apply_sync(syncs, &mut actions);
            },
            ChatEvent::FocusGained => {
                let syncs = self.sync.focus_gained(now);
                apply_sync(syncs, &mut actions);
            },
            ChatEvent::Tick => {
                let syncs = self.sync.tick(now);
                apply_sync(syncs, &mut actions);
                let typing = self.typing.tick(now);
                apply_typing(typing, &mut actions);
            },
        }

        finish(actions)
    }

    fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    fn apply_send(&mut self, sends: Vec<SendAction>, now: I, actions: &mut Vec<ChatAction>) {
        for action in sends {
            match action {
                SendAction::PushSend { send_id, conversation_id, content } => {
                    actions.push(ChatAction::PushSend { send_id, conversation_id, content });
                },
                SendAction::RestSend { send_id, message } => {
                    actions.push(ChatAction::RestSend { send_id, message });
                },
                SendAction::Refresh => {
                    let syncs = self.sync.refresh(now);
                    apply_sync(syncs, actions);
                },
                SendAction::Settled => actions.push(ChatAction::Render),
            }
        }
    }
}

impl From<MembershipAction> for ChatAction {
    fn from(action: MembershipAction) -> Self {
        match action {
            MembershipAction::Connect => Self::Connect,
            MembershipAction::Join(id) => Self::Join(id),
            MembershipAction::Leave(id) => Self::Leave(id),
        }
    }
}

fn apply_sync(syncs: Vec<SyncAction>, actions: &mut Vec<ChatAction>) {
    actions.extend(syncs.into_iter().map(|action| match action {
        SyncAction::Fetch(request) => ChatAction::FetchMessages(request),
        SyncAction::MarkRead(conversation_id) => ChatAction::MarkRead(conversation_id),
        SyncAction::DisplayChanged => ChatAction::Render,
    }));
}

fn apply_typing(typing: Vec<TypingAction>, actions: &mut Vec<ChatAction>) {
    actions.extend(typing.into_iter().map(|action| match action {
        TypingAction::Send { conversation_id, is_typing } => {
            ChatAction::SendTyping { conversation_id, is_typing }
        },
        TypingAction::RemoteChanged => ChatAction::Render,
    }));
}

/// Collapse repeated renders into a single trailing one.
fn finish(actions: Vec<ChatAction>) -> Vec<ChatAction> {
    let render = actions.contains(&ChatAction::Render);
    let mut out: Vec<ChatAction> =
        actions.into_iter().filter(|a| *a != ChatAction::Render).collect();
    if render {
        out.push(ChatAction::Render);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::sync::FetchKind;

    fn handle() -> ConversationHandle {
        ConversationHandle::new(42, 1, 2)
    }

    fn msg(id: i64, secs: i64) -> Message {
        Message {
            id,
            conversation_id: Some(42),
            sender_id: 2,
            receiver_id: 1,
            content: format!("m{id}"),
            sent_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            is_read: false,
        }
    }

    fn fetch_of(actions: &[ChatAction]) -> Option<FetchRequest> {
        actions.iter().find_map(|a| match a {
            ChatAction::FetchMessages(request) => Some(*request),
            _ => None,
        })
    }

    fn connected_session(t0: Instant) -> (ChatSession<Instant>, FetchRequest) {
        let mut session = ChatSession::new(&ChatConfig::default(), ConnectionState::Connected);
        let actions = session.open(handle(), t0);
        assert!(actions.contains(&ChatAction::Join(42)));
        session.handle(ChatEvent::JoinCompleted { conversation_id: 42, result: Ok(()) }, t0);
        (session, fetch_of(&actions).unwrap())
    }

    #[test]
    fn open_while_disconnected_connects_and_fetches() {
        let t0 = Instant::now();
        let mut session: ChatSession<Instant> =
            ChatSession::new(&ChatConfig::default(), ConnectionState::Disconnected);

        let actions = session.open(handle(), t0);
        assert_eq!(actions[0], ChatAction::Connect);
        assert_eq!(fetch_of(&actions).map(|r| r.kind), Some(FetchKind::Initial));
        assert_eq!(actions.last(), Some(&ChatAction::Render));

        let actions = session.handle(ChatEvent::ConnectionChanged(ConnectionState::Connected), t0);
        assert!(actions.contains(&ChatAction::Join(42)));

        let actions =
            session.handle(ChatEvent::JoinCompleted { conversation_id: 42, result: Ok(()) }, t0);
        assert_eq!(actions, vec![ChatAction::Render]);
        assert!(session.push_available());
    }

    #[test]
    fn push_then_poll_keeps_one_copy() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let (mut session, request) = connected_session(t0);

        session.handle(ChatEvent::FetchCompleted { request, result: Ok(vec![msg(1, 0)]) }, t0);
        session.handle(ChatEvent::MessagePushed(msg(2, 10)), t0);

        let request = fetch_of(&session.handle(ChatEvent::Tick, t0 + poll)).unwrap();
        let actions = session.handle(
            ChatEvent::FetchCompleted { request, result: Ok(vec![msg(1, 0), msg(2, 10)]) },
            t0 + poll,
        );

        assert!(!actions.contains(&ChatAction::Render));
        let ids: Vec<i64> = session.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn send_stops_typing_and_pushes() {
        let t0 = Instant::now();
        let (mut session, _) = connected_session(t0);

        let actions = session.input_changed("hel", t0);
        assert!(actions.contains(&ChatAction::SendTyping { conversation_id: 42, is_typing: true }));

        let actions = session.send(t0).unwrap();
        assert_eq!(
            actions,
            vec![
                ChatAction::SendTyping { conversation_id: 42, is_typing: false },
                ChatAction::PushSend { send_id: 1, conversation_id: 42, content: "hel".into() },
                ChatAction::Render,
            ]
        );
    }

    #[test]
    fn rest_send_success_refreshes() {
        let t0 = Instant::now();
        let mut session: ChatSession<Instant> =
            ChatSession::new(&ChatConfig::default(), ConnectionState::Disconnected);
        let request = fetch_of(&session.open(handle(), t0)).unwrap();
        session.handle(ChatEvent::FetchCompleted { request, result: Ok(vec![]) }, t0);

        session.input_changed("hi", t0);
        let actions = session.send(t0).unwrap();
        assert!(matches!(actions[0], ChatAction::RestSend { send_id: 1, .. }));

        let mut created = msg(5, 1);
        created.sender_id = 1;
        let actions = session
            .handle(ChatEvent::RestSendCompleted { send_id: 1, result: Ok(created) }, t0);
        assert_eq!(fetch_of(&actions).map(|r| r.kind), Some(FetchKind::Refresh));
    }

    #[test]
    fn typing_requires_connection() {
        let t0 = Instant::now();
        let (mut session, _) = connected_session(t0);

        session.handle(ChatEvent::ConnectionChanged(ConnectionState::Reconnecting), t0);
        let actions = session.input_changed("hello", t0);
        assert_eq!(actions, vec![ChatAction::Render]);
    }

    #[test]
    fn close_stops_typing_and_leaves() {
        let t0 = Instant::now();
        let (mut session, _) = connected_session(t0);
        session.input_changed("hello", t0);

        let actions = session.close();
        assert_eq!(
            actions,
            vec![
                ChatAction::SendTyping { conversation_id: 42, is_typing: false },
                ChatAction::Leave(42),
            ]
        );
        assert!(session.conversation().is_none());
        assert_eq!(session.draft(), "");
    }

    #[test]
    fn closed_session_ignores_ticks() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let (mut session, _) = connected_session(t0);
        session.close();

        for i in 1..20 {
            assert!(session.handle(ChatEvent::Tick, t0 + poll * i).is_empty());
        }
    }

    #[test]
    fn reopening_leaves_previous_conversation() {
        let t0 = Instant::now();
        let (mut session, _) = connected_session(t0);

        let actions = session.open(ConversationHandle::new(7, 1, 3), t0);
        assert_eq!(actions[0], ChatAction::Leave(42));
        assert!(actions.contains(&ChatAction::Join(7)));
    }

    #[test]
    fn remote_presence_is_tracked() {
        let t0 = Instant::now();
        let (mut session, _) = connected_session(t0);

        session.handle(ChatEvent::PresenceSignal { user_id: 9, is_online: true }, t0);
        assert_eq!(session.remote_online(), None);

        let actions = session.handle(ChatEvent::PresenceSignal { user_id: 2, is_online: true }, t0);
        assert_eq!(actions, vec![ChatAction::Render]);
        assert_eq!(session.remote_online(), Some(true));
    }

    #[test]
    fn remote_typing_expires_on_tick() {
        let t0 = Instant::now();
        let (mut session, _) = connected_session(t0);

        session.handle(
            ChatEvent::TypingSignal { conversation_id: None, user_id: 2, is_typing: true },
            t0,
        );
        assert!(session.remote_typing());

        session.handle(ChatEvent::Tick, t0 + Duration::from_secs(6));
        assert!(!session.remote_typing());
    }

    #[test]
    fn revoked_membership_keeps_polling() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let (mut session, request) = connected_session(t0);
        session.handle(ChatEvent::FetchCompleted { request, result: Ok(vec![]) }, t0);
        assert!(session.push_available());

        let actions = session.handle(ChatEvent::MembershipRevoked(42), t0);
        assert_eq!(actions, vec![ChatAction::Render]);
        assert!(!session.push_available());

        // No typing without membership, no leave for a room someone else holds
        assert_eq!(session.input_changed("hello", t0), vec![ChatAction::Render]);
        assert!(fetch_of(&session.handle(ChatEvent::Tick, t0 + poll)).is_some());
        assert!(!session.close().contains(&ChatAction::Leave(42)));
    }
}
