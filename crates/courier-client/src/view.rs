//! Chat view runtime.
//!
//! A [`ChatView`] owns one [`ChatSession`] on a dedicated task. Every input
//! (commands, connection events, host signals, I/O results, ticks) is
//! funnelled through that task, so merges are applied one at a time in the
//! order they arrive. The rendered state is published as a [`ChatSnapshot`].
//!
//! Request/response I/O (join, fetch, send) runs in a `JoinSet` owned by the
//! task and is cancelled with it. Fire-and-forget I/O (leave, typing,
//! mark-read) is detached so that it still goes out when the view closes.

use std::{sync::Arc, time::Duration};

use courier_core::{
    ChatAction, ChatEvent, ChatSession, ConnectionEvent, ConnectionState, ConversationHandle,
    Environment, LoadState, Message, SendError,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::{JoinHandle, JoinSet},
};

use crate::{
    api::MessageApi,
    host::{Visibility, transitions},
    service::ConnectionService,
};

/// Rendered state of a chat view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    /// Open conversation.
    pub conversation: ConversationHandle,
    /// Displayed messages, deduplicated and ordered.
    pub messages: Vec<Message>,
    /// Initial load progress.
    pub load_state: LoadState,
    /// Passive connection indicator.
    pub connection: ConnectionState,
    /// Whether push delivery is joined for this conversation. When false
    /// the view is kept current by polling alone.
    pub joined: bool,
    /// Remote participant typing indicator.
    pub remote_typing: bool,
    /// Remote participant presence, once known.
    pub remote_online: Option<bool>,
    /// Composer text.
    pub draft: String,
    /// Send in flight.
    pub sending: bool,
    /// Last failed send.
    pub send_error: Option<SendError>,
}

impl ChatSnapshot {
    fn capture<I: courier_core::TimePoint>(
        conversation: ConversationHandle,
        session: &ChatSession<I>,
    ) -> Self {
        Self {
            conversation,
            messages: session.messages().to_vec(),
            load_state: session.load_state(),
            connection: session.connection(),
            joined: session.push_available(),
            remote_typing: session.remote_typing(),
            remote_online: session.remote_online(),
            draft: session.draft().to_owned(),
            sending: session.is_sending(),
            send_error: session.send_error().cloned(),
        }
    }

    /// Ids of the displayed messages, in order.
    pub fn message_ids(&self) -> Vec<courier_core::MessageId> {
        self.messages.iter().map(|m| m.id).collect()
    }
}

enum Command {
    Input(String),
    Send(oneshot::Sender<Result<(), SendError>>),
    RetryLoad,
    Close(oneshot::Sender<()>),
}

/// Handle to an open chat view.
///
/// Dropping the handle stops the view's task. [`ChatView::close`] also
/// leaves the conversation and stops the typing indicator first.
pub struct ChatView {
    conversation: ConversationHandle,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ChatSnapshot>,
    task: JoinHandle<()>,
}

impl ChatView {
    /// Open `conversation`.
    ///
    /// Joins it on the shared connection (connecting first if needed),
    /// fetches the initial snapshot and starts polling. Push membership
    /// moves to this view: a view opened earlier on the same service keeps
    /// working on polling alone.
    pub fn open<E: Environment>(
        service: &ConnectionService<E>,
        api: Arc<dyn MessageApi>,
        host: watch::Receiver<Visibility>,
        conversation: ConversationHandle,
    ) -> Self {
        // Subscribe before reading the state so no transition is missed
        let events = service.subscribe();
        service.claim(conversation.conversation_id);
        let env = service.env().clone();
        let config = service.config().clone();

        let now = env.now();
        let mut session = ChatSession::new(&config, service.state());
        if !host.borrow().visible {
            session.handle(ChatEvent::VisibilityChanged(false), now);
        }
        let initial = session.open(conversation, now);

        let (snapshot_tx, snapshot) =
            watch::channel(ChatSnapshot::capture(conversation, &session));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let runner = ViewRunner {
            conversation,
            session,
            env,
            tick: config.tick_interval,
            service: service.clone(),
            api,
            snapshot_tx,
        };
        let task = tokio::spawn(runner.run(initial, command_rx, events, host));

        Self { conversation, commands, snapshot, task }
    }

    /// Open conversation.
    pub fn conversation(&self) -> ConversationHandle {
        self.conversation
    }

    /// Latest rendered state.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Follow rendered state.
    pub fn watch(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.clone()
    }

    /// Composer text changed.
    pub fn input(&self, text: impl Into<String>) {
        self.command(Command::Input(text.into()));
    }

    /// Send the composer text.
    ///
    /// Resolves once the message is dispatched, not when it is delivered.
    /// Delivery failures show up in [`ChatSnapshot::send_error`].
    pub async fn send(&self) -> Result<(), SendError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Send(tx));
        rx.await.unwrap_or_else(|_| Err(SendError::Rejected { reason: "chat view closed".into() }))
    }

    /// Retry a failed initial load.
    pub fn retry_load(&self) {
        self.command(Command::RetryLoad);
    }

    /// Leave the conversation and stop the view.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Close(tx));
        if rx.await.is_err() {
            tracing::debug!("chat view already stopped");
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!(
                conversation_id = self.conversation.conversation_id,
                "chat view stopped, command dropped"
            );
        }
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ViewRunner<E: Environment> {
    conversation: ConversationHandle,
    session: ChatSession<E::Instant>,
    env: E,
    tick: Duration,
    service: ConnectionService<E>,
    api: Arc<dyn MessageApi>,
    snapshot_tx: watch::Sender<ChatSnapshot>,
}

impl<E: Environment> ViewRunner<E> {
    async fn run(
        mut self,
        initial: Vec<ChatAction>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: broadcast::Receiver<ConnectionEvent>,
        mut host: watch::Receiver<Visibility>,
    ) {
        let mut io: JoinSet<ChatEvent> = JoinSet::new();
        self.execute(initial, &mut io);

        let mut last = *host.borrow_and_update();
        let mut events_open = true;
        let mut host_open = true;
        let mut next_tick = self.env.now() + self.tick;

        loop {
            let now = self.env.now();
            let wait = if now >= next_tick { Duration::ZERO } else { next_tick - now };
            let env = self.env.clone();

            let actions = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close(ack)) => {
                        let actions = self.session.close();
                        self.execute(actions, &mut io);
                        // Receiver gone means nobody waits for the ack
                        let _ = ack.send(());
                        break;
                    },
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(joined) = io.join_next() => match joined {
                    Ok(event) => self.session.handle(event, self.env.now()),
                    Err(error) => {
                        tracing::warn!(%error, "chat I/O task failed");
                        Vec::new()
                    },
                },
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.session.handle(chat_event(event), self.env.now()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed messages are picked up by the next poll
                        tracing::warn!(skipped, "chat view lagged behind connection events");
                        let state = self.service.state();
                        self.session.handle(ChatEvent::ConnectionChanged(state), self.env.now())
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        events_open = false;
                        Vec::new()
                    },
                },
                changed = host.changed(), if host_open => {
                    if changed.is_err() {
                        host_open = false;
                        continue;
                    }
                    let next = *host.borrow_and_update();
                    let actions = self.handle_visibility(last, next);
                    last = next;
                    actions
                },
                () = env.sleep(wait) => {
                    next_tick = self.env.now() + self.tick;
                    self.session.handle(ChatEvent::Tick, self.env.now())
                },
            };

            self.execute(actions, &mut io);
        }

        tracing::debug!(conversation_id = self.conversation.conversation_id, "chat view stopped");
    }

    fn handle_command(&mut self, command: Command) -> Vec<ChatAction> {
        let now = self.env.now();
        match command {
            Command::Input(text) => self.session.input_changed(text, now),
            Command::Send(ack) => {
                let (outcome, actions) = match self.session.send(now) {
                    Ok(actions) => (Ok(()), actions),
                    Err(error) => (Err(error), Vec::new()),
                };
                let _ = ack.send(outcome);
                actions
            },
            Command::RetryLoad => self.session.retry_load(now),
            Command::Close(_) => Vec::new(),
        }
    }

    fn handle_visibility(&mut self, previous: Visibility, next: Visibility) -> Vec<ChatAction> {
        let now = self.env.now();
        let (visible, focus_gained) = transitions(previous, next);

        let mut actions = Vec::new();
        if let Some(visible) = visible {
            actions.extend(self.session.handle(ChatEvent::VisibilityChanged(visible), now));
        }
        if focus_gained {
            actions.extend(self.session.handle(ChatEvent::FocusGained, now));
        }
        actions
    }

    fn execute(&mut self, actions: Vec<ChatAction>, io: &mut JoinSet<ChatEvent>) {
        let conversation_id = self.conversation.conversation_id;

        for action in actions {
            match action {
                ChatAction::Connect => {
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        service.connect().await;
                    });
                },
                ChatAction::Join(id) => {
                    let service = self.service.clone();
                    io.spawn(async move {
                        let result = service.join(id).await.map_err(|e| e.to_string());
                        ChatEvent::JoinCompleted { conversation_id: id, result }
                    });
                },
                ChatAction::Leave(id) => {
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        if let Err(error) = service.leave(id).await {
                            tracing::debug!(conversation_id = id, %error, "leave failed");
                        }
                    });
                },
                ChatAction::FetchMessages(request) => {
                    let api = Arc::clone(&self.api);
                    io.spawn(async move {
                        let result = api
                            .fetch_messages(request.conversation_id)
                            .await
                            .map_err(|e| e.to_string());
                        ChatEvent::FetchCompleted { request, result }
                    });
                },
                ChatAction::MarkRead(id) => {
                    let api = Arc::clone(&self.api);
                    tokio::spawn(async move {
                        match api.mark_read(id).await {
                            Ok(()) => {},
                            Err(error) if error.is_transient() => {
                                tracing::debug!(conversation_id = id, %error, "mark read deferred");
                            },
                            Err(error) => {
                                tracing::warn!(conversation_id = id, %error, "mark read failed");
                            },
                        }
                    });
                },
                ChatAction::PushSend { send_id, conversation_id, content } => {
                    let service = self.service.clone();
                    io.spawn(async move {
                        let result = service
                            .send_message(conversation_id, &content)
                            .await
                            .map_err(|e| e.to_string());
                        ChatEvent::PushSendCompleted { send_id, result }
                    });
                },
                ChatAction::RestSend { send_id, message } => {
                    let api = Arc::clone(&self.api);
                    io.spawn(async move {
                        let result = api.send_message(&message).await.map_err(|e| e.to_string());
                        ChatEvent::RestSendCompleted { send_id, result }
                    });
                },
                ChatAction::SendTyping { conversation_id: id, is_typing } => {
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        if let Err(error) = service.send_typing(id, is_typing).await {
                            tracing::debug!(conversation_id = id, %error, "typing signal dropped");
                        }
                    });
                },
                ChatAction::Render => {
                    let snapshot = ChatSnapshot::capture(self.conversation, &self.session);
                    self.snapshot_tx.send_replace(snapshot);
                },
            }
        }

        tracing::trace!(conversation_id, pending = io.len(), "chat actions executed");
    }
}

fn chat_event(event: ConnectionEvent) -> ChatEvent {
    match event {
        ConnectionEvent::Message(message) => ChatEvent::MessagePushed(message),
        ConnectionEvent::StateChanged(state) => ChatEvent::ConnectionChanged(state),
        ConnectionEvent::Typing { conversation_id, user_id, is_typing } => {
            ChatEvent::TypingSignal { conversation_id, user_id, is_typing }
        },
        ConnectionEvent::Presence { user_id, is_online } => {
            ChatEvent::PresenceSignal { user_id, is_online }
        },
        ConnectionEvent::MembershipReleased(id) => ChatEvent::MembershipRevoked(id),
    }
}
