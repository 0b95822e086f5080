//! Process-wide push connection service.
//!
//! Runs one [`ConnectionManager`] against a [`PushTransport`]. Construct it
//! once at application start with [`ConnectionService::init`], hand clones to
//! consumers, and call [`ConnectionService::dispose`] on shutdown.
//!
//! # Architecture
//!
//! ```text
//! callers ──connect()──┐
//! host signals ────────┼──> ConnectionManager ──actions──> transport
//! transport events ────┤         (Mutex)
//! tick timer ──────────┘            │
//!                                   └──> broadcast<ConnectionEvent>, watch<ConnectionState>
//! ```
//!
//! Room membership is also process-wide: one conversation is joined at a
//! time. [`ConnectionService::claim`] hands membership to the newest view
//! and tells the previous holder through
//! [`ConnectionEvent::MembershipReleased`]. The transport join and leave
//! calls are serialized behind an async lock so the previous room is left
//! before the next one is joined.
//!
//! The manager lock is never held across an await. Actions are executed
//! under it, but executing only spawns tasks and publishes to channels, so
//! state changes reach subscribers in the order they happened.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use courier_core::{
    ChatConfig, ConnectionAction, ConnectionEvent, ConnectionManager, ConnectionState,
    ConversationId, Environment, Message, PlatformCapabilities, PushEvent,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    error::TransportError,
    host::{Visibility, transitions},
    transport::{PushTransport, methods, send_message_args, typing_args},
};

/// Buffered connection events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Buffered inbound transport events.
const PUSH_CAPACITY: usize = 256;

/// Outcome of a connect attempt, shared by every caller waiting on it.
type PendingConnect = Shared<BoxFuture<'static, bool>>;

struct ManagerState<I: courier_core::TimePoint> {
    manager: ConnectionManager<I>,
    /// Attempt in flight and the future resolving when it completes.
    pending: Option<(u64, PendingConnect)>,
}

struct Inner<E: Environment> {
    env: E,
    config: ChatConfig,
    transport: Arc<dyn PushTransport>,
    state: Mutex<ManagerState<E::Instant>>,
    events: broadcast::Sender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    push_tx: mpsc::Sender<PushEvent>,
    /// Conversation entitled to membership.
    claim: Mutex<Option<ConversationId>>,
    /// Conversation joined on the transport.
    room: tokio::sync::Mutex<Option<ConversationId>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Shared push connection.
///
/// Cheap to clone. All clones drive the same connection.
pub struct ConnectionService<E: Environment> {
    inner: Arc<Inner<E>>,
}

impl<E: Environment> Clone for ConnectionService<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Environment> ConnectionService<E> {
    /// Create the service and start its background driver.
    ///
    /// Does not connect. Must be called from within a tokio runtime.
    pub fn init(
        env: E,
        transport: Arc<dyn PushTransport>,
        config: ChatConfig,
        capabilities: PlatformCapabilities,
        host: watch::Receiver<Visibility>,
    ) -> Self {
        let (push_tx, push_rx) = mpsc::channel(PUSH_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let mut manager = ConnectionManager::new(&config, capabilities);
        if !host.borrow().visible {
            manager.set_visible(false, env.now());
        }

        tracing::info!(
            needs_heartbeat = capabilities.needs_heartbeat,
            mode = ?capabilities.preferred_transport_mode,
            "connection service started"
        );

        let tick = config.tick_interval;
        let inner = Arc::new(Inner {
            env: env.clone(),
            config,
            transport,
            state: Mutex::new(ManagerState { manager, pending: None }),
            events,
            state_tx,
            push_tx,
            claim: Mutex::new(None),
            room: tokio::sync::Mutex::new(None),
            driver: Mutex::new(None),
        });

        let driver = tokio::spawn(drive(Arc::downgrade(&inner), env, tick, push_rx, host));
        *inner.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(driver);

        Self { inner }
    }

    /// Disconnect and stop the background driver.
    pub async fn dispose(&self) {
        self.inner.update(|manager, _| manager.disconnect());
        self.inner.lock_state().pending = None;

        let driver = self.inner.driver.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(driver) = driver {
            driver.abort();
        }

        self.inner.transport.stop().await;
        tracing::info!("connection service disposed");
    }

    /// Connect, or wait for the attempt already in flight.
    ///
    /// Concurrent callers share a single attempt. Returns whether the
    /// connection is up once that attempt completes. Failures are retried in
    /// the background, never returned.
    pub async fn connect(&self) -> bool {
        let pending = {
            let mut state = self.inner.lock_state();
            if state.manager.is_connected() {
                return true;
            }
            let actions = state.manager.connect();
            self.inner.execute(&mut state, actions);
            state.pending.as_ref().map(|(_, outcome)| outcome.clone())
        };

        match pending {
            Some(outcome) => outcome.await,
            None => self.is_connected(),
        }
    }

    /// Tear down the connection. Idempotent.
    pub fn disconnect(&self) {
        self.inner.update(|manager, _| manager.disconnect());
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Whether the connection is up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to connection events.
    ///
    /// Dropping the receiver unsubscribes. A view must drop its
    /// subscription when it is torn down.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Environment the service runs on.
    pub fn env(&self) -> &E {
        &self.inner.env
    }

    /// Timing configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    /// Make `conversation_id` the conversation entitled to membership.
    ///
    /// A different conversation holding the claim loses it, and its holder
    /// is told through [`ConnectionEvent::MembershipReleased`]. The room
    /// itself is left by the next [`ConnectionService::join`].
    pub fn claim(&self, conversation_id: ConversationId) {
        let previous = self.inner.lock_claim().replace(conversation_id);
        if let Some(previous) = previous.filter(|previous| *previous != conversation_id) {
            tracing::info!(previous, conversation_id, "membership handed over");
            self.inner.publish(ConnectionEvent::MembershipReleased(previous));
        }
    }

    /// Join a conversation's room, leaving the room joined before it.
    ///
    /// # Errors
    ///
    /// [`TransportError::Superseded`] if another conversation claimed
    /// membership since, otherwise whatever the transport reports.
    pub async fn join(&self, conversation_id: ConversationId) -> Result<(), TransportError> {
        let mut room = self.inner.room.lock().await;
        if self.inner.claimed() != Some(conversation_id) {
            return Err(TransportError::Superseded(conversation_id));
        }

        if let Some(previous) = room.take_if(|previous| *previous != conversation_id) {
            match self.inner.transport.leave(previous).await {
                Ok(()) => tracing::debug!(previous, "left previous room"),
                Err(error) => log_dropped(previous, "leave", &error),
            }
        }

        let result = self.inner.transport.join(conversation_id).await;
        *room = result.is_ok().then_some(conversation_id);
        result
    }

    /// Leave a conversation's room and give up its claim.
    ///
    /// A no-op when another conversation holds the room.
    pub async fn leave(&self, conversation_id: ConversationId) -> Result<(), TransportError> {
        {
            let mut claim = self.inner.lock_claim();
            if *claim == Some(conversation_id) {
                *claim = None;
            }
        }

        let mut room = self.inner.room.lock().await;
        if *room != Some(conversation_id) {
            tracing::debug!(conversation_id, "room not held, nothing to leave");
            return Ok(());
        }
        *room = None;
        self.inner.transport.leave(conversation_id).await
    }

    /// Send a message over the push transport.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<(), TransportError> {
        let args = send_message_args(conversation_id, content);
        self.inner.transport.invoke(methods::SEND_MESSAGE, args).await
    }

    /// Send a typing signal.
    pub async fn send_typing(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), TransportError> {
        let args = typing_args(conversation_id, is_typing);
        self.inner.transport.invoke(methods::TYPING, args).await
    }
}

impl<E: Environment> Inner<E> {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState<E::Instant>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_claim(&self) -> MutexGuard<'_, Option<ConversationId>> {
        self.claim.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claimed(&self) -> Option<ConversationId> {
        *self.lock_claim()
    }

    /// Run `f` against the manager and execute what it returns.
    fn update<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&mut ConnectionManager<E::Instant>, E::Instant) -> Vec<ConnectionAction>,
    {
        let mut state = self.lock_state();
        let now = self.env.now();
        let actions = f(&mut state.manager, now);
        self.execute(&mut state, actions);
    }

    fn execute(self: &Arc<Self>, state: &mut ManagerState<E::Instant>, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::StartTransport { attempt, mode } => {
                    let inner = Arc::clone(self);
                    let outcome: PendingConnect = async move {
                        let result = inner.transport.start(mode, inner.push_tx.clone()).await;
                        inner.complete_attempt(attempt, result)
                    }
                    .boxed()
                    .shared();

                    // Runs to completion even if every caller stops waiting
                    tokio::spawn(outcome.clone());
                    state.pending = Some((attempt, outcome));
                },
                ConnectionAction::StopTransport => {
                    state.pending = None;
                    let inner = Arc::clone(self);
                    tokio::spawn(async move { inner.transport.stop().await });
                },
                ConnectionAction::SendPing { attempt } => {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move {
                        let result = inner.transport.invoke(methods::PING, Vec::new()).await;
                        inner.update(|manager, _| {
                            manager.handle_ping_result(attempt, result.map_err(|e| e.to_string()))
                        });
                    });
                },
                ConnectionAction::StateChanged(next) => {
                    tracing::debug!(state = ?next, "connection state changed");
                    self.state_tx.send_replace(next);
                    self.publish(ConnectionEvent::StateChanged(next));
                },
            }
        }
    }

    fn complete_attempt(self: &Arc<Self>, attempt: u64, result: Result<(), TransportError>) -> bool {
        let mut state = self.lock_state();
        if state.pending.as_ref().is_some_and(|(pending, _)| *pending == attempt) {
            state.pending = None;
        }

        let now = self.env.now();
        let result = result.map_err(|e| e.to_string());
        let actions = state.manager.handle_connect_result(attempt, result, now);
        self.execute(&mut state, actions);
        state.manager.is_connected()
    }

    fn handle_push_event(self: &Arc<Self>, event: PushEvent) {
        match event {
            PushEvent::Message(payload) => match Message::from_push(payload) {
                Ok(message) => self.publish(ConnectionEvent::Message(message)),
                Err(error) => tracing::warn!(%error, "dropping malformed push payload"),
            },
            PushEvent::Typing { conversation_id, user_id, is_typing } => {
                self.publish(ConnectionEvent::Typing { conversation_id, user_id, is_typing });
            },
            PushEvent::Presence { user_id, is_online } => {
                self.publish(ConnectionEvent::Presence { user_id, is_online });
            },
            PushEvent::Closed { reason } => {
                self.update(|manager, now| manager.handle_closed(reason.as_deref(), now));
            },
            PushEvent::Reconnecting => self.update(|manager, _| manager.handle_reconnecting()),
            PushEvent::Reconnected => self.update(|manager, now| manager.handle_reconnected(now)),
        }
    }

    fn handle_visibility(self: &Arc<Self>, previous: Visibility, next: Visibility) {
        let (visible, focus_gained) = transitions(previous, next);
        if let Some(visible) = visible {
            tracing::debug!(visible, "app visibility changed");
            self.update(|manager, now| manager.set_visible(visible, now));
        }
        if focus_gained {
            self.update(|manager, now| manager.focus_gained(now));
        }
    }

    fn publish(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("no connection event subscribers");
        }
    }
}

/// Transport failures a reconnect fixes are routine; anything else is worth
/// a warning.
fn log_dropped(conversation_id: ConversationId, operation: &str, error: &TransportError) {
    if error.is_transient() {
        tracing::debug!(conversation_id, operation, %error, "room operation dropped");
    } else {
        tracing::warn!(conversation_id, operation, %error, "room operation failed");
    }
}

/// Background driver: transport events, host signals and the tick timer.
///
/// Holds only a weak reference so that dropping every service handle ends
/// it even without `dispose`.
async fn drive<E: Environment>(
    inner: Weak<Inner<E>>,
    env: E,
    tick: Duration,
    mut push_rx: mpsc::Receiver<PushEvent>,
    mut host: watch::Receiver<Visibility>,
) {
    let mut last = *host.borrow_and_update();
    let mut host_open = true;
    let mut next_tick = env.now() + tick;

    loop {
        let now = env.now();
        let wait = if now >= next_tick { Duration::ZERO } else { next_tick - now };

        tokio::select! {
            event = push_rx.recv() => {
                let (Some(event), Some(inner)) = (event, inner.upgrade()) else { break };
                inner.handle_push_event(event);
            },
            changed = host.changed(), if host_open => {
                if changed.is_err() {
                    host_open = false;
                    continue;
                }
                let next = *host.borrow_and_update();
                let Some(inner) = inner.upgrade() else { break };
                inner.handle_visibility(last, next);
                last = next;
            },
            () = env.sleep(wait) => {
                let Some(inner) = inner.upgrade() else { break };
                next_tick = env.now() + tick;
                inner.update(|manager, now| manager.tick(now));
            },
        }
    }

    tracing::debug!("connection driver stopped");
}
