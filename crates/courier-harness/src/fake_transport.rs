//! Scripted push transport.
//!
//! Behaves like a hub that accepts every connection unless told otherwise.
//! Tests flip failure switches, inject server events and then inspect what
//! the client invoked.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use courier_client::{PushTransport, TransportError, methods};
use courier_core::{ConversationId, Message, PushEvent, TransportMode, UserId};
use serde_json::Value;
use tokio::{sync::mpsc, time::Instant};

#[derive(Default)]
struct TransportState {
    events: Option<mpsc::Sender<PushEvent>>,
    starts: Vec<Instant>,
    modes: Vec<TransportMode>,
    stops: usize,
    start_delay: Duration,
    fail_starts: bool,
    fail_pings: bool,
    reject_sends: bool,
    invocations: Vec<(String, Vec<Value>)>,
    joins: Vec<ConversationId>,
    leaves: Vec<ConversationId>,
}

/// In-memory [`PushTransport`].
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    /// Transport that connects instantly and accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `start` take `delay` of virtual time.
    pub fn set_start_delay(&self, delay: Duration) {
        self.lock().start_delay = delay;
    }

    /// Make `start` fail (`true`) or succeed (`false`).
    pub fn set_fail_starts(&self, fail: bool) {
        self.lock().fail_starts = fail;
    }

    /// Make keep-alive pings fail.
    pub fn set_fail_pings(&self, fail: bool) {
        self.lock().fail_pings = fail;
    }

    /// Make the hub reject `SendMessage` invocations.
    pub fn set_reject_sends(&self, reject: bool) {
        self.lock().reject_sends = reject;
    }

    /// Number of connect attempts so far.
    pub fn start_count(&self) -> usize {
        self.lock().starts.len()
    }

    /// Virtual time at which each connect attempt began.
    pub fn start_times(&self) -> Vec<Instant> {
        self.lock().starts.clone()
    }

    /// Transport mode requested by each connect attempt.
    pub fn modes(&self) -> Vec<TransportMode> {
        self.lock().modes.clone()
    }

    /// Number of `stop` calls.
    pub fn stop_count(&self) -> usize {
        self.lock().stops
    }

    /// Whether a started connection is currently forwarding events.
    pub fn is_started(&self) -> bool {
        self.lock().events.is_some()
    }

    /// Conversations joined, in order, repeats included.
    pub fn joins(&self) -> Vec<ConversationId> {
        self.lock().joins.clone()
    }

    /// Conversations left, in order.
    pub fn leaves(&self) -> Vec<ConversationId> {
        self.lock().leaves.clone()
    }

    /// Every invocation, in order.
    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.lock().invocations.clone()
    }

    /// Arguments of every invocation of `method`.
    pub fn invocations_of(&self, method: &str) -> Vec<Vec<Value>> {
        self.lock()
            .invocations
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Deliver a server event to the client.
    ///
    /// Returns false if no connection is forwarding events.
    pub async fn emit(&self, event: PushEvent) -> bool {
        let events = self.lock().events.clone();
        match events {
            Some(events) => events.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Push `message` the way the hub serializes it.
    pub async fn push_message(&self, message: &Message) -> bool {
        match serde_json::to_value(message) {
            Ok(payload) => self.emit(PushEvent::Message(payload)).await,
            Err(error) => {
                tracing::warn!(%error, "fixture message did not serialize");
                false
            },
        }
    }

    /// Push a raw payload, well-formed or not.
    pub async fn push_raw(&self, payload: Value) -> bool {
        self.emit(PushEvent::Message(payload)).await
    }

    /// Push a typing signal.
    pub async fn push_typing(
        &self,
        conversation_id: Option<ConversationId>,
        user_id: UserId,
        is_typing: bool,
    ) -> bool {
        self.emit(PushEvent::Typing { conversation_id, user_id, is_typing }).await
    }

    /// Drop the connection from the server side.
    pub async fn close_remotely(&self, reason: &str) -> bool {
        let delivered = self.emit(PushEvent::Closed { reason: Some(reason.to_owned()) }).await;
        self.lock().events = None;
        delivered
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn start(
        &self,
        mode: TransportMode,
        events: mpsc::Sender<PushEvent>,
    ) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.lock();
            state.starts.push(Instant::now());
            state.modes.push(mode);
            state.events = None;
            state.start_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.fail_starts {
            return Err(TransportError::Connection("hub unreachable".into()));
        }
        state.events = Some(events);
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.lock();
        state.stops += 1;
        state.events = None;
    }

    async fn join(&self, conversation_id: ConversationId) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.events.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.joins.push(conversation_id);
        Ok(())
    }

    async fn leave(&self, conversation_id: ConversationId) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.events.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.leaves.push(conversation_id);
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.invocations.push((method.to_owned(), args));

        if state.events.is_none() {
            return Err(TransportError::NotConnected);
        }

        let rejected = match method {
            methods::PING => state.fail_pings,
            methods::SEND_MESSAGE => state.reject_sends,
            _ => false,
        };
        if rejected {
            return Err(TransportError::Invocation {
                method: method.to_owned(),
                reason: "rejected by hub".into(),
            });
        }
        Ok(())
    }
}
