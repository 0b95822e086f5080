//! Message synchronization engine.
//!
//! Reconciles two sources into one displayed message set for the open
//! conversation: live push deliveries and periodic REST snapshots. All
//! reconciliation goes through [`merge`], a pure reducer over the current set
//! and one incoming item, so the invariants can be checked without timers or
//! a transport.
//!
//! # Invariants
//!
//! - No two displayed messages share an `id`.
//! - Displayed messages are sorted by `(sent_at, id)`.
//! - Results of a fetch issued for a conversation that is no longer open are
//!   discarded.
//! - No fetch is issued while the view is hidden.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use crate::{
    config::ChatConfig,
    env::TimePoint,
    message::{ConversationHandle, ConversationId, Message, MessageId},
};

/// Data to merge into the displayed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Full REST snapshot of the conversation. Authoritative.
    Snapshot(Vec<Message>),
    /// Single pushed message.
    Push(Message),
}

/// Merge `incoming` into `current`.
///
/// Returns the next displayed set and whether it differs from `current`.
/// A snapshot replaces the set only if it differs structurally; a push adds
/// its message only if the id is new. `current` is assumed to satisfy the
/// module invariants, and the result always does.
pub fn merge(current: &[Message], incoming: Incoming) -> (Vec<Message>, bool) {
    match incoming {
        Incoming::Snapshot(messages) => {
            let next = normalize(messages);
            let changed = next.as_slice() != current;
            if changed { (next, true) } else { (current.to_vec(), false) }
        },
        Incoming::Push(message) => {
            if current.iter().any(|m| m.id == message.id) {
                return (current.to_vec(), false);
            }
            let key = message.order_key();
            let at = current.partition_point(|m| m.order_key() < key);
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend_from_slice(&current[..at]);
            next.push(message);
            next.extend_from_slice(&current[at..]);
            (next, true)
        },
    }
}

/// Deduplicate by id (last occurrence wins) and sort by `(sent_at, id)`.
pub fn normalize(messages: Vec<Message>) -> Vec<Message> {
    let mut by_id: HashMap<MessageId, Message> = HashMap::with_capacity(messages.len());
    for message in messages {
        by_id.insert(message.id, message);
    }
    let mut out: Vec<Message> = by_id.into_values().collect();
    out.sort_by_key(Message::order_key);
    out
}

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// First snapshot of a newly opened conversation (or a retry of it).
    Initial,
    /// Periodic poll.
    Poll,
    /// Out-of-band refresh after a send, a visibility change or focus.
    Refresh,
}

/// A snapshot fetch tagged with the conversation it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// Unique per engine.
    pub request_id: u64,
    /// Conversation to fetch.
    pub conversation_id: ConversationId,
    /// Why it was issued.
    pub kind: FetchKind,
}

/// Initial load progress of the open conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No conversation open.
    Idle,
    /// Waiting for the first snapshot.
    Loading,
    /// At least one snapshot applied.
    Loaded,
    /// First snapshot failed. The user can retry.
    Failed,
}

/// Actions produced by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Fetch a snapshot and report it via [`SyncEngine::handle_fetch_result`].
    Fetch(FetchRequest),
    /// Mark the conversation read on the backend.
    MarkRead(ConversationId),
    /// Displayed messages or load state changed.
    DisplayChanged,
}

/// Message synchronization engine for one open conversation at a time.
#[derive(Debug, Clone)]
pub struct SyncEngine<I: TimePoint> {
    handle: Option<ConversationHandle>,
    messages: Vec<Message>,
    load_state: LoadState,
    visible: bool,
    poll_interval: Duration,
    in_flight: Option<FetchRequest>,
    next_request_id: u64,
    next_poll_at: Option<I>,
    /// Refresh requested while a fetch was in flight or the view was hidden.
    refresh_queued: bool,
    /// Messages pushed while `in_flight` was outstanding. The snapshot may
    /// predate them.
    pushed_during_fetch: Vec<Message>,
}

impl<I: TimePoint> SyncEngine<I> {
    /// Create an engine with no conversation open.
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            handle: None,
            messages: Vec::new(),
            load_state: LoadState::Idle,
            visible: true,
            poll_interval: config.poll_interval,
            in_flight: None,
            next_request_id: 0,
            next_poll_at: None,
            refresh_queued: false,
            pushed_during_fetch: Vec::new(),
        }
    }

    /// Displayed messages, deduplicated and ordered.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Open conversation. `None` if closed.
    pub fn handle(&self) -> Option<&ConversationHandle> {
        self.handle.as_ref()
    }

    /// Initial load progress.
    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    /// Open `handle`, discarding everything about the previous conversation.
    pub fn open(&mut self, handle: ConversationHandle, now: I) -> Vec<SyncAction> {
        tracing::debug!(conversation_id = handle.conversation_id, "opening conversation");

        self.handle = Some(handle);
        self.messages.clear();
        self.load_state = LoadState::Loading;
        self.in_flight = None;
        self.refresh_queued = false;
        self.pushed_during_fetch.clear();
        self.next_poll_at = Some(now + self.poll_interval);

        let mut actions = vec![SyncAction::DisplayChanged];
        if self.visible {
            actions.extend(self.issue_fetch(FetchKind::Initial));
        }
        actions
    }

    /// Close the open conversation. In-flight results become stale.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(conversation_id = handle.conversation_id, "closing conversation");
        }
        self.messages.clear();
        self.load_state = LoadState::Idle;
        self.in_flight = None;
        self.next_poll_at = None;
        self.refresh_queued = false;
        self.pushed_during_fetch.clear();
    }

    /// Merge a pushed message.
    ///
    /// Messages for other conversations are dropped silently.
    pub fn handle_push(&mut self, message: Message) -> Vec<SyncAction> {
        let Some(handle) = self.handle else {
            return vec![];
        };
        if !message.belongs_to(&handle) {
            tracing::trace!(message_id = message.id, "dropping push for another conversation");
            return vec![];
        }

        if self.in_flight.is_some() {
            self.pushed_during_fetch.push(message.clone());
        }

        let from_remote = message.sender_id == handle.remote_participant_id && !message.is_read;
        let (next, changed) = merge(&self.messages, Incoming::Push(message));
        if !changed {
            return vec![];
        }
        self.messages = next;

        let mut actions = vec![SyncAction::DisplayChanged];
        if from_remote && self.visible {
            actions.push(SyncAction::MarkRead(handle.conversation_id));
        }
        actions
    }

    /// Report the outcome of a [`SyncAction::Fetch`].
    pub fn handle_fetch_result(
        &mut self,
        request: FetchRequest,
        result: Result<Vec<Message>, String>,
        now: I,
    ) -> Vec<SyncAction> {
        let current = self.handle.map(|h| h.conversation_id);
        if self.in_flight != Some(request) || current != Some(request.conversation_id) {
            tracing::debug!(
                request_id = request.request_id,
                conversation_id = request.conversation_id,
                "discarding stale fetch result"
            );
            return vec![];
        }
        self.in_flight = None;
        let pushed = std::mem::take(&mut self.pushed_during_fetch);

        let mut actions = Vec::new();
        match result {
            Ok(mut snapshot) => {
                let known: HashSet<MessageId> = snapshot.iter().map(|m| m.id).collect();
                snapshot.extend(pushed.into_iter().filter(|m| !known.contains(&m.id)));

                let (next, changed) = merge(&self.messages, Incoming::Snapshot(snapshot));
                let first_load = self.load_state != LoadState::Loaded;
                if changed {
                    self.messages = next;
                }
                if changed || first_load {
                    actions.push(SyncAction::DisplayChanged);
                }
                if first_load {
                    self.load_state = LoadState::Loaded;
                    actions.push(SyncAction::MarkRead(request.conversation_id));
                }
            },
            Err(reason) => {
                if self.load_state == LoadState::Loaded {
                    tracing::warn!(
                        conversation_id = request.conversation_id,
                        %reason,
                        "poll failed"
                    );
                } else {
                    tracing::warn!(
                        conversation_id = request.conversation_id,
                        %reason,
                        "initial fetch failed"
                    );
                    if self.load_state != LoadState::Failed {
                        self.load_state = LoadState::Failed;
                        actions.push(SyncAction::DisplayChanged);
                    }
                }
            },
        }

        if self.refresh_queued && self.visible {
            self.refresh_queued = false;
            actions.extend(self.issue_fetch(FetchKind::Refresh));
            self.next_poll_at = Some(now + self.poll_interval);
        }

        actions
    }

    /// Issue a poll if one is due.
    pub fn tick(&mut self, now: I) -> Vec<SyncAction> {
        if self.handle.is_none() || !self.visible || self.in_flight.is_some() {
            return vec![];
        }
        match self.next_poll_at {
            Some(due) if now >= due => {
                self.next_poll_at = Some(now + self.poll_interval);
                self.issue_fetch(FetchKind::Poll)
            },
            _ => vec![],
        }
    }

    /// The view became visible (`true`) or hidden (`false`).
    ///
    /// Becoming visible fetches immediately and re-arms the poller.
    pub fn set_visible(&mut self, visible: bool, now: I) -> Vec<SyncAction> {
        let was_visible = self.visible;
        self.visible = visible;

        if visible && !was_visible {
            return self.fetch_now(now);
        }
        vec![]
    }

    /// The view gained focus. Fetches immediately and re-arms the poller.
    pub fn focus_gained(&mut self, now: I) -> Vec<SyncAction> {
        self.visible = true;
        self.fetch_now(now)
    }

    /// Request an out-of-band fetch, e.g. after a REST send.
    ///
    /// Coalesced with a fetch already in flight: a new one is issued when it
    /// completes.
    pub fn refresh(&mut self, now: I) -> Vec<SyncAction> {
        if self.handle.is_none() {
            return vec![];
        }
        if self.in_flight.is_some() || !self.visible {
            self.refresh_queued = true;
            return vec![];
        }
        self.fetch_now(now)
    }

    /// Retry a failed initial load.
    pub fn retry(&mut self, now: I) -> Vec<SyncAction> {
        if self.load_state != LoadState::Failed {
            return vec![];
        }
        self.load_state = LoadState::Loading;
        let mut actions = vec![SyncAction::DisplayChanged];
        actions.extend(self.fetch_now(now));
        actions
    }

    fn fetch_now(&mut self, now: I) -> Vec<SyncAction> {
        if self.handle.is_none() || !self.visible {
            return vec![];
        }
        self.next_poll_at = Some(now + self.poll_interval);
        if self.in_flight.is_some() {
            self.refresh_queued = true;
            return vec![];
        }
        self.refresh_queued = false;
        let kind =
            if self.load_state == LoadState::Loaded { FetchKind::Refresh } else { FetchKind::Initial };
        self.issue_fetch(kind)
    }

    fn issue_fetch(&mut self, kind: FetchKind) -> Vec<SyncAction> {
        let Some(handle) = self.handle else {
            return vec![];
        };
        let kind = if self.load_state == LoadState::Loaded { kind } else { FetchKind::Initial };

        self.next_request_id += 1;
        let request = FetchRequest {
            request_id: self.next_request_id,
            conversation_id: handle.conversation_id,
            kind,
        };
        self.in_flight = Some(request);
        self.pushed_during_fetch.clear();
        vec![SyncAction::Fetch(request)]
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::{TimeZone, Utc};

    use super::*;

    const CONVERSATION: ConversationId = 42;

    fn handle() -> ConversationHandle {
        ConversationHandle::new(CONVERSATION, 1, 2)
    }

    fn msg(id: MessageId, secs: i64) -> Message {
        Message {
            id,
            conversation_id: Some(CONVERSATION),
            sender_id: 2,
            receiver_id: 1,
            content: format!("message {id}"),
            sent_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            is_read: false,
        }
    }

    fn fetch_of(actions: &[SyncAction]) -> Option<FetchRequest> {
        actions.iter().find_map(|a| match a {
            SyncAction::Fetch(request) => Some(*request),
            _ => None,
        })
    }

    fn ids(engine: &SyncEngine<Instant>) -> Vec<MessageId> {
        engine.messages().iter().map(|m| m.id).collect()
    }

    fn loaded(t0: Instant, initial: Vec<Message>) -> SyncEngine<Instant> {
        let mut engine = SyncEngine::new(&ChatConfig::default());
        let request = fetch_of(&engine.open(handle(), t0)).unwrap();
        engine.handle_fetch_result(request, Ok(initial), t0);
        engine
    }

    #[test]
    fn merge_push_inserts_in_order() {
        let current = vec![msg(1, 0), msg(3, 20)];
        let (next, changed) = merge(&current, Incoming::Push(msg(2, 10)));

        assert!(changed);
        assert_eq!(next.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn merge_push_duplicate_is_unchanged() {
        let current = vec![msg(1, 0)];
        let (next, changed) = merge(&current, Incoming::Push(msg(1, 0)));

        assert!(!changed);
        assert_eq!(next, current);
    }

    #[test]
    fn merge_snapshot_equal_is_unchanged() {
        let current = vec![msg(1, 0), msg(2, 10)];
        let (_, changed) = merge(&current, Incoming::Snapshot(vec![msg(2, 10), msg(1, 0)]));
        assert!(!changed);
    }

    #[test]
    fn merge_snapshot_read_receipt_is_a_change() {
        let current = vec![msg(1, 0)];
        let mut read = msg(1, 0);
        read.is_read = true;

        let (next, changed) = merge(&current, Incoming::Snapshot(vec![read]));
        assert!(changed);
        assert!(next[0].is_read);
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let (next, _) = merge(&[], Incoming::Snapshot(vec![msg(9, 5), msg(4, 5), msg(6, 5)]));
        assert_eq!(next.iter().map(|m| m.id).collect::<Vec<_>>(), vec![4, 6, 9]);
    }

    #[test]
    fn open_fetches_and_marks_read() {
        let t0 = Instant::now();
        let mut engine: SyncEngine<Instant> = SyncEngine::new(&ChatConfig::default());

        let actions = engine.open(handle(), t0);
        let request = fetch_of(&actions).unwrap();
        assert_eq!(request.kind, FetchKind::Initial);
        assert_eq!(engine.load_state(), LoadState::Loading);

        let actions = engine.handle_fetch_result(request, Ok(vec![msg(1, 0)]), t0);
        assert_eq!(actions, vec![SyncAction::DisplayChanged, SyncAction::MarkRead(CONVERSATION)]);
        assert_eq!(engine.load_state(), LoadState::Loaded);
    }

    #[test]
    fn push_then_equal_poll_does_not_replace() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let mut engine = loaded(t0, vec![msg(1, 0)]);

        let actions = engine.handle_push(msg(2, 10));
        assert!(actions.contains(&SyncAction::DisplayChanged));

        let request = fetch_of(&engine.tick(t0 + poll)).unwrap();
        let actions = engine.handle_fetch_result(request, Ok(vec![msg(1, 0), msg(2, 10)]), t0 + poll);

        assert!(actions.is_empty());
        assert_eq!(ids(&engine), vec![1, 2]);
    }

    #[test]
    fn push_for_other_conversation_is_dropped() {
        let t0 = Instant::now();
        let mut engine = loaded(t0, vec![]);

        let mut other = msg(5, 0);
        other.conversation_id = Some(99);

        assert!(engine.handle_push(other).is_empty());
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn push_from_remote_marks_read_when_visible() {
        let t0 = Instant::now();
        let mut engine = loaded(t0, vec![]);

        let actions = engine.handle_push(msg(1, 0));
        assert!(actions.contains(&SyncAction::MarkRead(CONVERSATION)));

        engine.set_visible(false, t0);
        let actions = engine.handle_push(msg(2, 5));
        assert_eq!(actions, vec![SyncAction::DisplayChanged]);
    }

    #[test]
    fn push_during_fetch_survives_older_snapshot() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let mut engine = loaded(t0, vec![msg(1, 0)]);

        let request = fetch_of(&engine.tick(t0 + poll)).unwrap();
        engine.handle_push(msg(2, 10));

        // Snapshot was taken before message 2 existed
        engine.handle_fetch_result(request, Ok(vec![msg(1, 0)]), t0 + poll);
        assert_eq!(ids(&engine), vec![1, 2]);
    }

    #[test]
    fn hidden_view_never_polls() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let mut engine = loaded(t0, vec![]);

        engine.set_visible(false, t0);
        for i in 1..100 {
            assert!(engine.tick(t0 + poll * i).is_empty());
        }
    }

    #[test]
    fn becoming_visible_fetches_immediately() {
        let t0 = Instant::now();
        let mut engine = loaded(t0, vec![]);
        engine.set_visible(false, t0);

        let actions = engine.set_visible(true, t0 + Duration::from_millis(10));
        assert_eq!(fetch_of(&actions).map(|r| r.kind), Some(FetchKind::Refresh));
    }

    #[test]
    fn no_poll_while_fetch_in_flight() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let mut engine: SyncEngine<Instant> = SyncEngine::new(&ChatConfig::default());
        engine.open(handle(), t0);

        assert!(engine.tick(t0 + poll * 5).is_empty());
    }

    #[test]
    fn result_for_closed_conversation_is_discarded() {
        let t0 = Instant::now();
        let mut engine: SyncEngine<Instant> = SyncEngine::new(&ChatConfig::default());
        let request = fetch_of(&engine.open(handle(), t0)).unwrap();

        engine.open(ConversationHandle::new(7, 1, 3), t0);
        let actions = engine.handle_fetch_result(request, Ok(vec![msg(1, 0)]), t0);

        assert!(actions.is_empty());
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn closed_engine_does_not_poll() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let mut engine = loaded(t0, vec![msg(1, 0)]);

        engine.close();
        assert!(engine.tick(t0 + poll * 10).is_empty());
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn failed_initial_fetch_offers_retry() {
        let t0 = Instant::now();
        let mut engine: SyncEngine<Instant> = SyncEngine::new(&ChatConfig::default());
        let request = fetch_of(&engine.open(handle(), t0)).unwrap();

        let actions = engine.handle_fetch_result(request, Err("502".into()), t0);
        assert_eq!(actions, vec![SyncAction::DisplayChanged]);
        assert_eq!(engine.load_state(), LoadState::Failed);

        let actions = engine.retry(t0);
        assert_eq!(engine.load_state(), LoadState::Loading);
        assert_eq!(fetch_of(&actions).map(|r| r.kind), Some(FetchKind::Initial));
    }

    #[test]
    fn failed_poll_is_silent() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let mut engine = loaded(t0, vec![msg(1, 0)]);

        let request = fetch_of(&engine.tick(t0 + poll)).unwrap();
        let actions = engine.handle_fetch_result(request, Err("timeout".into()), t0 + poll);

        assert!(actions.is_empty());
        assert_eq!(engine.load_state(), LoadState::Loaded);
        assert_eq!(ids(&engine), vec![1]);
    }

    #[test]
    fn refresh_during_fetch_is_coalesced() {
        let t0 = Instant::now();
        let poll = ChatConfig::default().poll_interval;
        let mut engine = loaded(t0, vec![]);

        let request = fetch_of(&engine.tick(t0 + poll)).unwrap();
        assert!(engine.refresh(t0 + poll).is_empty());

        let actions = engine.handle_fetch_result(request, Ok(vec![]), t0 + poll);
        assert_eq!(fetch_of(&actions).map(|r| r.kind), Some(FetchKind::Refresh));
    }
}
