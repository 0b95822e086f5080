//! Typing presence protocol.
//!
//! Local side: the first keystroke of a burst sends "started", and "stopped"
//! follows after `typing_idle` without input (or immediately on send or
//! close). Remote side: a "started" signal from the open conversation's
//! remote participant shows the indicator until a "stopped" arrives or
//! `typing_expiry` passes, whichever comes first.
//!
//! Signals are fire-and-forget. Failed sends are not retried.

use std::time::Duration;

use crate::{
    config::ChatConfig,
    env::TimePoint,
    message::{ConversationHandle, ConversationId, UserId},
};

/// Remote typing indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingState<I> {
    /// Typing participant.
    pub user_id: UserId,
    /// Always `true` while stored.
    pub is_typing: bool,
    /// When the indicator hides itself.
    pub expires_at: I,
}

/// Actions produced by the typing tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingAction {
    /// Send a typing signal over the push transport.
    Send {
        /// Conversation the signal is for.
        conversation_id: ConversationId,
        /// Started (`true`) or stopped (`false`).
        is_typing: bool,
    },
    /// Remote indicator appeared or disappeared.
    RemoteChanged,
}

/// Typing tracker for one open conversation.
#[derive(Debug, Clone)]
pub struct TypingTracker<I: TimePoint> {
    idle: Duration,
    expiry: Duration,
    /// Conversation we announced "started" for.
    local: Option<ConversationId>,
    idle_deadline: Option<I>,
    remote: Option<TypingState<I>>,
}

impl<I: TimePoint> TypingTracker<I> {
    /// Create an idle tracker.
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            idle: config.typing_idle,
            expiry: config.typing_expiry,
            local: None,
            idle_deadline: None,
            remote: None,
        }
    }

    /// Whether "started" was sent and "stopped" was not.
    pub fn is_local_typing(&self) -> bool {
        self.local.is_some()
    }

    /// Remote indicator, if shown.
    pub fn remote(&self) -> Option<&TypingState<I>> {
        self.remote.as_ref()
    }

    /// Local input changed.
    ///
    /// `joined` is the conversation joined on a live connection. Nothing is
    /// sent without one.
    pub fn input_changed(&mut self, joined: Option<ConversationId>, now: I) -> Vec<TypingAction> {
        let Some(conversation_id) = joined else {
            return vec![];
        };

        let mut actions = Vec::new();
        if let Some(previous) = self.local
            && previous != conversation_id
        {
            actions.extend(self.stop());
        }

        self.idle_deadline = Some(now + self.idle);
        if self.local.is_none() {
            self.local = Some(conversation_id);
            actions.push(TypingAction::Send { conversation_id, is_typing: true });
        }
        actions
    }

    /// Send "stopped" now if "started" is outstanding.
    pub fn stop(&mut self) -> Vec<TypingAction> {
        self.idle_deadline = None;
        match self.local.take() {
            Some(conversation_id) => vec![TypingAction::Send { conversation_id, is_typing: false }],
            None => vec![],
        }
    }

    /// Forget local typing without signalling, e.g. when the connection that
    /// carried "started" is gone.
    pub fn forget_local(&mut self) {
        self.local = None;
        self.idle_deadline = None;
    }

    /// Hide the remote indicator.
    pub fn clear_remote(&mut self) -> Vec<TypingAction> {
        match self.remote.take() {
            Some(_) => vec![TypingAction::RemoteChanged],
            None => vec![],
        }
    }

    /// Remote typing signal.
    ///
    /// Ignored unless it comes from `handle`'s remote participant. When the
    /// signal carries a conversation id it must match too.
    pub fn handle_remote(
        &mut self,
        handle: &ConversationHandle,
        conversation_id: Option<ConversationId>,
        user_id: UserId,
        is_typing: bool,
        now: I,
    ) -> Vec<TypingAction> {
        if user_id != handle.remote_participant_id
            || conversation_id.is_some_and(|id| id != handle.conversation_id)
        {
            return vec![];
        }

        if !is_typing {
            return self.clear_remote();
        }

        let shown = self.remote.is_some();
        self.remote = Some(TypingState { user_id, is_typing: true, expires_at: now + self.expiry });
        if shown { vec![] } else { vec![TypingAction::RemoteChanged] }
    }

    /// Expire the local idle window and the remote indicator.
    pub fn tick(&mut self, now: I) -> Vec<TypingAction> {
        let mut actions = Vec::new();

        if self.idle_deadline.is_some_and(|deadline| now >= deadline) {
            actions.extend(self.stop());
        }

        if self.remote.is_some_and(|state| now >= state.expires_at) {
            tracing::trace!("remote typing indicator expired");
            actions.extend(self.clear_remote());
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn handle() -> ConversationHandle {
        ConversationHandle::new(42, 1, 2)
    }

    fn tracker() -> TypingTracker<Instant> {
        TypingTracker::new(&ChatConfig::default())
    }

    fn started() -> TypingAction {
        TypingAction::Send { conversation_id: 42, is_typing: true }
    }

    fn stopped() -> TypingAction {
        TypingAction::Send { conversation_id: 42, is_typing: false }
    }

    #[test]
    fn burst_sends_started_once() {
        let t0 = Instant::now();
        let mut typing = tracker();

        assert_eq!(typing.input_changed(Some(42), t0), vec![started()]);
        assert!(typing.input_changed(Some(42), t0 + Duration::from_millis(200)).is_empty());
        assert!(typing.input_changed(Some(42), t0 + Duration::from_millis(400)).is_empty());
    }

    #[test]
    fn idle_window_sends_stopped() {
        let t0 = Instant::now();
        let idle = ChatConfig::default().typing_idle;
        let mut typing = tracker();

        typing.input_changed(Some(42), t0);
        typing.input_changed(Some(42), t0 + Duration::from_millis(1000));

        // Deadline was reset by the second keystroke
        assert!(typing.tick(t0 + idle).is_empty());
        assert_eq!(typing.tick(t0 + Duration::from_millis(1000) + idle), vec![stopped()]);
        assert!(!typing.is_local_typing());
    }

    #[test]
    fn nothing_sent_without_joined_conversation() {
        let mut typing = tracker();
        assert!(typing.input_changed(None, Instant::now()).is_empty());
    }

    #[test]
    fn explicit_stop_sends_once() {
        let mut typing = tracker();
        typing.input_changed(Some(42), Instant::now());

        assert_eq!(typing.stop(), vec![stopped()]);
        assert!(typing.stop().is_empty());
    }

    #[test]
    fn remote_indicator_expires() {
        let t0 = Instant::now();
        let expiry = ChatConfig::default().typing_expiry;
        let mut typing = tracker();

        let actions = typing.handle_remote(&handle(), Some(42), 2, true, t0);
        assert_eq!(actions, vec![TypingAction::RemoteChanged]);
        assert!(typing.remote().is_some());

        assert!(typing.tick(t0 + expiry - Duration::from_millis(1)).is_empty());
        assert_eq!(typing.tick(t0 + expiry), vec![TypingAction::RemoteChanged]);
        assert!(typing.remote().is_none());
    }

    #[test]
    fn remote_stop_hides_indicator() {
        let t0 = Instant::now();
        let mut typing = tracker();
        typing.handle_remote(&handle(), None, 2, true, t0);

        assert_eq!(
            typing.handle_remote(&handle(), None, 2, false, t0),
            vec![TypingAction::RemoteChanged]
        );
    }

    #[test]
    fn signals_from_others_are_ignored() {
        let t0 = Instant::now();
        let mut typing = tracker();

        assert!(typing.handle_remote(&handle(), Some(42), 3, true, t0).is_empty());
        assert!(typing.handle_remote(&handle(), Some(7), 2, true, t0).is_empty());
        assert!(typing.remote().is_none());
    }
}
