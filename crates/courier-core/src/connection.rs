//! Push connection state machine.
//!
//! Manages the lifecycle of the single push-transport connection: connect
//! attempts, tiered reconnection backoff, keep-alive pings and visibility
//! coupling. Uses the action pattern: methods take time as input and return
//! actions for the runtime to execute.
//!
//! # State Machine
//!
//! ```text
//!                 connect()                 start ok
//! ┌──────────────┐────────>┌────────────┐──────────────>┌───────────┐
//! │ Disconnected │         │ Connecting │               │ Connected │
//! └──────────────┘<────────└────────────┘               └───────────┘
//!        ^  │     start err                                  │
//!        │  │ retry due                   closed / ping err  │
//!        │  ↓                                                ↓
//!        │ ┌──────────────┐          start ok                │
//!        └─│ Reconnecting │─────────────────────────> Connected
//!  start err└──────────────┘
//! ```
//!
//! At most one attempt is in flight. Every attempt carries a number, and
//! results for any other number are ignored.

use std::time::Duration;

use crate::{
    config::{ChatConfig, PlatformCapabilities, ReconnectPolicy, TransportMode},
    env::TimePoint,
};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// First attempt in flight.
    Connecting,
    /// Connection established.
    Connected,
    /// Restoring a dropped connection, or retrying after failures.
    Reconnecting,
}

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Start (or restart) the push transport and report the outcome via
    /// [`ConnectionManager::handle_connect_result`].
    StartTransport {
        /// Attempt number to report back.
        attempt: u64,
        /// Transport mode to request.
        mode: TransportMode,
    },

    /// Stop the push transport.
    StopTransport,

    /// Send a keep-alive ping and report the outcome via
    /// [`ConnectionManager::handle_ping_result`].
    SendPing {
        /// Attempt number of the connection being pinged.
        attempt: u64,
    },

    /// Publish the new state to subscribers.
    StateChanged(ConnectionState),
}

/// Push connection state machine.
///
/// Pure state machine: no I/O, no stored environment. Generic over the
/// instant type so tests can drive virtual time.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I: TimePoint> {
    state: ConnectionState,
    policy: ReconnectPolicy,
    heartbeat_interval: Duration,
    capabilities: PlatformCapabilities,
    /// Consecutive failed attempts since the last success.
    failures: u32,
    /// Number of the most recent attempt.
    attempt: u64,
    /// Whether attempt `attempt` has not reported yet.
    in_flight: bool,
    /// When the next automatic retry is due. `None` if none is scheduled.
    retry_at: Option<I>,
    /// Set when an established connection was lost, cleared on success.
    dropped: bool,
    heartbeat_active: bool,
    next_ping_at: Option<I>,
    ping_in_flight: bool,
    visible: bool,
}

impl<I: TimePoint> ConnectionManager<I> {
    /// Create a disconnected manager. The app is assumed to start visible.
    pub fn new(config: &ChatConfig, capabilities: PlatformCapabilities) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy: config.reconnect.clone(),
            heartbeat_interval: config.heartbeat_interval,
            capabilities,
            failures: 0,
            attempt: 0,
            in_flight: false,
            retry_at: None,
            dropped: false,
            heartbeat_active: false,
            next_ping_at: None,
            ping_in_flight: false,
            visible: true,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Number of the attempt currently in flight. `None` if idle.
    pub fn attempt_in_flight(&self) -> Option<u64> {
        self.in_flight.then_some(self.attempt)
    }

    /// Consecutive failed attempts since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether automatic retries have stopped at the attempt cap.
    pub fn retries_exhausted(&self) -> bool {
        self.failures >= self.policy.max_attempts
    }

    /// When the next automatic retry is due. `None` if none is scheduled.
    pub fn retry_at(&self) -> Option<I> {
        self.retry_at
    }

    /// Whether keep-alive pings are being sent.
    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat_active
    }

    /// Start a connect attempt.
    ///
    /// No-op when connected or when an attempt is already in flight; the
    /// caller then waits for the pending outcome instead. Calling this after
    /// retries were exhausted resets the attempt counter.
    pub fn connect(&mut self) -> Vec<ConnectionAction> {
        if self.is_connected() || self.in_flight {
            return vec![];
        }

        if self.retries_exhausted() {
            tracing::debug!(failures = self.failures, "explicit connect resets retry budget");
            self.failures = 0;
        }

        self.begin_attempt()
    }

    /// Tear down the connection. Idempotent.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        let idle = self.state == ConnectionState::Disconnected
            && !self.in_flight
            && self.retry_at.is_none()
            && !self.heartbeat_active;
        if idle {
            return vec![];
        }

        self.in_flight = false;
        self.retry_at = None;
        self.dropped = false;
        self.failures = 0;
        self.stop_heartbeat();

        let mut actions = vec![ConnectionAction::StopTransport];
        actions.extend(self.transition(ConnectionState::Disconnected));
        actions
    }

    /// Report the outcome of a [`ConnectionAction::StartTransport`].
    pub fn handle_connect_result(
        &mut self,
        attempt: u64,
        result: Result<(), String>,
        now: I,
    ) -> Vec<ConnectionAction> {
        if !self.in_flight || attempt != self.attempt {
            tracing::debug!(attempt, current = self.attempt, "ignoring stale connect result");
            // A transport that came up after we stopped wanting it must go
            // back down. A newer attempt in flight owns the transport.
            if result.is_ok() && !self.in_flight && !self.is_connected() {
                return vec![ConnectionAction::StopTransport];
            }
            return vec![];
        }

        self.in_flight = false;

        match result {
            Ok(()) => {
                tracing::info!(attempt, "push connection established");
                self.failures = 0;
                self.dropped = false;
                self.retry_at = None;
                let actions = self.transition(ConnectionState::Connected);
                self.arm_heartbeat(now);
                actions
            },
            Err(reason) => {
                self.failures = self.failures.saturating_add(1);
                tracing::warn!(attempt, failures = self.failures, %reason, "connect attempt failed");
                let actions = self.transition(ConnectionState::Disconnected);
                self.schedule_retry(now);
                actions
            },
        }
    }

    /// Report the outcome of a [`ConnectionAction::SendPing`].
    ///
    /// A failed ping is not fatal: it re-runs the connect flow.
    pub fn handle_ping_result(
        &mut self,
        attempt: u64,
        result: Result<(), String>,
    ) -> Vec<ConnectionAction> {
        if attempt != self.attempt || !self.is_connected() {
            return vec![];
        }
        self.ping_in_flight = false;

        match result {
            Ok(()) => vec![],
            Err(reason) => {
                tracing::warn!(attempt, %reason, "heartbeat ping failed, reconnecting");
                self.stop_heartbeat();
                self.dropped = true;
                self.begin_attempt()
            },
        }
    }

    /// The transport reported that the connection closed.
    pub fn handle_closed(&mut self, reason: Option<&str>, now: I) -> Vec<ConnectionAction> {
        // Closed by us, or by a connection an in-flight attempt replaces.
        if self.in_flight || self.state == ConnectionState::Disconnected {
            return vec![];
        }

        tracing::warn!(reason = reason.unwrap_or("unknown"), "push connection closed");
        self.stop_heartbeat();
        self.dropped = true;
        let actions = self.transition(ConnectionState::Disconnected);
        self.schedule_retry(now);
        actions
    }

    /// The transport is restoring its connection on its own.
    pub fn handle_reconnecting(&mut self) -> Vec<ConnectionAction> {
        if !self.is_connected() {
            return vec![];
        }
        self.stop_heartbeat();
        self.dropped = true;
        self.transition(ConnectionState::Reconnecting)
    }

    /// The transport restored its connection on its own.
    pub fn handle_reconnected(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Reconnecting || self.in_flight {
            return vec![];
        }
        self.failures = 0;
        self.dropped = false;
        self.retry_at = None;
        let actions = self.transition(ConnectionState::Connected);
        self.arm_heartbeat(now);
        actions
    }

    /// The app became visible (`true`) or hidden (`false`).
    ///
    /// Becoming visible while not connected connects. Becoming hidden only
    /// stops the heartbeat; the connection stays up.
    pub fn set_visible(&mut self, visible: bool, now: I) -> Vec<ConnectionAction> {
        self.visible = visible;

        if !visible {
            if self.heartbeat_active {
                tracing::debug!("app hidden, pausing heartbeat");
                self.stop_heartbeat();
            }
            return vec![];
        }

        if !self.is_connected() {
            return self.connect();
        }
        if !self.heartbeat_active {
            self.arm_heartbeat(now);
        }
        vec![]
    }

    /// The app window gained focus.
    pub fn focus_gained(&mut self, now: I) -> Vec<ConnectionAction> {
        self.set_visible(true, now)
    }

    /// Process periodic maintenance (scheduled retries and heartbeats).
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(retry_at) = self.retry_at
            && now >= retry_at
            && !self.in_flight
            && !self.is_connected()
        {
            tracing::debug!(failures = self.failures, "retry due");
            actions.extend(self.begin_attempt());
        }

        if self.heartbeat_active
            && !self.ping_in_flight
            && let Some(next_ping_at) = self.next_ping_at
            && now >= next_ping_at
        {
            self.ping_in_flight = true;
            self.next_ping_at = Some(now + self.heartbeat_interval);
            actions.push(ConnectionAction::SendPing { attempt: self.attempt });
        }

        actions
    }

    fn begin_attempt(&mut self) -> Vec<ConnectionAction> {
        self.attempt += 1;
        self.in_flight = true;
        self.retry_at = None;

        let next = if self.failures > 0 || self.dropped {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };

        tracing::debug!(attempt = self.attempt, failures = self.failures, "starting connect attempt");

        let mut actions = self.transition(next);
        actions.push(ConnectionAction::StartTransport {
            attempt: self.attempt,
            mode: self.capabilities.preferred_transport_mode,
        });
        actions
    }

    fn schedule_retry(&mut self, now: I) {
        match self.policy.delay_after(self.failures) {
            Some(delay) => {
                tracing::debug!(failures = self.failures, ?delay, "retry scheduled");
                self.retry_at = Some(now + delay);
            },
            None => {
                tracing::warn!(
                    failures = self.failures,
                    "reconnect attempts exhausted, waiting for explicit connect"
                );
                self.retry_at = None;
            },
        }
    }

    fn arm_heartbeat(&mut self, now: I) {
        if self.capabilities.needs_heartbeat && self.visible && self.is_connected() {
            self.heartbeat_active = true;
            self.ping_in_flight = false;
            self.next_ping_at = Some(now + self.heartbeat_interval);
        }
    }

    fn stop_heartbeat(&mut self) {
        self.heartbeat_active = false;
        self.ping_in_flight = false;
        self.next_ping_at = None;
    }

    fn transition(&mut self, next: ConnectionState) -> Vec<ConnectionAction> {
        if self.state == next {
            return vec![];
        }
        tracing::debug!(from = ?self.state, to = ?next, "connection state changed");
        self.state = next;
        vec![ConnectionAction::StateChanged(next)]
    }
}
