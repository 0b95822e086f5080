//! Timing configuration and platform capabilities.

use std::time::Duration;

/// Interval at which the connection sends pings while the keep-alive policy is
/// active.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Interval between REST snapshot fetches while a conversation is visible.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Quiet period after the last keystroke before "typing stopped" is sent.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_millis(1500);

/// Time after which a remote typing indicator hides itself when no "stopped"
/// signal arrives.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(5);

/// Granularity at which runtimes drive the state machines' `tick`.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Tiered reconnection backoff.
///
/// Failed attempt `n` (1-based) waits `short_delay` while
/// `n <= short_attempts`, `medium_delay` while
/// `n <= short_attempts + medium_attempts` and `long_delay` after that. No
/// retry is scheduled once `n` reaches `max_attempts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay for the first tier.
    pub short_delay: Duration,
    /// Attempts in the first tier.
    pub short_attempts: u32,
    /// Delay for the second tier.
    pub medium_delay: Duration,
    /// Attempts in the second tier.
    pub medium_attempts: u32,
    /// Delay for every later attempt.
    pub long_delay: Duration,
    /// Failed attempts after which automatic retries stop.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            short_delay: Duration::from_secs(1),
            short_attempts: 3,
            medium_delay: Duration::from_secs(5),
            medium_attempts: 3,
            long_delay: Duration::from_secs(15),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry that follows `failures` consecutive failures.
    ///
    /// Returns `None` once the cap is reached.
    pub fn delay_after(&self, failures: u32) -> Option<Duration> {
        if failures >= self.max_attempts {
            return None;
        }

        let delay = if failures <= self.short_attempts {
            self.short_delay
        } else if failures <= self.short_attempts.saturating_add(self.medium_attempts) {
            self.medium_delay
        } else {
            self.long_delay
        };

        Some(delay)
    }
}

/// Timing configuration shared by all chat state machines.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Reconnection backoff.
    pub reconnect: ReconnectPolicy,
    /// Ping interval while connected (should be well below the server's idle
    /// timeout).
    pub heartbeat_interval: Duration,
    /// REST polling interval.
    pub poll_interval: Duration,
    /// Local typing idle window.
    pub typing_idle: Duration,
    /// Remote typing safety expiry.
    pub typing_expiry: Duration,
    /// Tick granularity for runtimes.
    pub tick_interval: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            typing_idle: DEFAULT_TYPING_IDLE,
            typing_expiry: DEFAULT_TYPING_EXPIRY,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Host platform the app runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// iOS, where the OS kills idle sockets of suspended apps.
    Ios,
    /// Android.
    Android,
    /// Desktop browser or native desktop.
    Desktop,
    /// Web view embedded in a host messenger. WebSockets are unreliable.
    EmbeddedWebView,
}

/// How the push transport should reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Persistent WebSocket.
    WebSockets,
    /// HTTP long polling.
    LongPolling,
}

/// Platform-dependent behavior, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// Whether the connection needs an application-level heartbeat.
    pub needs_heartbeat: bool,
    /// Transport mode to request.
    pub preferred_transport_mode: TransportMode,
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self::resolve(Platform::Desktop)
    }
}

impl PlatformCapabilities {
    /// Capabilities for `platform`.
    pub fn resolve(platform: Platform) -> Self {
        match platform {
            Platform::Ios => Self {
                needs_heartbeat: true,
                preferred_transport_mode: TransportMode::WebSockets,
            },
            Platform::Android | Platform::Desktop => Self {
                needs_heartbeat: false,
                preferred_transport_mode: TransportMode::WebSockets,
            },
            Platform::EmbeddedWebView => Self {
                needs_heartbeat: false,
                preferred_transport_mode: TransportMode::LongPolling,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn backoff_tiers_increase() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(3), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(4), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_after(6), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_after(7), Some(Duration::from_secs(15)));
        assert_eq!(policy.delay_after(9), Some(Duration::from_secs(15)));
    }

    #[test]
    fn backoff_stops_at_cap() {
        let policy = ReconnectPolicy { max_attempts: 3, ..ReconnectPolicy::default() };

        assert!(policy.delay_after(2).is_some());
        assert_eq!(policy.delay_after(3), None);
        assert_eq!(policy.delay_after(4), None);
    }

    #[test]
    fn only_ios_needs_heartbeat() {
        assert!(PlatformCapabilities::resolve(Platform::Ios).needs_heartbeat);
        assert!(!PlatformCapabilities::resolve(Platform::Android).needs_heartbeat);
        assert!(!PlatformCapabilities::resolve(Platform::Desktop).needs_heartbeat);
    }

    #[test]
    fn embedded_web_view_prefers_long_polling() {
        let caps = PlatformCapabilities::resolve(Platform::EmbeddedWebView);
        assert_eq!(caps.preferred_transport_mode, TransportMode::LongPolling);
    }

    proptest! {
        /// Delays never shrink as failures accumulate, and stop at the cap.
        #[test]
        fn prop_backoff_is_monotonic_and_capped(
            short in 0u32..5,
            medium in 0u32..5,
            max_attempts in 1u32..15,
            failures in 0u32..20,
        ) {
            let policy = ReconnectPolicy {
                short_attempts: short,
                medium_attempts: medium,
                max_attempts,
                ..ReconnectPolicy::default()
            };

            match (policy.delay_after(failures), policy.delay_after(failures + 1)) {
                (Some(now), Some(next)) => prop_assert!(next >= now),
                (None, next) => prop_assert!(next.is_none()),
                (Some(_), None) => prop_assert_eq!(failures + 1, max_attempts),
            }
            prop_assert_eq!(policy.delay_after(failures).is_none(), failures >= max_attempts);
        }
    }
}
