//! Connection service scenarios under tokio's paused clock.
//!
//! The real [`ConnectionService`] runs against a [`FakeTransport`]. Virtual
//! time advances whenever every task is idle, so backoff and heartbeat
//! timing is exact and the tests are deterministic.

use std::{sync::Arc, time::Duration};

use courier_client::{ConnectionService, HostSignals, SystemEnv, TransportError, methods};
use courier_core::{
    ChatConfig, ConnectionEvent, ConnectionState, Platform, PlatformCapabilities, PushEvent,
    ReconnectPolicy, TransportMode,
};
use courier_harness::FakeTransport;
use tokio::{task::JoinSet, time::sleep};

struct Fixture {
    transport: Arc<FakeTransport>,
    host: HostSignals,
    service: ConnectionService<SystemEnv>,
}

impl Fixture {
    fn new(config: ChatConfig, platform: Platform) -> Self {
        let transport = Arc::new(FakeTransport::new());
        let host = HostSignals::new();
        let service = ConnectionService::init(
            SystemEnv::new(),
            transport.clone(),
            config,
            PlatformCapabilities::resolve(platform),
            host.subscribe(),
        );
        Self { transport, host, service }
    }

    fn desktop() -> Self {
        Self::new(ChatConfig::default(), Platform::Desktop)
    }

    /// Background then foreground the app, letting each change land.
    async fn foreground(&self) {
        self.host.set_visible(false);
        sleep(Duration::from_millis(10)).await;
        self.host.set_visible(true);
        sleep(Duration::from_millis(10)).await;
    }

    async fn wait_for_state(&self, expected: ConnectionState) {
        let mut state = self.service.watch_state();
        tokio::time::timeout(Duration::from_secs(120), state.wait_for(|s| *s == expected))
            .await
            .expect("state reached in time")
            .expect("service alive");
    }
}

#[tokio::test(start_paused = true)]
async fn connect_reaches_connected() {
    let fx = Fixture::desktop();
    assert_eq!(fx.service.state(), ConnectionState::Disconnected);

    assert!(fx.service.connect().await);
    assert!(fx.service.is_connected());
    assert_eq!(fx.transport.start_count(), 1);
    assert_eq!(fx.transport.modes(), vec![TransportMode::WebSockets]);

    // Already connected: no new attempt
    assert!(fx.service.connect().await);
    assert_eq!(fx.transport.start_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn embedded_web_view_requests_long_polling() {
    let fx = Fixture::new(ChatConfig::default(), Platform::EmbeddedWebView);
    assert!(fx.service.connect().await);
    assert_eq!(fx.transport.modes(), vec![TransportMode::LongPolling]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_attempt() {
    let fx = Fixture::desktop();
    fx.transport.set_start_delay(Duration::from_secs(2));

    let mut callers = JoinSet::new();
    for _ in 0..8 {
        let service = fx.service.clone();
        callers.spawn(async move { service.connect().await });
    }

    while let Some(connected) = callers.join_next().await {
        assert!(connected.unwrap());
    }
    assert_eq!(fx.transport.start_count(), 1);
    assert!(fx.service.is_connected());
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_stop_at_cap_and_restart_on_foreground() {
    let config = ChatConfig {
        reconnect: ReconnectPolicy {
            short_delay: Duration::from_secs(1),
            short_attempts: 1,
            medium_delay: Duration::from_secs(5),
            medium_attempts: 1,
            long_delay: Duration::from_secs(15),
            max_attempts: 3,
        },
        ..ChatConfig::default()
    };
    let fx = Fixture::new(config, Platform::Desktop);
    fx.transport.set_fail_starts(true);

    assert!(!fx.service.connect().await);
    sleep(Duration::from_secs(120)).await;

    assert_eq!(fx.transport.start_count(), 3);
    assert_eq!(fx.service.state(), ConnectionState::Disconnected);

    let starts = fx.transport.start_times();
    let first_gap = starts[1] - starts[0];
    let second_gap = starts[2] - starts[1];
    assert!(first_gap >= Duration::from_secs(1));
    assert!(second_gap >= Duration::from_secs(5));
    assert!(second_gap > first_gap);

    fx.transport.set_fail_starts(false);
    fx.foreground().await;
    fx.wait_for_state(ConnectionState::Connected).await;
    assert_eq!(fx.transport.start_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn remote_close_reconnects_after_backoff() {
    let fx = Fixture::desktop();
    assert!(fx.service.connect().await);
    let mut events = fx.service.subscribe();

    assert!(fx.transport.close_remotely("server restart").await);
    fx.wait_for_state(ConnectionState::Disconnected).await;
    fx.wait_for_state(ConnectionState::Connected).await;

    assert_eq!(fx.transport.start_count(), 2);
    assert_eq!(
        events.recv().await.unwrap(),
        ConnectionEvent::StateChanged(ConnectionState::Disconnected)
    );
}

#[tokio::test(start_paused = true)]
async fn self_healing_transport_passes_through_reconnecting() {
    let fx = Fixture::desktop();
    assert!(fx.service.connect().await);

    assert!(fx.transport.emit(PushEvent::Reconnecting).await);
    fx.wait_for_state(ConnectionState::Reconnecting).await;

    assert!(fx.transport.emit(PushEvent::Reconnected).await);
    fx.wait_for_state(ConnectionState::Connected).await;
    assert_eq!(fx.transport.start_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_runs_only_where_needed() {
    let desktop = Fixture::desktop();
    assert!(desktop.service.connect().await);
    sleep(Duration::from_secs(60)).await;
    assert!(desktop.transport.invocations_of(methods::PING).is_empty());

    let ios = Fixture::new(ChatConfig::default(), Platform::Ios);
    assert!(ios.service.connect().await);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(ios.transport.invocations_of(methods::PING).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn hidden_app_pauses_heartbeat() {
    let fx = Fixture::new(ChatConfig::default(), Platform::Ios);
    assert!(fx.service.connect().await);

    fx.host.set_visible(false);
    sleep(Duration::from_secs(120)).await;
    assert!(fx.transport.invocations_of(methods::PING).is_empty());
    assert!(fx.service.is_connected());

    fx.host.set_visible(true);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(fx.transport.invocations_of(methods::PING).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_ping_reconnects() {
    let fx = Fixture::new(ChatConfig::default(), Platform::Ios);
    assert!(fx.service.connect().await);
    fx.transport.set_fail_pings(true);

    sleep(Duration::from_secs(30)).await;

    assert_eq!(fx.transport.invocations_of(methods::PING).len(), 1);
    assert_eq!(fx.transport.start_count(), 2);
    assert!(fx.service.is_connected());
}

#[tokio::test(start_paused = true)]
async fn malformed_push_is_dropped_and_valid_push_fans_out() {
    let fx = Fixture::desktop();
    assert!(fx.service.connect().await);
    let mut events = fx.service.subscribe();

    assert!(fx.transport.push_raw(serde_json::json!({ "content": "no id" })).await);
    let valid = courier_harness::message(7, 42, 2, 1, 0);
    assert!(fx.transport.push_message(&valid).await);

    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Message(valid));
}

#[tokio::test(start_paused = true)]
async fn every_subscriber_sees_events_until_it_drops() {
    let fx = Fixture::desktop();
    let mut first = fx.service.subscribe();
    let second = fx.service.subscribe();
    drop(second);

    assert!(fx.service.connect().await);
    assert!(fx.transport.emit(PushEvent::Presence { user_id: 2, is_online: true }).await);

    assert_eq!(
        first.recv().await.unwrap(),
        ConnectionEvent::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        first.recv().await.unwrap(),
        ConnectionEvent::StateChanged(ConnectionState::Connected)
    );
    assert_eq!(
        first.recv().await.unwrap(),
        ConnectionEvent::Presence { user_id: 2, is_online: true }
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_and_dispose_stop_the_transport() {
    let fx = Fixture::desktop();
    assert!(fx.service.connect().await);

    fx.service.disconnect();
    assert_eq!(fx.service.state(), ConnectionState::Disconnected);
    sleep(Duration::from_millis(10)).await;
    assert!(!fx.transport.is_started());

    // Idempotent
    fx.service.disconnect();

    assert!(fx.service.connect().await);
    fx.service.dispose().await;
    assert_eq!(fx.service.state(), ConnectionState::Disconnected);
    assert!(!fx.transport.is_started());

    // No retries once disposed
    let starts = fx.transport.start_count();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(fx.transport.start_count(), starts);
}

#[tokio::test(start_paused = true)]
async fn one_room_is_joined_at_a_time() {
    let fx = Fixture::desktop();
    assert!(fx.service.connect().await);
    let mut events = fx.service.subscribe();

    fx.service.claim(42);
    fx.service.join(42).await.unwrap();

    fx.service.claim(7);
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::MembershipReleased(42));

    // A join queued before the handover no longer goes out
    assert_eq!(fx.service.join(42).await, Err(TransportError::Superseded(42)));
    fx.service.join(7).await.unwrap();
    assert_eq!(fx.transport.joins(), vec![42, 7]);
    assert_eq!(fx.transport.leaves(), vec![42]);

    // The released room is not left twice, the held one is
    fx.service.leave(42).await.unwrap();
    fx.service.leave(7).await.unwrap();
    assert_eq!(fx.transport.leaves(), vec![42, 7]);
}
