//! Connector against endpoints that never accept a websocket.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tickpulse::config::{BufferConfig, FeedConfig};
use tickpulse::feed::{FeedConnector, SessionState};
use tickpulse::models::ConnectionStatus;
use tickpulse::store::StateStore;

fn fast_config(url: &str) -> FeedConfig {
    FeedConfig {
        url: url.to_string(),
        backoff_base_ms: 10,
        backoff_max_ms: 40,
        max_consecutive_failures: 3,
        connect_timeout_ms: 500,
        stop_timeout_ms: 2_000,
        ..FeedConfig::default()
    }
}

fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn refused_connections_back_off_and_report_disconnected() {
    let store = Arc::new(StateStore::new(BufferConfig::default()));
    let connector = FeedConnector::new(fast_config("ws://127.0.0.1:9"), Arc::clone(&store));
    let mut status_rx = connector.subscribe_status();

    connector.start().unwrap();
    // Second start is a no-op
    connector.start().unwrap();
    assert!(connector.is_running());

    assert!(wait_for(Duration::from_secs(5), || connector.consecutive_failures() >= 3));
    assert_eq!(connector.connection_status(), ConnectionStatus::Disconnected);
    assert!(connector.stats().reconnects >= 3);
    // Still retrying after the threshold
    assert!(connector.is_running());

    assert_eq!(status_rx.try_recv().ok(), Some(ConnectionStatus::Connecting));

    let started = Instant::now();
    assert!(connector.stop());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!connector.is_running());
    assert_eq!(connector.session_state(), SessionState::Shutdown);
    assert_eq!(store.connection_status(), ConnectionStatus::Disconnected);
}

#[test]
fn malformed_url_is_fatal() {
    let store = Arc::new(StateStore::new(BufferConfig::default()));
    let connector = FeedConnector::new(fast_config("not a url"), store);

    connector.start().unwrap();
    assert!(wait_for(Duration::from_secs(2), || connector.consecutive_failures() >= 3));
    assert_eq!(connector.connection_status(), ConnectionStatus::Disconnected);
    assert!(connector.stop());
}
