//! Feed session management
//!
//! - State machine with logged transitions
//! - Exponential backoff (optional jitter) keyed on consecutive failures
//! - Heartbeat monitor: keepalive pings + data staleness (observability only)
//! - Session metrics
//!
//! The consecutive-failure counter resets on any received message, not on
//! a successful handshake: a server that accepts and immediately drops us
//! keeps backing off.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::models::ConnectionStatus;

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Connection state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Not started, or stopped
    Disconnected,
    /// TCP + TLS + WebSocket upgrade in progress
    Connecting,
    /// Receiving market data
    Connected,
    /// Connection lost, waiting out the backoff delay
    Backoff,
    /// Stop requested
    Shutdown,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Backoff => write!(f, "BACKOFF"),
            Self::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// Reason for state transition (for logging/metrics)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    Started,
    ConnectSuccess,
    ConnectTimeout,
    ConnectFailed,
    ServerClose,
    NetworkError,
    FatalError,
    BackoffElapsed,
    ShutdownRequested,
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::ConnectSuccess => write!(f, "connect_ok"),
            Self::ConnectTimeout => write!(f, "connect_timeout"),
            Self::ConnectFailed => write!(f, "connect_failed"),
            Self::ServerClose => write!(f, "server_close"),
            Self::NetworkError => write!(f, "network_error"),
            Self::FatalError => write!(f, "fatal_error"),
            Self::BackoffElapsed => write!(f, "backoff_elapsed"),
            Self::ShutdownRequested => write!(f, "shutdown"),
        }
    }
}

// =============================================================================
// EXPONENTIAL BACKOFF
// =============================================================================

/// Backoff keyed on the number of consecutive failures.
///
/// The n-th consecutive failure waits `min(base * multiplier^n, max)`,
/// optionally spread by ±`jitter_factor`.
#[derive(Debug)]
pub struct BackoffCalculator {
    base_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter_factor: f64,
    failures: u32,
    rng_state: u64,
}

impl BackoffCalculator {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            base_ms: config.backoff_base_ms,
            max_ms: config.backoff_max_ms.max(config.backoff_base_ms),
            multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            failures: 0,
            rng_state: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(12345)
                | 1,
        }
    }

    /// xorshift64, only used for jitter
    #[inline]
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    /// Delay for the given failure count, before jitter.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.min(63) as i32;
        let raw = (self.base_ms as f64) * self.multiplier.powi(exp);
        let capped = raw.min(self.max_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Count a failure and return how long to wait before reconnecting.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let capped = self.delay_for(self.failures).as_millis() as f64;

        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(capped as u64);
        }

        let jitter_range = capped * self.jitter_factor;
        let jitter = (self.next_random() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped + jitter)
            .max(self.base_ms as f64)
            .min(self.max_ms as f64);
        Duration::from_millis(final_ms as u64)
    }

    /// Fatal errors jump straight to the ceiling.
    pub fn record_fatal(&mut self, max_failures: u32) -> Duration {
        self.failures = self.failures.max(max_failures).saturating_add(1);
        Duration::from_millis(self.max_ms)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

// =============================================================================
// HEARTBEAT MONITOR
// =============================================================================

/// Result of heartbeat check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Ok,
    /// Keepalive ping is due
    SendPing,
    /// No data within the timeout; reported once per stale episode
    Stale(Duration),
}

/// Data staleness + keepalive tracking. Never forces a reconnect.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    stale_timeout: Duration,
    ping_interval: Duration,
    last_data_received: Instant,
    last_ping_sent: Option<Instant>,
    stale_reported: bool,
}

impl HeartbeatMonitor {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            stale_timeout: config.heartbeat_timeout(),
            ping_interval: config.ping_interval(),
            last_data_received: Instant::now(),
            last_ping_sent: None,
            stale_reported: false,
        }
    }

    /// Reset state for new connection
    pub fn reset(&mut self, now: Instant) {
        self.last_data_received = now;
        self.last_ping_sent = Some(now);
        self.stale_reported = false;
    }

    #[inline]
    pub fn record_data_received(&mut self, now: Instant) {
        self.last_data_received = now;
        self.stale_reported = false;
    }

    pub fn record_ping_sent(&mut self, now: Instant) {
        self.last_ping_sent = Some(now);
    }

    pub fn data_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_data_received)
    }

    pub fn check_at(&mut self, now: Instant) -> HeartbeatAction {
        let age = self.data_age(now);
        if age > self.stale_timeout && !self.stale_reported {
            self.stale_reported = true;
            return HeartbeatAction::Stale(age);
        }

        let ping_due = match self.last_ping_sent {
            None => true,
            Some(sent) => now.saturating_duration_since(sent) >= self.ping_interval,
        };
        if ping_due {
            return HeartbeatAction::SendPing;
        }

        HeartbeatAction::Ok
    }

    pub fn is_stale(&self) -> bool {
        self.stale_reported
    }
}

// =============================================================================
// SESSION METRICS
// =============================================================================

/// Session metrics for monitoring
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub connections_attempted: AtomicU64,
    pub connections_succeeded: AtomicU64,
    pub connections_failed: AtomicU64,
    pub disconnects: AtomicU64,
    pub fatal_errors: AtomicU64,
    pub stale_events: AtomicU64,
    pub pings_sent: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_connect_attempt(&self) {
        self.connections_attempted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connect_success(&self) {
        self.connections_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connect_failure(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fatal(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale(&self) {
        self.stale_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ping(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Summary string for logging
    pub fn summary(&self) -> String {
        format!(
            "connects={}/{} failed={} disconnects={} fatal={} stale={} pings={}",
            self.connections_succeeded.load(Ordering::Relaxed),
            self.connections_attempted.load(Ordering::Relaxed),
            self.connections_failed.load(Ordering::Relaxed),
            self.disconnects.load(Ordering::Relaxed),
            self.fatal_errors.load(Ordering::Relaxed),
            self.stale_events.load(Ordering::Relaxed),
            self.pings_sent.load(Ordering::Relaxed),
        )
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Owns the state machine, backoff and heartbeat for one feed connection.
#[derive(Debug)]
pub struct SessionManager {
    config: FeedConfig,
    state: RwLock<SessionState>,
    backoff: RwLock<BackoffCalculator>,
    heartbeat: RwLock<HeartbeatMonitor>,
    metrics: SessionMetrics,
}

impl SessionManager {
    pub fn new(config: FeedConfig) -> Self {
        let backoff = BackoffCalculator::new(&config);
        let heartbeat = HeartbeatMonitor::new(&config);

        Self {
            config,
            state: RwLock::new(SessionState::Disconnected),
            backoff: RwLock::new(backoff),
            heartbeat: RwLock::new(heartbeat),
            metrics: SessionMetrics::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Transition to a new state, returning the previous one.
    pub fn transition(&self, new_state: SessionState, reason: TransitionReason) -> SessionState {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        match (old_state, new_state) {
            (_, SessionState::Connecting) => {
                self.metrics.record_connect_attempt();
            }
            (_, SessionState::Connected) => {
                self.metrics.record_connect_success();
                self.heartbeat.write().reset(Instant::now());
            }
            (SessionState::Connecting, SessionState::Backoff) => {
                self.metrics.record_connect_failure();
            }
            (SessionState::Connected, SessionState::Backoff) => {
                self.metrics.record_disconnect();
            }
            _ => {}
        }
        if reason == TransitionReason::FatalError {
            self.metrics.record_fatal();
        }

        info!(
            from = %old_state,
            to = %new_state,
            reason = %reason,
            failures = self.consecutive_failures(),
            "session_transition"
        );

        old_state
    }

    /// Register a failure and return the delay before the next attempt.
    pub fn on_failure(&self, err: &FeedError) -> Duration {
        let mut backoff = self.backoff.write();
        if err.is_fatal() {
            backoff.record_fatal(self.config.max_consecutive_failures)
        } else {
            backoff.record_failure()
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.backoff.read().failures()
    }

    /// Status as seen by consumers. Once the failure count reaches the
    /// configured maximum the session reports `Disconnected` until data
    /// flows again, even though the retry loop keeps going.
    pub fn connection_status(&self) -> ConnectionStatus {
        let failures = self.consecutive_failures();
        let exhausted = failures >= self.config.max_consecutive_failures;

        match self.state() {
            SessionState::Connected => ConnectionStatus::Connected,
            SessionState::Connecting if failures == 0 => ConnectionStatus::Connecting,
            SessionState::Connecting | SessionState::Backoff if exhausted => {
                ConnectionStatus::Disconnected
            }
            SessionState::Connecting | SessionState::Backoff => ConnectionStatus::Reconnecting,
            SessionState::Disconnected | SessionState::Shutdown => ConnectionStatus::Disconnected,
        }
    }

    /// Record that a message arrived (hot path)
    #[inline]
    pub fn record_data_received(&self, now: Instant) {
        self.heartbeat.write().record_data_received(now);
        if self.backoff.read().failures() > 0 {
            self.backoff.write().reset();
            debug!("backoff_reset");
        }
    }

    pub fn record_ping_sent(&self, now: Instant) {
        self.heartbeat.write().record_ping_sent(now);
        self.metrics.record_ping();
    }

    pub fn check_heartbeat(&self, now: Instant) -> HeartbeatAction {
        let action = self.heartbeat.write().check_at(now);
        if matches!(action, HeartbeatAction::Stale(_)) {
            self.metrics.record_stale();
        }
        action
    }

    pub fn is_stale(&self) -> bool {
        self.heartbeat.read().is_stale()
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FeedConfig {
        FeedConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..FeedConfig::default()
        }
    }

    #[test]
    fn test_backoff_doubles_per_failure() {
        let mut backoff = BackoffCalculator::new(&config());

        assert_eq!(backoff.record_failure(), Duration::from_millis(200));
        assert_eq!(backoff.record_failure(), Duration::from_millis(400));
        assert_eq!(backoff.record_failure(), Duration::from_millis(800));
        assert_eq!(backoff.failures(), 3);
    }

    #[test]
    fn test_backoff_cap() {
        let mut backoff = BackoffCalculator::new(&config());
        for _ in 0..100 {
            assert!(backoff.record_failure() <= Duration::from_millis(1_000));
        }
        assert_eq!(backoff.delay_for(50), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = BackoffCalculator::new(&config());
        backoff.record_failure();
        backoff.record_failure();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.record_failure(), Duration::from_millis(200));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let mut cfg = config();
        cfg.jitter_factor = 0.3;
        let mut backoff = BackoffCalculator::new(&cfg);

        let d = backoff.record_failure().as_millis();
        assert!((140..=260).contains(&d), "got {d}");
    }

    #[test]
    fn test_fatal_goes_to_ceiling() {
        let mut backoff = BackoffCalculator::new(&config());
        assert_eq!(backoff.record_fatal(3), Duration::from_millis(1_000));
        assert!(backoff.failures() >= 3);
    }

    #[test]
    fn test_heartbeat_reports_stale_once() {
        let cfg = FeedConfig {
            heartbeat_timeout_ms: 50,
            ping_interval_ms: 10_000,
            ..FeedConfig::default()
        };
        let mut monitor = HeartbeatMonitor::new(&cfg);
        let t0 = Instant::now();
        monitor.reset(t0);

        assert_eq!(monitor.check_at(t0 + Duration::from_millis(10)), HeartbeatAction::Ok);
        assert!(matches!(
            monitor.check_at(t0 + Duration::from_millis(100)),
            HeartbeatAction::Stale(_)
        ));
        assert_eq!(monitor.check_at(t0 + Duration::from_millis(200)), HeartbeatAction::Ok);

        monitor.record_data_received(t0 + Duration::from_millis(300));
        assert!(!monitor.is_stale());
        assert!(matches!(
            monitor.check_at(t0 + Duration::from_millis(400)),
            HeartbeatAction::Stale(_)
        ));
    }

    #[test]
    fn test_heartbeat_ping_schedule() {
        let cfg = FeedConfig {
            heartbeat_timeout_ms: 60_000,
            ping_interval_ms: 100,
            ..FeedConfig::default()
        };
        let mut monitor = HeartbeatMonitor::new(&cfg);
        let t0 = Instant::now();
        monitor.reset(t0);

        assert_eq!(monitor.check_at(t0 + Duration::from_millis(50)), HeartbeatAction::Ok);
        assert_eq!(
            monitor.check_at(t0 + Duration::from_millis(150)),
            HeartbeatAction::SendPing
        );
        monitor.record_ping_sent(t0 + Duration::from_millis(150));
        assert_eq!(monitor.check_at(t0 + Duration::from_millis(200)), HeartbeatAction::Ok);
    }

    #[test]
    fn test_session_manager_transitions() {
        let manager = SessionManager::new(config());
        assert_eq!(manager.state(), SessionState::Disconnected);
        assert_eq!(manager.connection_status(), ConnectionStatus::Disconnected);

        manager.transition(SessionState::Connecting, TransitionReason::Started);
        assert_eq!(manager.connection_status(), ConnectionStatus::Connecting);

        manager.transition(SessionState::Connected, TransitionReason::ConnectSuccess);
        assert_eq!(manager.connection_status(), ConnectionStatus::Connected);

        assert_eq!(
            manager.metrics().connections_attempted.load(Ordering::Relaxed),
            1
        );
        assert_eq!(
            manager.metrics().connections_succeeded.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_status_degrades_after_max_failures() {
        let manager = SessionManager::new(config());
        let err = FeedError::Transient("refused".into());

        for expected in [
            ConnectionStatus::Reconnecting,
            ConnectionStatus::Reconnecting,
            ConnectionStatus::Disconnected,
        ] {
            manager.transition(SessionState::Connecting, TransitionReason::Started);
            manager.on_failure(&err);
            manager.transition(SessionState::Backoff, TransitionReason::ConnectFailed);
            assert_eq!(manager.connection_status(), expected);
        }

        // Still retrying, still reported as down
        manager.transition(SessionState::Connecting, TransitionReason::BackoffElapsed);
        assert_eq!(manager.connection_status(), ConnectionStatus::Disconnected);

        manager.record_data_received(Instant::now());
        assert_eq!(manager.consecutive_failures(), 0);
    }

    #[test]
    fn test_fatal_error_marks_disconnected() {
        let manager = SessionManager::new(config());
        manager.transition(SessionState::Connecting, TransitionReason::Started);
        let delay = manager.on_failure(&FeedError::Fatal("bad url".into()));
        manager.transition(SessionState::Backoff, TransitionReason::FatalError);

        assert_eq!(delay, Duration::from_millis(1_000));
        assert_eq!(manager.connection_status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.metrics().fatal_errors.load(Ordering::Relaxed), 1);
    }
}
