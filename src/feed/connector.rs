//! Feed connector
//!
//! Runs the websocket read loop on a dedicated thread with its own
//! current-thread tokio runtime. Parsed events are appended to the shared
//! `StateStore`; connection status is mirrored into the store and
//! broadcast to subscribers on change.
//!
//! Usage:
//! ```ignore
//! let store = Arc::new(StateStore::default());
//! let connector = FeedConnector::new(FeedConfig::default(), store.clone());
//! connector.start()?;
//! // ... evaluation tick reads from `store` ...
//! connector.stop();
//! ```

use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use super::session::{HeartbeatAction, SessionManager, SessionState, TransitionReason};
use super::wire::{parse_message, FeedMessage};
use crate::config::FeedConfig;
use crate::error::{classify_ws_error, FeedError};
use crate::models::ConnectionStatus;
use crate::store::StateStore;

const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_millis(500);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// FEED STATISTICS
// =============================================================================

#[derive(Debug, Default)]
pub struct FeedStats {
    pub messages_received: AtomicU64,
    pub trades: AtomicU64,
    pub depth_updates: AtomicU64,
    pub parse_errors: AtomicU64,
    pub reconnects: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Receive time of the last message, epoch ms (0 = never)
    pub last_message_ms: AtomicI64,
}

/// Point-in-time copy of `FeedStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedStatsSnapshot {
    pub messages_received: u64,
    pub trades: u64,
    pub depth_updates: u64,
    pub parse_errors: u64,
    pub reconnects: u64,
    pub bytes_received: u64,
    pub last_message_age_ms: Option<i64>,
}

impl FeedStats {
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
            depth_updates: self.depth_updates.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            last_message_age_ms: self.last_message_age_at(now),
        }
    }

    pub fn last_message_age_at(&self, now: DateTime<Utc>) -> Option<i64> {
        match self.last_message_ms.load(Ordering::Relaxed) {
            0 => None,
            last => Some((now.timestamp_millis() - last).max(0)),
        }
    }
}

/// Why a connection ended, and how to classify it for backoff.
struct ConnectionEnd {
    reason: TransitionReason,
    error: FeedError,
}

impl ConnectionEnd {
    fn new(reason: TransitionReason, error: FeedError) -> Self {
        Self { reason, error }
    }
}

// =============================================================================
// FEED CONNECTOR
// =============================================================================

pub struct FeedConnector {
    config: FeedConfig,
    store: Arc<StateStore>,
    session: SessionManager,
    stats: FeedStats,
    status_tx: broadcast::Sender<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl FeedConnector {
    pub fn new(config: FeedConfig, store: Arc<StateStore>) -> Arc<Self> {
        let (status_tx, _) = broadcast::channel(64);
        let (shutdown_tx, _) = watch::channel(false);
        let session = SessionManager::new(config.clone());

        Arc::new(Self {
            config,
            store,
            session,
            stats: FeedStats::default(),
            status_tx,
            shutdown_tx,
            running: AtomicBool::new(false),
            thread_handle: Mutex::new(None),
        })
    }

    /// Spawn the read loop. Calling `start` on a running connector is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut handle = self.thread_handle.lock();
        if handle.is_some() {
            warn!("feed connector already running");
            return Ok(());
        }

        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.running.store(true, Ordering::SeqCst);

        let connector = self.clone();
        let thread = thread::Builder::new()
            .name("feed-connector".to_string())
            .spawn(move || connector.ingest_loop(shutdown_rx))
            .context("failed to spawn feed connector thread")?;

        *handle = Some(thread);
        info!(url = %self.config.url, "feed_connector_started");
        Ok(())
    }

    /// Request shutdown and wait up to `stop_timeout` for the loop to exit.
    ///
    /// Returns `false` if the thread had to be detached.
    pub fn stop(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let Some(handle) = self.thread_handle.lock().take() else {
            return true;
        };

        let deadline = Instant::now() + self.config.stop_timeout();
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(STOP_POLL_INTERVAL);
        }

        let joined = if handle.is_finished() {
            if handle.join().is_err() {
                error!("feed connector thread panicked");
            }
            true
        } else {
            warn!(
                timeout_ms = self.config.stop_timeout_ms,
                "feed connector did not stop in time, detaching"
            );
            false
        };

        if self.session.state() != SessionState::Shutdown {
            self.set_state(SessionState::Shutdown, TransitionReason::ShutdownRequested);
        }
        info!(
            metrics = %self.session.metrics().summary(),
            "feed_connector_stopped"
        );
        joined
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.session.connection_status()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.session.consecutive_failures()
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn stats(&self) -> FeedStatsSnapshot {
        self.stats.snapshot_at(Utc::now())
    }

    pub fn last_message_age(&self) -> Option<Duration> {
        self.stats
            .last_message_age_at(Utc::now())
            .map(|ms| Duration::from_millis(ms as u64))
    }

    /// Receive every connection status change.
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Decode one text frame and apply it to the store.
    ///
    /// Malformed payloads are counted and dropped; returns whether the
    /// message produced a market event.
    pub fn handle_text(&self, text: &str, received_at: DateTime<Utc>, now: Instant) -> bool {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_received
            .fetch_add(text.len() as u64, Ordering::Relaxed);
        self.stats
            .last_message_ms
            .store(received_at.timestamp_millis(), Ordering::Relaxed);
        self.session.record_data_received(now);

        match parse_message(text, received_at) {
            Ok(FeedMessage::Trade(trade)) => {
                trace!(price = trade.price, qty = trade.quantity, "trade");
                self.store.add_trade(trade);
                self.stats.trades.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(FeedMessage::Depth(depth)) => {
                trace!(bid = depth.best_bid, ask = depth.best_ask, "depth");
                self.store.add_depth(depth);
                self.stats.depth_updates.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(FeedMessage::Control) => {
                debug!(payload = text, "control message");
                false
            }
            Err(e) => {
                let errors = self.stats.parse_errors.fetch_add(1, Ordering::Relaxed) + 1;
                self.store.record_error(format!("malformed message: {e}"));
                warn!(error = %e, errors, "dropping malformed message");
                false
            }
        }
    }

    fn set_state(&self, state: SessionState, reason: TransitionReason) {
        self.session.transition(state, reason);

        let status = self.session.connection_status();
        let previous = self.store.connection_status();
        self.store.set_connection_status(status);
        if previous != status {
            // No subscribers is fine
            let _ = self.status_tx.send(status);
        }
    }

    fn ingest_loop(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(error = %e, "failed to build feed runtime");
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        rt.block_on(self.run(shutdown));
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut reason = TransitionReason::Started;

        while !*shutdown.borrow() {
            self.set_state(SessionState::Connecting, reason);

            let end = match self.run_connection(&mut shutdown).await {
                Ok(()) => break,
                Err(end) => end,
            };

            let delay = self.session.on_failure(&end.error);
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            let reason_out = if end.error.is_fatal() {
                TransitionReason::FatalError
            } else {
                end.reason
            };
            self.set_state(SessionState::Backoff, reason_out);

            if end.error.is_fatal() {
                error!(error = %end.error, delay_ms = delay.as_millis() as u64, "feed_fatal_error");
            } else {
                warn!(error = %end.error, "feed_connection_lost");
            }
            info!(
                delay_ms = delay.as_millis() as u64,
                failures = self.session.consecutive_failures(),
                status = %self.session.connection_status(),
                "reconnect_backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
            reason = TransitionReason::BackoffElapsed;
        }

        self.set_state(SessionState::Shutdown, TransitionReason::ShutdownRequested);
    }

    /// One connection lifecycle. `Ok` means shutdown was requested.
    async fn run_connection(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> std::result::Result<(), ConnectionEnd> {
        debug!(url = %self.config.url, "connecting");

        let connect = tokio::time::timeout(
            self.config.connect_timeout(),
            connect_async(self.config.url.as_str()),
        );

        let ws_stream = tokio::select! {
            res = connect => match res {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => {
                    return Err(ConnectionEnd::new(
                        TransitionReason::ConnectFailed,
                        classify_ws_error(&e),
                    ));
                }
                Err(_) => {
                    return Err(ConnectionEnd::new(
                        TransitionReason::ConnectTimeout,
                        FeedError::Transient("connect timeout".to_string()),
                    ));
                }
            },
            _ = shutdown.changed() => return Ok(()),
        };

        self.set_state(SessionState::Connected, TransitionReason::ConnectSuccess);

        let (mut write, mut read) = ws_stream.split();
        let mut heartbeat_check = tokio::time::interval(HEARTBEAT_CHECK_INTERVAL);
        heartbeat_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_text(&text, Utc::now(), Instant::now());
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            self.handle_text(text, Utc::now(), Instant::now());
                        }
                        Err(_) => {
                            self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                            self.store.record_error("non-utf8 binary frame");
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            return Err(ConnectionEnd::new(
                                TransitionReason::NetworkError,
                                classify_ws_error(&e),
                            ));
                        }
                    }
                    Some(Ok(Message::Pong(_))) => trace!("pong"),
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server_close");
                        return Err(ConnectionEnd::new(
                            TransitionReason::ServerClose,
                            FeedError::Transient("server closed connection".to_string()),
                        ));
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        return Err(ConnectionEnd::new(
                            TransitionReason::NetworkError,
                            classify_ws_error(&e),
                        ));
                    }
                    None => {
                        return Err(ConnectionEnd::new(
                            TransitionReason::ServerClose,
                            FeedError::Transient("stream ended".to_string()),
                        ));
                    }
                },

                _ = heartbeat_check.tick() => match self.session.check_heartbeat(Instant::now()) {
                    HeartbeatAction::Ok => {}
                    HeartbeatAction::SendPing => {
                        if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                            warn!(error = %e, "ping_send_failed");
                        } else {
                            self.session.record_ping_sent(Instant::now());
                        }
                    }
                    HeartbeatAction::Stale(age) => {
                        warn!(
                            age_ms = age.as_millis() as u64,
                            timeout_ms = self.config.heartbeat_timeout_ms,
                            "feed_stale"
                        );
                    }
                },
            }
        }
    }
}

impl Drop for FeedConnector {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> (Arc<FeedConnector>, Arc<StateStore>) {
        let store = Arc::new(StateStore::default());
        (FeedConnector::new(FeedConfig::default(), store.clone()), store)
    }

    #[test]
    fn handle_text_routes_trades_and_depth() {
        let (connector, store) = connector();
        let now = Utc::now();

        let trade = r#"{"stream":"btcusdt@trade","data":{"t":1,"p":"100.5","q":"0.2","T":1700000000000,"m":false}}"#;
        let depth = r#"{"stream":"btcusdt@depth10@100ms","data":{"bids":[["100","1"]],"asks":[["101","2"]]}}"#;
        assert!(connector.handle_text(trade, now, Instant::now()));
        assert!(connector.handle_text(depth, now, Instant::now()));

        assert_eq!(store.current_price(), 100.5);
        assert_eq!(store.market().best_ask, 101.0);

        let stats = connector.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.trades, 1);
        assert_eq!(stats.depth_updates, 1);
        assert_eq!(stats.parse_errors, 0);
    }

    #[test]
    fn malformed_messages_are_counted_and_dropped() {
        let (connector, store) = connector();
        let now = Utc::now();

        assert!(!connector.handle_text("garbage", now, Instant::now()));
        assert!(!connector.handle_text(r#"{"stream":"x@trade","data":{}}"#, now, Instant::now()));

        assert_eq!(connector.stats().parse_errors, 2);
        assert_eq!(store.error_count(), 2);
        assert!(store.recent_trades(10).is_empty());
    }

    #[test]
    fn last_message_age_tracks_receive_time() {
        let (connector, _) = connector();
        assert!(connector.stats().last_message_age_ms.is_none());

        let received = Utc::now() - chrono::Duration::seconds(2);
        connector.handle_text(r#"{"result":null,"id":1}"#, received, Instant::now());
        let age = connector.stats().last_message_age_ms.unwrap();
        assert!(age >= 2_000);
    }

    #[test]
    fn stop_without_start_is_noop() {
        let (connector, _) = connector();
        assert!(connector.stop());
        assert!(!connector.is_running());
    }
}
