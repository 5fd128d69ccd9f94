//! StateStore - bounded, lock-guarded market state
//!
//! Raw events (trades, depth snapshots) and derived series (price/VWAP,
//! spread, volatility, velocity) live in `BoundedBuffer`s behind a single
//! `parking_lot::Mutex`. Critical sections are O(1) amortized appends or
//! clones; nothing computes or performs I/O while the lock is held.
//!
//! The store also owns connection status, error bookkeeping and the
//! rolling velocity baseline used by the relative velocity rules.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::ring::BoundedBuffer;
use crate::config::BufferConfig;
use crate::features::calc;
use crate::models::{ConnectionStatus, DepthSnapshot, PricePoint, SeriesPoint, Trade};

/// Current top-of-book scalars, read under one lock acquisition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MarketScalars {
    pub current_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid_price: f64,
    pub spread: f64,
    pub spread_bps: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferSizes {
    pub trades: usize,
    pub depth: usize,
    pub price_history: usize,
    pub spread_history: usize,
    pub volatility_history: usize,
    pub velocity_history: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreSummary {
    pub connection_status: ConnectionStatus,
    pub market: MarketScalars,
    pub velocity_baseline: f64,
    pub buffers: BufferSizes,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

struct StoreInner {
    trades: BoundedBuffer<Trade>,
    depth: BoundedBuffer<DepthSnapshot>,
    price_history: BoundedBuffer<PricePoint>,
    spread_history: BoundedBuffer<SeriesPoint>,
    volatility_history: BoundedBuffer<SeriesPoint>,
    velocity_history: BoundedBuffer<SeriesPoint>,

    market: MarketScalars,
    velocity_baseline: f64,

    connection_status: ConnectionStatus,
    error_count: u64,
    last_error: Option<String>,
    last_trade_time: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
}

impl StoreInner {
    fn new(config: &BufferConfig) -> Self {
        Self {
            trades: BoundedBuffer::new(config.trades),
            depth: BoundedBuffer::new(config.depth),
            price_history: BoundedBuffer::new(config.price_history),
            spread_history: BoundedBuffer::new(config.spread_history),
            volatility_history: BoundedBuffer::new(config.volatility_history),
            velocity_history: BoundedBuffer::new(config.velocity_history),
            market: MarketScalars::default(),
            velocity_baseline: config.default_velocity_baseline,
            connection_status: ConnectionStatus::Disconnected,
            error_count: 0,
            last_error: None,
            last_trade_time: None,
            last_update: None,
        }
    }

    fn buffer_sizes(&self) -> BufferSizes {
        BufferSizes {
            trades: self.trades.len(),
            depth: self.depth.len(),
            price_history: self.price_history.len(),
            spread_history: self.spread_history.len(),
            volatility_history: self.volatility_history.len(),
            velocity_history: self.velocity_history.len(),
        }
    }
}

/// Thread-safe bounded market state. Share it as `Arc<StateStore>`.
pub struct StateStore {
    config: BufferConfig,
    inner: Mutex<StoreInner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

impl StateStore {
    pub fn new(config: BufferConfig) -> Self {
        let inner = Mutex::new(StoreInner::new(&config));
        Self { config, inner }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    // =========================================================================
    // RAW EVENTS
    // =========================================================================

    pub fn add_trade(&self, trade: Trade) {
        let mut inner = self.inner.lock();
        inner.market.current_price = trade.price;
        inner.last_trade_time = Some(trade.timestamp);
        inner.last_update = Some(trade.timestamp);
        inner.trades.push(trade);
    }

    /// Append a depth snapshot and refresh the top-of-book scalars.
    ///
    /// Mid and spread drop to zero when either side is empty.
    pub fn add_depth(&self, snapshot: DepthSnapshot) {
        let (bid, ask) = (snapshot.best_bid, snapshot.best_ask);

        let mut inner = self.inner.lock();
        inner.market = MarketScalars {
            current_price: inner.market.current_price,
            best_bid: bid,
            best_ask: ask,
            mid_price: calc::mid_price(bid, ask),
            spread: calc::spread(bid, ask),
            spread_bps: calc::spread_bps(bid, ask),
            bid_volume: snapshot.bid_volume,
            ask_volume: snapshot.ask_volume,
        };
        inner.last_update = Some(snapshot.timestamp);
        inner.depth.push(snapshot);
    }

    pub fn recent_trades(&self, n: usize) -> Vec<Trade> {
        self.inner.lock().trades.recent(n)
    }

    pub fn trades_since(&self, cutoff: DateTime<Utc>) -> Vec<Trade> {
        self.inner.lock().trades.since(cutoff)
    }

    pub fn all_trades(&self) -> Vec<Trade> {
        self.inner.lock().trades.to_vec()
    }

    pub fn latest_depth(&self) -> Option<DepthSnapshot> {
        self.inner.lock().depth.last().cloned()
    }

    pub fn depth_history(&self, n: usize) -> Vec<DepthSnapshot> {
        self.inner.lock().depth.recent(n)
    }

    // =========================================================================
    // DERIVED SERIES
    // =========================================================================

    pub fn add_price_point(&self, point: PricePoint) {
        self.inner.lock().price_history.push(point);
    }

    pub fn add_spread_point(&self, point: SeriesPoint) {
        self.inner.lock().spread_history.push(point);
    }

    pub fn add_volatility_point(&self, point: SeriesPoint) {
        self.inner.lock().volatility_history.push(point);
    }

    /// Append a velocity sample and refresh the rolling baseline.
    ///
    /// The baseline is the mean of the newest `baseline_samples` points and
    /// keeps its previous value until `baseline_min_samples` exist.
    pub fn add_velocity_point(&self, point: SeriesPoint) {
        let mut inner = self.inner.lock();
        inner.velocity_history.push(point);

        let window = self.config.baseline_samples.max(1);
        let skip = inner.velocity_history.len().saturating_sub(window);
        let (sum, count) = inner
            .velocity_history
            .iter()
            .skip(skip)
            .fold((0.0, 0usize), |(s, c), p| (s + p.value, c + 1));

        if count >= self.config.baseline_min_samples && count > 0 {
            inner.velocity_baseline = sum / count as f64;
        }
    }

    pub fn price_history_since(&self, cutoff: DateTime<Utc>) -> Vec<PricePoint> {
        self.inner.lock().price_history.since(cutoff)
    }

    pub fn spread_history_since(&self, cutoff: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.inner.lock().spread_history.since(cutoff)
    }

    pub fn volatility_history_since(&self, cutoff: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.inner.lock().volatility_history.since(cutoff)
    }

    pub fn velocity_history_since(&self, cutoff: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.inner.lock().velocity_history.since(cutoff)
    }

    pub fn price_history(&self) -> Vec<PricePoint> {
        self.inner.lock().price_history.to_vec()
    }

    pub fn last_spread_sample(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().spread_history.last().map(|p| p.timestamp)
    }

    pub fn last_volatility_sample(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().volatility_history.last().map(|p| p.timestamp)
    }

    pub fn last_velocity_sample(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().velocity_history.last().map(|p| p.timestamp)
    }

    // =========================================================================
    // SCALARS
    // =========================================================================

    pub fn market(&self) -> MarketScalars {
        self.inner.lock().market
    }

    pub fn current_price(&self) -> f64 {
        self.inner.lock().market.current_price
    }

    pub fn mid_price(&self) -> f64 {
        self.inner.lock().market.mid_price
    }

    pub fn spread(&self) -> f64 {
        self.inner.lock().market.spread
    }

    pub fn spread_bps(&self) -> f64 {
        self.inner.lock().market.spread_bps
    }

    pub fn velocity_baseline(&self) -> f64 {
        self.inner.lock().velocity_baseline
    }

    pub fn last_trade_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_trade_time
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_update
    }

    // =========================================================================
    // STATUS & ERRORS
    // =========================================================================

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.lock().connection_status
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        let previous = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.connection_status, status)
        };
        if previous != status {
            debug!(from = %previous, to = %status, "store connection status updated");
        }
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.error_count += 1;
        inner.last_error = Some(message.into());
    }

    /// Clears the last error message; the counter is cumulative.
    pub fn clear_error(&self) {
        self.inner.lock().last_error = None;
    }

    pub fn error_count(&self) -> u64 {
        self.inner.lock().error_count
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    pub fn buffer_sizes(&self) -> BufferSizes {
        self.inner.lock().buffer_sizes()
    }

    pub fn summary(&self) -> StoreSummary {
        let inner = self.inner.lock();
        StoreSummary {
            connection_status: inner.connection_status,
            market: inner.market,
            velocity_baseline: inner.velocity_baseline,
            buffers: inner.buffer_sizes(),
            error_count: inner.error_count,
            last_error: inner.last_error.clone(),
            last_trade_time: inner.last_trade_time,
            last_update: inner.last_update,
        }
    }

    /// Drop all buffered data and scalar state. Connection status is kept:
    /// it belongs to the connector, not to the data.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let status = inner.connection_status;
        *inner = StoreInner::new(&self.config);
        inner.connection_status = status;
    }
}
