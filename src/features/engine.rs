//! Feature Engine
//!
//! Pulls recent trades and top-of-book from the store and derives one
//! consistent `Features` snapshot per call. Owns the short-term velocity
//! EMA and the session reference price; the long-term velocity baseline
//! stays in the store.
//!
//! Each call also samples derived points back into the store's chart
//! series (price every call, spread/volatility/velocity at most once per
//! sample interval).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::calc;
use crate::config::WindowConfig;
use crate::error::ComputationError;
use crate::models::{PricePoint, SeriesPoint, Trade};
use crate::store::StateStore;

/// One evaluation's worth of derived metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub timestamp: DateTime<Utc>,
    pub current_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid_price: f64,
    pub spread: f64,
    pub spread_bps: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub imbalance: f64,
    pub imbalance_pct: f64,
    pub vwap: f64,
    pub price_vs_vwap: f64,
    /// EMA-smoothed trades per second
    pub velocity: f64,
    pub raw_velocity: f64,
    pub velocity_baseline: f64,
    pub buy_pressure: f64,
    pub volatility_bps: f64,
    pub price_change: f64,
    pub price_change_pct: f64,
    pub trade_count: usize,
}

impl Features {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            current_price: 0.0,
            best_bid: 0.0,
            best_ask: 0.0,
            mid_price: 0.0,
            spread: 0.0,
            spread_bps: 0.0,
            bid_volume: 0.0,
            ask_volume: 0.0,
            imbalance: 0.0,
            imbalance_pct: 0.0,
            vwap: 0.0,
            price_vs_vwap: 0.0,
            velocity: 0.0,
            raw_velocity: 0.0,
            velocity_baseline: 0.0,
            buy_pressure: 0.5,
            volatility_bps: 0.0,
            price_change: 0.0,
            price_change_pct: 0.0,
            trade_count: 0,
        }
    }

    pub fn get(&self, key: FeatureKey) -> f64 {
        match key {
            FeatureKey::Price => self.current_price,
            FeatureKey::MidPrice => self.mid_price,
            FeatureKey::Spread => self.spread,
            FeatureKey::SpreadBps => self.spread_bps,
            FeatureKey::BidVolume => self.bid_volume,
            FeatureKey::AskVolume => self.ask_volume,
            FeatureKey::Imbalance => self.imbalance,
            FeatureKey::ImbalancePct => self.imbalance_pct,
            FeatureKey::Vwap => self.vwap,
            FeatureKey::PriceVsVwap => self.price_vs_vwap,
            FeatureKey::Velocity => self.velocity,
            FeatureKey::Baseline => self.velocity_baseline,
            FeatureKey::BuyPressure => self.buy_pressure,
            FeatureKey::VolatilityBps => self.volatility_bps,
            FeatureKey::PriceChange => self.price_change,
            FeatureKey::PriceChangePct => self.price_change_pct,
        }
    }

    /// Look a value up by its template name.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        FeatureKey::from_name(name).map(|k| self.get(k))
    }
}

/// Named, selectable feature fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    Price,
    MidPrice,
    Spread,
    SpreadBps,
    BidVolume,
    AskVolume,
    Imbalance,
    ImbalancePct,
    Vwap,
    PriceVsVwap,
    Velocity,
    Baseline,
    BuyPressure,
    VolatilityBps,
    PriceChange,
    PriceChangePct,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 16] = [
        FeatureKey::Price,
        FeatureKey::MidPrice,
        FeatureKey::Spread,
        FeatureKey::SpreadBps,
        FeatureKey::BidVolume,
        FeatureKey::AskVolume,
        FeatureKey::Imbalance,
        FeatureKey::ImbalancePct,
        FeatureKey::Vwap,
        FeatureKey::PriceVsVwap,
        FeatureKey::Velocity,
        FeatureKey::Baseline,
        FeatureKey::BuyPressure,
        FeatureKey::VolatilityBps,
        FeatureKey::PriceChange,
        FeatureKey::PriceChangePct,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureKey::Price => "price",
            FeatureKey::MidPrice => "mid_price",
            FeatureKey::Spread => "spread",
            FeatureKey::SpreadBps => "spread_bps",
            FeatureKey::BidVolume => "bid_volume",
            FeatureKey::AskVolume => "ask_volume",
            FeatureKey::Imbalance => "imbalance",
            FeatureKey::ImbalancePct => "imbalance_pct",
            FeatureKey::Vwap => "vwap",
            FeatureKey::PriceVsVwap => "price_vs_vwap",
            FeatureKey::Velocity => "velocity",
            FeatureKey::Baseline => "baseline",
            FeatureKey::BuyPressure => "buy_pressure",
            FeatureKey::VolatilityBps => "volatility_bps",
            FeatureKey::PriceChange => "price_change",
            FeatureKey::PriceChangePct => "price_change_pct",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub struct FeatureEngine {
    store: Arc<StateStore>,
    windows: WindowConfig,
    velocity_ema: f64,
    reference_price: Option<f64>,
}

impl FeatureEngine {
    pub fn new(store: Arc<StateStore>, windows: WindowConfig) -> Self {
        Self {
            store,
            windows,
            velocity_ema: 0.0,
            reference_price: None,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn compute(&mut self) -> Features {
        self.compute_at(Utc::now())
    }

    pub fn compute_at(&mut self, now: DateTime<Utc>) -> Features {
        let features = self.derive(now);
        self.sample_history(&features);
        features
    }

    /// Forget the EMA state and session reference price.
    pub fn reset(&mut self) {
        self.velocity_ema = 0.0;
        self.reference_price = None;
    }

    fn derive(&mut self, now: DateTime<Utc>) -> Features {
        let w = &self.windows;
        let market = self.store.market();
        let longest = w
            .vwap_secs
            .max(w.velocity_secs)
            .max(w.volatility_secs)
            .max(w.buy_pressure_secs);
        let trades = self.store.trades_since(window_start(now, longest));

        let mut f = Features::empty(now);
        f.current_price = market.current_price;
        f.best_bid = market.best_bid;
        f.best_ask = market.best_ask;
        f.bid_volume = market.bid_volume;
        f.ask_volume = market.ask_volume;
        f.velocity_baseline = self.store.velocity_baseline();

        // Book
        f.mid_price = calc::mid_price(market.best_bid, market.best_ask);
        f.spread = calc::spread(market.best_bid, market.best_ask);
        f.spread_bps = calc::spread_bps(market.best_bid, market.best_ask);
        f.imbalance = calc::imbalance(market.bid_volume, market.ask_volume);
        f.imbalance_pct = f.imbalance * 100.0;

        // Trade windows
        let vwap_window = window(&trades, now, w.vwap_secs);
        f.trade_count = vwap_window.len();
        f.vwap = or_default(calc::vwap(vwap_window), market.current_price, "vwap");
        f.price_vs_vwap = calc::price_vs_vwap(f.current_price, f.vwap);

        let velocity_window = window(&trades, now, w.velocity_secs);
        f.raw_velocity = calc::trade_rate(velocity_window.len(), w.velocity_secs);
        self.velocity_ema = calc::ema(self.velocity_ema, f.raw_velocity, w.velocity_ema_alpha);
        f.velocity = self.velocity_ema;

        f.buy_pressure = or_default(
            calc::buy_pressure(window(&trades, now, w.buy_pressure_secs)),
            0.5,
            "buy_pressure",
        );
        f.volatility_bps = or_default(
            calc::volatility_bps(
                window(&trades, now, w.volatility_secs),
                w.volatility_min_trades,
            ),
            0.0,
            "volatility_bps",
        );

        if f.current_price > 0.0 && self.reference_price.is_none() {
            self.reference_price = Some(f.current_price);
        }
        if let Some(reference) = self.reference_price {
            (f.price_change, f.price_change_pct) = calc::price_change(reference, f.current_price);
        }

        f
    }

    fn sample_history(&self, f: &Features) {
        let now = f.timestamp;
        if f.current_price > 0.0 {
            let vwap = if f.vwap > 0.0 { f.vwap } else { f.current_price };
            self.store.add_price_point(PricePoint {
                timestamp: now,
                price: f.current_price,
                vwap,
            });
        }

        let interval = Duration::milliseconds(self.windows.sample_interval_ms as i64);
        let due = |last: Option<DateTime<Utc>>| last.map_or(true, |t| now - t >= interval);

        if f.spread_bps > 0.0 && due(self.store.last_spread_sample()) {
            self.store.add_spread_point(SeriesPoint::new(now, f.spread_bps));
        }
        if due(self.store.last_volatility_sample()) {
            self.store
                .add_volatility_point(SeriesPoint::new(now, f.volatility_bps));
        }
        if due(self.store.last_velocity_sample()) {
            self.store.add_velocity_point(SeriesPoint::new(now, f.velocity));
        }
    }

    // =========================================================================
    // CHART SERIES
    // =========================================================================

    pub fn price_chart_at(&self, now: DateTime<Utc>) -> Vec<PricePoint> {
        self.store
            .price_history_since(window_start(now, self.windows.price_chart_secs))
    }

    pub fn spread_chart_at(&self, now: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.store
            .spread_history_since(window_start(now, self.windows.spread_chart_secs))
    }

    pub fn volatility_chart_at(&self, now: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.store
            .volatility_history_since(window_start(now, self.windows.volatility_chart_secs))
    }

    pub fn velocity_chart_at(&self, now: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.store
            .velocity_history_since(window_start(now, self.windows.velocity_chart_secs))
    }
}

/// Oldest timestamp a window covers; saturates for oversized windows.
fn window_start(now: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    i64::try_from(window_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Suffix of `trades` stamped within the last `window_secs`.
fn window(trades: &[Trade], now: DateTime<Utc>, window_secs: u64) -> &[Trade] {
    let cutoff = window_start(now, window_secs);
    let start = trades.partition_point(|t| t.timestamp < cutoff);
    &trades[start..]
}

fn or_default(result: Result<f64, ComputationError>, default: f64, field: &'static str) -> f64 {
    match result {
        Ok(v) => v,
        Err(e) => {
            trace!(field, error = %e, "feature fallback");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DepthSnapshot;

    fn engine() -> (FeatureEngine, Arc<StateStore>) {
        let store = Arc::new(StateStore::default());
        (
            FeatureEngine::new(store.clone(), WindowConfig::default()),
            store,
        )
    }

    #[test]
    fn empty_store_yields_defaults() {
        let (mut engine, _) = engine();
        let f = engine.compute_at(Utc::now());
        assert_eq!(f.current_price, 0.0);
        assert_eq!(f.spread_bps, 0.0);
        assert_eq!(f.imbalance, 0.0);
        assert_eq!(f.vwap, 0.0);
        assert_eq!(f.buy_pressure, 0.5);
        assert_eq!(f.volatility_bps, 0.0);
        assert_eq!(f.velocity, 0.0);
    }

    #[test]
    fn vwap_falls_back_to_latest_price() {
        let (mut engine, store) = engine();
        let now = Utc::now();
        store.add_trade(Trade::new(now - Duration::seconds(120), 250.0, 1.0, false, 1));

        let f = engine.compute_at(now);
        assert_eq!(f.trade_count, 0);
        assert_eq!(f.vwap, 250.0);
        assert_eq!(f.price_vs_vwap, 0.0);
    }

    #[test]
    fn velocity_is_smoothed_across_calls() {
        let (mut engine, store) = engine();
        let now = Utc::now();
        for i in 0..6 {
            store.add_trade(Trade::new(
                now - Duration::milliseconds(500 * (5 - i)),
                100.0,
                1.0,
                false,
                i as u64,
            ));
        }

        let first = engine.compute_at(now);
        assert_eq!(first.raw_velocity, 2.0);
        assert!((first.velocity - 0.6).abs() < 1e-12);

        let second = engine.compute_at(now);
        assert!((second.velocity - (0.3 * 2.0 + 0.7 * 0.6)).abs() < 1e-12);
    }

    #[test]
    fn price_change_tracks_first_observed_price() {
        let (mut engine, store) = engine();
        let now = Utc::now();
        store.add_trade(Trade::new(now, 100.0, 1.0, false, 1));
        engine.compute_at(now);

        store.add_trade(Trade::new(now, 102.0, 1.0, false, 2));
        let f = engine.compute_at(now);
        assert_eq!(f.price_change, 2.0);
        assert!((f.price_change_pct - 2.0).abs() < 1e-12);
    }

    #[test]
    fn series_sampling_is_throttled() {
        let (mut engine, store) = engine();
        let now = Utc::now();
        store.add_trade(Trade::new(now, 100.0, 1.0, false, 1));
        store.add_depth(DepthSnapshot::top_of_book(now, 99.0, 1.0, 101.0, 1.0));

        engine.compute_at(now);
        engine.compute_at(now + Duration::milliseconds(400));
        engine.compute_at(now + Duration::milliseconds(1_000));

        let sizes = store.buffer_sizes();
        assert_eq!(sizes.price_history, 3);
        assert_eq!(sizes.spread_history, 2);
        assert_eq!(sizes.volatility_history, 2);
        assert_eq!(sizes.velocity_history, 2);
    }

    #[test]
    fn velocity_chart_has_its_own_window() {
        let store = Arc::new(StateStore::default());
        let now = Utc::now();
        store.add_velocity_point(SeriesPoint::new(now - Duration::seconds(150), 4.0));
        store.add_velocity_point(SeriesPoint::new(now - Duration::seconds(60), 6.0));

        let windows = WindowConfig {
            price_chart_secs: 30,
            ..WindowConfig::default()
        };
        let engine = FeatureEngine::new(Arc::clone(&store), windows);
        let chart = engine.velocity_chart_at(now);
        assert_eq!(chart.len(), 1);
        assert_eq!(chart[0].value, 6.0);

        let unbounded = WindowConfig {
            velocity_chart_secs: u64::MAX,
            ..WindowConfig::default()
        };
        let engine = FeatureEngine::new(store, unbounded);
        assert_eq!(engine.velocity_chart_at(now).len(), 2);
    }

    #[test]
    fn feature_keys_resolve_by_name() {
        let mut f = Features::empty(Utc::now());
        f.spread_bps = 7.5;
        f.velocity_baseline = 12.0;
        assert_eq!(f.value_of("spread_bps"), Some(7.5));
        assert_eq!(f.value_of("baseline"), Some(12.0));
        assert_eq!(f.value_of("nope"), None);
        for key in FeatureKey::ALL {
            assert_eq!(FeatureKey::from_name(key.name()), Some(key));
        }
    }
}
