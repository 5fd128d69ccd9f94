//! Market data models shared by the feed, store and feature stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single executed trade. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
    /// Buyer was the resting order, i.e. the taker sold.
    pub is_buyer_maker: bool,
    pub trade_id: u64,
}

impl Trade {
    pub fn new(
        timestamp: DateTime<Utc>,
        price: f64,
        quantity: f64,
        is_buyer_maker: bool,
        trade_id: u64,
    ) -> Self {
        Self {
            timestamp,
            price,
            quantity,
            is_buyer_maker,
            trade_id,
        }
    }

    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// One price level of an order book side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

impl BookLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Top-of-book depth snapshot.
///
/// Bids are ordered best (highest) first, asks best (lowest) first.
/// `best_bid`/`best_ask` are the first level of each side, 0.0 when the
/// side is empty. Volumes are the summed quantity across all levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
}

impl DepthSnapshot {
    pub fn from_levels(
        timestamp: DateTime<Utc>,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
    ) -> Self {
        let best_bid = bids.first().map(|l| l.price).unwrap_or(0.0);
        let best_ask = asks.first().map(|l| l.price).unwrap_or(0.0);
        let bid_volume = bids.iter().map(|l| l.quantity).sum();
        let ask_volume = asks.iter().map(|l| l.quantity).sum();

        Self {
            timestamp,
            bids,
            asks,
            best_bid,
            best_ask,
            bid_volume,
            ask_volume,
        }
    }

    /// Single-level book, mostly for tests and synthetic data.
    pub fn top_of_book(
        timestamp: DateTime<Utc>,
        bid: f64,
        bid_qty: f64,
        ask: f64,
        ask_qty: f64,
    ) -> Self {
        Self::from_levels(
            timestamp,
            vec![BookLevel::new(bid, bid_qty)],
            vec![BookLevel::new(ask, ask_qty)],
        )
    }
}

/// Price + VWAP sample for charting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub vwap: f64,
}

/// Timestamped scalar (spread_bps, volatility_bps, velocity)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Connection status reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
