//! Seeded synthetic market
//!
//! Produces a plausible BTC/USDT-like trade and depth stream without a
//! network connection. Price follows Gaussian steps with a trend bias,
//! short-term momentum and weak mean reversion toward the start price;
//! sizes are Pareto distributed. Same seed, same stream.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Normal, Pareto};
use statrs::StatsError;

use crate::models::{BookLevel, DepthSnapshot, Trade};
use crate::store::StateStore;

pub const DEFAULT_BASE_PRICE: f64 = 87_500.0;

const FIRST_TRADE_ID: u64 = 1_000_000;
const BOOK_LEVELS: usize = 10;
const MAX_TRADE_QTY: f64 = 5.0;
const MAX_LEVEL_QTY: f64 = 10.0;
/// One depth snapshot per this many trades in `tick`/`seed_store`.
const TRADES_PER_DEPTH: u64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    #[default]
    Normal,
    Bullish,
    Bearish,
    Volatile,
    Ranging,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioParams {
    /// Per-step standard deviation as a fraction of price
    pub volatility: f64,
    /// Per-step drift as a fraction of price
    pub trend: f64,
    pub spread_mult: f64,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Normal,
        Scenario::Bullish,
        Scenario::Bearish,
        Scenario::Volatile,
        Scenario::Ranging,
    ];

    pub fn params(&self) -> ScenarioParams {
        let (volatility, trend, spread_mult) = match self {
            Scenario::Normal => (0.0002, 0.0, 1.0),
            Scenario::Bullish => (0.0003, 0.000_05, 0.8),
            Scenario::Bearish => (0.0003, -0.000_05, 0.8),
            Scenario::Volatile => (0.0008, 0.0, 1.5),
            Scenario::Ranging => (0.0001, 0.0, 0.6),
        };
        ScenarioParams {
            volatility,
            trend,
            spread_mult,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Normal => "normal",
            Scenario::Bullish => "bullish",
            Scenario::Bearish => "bearish",
            Scenario::Volatile => "volatile",
            Scenario::Ranging => "ranging",
        }
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Scenario::ALL
            .into_iter()
            .find(|sc| sc.as_str() == s)
            .ok_or_else(|| format!("unknown scenario '{s}'"))
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SyntheticMarket {
    rng: ChaCha8Rng,
    scenario: Scenario,
    params: ScenarioParams,
    base_price: f64,
    price: f64,
    momentum: f64,
    next_trade_id: u64,
    gauss: Normal,
    trade_size: Pareto,
    level_size: Pareto,
}

impl SyntheticMarket {
    pub fn new(seed: u64, scenario: Scenario) -> Result<Self, StatsError> {
        Self::with_base_price(seed, scenario, DEFAULT_BASE_PRICE)
    }

    pub fn with_base_price(
        seed: u64,
        scenario: Scenario,
        base_price: f64,
    ) -> Result<Self, StatsError> {
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            scenario,
            params: scenario.params(),
            base_price,
            price: base_price,
            momentum: 0.0,
            next_trade_id: FIRST_TRADE_ID,
            gauss: Normal::new(0.0, 1.0)?,
            trade_size: Pareto::new(1.0, 2.5)?,
            level_size: Pareto::new(1.0, 1.5)?,
        })
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Switch regime; the price path continues from where it is.
    pub fn set_scenario(&mut self, scenario: Scenario) {
        self.scenario = scenario;
        self.params = scenario.params();
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    fn step_price(&mut self) {
        let random_walk = self.gauss.sample(&mut self.rng) * self.params.volatility * self.price;
        let trend = self.params.trend * self.price;
        self.momentum = 0.7 * self.momentum + 0.3 * random_walk;
        let reversion = (self.base_price - self.price) * 1e-5;

        let next = self.price + random_walk + trend + self.momentum * 0.3 + reversion;
        self.price = next.max(self.base_price * 0.5);
    }

    pub fn next_trade(&mut self, now: DateTime<Utc>) -> Trade {
        self.step_price();

        let quantity = round_to((self.trade_size.sample(&mut self.rng) * 0.001).min(MAX_TRADE_QTY), 5);
        let buy_probability = 0.5 + self.params.trend * 100.0;
        let is_buyer_maker = self.rng.gen::<f64>() > buy_probability;

        let trade = Trade::new(
            now,
            round_to(self.price, 2),
            quantity,
            is_buyer_maker,
            self.next_trade_id,
        );
        self.next_trade_id += 1;
        trade
    }

    /// Ten-level book centred on the current price.
    pub fn next_depth(&mut self, now: DateTime<Utc>) -> DepthSnapshot {
        let base_spread = self.price * 1e-4 * self.params.spread_mult;
        let best_bid = self.price - base_spread / 2.0;
        let best_ask = self.price + base_spread / 2.0;

        let mut bids = Vec::with_capacity(BOOK_LEVELS);
        let mut asks = Vec::with_capacity(BOOK_LEVELS);
        bids.push(BookLevel::new(round_to(best_bid, 2), self.level_qty(0)));
        asks.push(BookLevel::new(round_to(best_ask, 2), self.level_qty(0)));

        let (mut drop, mut rise) = (0.0, 0.0);
        for i in 1..BOOK_LEVELS {
            drop += self.level_step(base_spread, i);
            bids.push(BookLevel::new(round_to(best_bid - drop, 2), self.level_qty(i)));
            rise += self.level_step(base_spread, i);
            asks.push(BookLevel::new(round_to(best_ask + rise, 2), self.level_qty(i)));
        }

        DepthSnapshot::from_levels(now, bids, asks)
    }

    fn level_step(&mut self, base_spread: f64, level: usize) -> f64 {
        base_spread * (0.5 + self.rng.gen_range(0.2..0.8)) * (1.0 + level as f64 * 0.1)
    }

    fn level_qty(&mut self, level: usize) -> f64 {
        let raw = self.level_size.sample(&mut self.rng) * 0.5 * (1.0 + level as f64 * 0.2);
        round_to(raw.min(MAX_LEVEL_QTY), 4)
    }

    /// Push one trade, plus a book every few trades.
    pub fn tick(&mut self, store: &StateStore, now: DateTime<Utc>) {
        let trade = self.next_trade(now);
        store.add_trade(trade);
        if trade.trade_id % TRADES_PER_DEPTH == 0 {
            store.add_depth(self.next_depth(now));
        }
    }

    /// Back-fill `count` trades spaced ~100 ms apart, ending at `now`.
    pub fn seed_store(&mut self, store: &StateStore, now: DateTime<Utc>, count: usize) {
        let start = now - Duration::milliseconds(count as i64 * 100);
        for i in 0..count {
            let jitter = self.rng.gen_range(0..50);
            let ts = (start + Duration::milliseconds(i as i64 * 100 + jitter)).min(now);
            self.tick(store, ts);
        }
        store.add_depth(self.next_depth(now));
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
