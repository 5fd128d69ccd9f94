//! Runtime configuration
//!
//! Every tunable lives here: buffer capacities, trailing windows, rule
//! thresholds, reconnect policy and notification settings. All structs
//! carry production defaults; `AppConfig::from_env` overlays `TICKPULSE_*`
//! environment variables (after loading `.env`).

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::synthetic::Scenario;

// =============================================================================
// FEED
// =============================================================================

/// Combined trade + depth stream for a single symbol.
pub const DEFAULT_FEED_URL: &str =
    "wss://stream.binance.com:9443/stream?streams=btcusdt@trade/btcusdt@depth10@100ms";

/// Connection and reconnect policy for the feed connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,

    // Backoff parameters
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    /// ±fraction of the computed delay; 0.0 keeps the delay exact.
    pub jitter_factor: f64,
    /// Consecutive failures after which status is reported as `Disconnected`.
    pub max_consecutive_failures: u32,

    // Timeouts
    pub connect_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            max_consecutive_failures: 3,
            connect_timeout_ms: 10_000,
            heartbeat_timeout_ms: 5_000,
            ping_interval_ms: 20_000,
            stop_timeout_ms: 5_000,
        }
    }
}

impl FeedConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Capacities of the bounded buffers held by the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    pub trades: usize,
    pub depth: usize,
    pub price_history: usize,
    pub spread_history: usize,
    pub volatility_history: usize,
    pub velocity_history: usize,
    /// Velocity samples averaged into the rolling baseline.
    pub baseline_samples: usize,
    /// Samples required before the baseline replaces the default.
    pub baseline_min_samples: usize,
    pub default_velocity_baseline: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            trades: 1000,
            depth: 100,
            price_history: 200,
            spread_history: 100,
            volatility_history: 200,
            velocity_history: 100,
            baseline_samples: 60,
            baseline_min_samples: 10,
            default_velocity_baseline: 20.0,
        }
    }
}

// =============================================================================
// FEATURE WINDOWS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub vwap_secs: u64,
    pub velocity_secs: u64,
    pub volatility_secs: u64,
    pub buy_pressure_secs: u64,
    pub volatility_min_trades: usize,
    pub velocity_ema_alpha: f64,
    /// Minimum spacing between derived chart samples.
    pub sample_interval_ms: u64,
    pub price_chart_secs: u64,
    pub spread_chart_secs: u64,
    pub volatility_chart_secs: u64,
    pub velocity_chart_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            vwap_secs: 30,
            velocity_secs: 3,
            volatility_secs: 60,
            buy_pressure_secs: 30,
            volatility_min_trades: 10,
            velocity_ema_alpha: 0.3,
            sample_interval_ms: 1_000,
            price_chart_secs: 120,
            spread_chart_secs: 60,
            volatility_chart_secs: 180,
            velocity_chart_secs: 120,
        }
    }
}

// =============================================================================
// RULE THRESHOLDS
// =============================================================================

/// Thresholds used by the fixed rule catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub spread_high_bps: f64,
    pub spread_low_bps: f64,
    pub imbalance_strong_sell: f64,
    pub imbalance_strong_buy: f64,
    pub volatility_high_bps: f64,
    pub volatility_low_bps: f64,
    /// Multipliers applied to the store-owned velocity baseline.
    pub velocity_spike_multiplier: f64,
    pub velocity_thin_multiplier: f64,
    /// Percent deviation of price from VWAP.
    pub price_overbought_pct: f64,
    pub price_oversold_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            spread_high_bps: 6.0,
            spread_low_bps: 2.0,
            imbalance_strong_sell: -0.5,
            imbalance_strong_buy: 0.5,
            volatility_high_bps: 20.0,
            volatility_low_bps: 10.0,
            velocity_spike_multiplier: 2.0,
            velocity_thin_multiplier: 0.5,
            price_overbought_pct: 0.1,
            price_oversold_pct: -0.1,
        }
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightConfig {
    pub max_insights: usize,
    pub ttl_secs: u64,
    pub rule_cooldown_secs: u64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            max_insights: 3,
            ttl_secs: 30,
            rule_cooldown_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub max_display_alerts: usize,
    pub max_history: usize,
    pub default_cooldown_secs: u64,
    pub active_ttl_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_display_alerts: 5,
            max_history: 500,
            default_cooldown_secs: 30,
            active_ttl_secs: 60,
        }
    }
}

// =============================================================================
// APPLICATION
// =============================================================================

/// Where market events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    Live,
    Synthetic,
}

impl FromStr for FeedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" | "ws" => Ok(Self::Live),
            "synthetic" | "demo" => Ok(Self::Synthetic),
            other => Err(format!("unknown feed mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub buffers: BufferConfig,
    pub windows: WindowConfig,
    pub thresholds: Thresholds,
    pub insights: InsightConfig,
    pub alerts: AlertConfig,
    pub eval_interval_ms: u64,
    pub feed_mode: FeedMode,
    pub synthetic_seed: u64,
    pub synthetic_scenario: Scenario,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            buffers: BufferConfig::default(),
            windows: WindowConfig::default(),
            thresholds: Thresholds::default(),
            insights: InsightConfig::default(),
            alerts: AlertConfig::default(),
            eval_interval_ms: 500,
            feed_mode: FeedMode::Live,
            synthetic_seed: 42,
            synthetic_scenario: Scenario::Normal,
        }
    }
}

impl AppConfig {
    /// Load from environment with defaults
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(v) = std::env::var("TICKPULSE_FEED_URL") {
            if !v.trim().is_empty() {
                config.feed.url = v;
            }
        }
        override_from_env("TICKPULSE_BACKOFF_BASE_MS", &mut config.feed.backoff_base_ms);
        override_from_env("TICKPULSE_BACKOFF_MAX_MS", &mut config.feed.backoff_max_ms);
        override_from_env(
            "TICKPULSE_MAX_FAILURES",
            &mut config.feed.max_consecutive_failures,
        );
        override_from_env(
            "TICKPULSE_HEARTBEAT_TIMEOUT_MS",
            &mut config.feed.heartbeat_timeout_ms,
        );
        override_from_env("TICKPULSE_EVAL_INTERVAL_MS", &mut config.eval_interval_ms);
        override_from_env("TICKPULSE_FEED_MODE", &mut config.feed_mode);
        override_from_env("TICKPULSE_SYNTHETIC_SEED", &mut config.synthetic_seed);
        override_from_env(
            "TICKPULSE_SYNTHETIC_SCENARIO",
            &mut config.synthetic_scenario,
        );

        config
    }

    pub fn eval_interval(&self) -> Duration {
        Duration::from_millis(self.eval_interval_ms.max(1))
    }
}

fn override_from_env<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => warn!(key, value = %raw, "ignoring unparsable config override"),
        }
    }
}
