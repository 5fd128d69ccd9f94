//! Pure feature calculations
//!
//! Book-derived values return plain `f64` with zero for one-sided input.
//! Trade-window statistics return `Result` so the engine can substitute the
//! field default when the window is too thin.

use statrs::statistics::Statistics;

use crate::error::ComputationError;
use crate::models::Trade;

pub fn mid_price(bid: f64, ask: f64) -> f64 {
    if bid <= 0.0 || ask <= 0.0 {
        return 0.0;
    }
    (bid + ask) / 2.0
}

pub fn spread(bid: f64, ask: f64) -> f64 {
    if bid <= 0.0 || ask <= 0.0 {
        return 0.0;
    }
    (ask - bid).max(0.0)
}

pub fn spread_bps(bid: f64, ask: f64) -> f64 {
    let mid = mid_price(bid, ask);
    if mid <= 0.0 {
        return 0.0;
    }
    spread(bid, ask) / mid * 10_000.0
}

/// (bid - ask) / (bid + ask), in [-1, 1]; 0 with no volume.
pub fn imbalance(bid_volume: f64, ask_volume: f64) -> f64 {
    let bid = bid_volume.max(0.0);
    let ask = ask_volume.max(0.0);
    let total = bid + ask;
    if total <= 0.0 {
        return 0.0;
    }
    ((bid - ask) / total).clamp(-1.0, 1.0)
}

/// Volume-weighted average price.
///
/// Accumulated as deviations from the first price, so a window of equal
/// prices yields that price exactly.
pub fn vwap(trades: &[Trade]) -> Result<f64, ComputationError> {
    let anchor = match trades.first() {
        Some(t) => t.price,
        None => {
            return Err(ComputationError::InsufficientData {
                needed: 1,
                available: 0,
            })
        }
    };
    let (weighted_dev, volume) = trades.iter().fold((0.0, 0.0), |(d, v), t| {
        (d + (t.price - anchor) * t.quantity, v + t.quantity)
    });

    if volume <= 0.0 {
        return Err(ComputationError::InsufficientData {
            needed: 1,
            available: trades.len(),
        });
    }
    let value = anchor + weighted_dev / volume;
    if !value.is_finite() {
        return Err(ComputationError::Degenerate("vwap"));
    }
    Ok(value)
}

/// Percent deviation of price from VWAP.
pub fn price_vs_vwap(price: f64, vwap: f64) -> f64 {
    if price <= 0.0 || vwap <= 0.0 {
        return 0.0;
    }
    (price - vwap) / vwap * 100.0
}

/// Trades per second over a window.
pub fn trade_rate(count: usize, window_secs: u64) -> f64 {
    if window_secs == 0 {
        return 0.0;
    }
    count as f64 / window_secs as f64
}

#[inline]
pub fn ema(previous: f64, sample: f64, alpha: f64) -> f64 {
    alpha * sample + (1.0 - alpha) * previous
}

/// Share of volume where the taker bought (buyer was not the maker).
pub fn buy_pressure(trades: &[Trade]) -> Result<f64, ComputationError> {
    let (buy, total) = trades.iter().fold((0.0, 0.0), |(b, t), trade| {
        let buy = if trade.is_buyer_maker { 0.0 } else { trade.quantity };
        (b + buy, t + trade.quantity)
    });

    if total <= 0.0 {
        return Err(ComputationError::InsufficientData {
            needed: 1,
            available: trades.len(),
        });
    }
    Ok(buy / total)
}

/// Population standard deviation of consecutive simple returns, in bps.
pub fn volatility_bps(trades: &[Trade], min_trades: usize) -> Result<f64, ComputationError> {
    if trades.len() < min_trades.max(2) {
        return Err(ComputationError::InsufficientData {
            needed: min_trades.max(2),
            available: trades.len(),
        });
    }

    let returns: Vec<f64> = trades
        .windows(2)
        .filter(|w| w[0].price > 0.0)
        .map(|w| (w[1].price - w[0].price) / w[0].price)
        .collect();

    if returns.len() < 2 {
        return Err(ComputationError::InsufficientData {
            needed: 2,
            available: returns.len(),
        });
    }

    let std = returns.iter().population_std_dev();
    if !std.is_finite() {
        return Err(ComputationError::Degenerate("volatility"));
    }
    Ok(std * 10_000.0)
}

/// Absolute and percent change from a reference price.
pub fn price_change(reference: f64, current: f64) -> (f64, f64) {
    if reference <= 0.0 || current <= 0.0 {
        return (0.0, 0.0);
    }
    let change = current - reference;
    (change, change / reference * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn trades(prices: &[f64], qty: f64) -> Vec<Trade> {
        let base = Utc::now();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Trade::new(base + Duration::milliseconds(i as i64), p, qty, i % 2 == 0, i as u64))
            .collect()
    }

    #[test]
    fn spread_is_zero_for_one_sided_book() {
        assert_eq!(spread_bps(0.0, 100.0), 0.0);
        assert_eq!(spread_bps(100.0, 0.0), 0.0);
        assert_eq!(mid_price(-1.0, 100.0), 0.0);
    }

    #[test]
    fn spread_bps_for_one_tick() {
        let bps = spread_bps(42000.0, 42001.0);
        assert!((bps - 0.238_092).abs() < 1e-5, "got {bps}");
    }

    #[test]
    fn imbalance_stays_in_range() {
        assert_eq!(imbalance(0.0, 0.0), 0.0);
        assert_eq!(imbalance(5.0, 0.0), 1.0);
        assert_eq!(imbalance(0.0, 5.0), -1.0);
        assert_eq!(imbalance(1.0, 1.0), 0.0);
        for (b, a) in [(0.3, 7.1), (1e9, 1e-9), (2.5, 2.4)] {
            let v = imbalance(b, a);
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn vwap_of_identical_trades_is_exact() {
        let t = trades(&[42001.37; 25], 0.013);
        assert_eq!(vwap(&t).unwrap(), 42001.37);
    }

    #[test]
    fn vwap_weights_by_quantity() {
        let base = Utc::now();
        let t = vec![
            Trade::new(base, 100.0, 1.0, false, 1),
            Trade::new(base, 200.0, 3.0, false, 2),
        ];
        assert_eq!(vwap(&t).unwrap(), 175.0);
        assert!(vwap(&[]).is_err());
    }

    #[test]
    fn buy_pressure_uses_taker_side() {
        let base = Utc::now();
        let t = vec![
            Trade::new(base, 100.0, 3.0, false, 1), // taker bought
            Trade::new(base, 100.0, 1.0, true, 2),  // taker sold
        ];
        assert_eq!(buy_pressure(&t).unwrap(), 0.75);
        assert!(buy_pressure(&[]).is_err());
    }

    #[test]
    fn volatility_requires_min_trades() {
        let t = trades(&[100.0, 101.0, 100.0], 1.0);
        assert!(volatility_bps(&t, 10).is_err());
        assert!(volatility_bps(&t, 3).is_ok());
    }

    #[test]
    fn volatility_of_flat_prices_is_zero() {
        let t = trades(&[100.0; 12], 1.0);
        assert_eq!(volatility_bps(&t, 10).unwrap(), 0.0);
    }

    #[test]
    fn volatility_matches_population_std() {
        // returns: +1%, -1%, +1%, -1% (approximately)
        let t = trades(&[100.0, 101.0, 99.99, 100.9899, 99.98], 1.0);
        let v = volatility_bps(&t, 2).unwrap();
        assert!((v - 100.0).abs() < 0.5, "got {v}");
    }

    #[test]
    fn ema_blends_with_alpha() {
        assert_eq!(ema(0.0, 10.0, 0.3), 3.0);
        assert!((ema(3.0, 10.0, 0.3) - 5.1).abs() < 1e-12);
    }

    #[test]
    fn price_change_relative_to_reference() {
        assert_eq!(price_change(100.0, 101.0), (1.0, 1.0));
        assert_eq!(price_change(0.0, 101.0), (0.0, 0.0));
    }
}
