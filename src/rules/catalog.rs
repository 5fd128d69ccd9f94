//! Fixed insight rule catalog
//!
//! Each rule selects one feature, compares it against an absolute threshold
//! or a multiple of the store-owned velocity baseline, and carries the
//! operator-facing texts. The `condition` string is documentation only.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::features::{FeatureKey, Features};

/// Insight priority; lower rank sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InsightPriority {
    High,
    Medium,
    Low,
}

impl InsightPriority {
    pub fn rank(&self) -> u8 {
        match self {
            InsightPriority::High => 1,
            InsightPriority::Medium => 2,
            InsightPriority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightPriority::High => "HIGH",
            InsightPriority::Medium => "MEDIUM",
            InsightPriority::Low => "LOW",
        }
    }
}

impl std::fmt::Display for InsightPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparator {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterThan => value > threshold,
            Comparator::GreaterOrEqual => value >= threshold,
            Comparator::LessThan => value < threshold,
            Comparator::LessOrEqual => value <= threshold,
            Comparator::Equal => value == threshold,
            Comparator::NotEqual => value != threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::GreaterThan => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::LessThan => "<",
            Comparator::LessOrEqual => "<=",
            Comparator::Equal => "==",
            Comparator::NotEqual => "!=",
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Comparator::GreaterThan),
            ">=" => Ok(Comparator::GreaterOrEqual),
            "<" => Ok(Comparator::LessThan),
            "<=" => Ok(Comparator::LessOrEqual),
            "==" => Ok(Comparator::Equal),
            "!=" => Ok(Comparator::NotEqual),
            other => Err(format!("unknown comparator '{other}'")),
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    Absolute(f64),
    /// Multiple of the velocity baseline; inactive while the baseline is 0.
    BaselineMultiple(f64),
}

impl Threshold {
    pub fn resolve(&self, features: &Features) -> Option<f64> {
        match *self {
            Threshold::Absolute(t) => Some(t),
            Threshold::BaselineMultiple(m) if features.velocity_baseline > 0.0 => {
                Some(features.velocity_baseline * m)
            }
            Threshold::BaselineMultiple(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: u32,
    pub name: String,
    pub feature: FeatureKey,
    pub comparator: Comparator,
    pub threshold: Threshold,
    /// Only fire for strictly positive feature values
    pub require_positive: bool,
    pub priority: InsightPriority,
    pub condition: String,
    pub template: String,
    pub action: String,
    pub how_to_overcome: String,
    pub expected_impact: String,
    pub enabled: bool,
}

impl RuleDefinition {
    /// `(value, threshold)` when the rule's condition holds.
    pub fn check(&self, features: &Features) -> Option<(f64, f64)> {
        let value = features.get(self.feature);
        let threshold = self.threshold.resolve(features)?;
        if self.require_positive && value <= 0.0 {
            return None;
        }
        self.comparator
            .apply(value, threshold)
            .then_some((value, threshold))
    }
}

struct Entry {
    id: u32,
    name: &'static str,
    feature: FeatureKey,
    comparator: Comparator,
    threshold: Threshold,
    require_positive: bool,
    priority: InsightPriority,
    template: &'static str,
    action: &'static str,
    how_to_overcome: &'static str,
    expected_impact: &'static str,
}

impl Entry {
    fn build(self) -> RuleDefinition {
        let threshold_text = match self.threshold {
            Threshold::Absolute(t) => format!("{t}"),
            Threshold::BaselineMultiple(m) => format!("{m} * baseline"),
        };
        let mut condition = format!(
            "{} {} {}",
            self.feature.name(),
            self.comparator.symbol(),
            threshold_text
        );
        if self.require_positive {
            condition.push_str(&format!(" and {} > 0", self.feature.name()));
        }

        RuleDefinition {
            id: self.id,
            name: self.name.to_string(),
            feature: self.feature,
            comparator: self.comparator,
            threshold: self.threshold,
            require_positive: self.require_positive,
            priority: self.priority,
            condition,
            template: self.template.to_string(),
            action: self.action.to_string(),
            how_to_overcome: self.how_to_overcome.to_string(),
            expected_impact: self.expected_impact.to_string(),
            enabled: true,
        }
    }
}

/// The ten built-in rules with thresholds taken from `t`.
pub fn default_rules(t: &Thresholds) -> Vec<RuleDefinition> {
    use Comparator::{GreaterThan, LessThan};
    use FeatureKey::{Imbalance, PriceVsVwap, SpreadBps, Velocity, VolatilityBps};
    use InsightPriority::{High, Low, Medium};

    vec![
        Entry {
            id: 1,
            name: "wide_spread",
            feature: SpreadBps,
            comparator: GreaterThan,
            threshold: Threshold::Absolute(t.spread_high_bps),
            require_positive: false,
            priority: High,
            template: "Spread widened to {spread_bps:.1f} bps, liquidity deteriorating",
            action: "Pause market orders; use limit orders only",
            how_to_overcome: "Set limit orders at mid-price; accept partial fills",
            expected_impact: "Save 6-8 bps per trade",
        },
        Entry {
            id: 2,
            name: "tight_spread",
            feature: SpreadBps,
            comparator: LessThan,
            threshold: Threshold::Absolute(t.spread_low_bps),
            require_positive: true,
            priority: Low,
            template: "Excellent liquidity: spread at {spread_bps:.1f} bps",
            action: "Optimal execution window; proceed with orders",
            how_to_overcome: "Prioritize larger orders now",
            expected_impact: "Best execution quality",
        },
        Entry {
            id: 3,
            name: "strong_sell_imbalance",
            feature: Imbalance,
            comparator: LessThan,
            threshold: Threshold::Absolute(t.imbalance_strong_sell),
            require_positive: false,
            priority: High,
            template: "Strong sell pressure at {imbalance_pct:.1f}%",
            action: "Tighten stop-loss if long; delay buys",
            how_to_overcome: "Set alerts for imbalance reversal",
            expected_impact: "Avoid 0.1-0.3% drawdown",
        },
        Entry {
            id: 4,
            name: "strong_buy_imbalance",
            feature: Imbalance,
            comparator: GreaterThan,
            threshold: Threshold::Absolute(t.imbalance_strong_buy),
            require_positive: false,
            priority: Medium,
            template: "Buy-side demand at {imbalance_pct:.1f}%",
            action: "Prices supported; delay sells",
            how_to_overcome: "Wait for imbalance weakening",
            expected_impact: "Improve sell price 0.05%",
        },
        Entry {
            id: 5,
            name: "high_volatility",
            feature: VolatilityBps,
            comparator: GreaterThan,
            threshold: Threshold::Absolute(t.volatility_high_bps),
            require_positive: false,
            priority: High,
            template: "High volatility at {volatility_bps:.1f} bps",
            action: "Reduce position size by 50%",
            how_to_overcome: "Scale down; wait for mean-reversion",
            expected_impact: "Reduce drawdown 40%",
        },
        Entry {
            id: 6,
            name: "low_volatility",
            feature: VolatilityBps,
            comparator: LessThan,
            threshold: Threshold::Absolute(t.volatility_low_bps),
            require_positive: true,
            priority: Low,
            template: "Low volatility at {volatility_bps:.1f} bps, range-bound market",
            action: "Good for mean-reversion strategies",
            how_to_overcome: "Tighter targets; frequent small trades",
            expected_impact: "Increase trade frequency",
        },
        Entry {
            id: 7,
            name: "velocity_spike",
            feature: Velocity,
            comparator: GreaterThan,
            threshold: Threshold::BaselineMultiple(t.velocity_spike_multiplier),
            require_positive: false,
            priority: High,
            template: "Velocity spike: {velocity:.1f}/s vs {baseline:.1f}/s baseline",
            action: "Prepare for volatility; increase monitoring",
            how_to_overcome: "Check news; tighten risk parameters",
            expected_impact: "10-30 second early warning",
        },
        Entry {
            id: 8,
            name: "thin_market",
            feature: Velocity,
            comparator: LessThan,
            threshold: Threshold::BaselineMultiple(t.velocity_thin_multiplier),
            require_positive: true,
            priority: Medium,
            template: "Thin market: {velocity:.1f}/s activity",
            action: "Expect slippage; reduce order sizes",
            how_to_overcome: "Split large orders into chunks",
            expected_impact: "Reduce market impact 50%",
        },
        Entry {
            id: 9,
            name: "price_above_vwap",
            feature: PriceVsVwap,
            comparator: GreaterThan,
            threshold: Threshold::Absolute(t.price_overbought_pct),
            require_positive: false,
            priority: Medium,
            template: "Price {price_vs_vwap:.2f}% above VWAP, overbought",
            action: "Wait for pullback if buying",
            how_to_overcome: "Set limit orders at VWAP level",
            expected_impact: "Reduce slippage 3-5 bps",
        },
        Entry {
            id: 10,
            name: "price_below_vwap",
            feature: PriceVsVwap,
            comparator: LessThan,
            threshold: Threshold::Absolute(t.price_oversold_pct),
            require_positive: false,
            priority: Medium,
            template: "Price {price_vs_vwap:.2f}% below VWAP, value zone",
            action: "Favorable entry vs average",
            how_to_overcome: "Use window for cost-averaging",
            expected_impact: "Improve entry 0.05-0.1%",
        },
    ]
    .into_iter()
    .map(Entry::build)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn features() -> Features {
        let mut f = Features::empty(Utc::now());
        f.velocity_baseline = 20.0;
        f
    }

    fn rule(id: u32) -> RuleDefinition {
        default_rules(&Thresholds::default())
            .into_iter()
            .find(|r| r.id == id)
            .unwrap()
    }

    #[test]
    fn catalog_has_ten_unique_rules() {
        let rules = default_rules(&Thresholds::default());
        assert_eq!(rules.len(), 10);
        let mut ids: Vec<u32> = rules.iter().map(|r| r.id).collect();
        ids.dedup();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert_eq!(rules[0].condition, "spread_bps > 6");
    }

    #[test]
    fn tight_spread_ignores_zero() {
        let r = rule(2);
        let mut f = features();
        assert_eq!(r.check(&f), None);
        f.spread_bps = 1.0;
        assert_eq!(r.check(&f), Some((1.0, 2.0)));
    }

    #[test]
    fn velocity_rules_scale_with_baseline() {
        let spike = rule(7);
        let thin = rule(8);
        let mut f = features();

        f.velocity = 41.0;
        assert_eq!(spike.check(&f), Some((41.0, 40.0)));

        f.velocity = 9.0;
        assert_eq!(thin.check(&f), Some((9.0, 10.0)));

        f.velocity_baseline = 0.0;
        assert_eq!(thin.check(&f), None);
        f.velocity = 100.0;
        assert_eq!(spike.check(&f), None);
    }

    #[test]
    fn priority_orders_high_first() {
        assert!(InsightPriority::High < InsightPriority::Medium);
        assert!(InsightPriority::Medium < InsightPriority::Low);
        assert_eq!(InsightPriority::Low.rank(), 3);
    }

    #[test]
    fn comparator_parses_symbols() {
        for c in [
            Comparator::GreaterThan,
            Comparator::GreaterOrEqual,
            Comparator::LessThan,
            Comparator::LessOrEqual,
            Comparator::Equal,
            Comparator::NotEqual,
        ] {
            assert_eq!(c.symbol().parse::<Comparator>(), Ok(c));
        }
        assert!("=~".parse::<Comparator>().is_err());
    }
}
