//! Alert data types and the default alert catalog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::{FeatureKey, Features};
use crate::rules::Comparator;
use crate::store::Timestamped;

/// Alert priority; lower rank sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl AlertPriority {
    pub fn rank(&self) -> u8 {
        match self {
            AlertPriority::Critical => 0,
            AlertPriority::High => 1,
            AlertPriority::Medium => 2,
            AlertPriority::Low => 3,
            AlertPriority::Info => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Critical => "critical",
            AlertPriority::High => "high",
            AlertPriority::Medium => "medium",
            AlertPriority::Low => "low",
            AlertPriority::Info => "info",
        }
    }
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PriceThreshold,
    SpreadThreshold,
    VolatilityThreshold,
    ImbalanceThreshold,
    VelocityThreshold,
    PriceChange,
    MlSignal,
    RegimeChange,
    Custom,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::PriceThreshold => "price_threshold",
            AlertType::SpreadThreshold => "spread_threshold",
            AlertType::VolatilityThreshold => "volatility_threshold",
            AlertType::ImbalanceThreshold => "imbalance_threshold",
            AlertType::VelocityThreshold => "velocity_threshold",
            AlertType::PriceChange => "price_change",
            AlertType::MlSignal => "ml_signal",
            AlertType::RegimeChange => "regime_change",
            AlertType::Custom => "custom",
        }
    }

    /// Value this type of rule watches when no explicit feature is set.
    ///
    /// Signal-driven types return `None`; they read the prediction signal.
    pub fn default_value(&self, features: &Features) -> Option<f64> {
        match self {
            AlertType::PriceThreshold => Some(if features.current_price > 0.0 {
                features.current_price
            } else {
                features.mid_price
            }),
            AlertType::SpreadThreshold => Some(features.spread_bps),
            AlertType::VolatilityThreshold => Some(features.volatility_bps),
            AlertType::ImbalanceThreshold => Some(features.imbalance),
            AlertType::VelocityThreshold => Some(features.velocity),
            AlertType::PriceChange => Some(features.price_change_pct.abs()),
            AlertType::MlSignal | AlertType::RegimeChange | AlertType::Custom => None,
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of an external direction-prediction module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSignal {
    /// Suggested action, e.g. "BUY"
    pub action: String,
    /// Confidence, 0-100
    pub strength: f64,
    pub regime: String,
}

/// A user-configurable alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub alert_type: AlertType,
    /// Overrides the value the alert type would watch. Required for `Custom`.
    pub feature: Option<FeatureKey>,
    pub condition: String,
    pub comparator: Comparator,
    pub threshold: f64,
    pub priority: AlertPriority,
    pub message_template: String,
    pub enabled: bool,
    pub cooldown_secs: u64,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        alert_type: AlertType,
        comparator: Comparator,
        threshold: f64,
        priority: AlertPriority,
        message_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            alert_type,
            feature: None,
            condition: String::new(),
            comparator,
            threshold,
            priority,
            message_template: message_template.into(),
            enabled: true,
            cooldown_secs: 30,
            created_at: Utc::now(),
        }
    }

    pub fn with_feature(mut self, feature: FeatureKey) -> Self {
        self.feature = Some(feature);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_secs = seconds;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns the triggering value when the rule fires.
    pub fn check(
        &self,
        features: &Features,
        signal: Option<&PredictionSignal>,
        previous_regime: Option<&str>,
    ) -> Option<f64> {
        if let Some(key) = self.feature {
            let value = features.get(key);
            return self.comparator.apply(value, self.threshold).then_some(value);
        }

        match self.alert_type {
            AlertType::RegimeChange => {
                let (signal, previous) = (signal?, previous_regime?);
                (!signal.regime.is_empty() && signal.regime != previous).then_some(0.0)
            }
            AlertType::MlSignal => {
                let value = signal?.strength;
                self.comparator.apply(value, self.threshold).then_some(value)
            }
            other => {
                let value = other.default_value(features)?;
                self.comparator.apply(value, self.threshold).then_some(value)
            }
        }
    }
}

/// One triggered alert instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub priority: AlertPriority,
    pub alert_type: AlertType,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Timestamped for Alert {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Filters for history queries; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub priority: Option<AlertPriority>,
    pub alert_type: Option<AlertType>,
    pub acknowledged: Option<bool>,
}

impl HistoryFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.priority.map_or(true, |p| alert.priority == p)
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
            && self.acknowledged.map_or(true, |a| alert.acknowledged == a)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStats {
    pub total_alerts: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub info_count: usize,
    pub alerts_per_minute: f64,
    pub most_common_type: Option<AlertType>,
    pub last_alert_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSummary {
    pub id: String,
    pub name: String,
    pub alert_type: AlertType,
    pub threshold: f64,
    pub priority: AlertPriority,
    pub enabled: bool,
    pub cooldown_secs: u64,
}

impl From<&AlertRule> for RuleSummary {
    fn from(rule: &AlertRule) -> Self {
        Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            alert_type: rule.alert_type,
            threshold: rule.threshold,
            priority: rule.priority,
            enabled: rule.enabled,
            cooldown_secs: rule.cooldown_secs,
        }
    }
}

/// Built-in alert catalog.
pub fn default_alert_rules(default_cooldown_secs: u64) -> Vec<AlertRule> {
    use AlertPriority::*;
    use Comparator::*;
    let cooldown = default_cooldown_secs;

    vec![
        AlertRule::new(
            "price_high",
            "Price Above Threshold",
            AlertType::PriceThreshold,
            GreaterThan,
            100_000.0,
            High,
            "Price reached ${value:,.2f} (above ${threshold:,.2f})",
        )
        .with_condition("price > threshold")
        .with_cooldown(cooldown)
        .disabled(),
        AlertRule::new(
            "price_low",
            "Price Below Threshold",
            AlertType::PriceThreshold,
            LessThan,
            80_000.0,
            High,
            "Price dropped to ${value:,.2f} (below ${threshold:,.2f})",
        )
        .with_condition("price < threshold")
        .with_cooldown(cooldown)
        .disabled(),
        AlertRule::new(
            "spread_wide",
            "Spread Widening",
            AlertType::SpreadThreshold,
            GreaterThan,
            5.0,
            Medium,
            "Spread widened to {value:.2f} bps (threshold: {threshold:.1f} bps)",
        )
        .with_condition("spread_bps > threshold")
        .with_cooldown(cooldown),
        AlertRule::new(
            "volatility_spike",
            "Volatility Spike",
            AlertType::VolatilityThreshold,
            GreaterThan,
            25.0,
            High,
            "Volatility spiked to {value:.1f} bps, high risk regime",
        )
        .with_condition("volatility_bps > threshold")
        .with_cooldown(cooldown),
        AlertRule::new(
            "volatility_low",
            "Low Volatility",
            AlertType::VolatilityThreshold,
            LessThan,
            8.0,
            Low,
            "Low volatility at {value:.1f} bps, range-bound market",
        )
        .with_condition("volatility_bps < threshold")
        .with_cooldown(cooldown),
        AlertRule::new(
            "strong_buy_pressure",
            "Strong Buy Pressure",
            AlertType::ImbalanceThreshold,
            GreaterThan,
            0.6,
            Medium,
            "Strong buying pressure: {value:.1%} order book imbalance",
        )
        .with_condition("imbalance > threshold")
        .with_cooldown(cooldown),
        AlertRule::new(
            "strong_sell_pressure",
            "Strong Sell Pressure",
            AlertType::ImbalanceThreshold,
            LessThan,
            -0.6,
            High,
            "Strong selling pressure: {value:.1%} order book imbalance",
        )
        .with_condition("imbalance < threshold")
        .with_cooldown(cooldown),
        AlertRule::new(
            "velocity_spike",
            "Trade Velocity Spike",
            AlertType::VelocityThreshold,
            GreaterThan,
            50.0,
            Medium,
            "Trade velocity spike: {value:.1f} trades/sec (normal: ~{threshold:.0f})",
        )
        .with_condition("velocity > threshold")
        .with_cooldown(cooldown),
        AlertRule::new(
            "ml_strong_signal",
            "ML Strong Signal",
            AlertType::MlSignal,
            GreaterThan,
            70.0,
            High,
            "ML detected strong {direction} signal (confidence: {value:.0f}%)",
        )
        .with_condition("signal_strength > threshold")
        .with_cooldown(cooldown),
        AlertRule::new(
            "regime_change",
            "Market Regime Change",
            AlertType::RegimeChange,
            NotEqual,
            0.0,
            Medium,
            "Market regime changed to {regime}",
        )
        .with_condition("regime != previous_regime")
        .with_cooldown(cooldown),
        AlertRule::new(
            "price_1pct_move",
            "1% Price Move",
            AlertType::PriceChange,
            GreaterThan,
            1.0,
            High,
            "Price moved {value:+.2f}% in session",
        )
        .with_condition("price_change_pct > threshold")
        .with_cooldown(60),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(strength: f64, regime: &str) -> PredictionSignal {
        PredictionSignal {
            action: "BUY".to_string(),
            strength,
            regime: regime.to_string(),
        }
    }

    fn rule(id: &str) -> AlertRule {
        default_alert_rules(30)
            .into_iter()
            .find(|r| r.id == id)
            .unwrap()
    }

    #[test]
    fn priority_order_is_total() {
        let mut ps = vec![
            AlertPriority::Info,
            AlertPriority::Low,
            AlertPriority::Critical,
            AlertPriority::Medium,
            AlertPriority::High,
        ];
        ps.sort_by_key(|p| p.rank());
        assert_eq!(ps.first(), Some(&AlertPriority::Critical));
        assert_eq!(ps.last(), Some(&AlertPriority::Info));
    }

    #[test]
    fn default_catalog_shape() {
        let rules = default_alert_rules(30);
        assert_eq!(rules.len(), 11);
        assert!(!rule("price_high").enabled);
        assert!(!rule("price_low").enabled);
        assert_eq!(rule("price_1pct_move").cooldown_secs, 60);
        assert_eq!(rule("spread_wide").cooldown_secs, 30);
        assert_eq!(
            default_alert_rules(10)
                .iter()
                .find(|r| r.id == "spread_wide")
                .map(|r| r.cooldown_secs),
            Some(10)
        );
    }

    #[test]
    fn price_change_watches_absolute_move() {
        let mut f = Features::empty(Utc::now());
        f.price_change_pct = -1.4;
        assert_eq!(rule("price_1pct_move").check(&f, None, None), Some(1.4));
    }

    #[test]
    fn signal_rules_need_a_signal() {
        let f = Features::empty(Utc::now());
        let ml = rule("ml_strong_signal");
        assert_eq!(ml.check(&f, None, None), None);
        assert_eq!(ml.check(&f, Some(&signal(82.0, "TRENDING")), None), Some(82.0));
        assert_eq!(ml.check(&f, Some(&signal(50.0, "TRENDING")), None), None);
    }

    #[test]
    fn regime_change_compares_against_previous() {
        let f = Features::empty(Utc::now());
        let regime = rule("regime_change");
        let s = signal(10.0, "VOLATILE");
        assert_eq!(regime.check(&f, Some(&s), None), None);
        assert_eq!(regime.check(&f, Some(&s), Some("VOLATILE")), None);
        assert_eq!(regime.check(&f, Some(&s), Some("RANGING")), Some(0.0));
    }

    #[test]
    fn explicit_feature_overrides_type() {
        let mut f = Features::empty(Utc::now());
        f.buy_pressure = 0.8;
        let custom = AlertRule::new(
            "",
            "Buyers",
            AlertType::Custom,
            Comparator::GreaterOrEqual,
            0.75,
            AlertPriority::Info,
            "Buy pressure {value:.0%}",
        );
        assert_eq!(custom.check(&f, None, None), None);
        let custom = custom.with_feature(FeatureKey::BuyPressure);
        assert_eq!(custom.check(&f, None, None), Some(0.8));
    }

    #[test]
    fn price_falls_back_to_mid() {
        let mut f = Features::empty(Utc::now());
        f.mid_price = 101_000.0;
        assert_eq!(
            AlertType::PriceThreshold.default_value(&f),
            Some(101_000.0)
        );
    }
}
