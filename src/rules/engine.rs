//! Rule engine
//!
//! Evaluates the fixed insight catalog against a `Features` snapshot. Each
//! rule has its own cooldown; a firing records the rendered message plus a
//! snapshot of the feature values it saw.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use super::catalog::{default_rules, InsightPriority, RuleDefinition};
use super::template::{render_or_raw, TemplateValue};
use crate::config::Thresholds;
use crate::error::ConfigError;
use crate::features::{FeatureKey, Features};

/// Feature values recorded with every trigger
const SNAPSHOT_KEYS: [FeatureKey; 9] = [
    FeatureKey::SpreadBps,
    FeatureKey::Imbalance,
    FeatureKey::ImbalancePct,
    FeatureKey::VolatilityBps,
    FeatureKey::Velocity,
    FeatureKey::Baseline,
    FeatureKey::PriceVsVwap,
    FeatureKey::Price,
    FeatureKey::Vwap,
];

/// A rule that fired on one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredRule {
    pub rule_id: u32,
    pub name: String,
    pub priority: InsightPriority,
    pub condition: String,
    pub message: String,
    pub action: String,
    pub how_to_overcome: String,
    pub expected_impact: String,
    pub value: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
    pub feature_values: BTreeMap<String, f64>,
}

/// Evaluates the fixed catalog with a per-rule cooldown.
pub struct RuleEngine {
    rules: Vec<RuleDefinition>,
    cooldown: Duration,
    last_triggered: HashMap<u32, DateTime<Utc>>,
}

impl RuleEngine {
    pub fn new(thresholds: &Thresholds, cooldown_secs: u64) -> Self {
        Self::with_rules(default_rules(thresholds), cooldown_secs)
    }

    pub fn with_rules(rules: Vec<RuleDefinition>, cooldown_secs: u64) -> Self {
        Self {
            rules,
            cooldown: Duration::seconds(cooldown_secs as i64),
            last_triggered: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, features: &Features) -> Vec<TriggeredRule> {
        self.evaluate_at(features, Utc::now())
    }

    pub fn evaluate_at(&mut self, features: &Features, now: DateTime<Utc>) -> Vec<TriggeredRule> {
        let mut triggered = Vec::new();

        for rule in self.rules.iter().filter(|r| r.enabled) {
            if let Some(last) = self.last_triggered.get(&rule.id) {
                if now - *last < self.cooldown {
                    continue;
                }
            }

            let Some((value, threshold)) = rule.check(features) else {
                continue;
            };

            self.last_triggered.insert(rule.id, now);
            debug!(rule = rule.id, name = %rule.name, value, threshold, "rule_triggered");
            triggered.push(build_trigger(rule, features, value, threshold, now));
        }

        triggered
    }

    pub fn reset_cooldowns(&mut self) {
        self.last_triggered.clear();
    }

    /// Cooldown applied to every rule
    pub fn set_cooldown(&mut self, seconds: u64) {
        self.cooldown = Duration::seconds(seconds as i64);
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn set_rule_enabled(&mut self, id: u32, enabled: bool) -> Result<(), ConfigError> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(ConfigError::UnknownRule(id))?;
        rule.enabled = enabled;
        Ok(())
    }

    pub fn rule(&self, id: u32) -> Result<&RuleDefinition, ConfigError> {
        self.rules
            .iter()
            .find(|r| r.id == id)
            .ok_or(ConfigError::UnknownRule(id))
    }

    pub fn rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    pub fn last_triggered(&self, id: u32) -> Option<DateTime<Utc>> {
        self.last_triggered.get(&id).copied()
    }
}

fn build_trigger(
    rule: &RuleDefinition,
    features: &Features,
    value: f64,
    threshold: f64,
    now: DateTime<Utc>,
) -> TriggeredRule {
    let message = render_or_raw(&rule.template, |key| {
        features.value_of(key).map(TemplateValue::Number)
    });
    let feature_values = SNAPSHOT_KEYS
        .iter()
        .map(|k| (k.name().to_string(), features.get(*k)))
        .collect();

    TriggeredRule {
        rule_id: rule.id,
        name: rule.name.clone(),
        priority: rule.priority,
        condition: rule.condition.clone(),
        message,
        action: rule.action.clone(),
        how_to_overcome: rule.how_to_overcome.clone(),
        expected_impact: rule.expected_impact.clone(),
        value,
        threshold,
        triggered_at: now,
        feature_values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_spread() -> Features {
        let mut f = Features::empty(Utc::now());
        f.spread_bps = 8.0;
        f.velocity_baseline = 20.0;
        f
    }

    fn ids(triggered: &[TriggeredRule]) -> Vec<u32> {
        triggered.iter().map(|t| t.rule_id).collect()
    }

    #[test]
    fn wide_spread_fires_rule_one() {
        let mut engine = RuleEngine::new(&Thresholds::default(), 5);
        let out = engine.evaluate_at(&wide_spread(), Utc::now());

        let rule = out.iter().find(|t| t.rule_id == 1).unwrap();
        assert_eq!(rule.priority, InsightPriority::High);
        assert_eq!(rule.message, "Spread widened to 8.0 bps, liquidity deteriorating");
        assert_eq!(rule.value, 8.0);
        assert_eq!(rule.threshold, 6.0);
        assert_eq!(rule.feature_values["spread_bps"], 8.0);
    }

    #[test]
    fn cooldown_suppresses_then_releases() {
        let mut engine = RuleEngine::new(&Thresholds::default(), 5);
        let t0 = Utc::now();
        let f = wide_spread();

        assert!(ids(&engine.evaluate_at(&f, t0)).contains(&1));
        assert!(!ids(&engine.evaluate_at(&f, t0 + Duration::milliseconds(100))).contains(&1));
        assert!(!ids(&engine.evaluate_at(&f, t0 + Duration::milliseconds(4_999))).contains(&1));
        assert!(ids(&engine.evaluate_at(&f, t0 + Duration::milliseconds(5_100))).contains(&1));
    }

    #[test]
    fn reset_cooldowns_allows_immediate_retrigger() {
        let mut engine = RuleEngine::new(&Thresholds::default(), 5);
        let t0 = Utc::now();
        engine.evaluate_at(&wide_spread(), t0);
        engine.reset_cooldowns();
        assert!(ids(&engine.evaluate_at(&wide_spread(), t0)).contains(&1));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut engine = RuleEngine::new(&Thresholds::default(), 0);
        engine.set_rule_enabled(1, false).unwrap();
        assert!(!ids(&engine.evaluate_at(&wide_spread(), Utc::now())).contains(&1));
        assert_eq!(
            engine.set_rule_enabled(42, true),
            Err(ConfigError::UnknownRule(42))
        );
        assert!(engine.rule(99).is_err());
    }

    #[test]
    fn quiet_market_triggers_nothing_relative() {
        let mut engine = RuleEngine::new(&Thresholds::default(), 5);
        let mut f = Features::empty(Utc::now());
        f.spread_bps = 4.0;
        f.velocity = 20.0;
        f.velocity_baseline = 20.0;
        f.volatility_bps = 15.0;
        assert!(engine.evaluate_at(&f, Utc::now()).is_empty());
    }
}
