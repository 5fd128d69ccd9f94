//! AlertManager - cooldown-gated alert evaluation, active set and history

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{
    default_alert_rules, Alert, AlertPriority, AlertRule, AlertStats, AlertType, HistoryFilter,
    PredictionSignal, RuleSummary,
};
use crate::config::AlertConfig;
use crate::error::ConfigError;
use crate::features::Features;
use crate::rules::{render, TemplateValue};
use crate::store::BoundedBuffer;

/// Evaluates the alert catalog and keeps the active set and history.
pub struct AlertManager {
    rules: Vec<AlertRule>,
    history: BoundedBuffer<Alert>,
    active: Vec<Alert>,
    active_ttl: Duration,
    max_display: usize,
    last_triggered: HashMap<String, DateTime<Utc>>,
    type_counts: BTreeMap<AlertType, usize>,
    started_at: DateTime<Utc>,
}

impl AlertManager {
    pub fn new(config: &AlertConfig) -> Self {
        Self::new_at(config, Utc::now())
    }

    pub fn new_at(config: &AlertConfig, now: DateTime<Utc>) -> Self {
        Self {
            rules: default_alert_rules(config.default_cooldown_secs),
            history: BoundedBuffer::new(config.max_history),
            active: Vec::new(),
            active_ttl: Duration::seconds(config.active_ttl_secs as i64),
            max_display: config.max_display_alerts,
            last_triggered: HashMap::new(),
            type_counts: BTreeMap::new(),
            started_at: now,
        }
    }

    // =========================================================================
    // EVALUATION
    // =========================================================================

    pub fn evaluate(
        &mut self,
        features: &Features,
        signal: Option<&PredictionSignal>,
        previous_regime: Option<&str>,
    ) -> Vec<Alert> {
        self.evaluate_at(features, signal, previous_regime, Utc::now())
    }

    /// Evaluate every enabled rule outside its cooldown; returns the new alerts.
    pub fn evaluate_at(
        &mut self,
        features: &Features,
        signal: Option<&PredictionSignal>,
        previous_regime: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let mut fresh = Vec::new();

        for rule in self.rules.iter().filter(|r| r.enabled) {
            if let Some(last) = self.last_triggered.get(&rule.id) {
                if now - *last < Duration::seconds(rule.cooldown_secs as i64) {
                    continue;
                }
            }

            let Some(value) = rule.check(features, signal, previous_regime) else {
                continue;
            };

            let alert = build_alert(rule, value, features, signal, now);
            info!(
                alert_id = %alert.id,
                rule = %rule.id,
                priority = %rule.priority,
                value,
                threshold = rule.threshold,
                "alert_triggered"
            );

            self.last_triggered.insert(rule.id.clone(), now);
            *self.type_counts.entry(rule.alert_type).or_insert(0) += 1;
            self.history.push(alert.clone());
            fresh.push(alert);
        }

        for alert in &fresh {
            match self.active.iter_mut().find(|a| a.rule_id == alert.rule_id) {
                Some(existing) => *existing = alert.clone(),
                None => self.active.push(alert.clone()),
            }
        }
        self.expire(now);

        fresh
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let ttl = self.active_ttl;
        self.active.retain(|a| now - a.timestamp < ttl);
    }

    /// Up to `k` active alerts, priority first then newest first.
    pub fn top(&self, k: usize) -> Vec<Alert> {
        let mut sorted = self.active.clone();
        sort_alerts(&mut sorted);
        sorted.truncate(k);
        sorted
    }

    /// Expire, then return the configured number of top alerts.
    pub fn active_at(&mut self, now: DateTime<Utc>) -> Vec<Alert> {
        self.expire(now);
        self.top(self.max_display)
    }

    // =========================================================================
    // HISTORY
    // =========================================================================

    pub fn acknowledge(&mut self, alert_id: &str) -> bool {
        self.acknowledge_at(alert_id, Utc::now())
    }

    /// Mark a history record acknowledged. Active-set copies are untouched.
    pub fn acknowledge_at(&mut self, alert_id: &str, now: DateTime<Utc>) -> bool {
        match self.history.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                alert.acknowledged_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// Returns how many records changed.
    pub fn acknowledge_all_at(&mut self, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        for alert in self.history.iter_mut().filter(|a| !a.acknowledged) {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(now);
            count += 1;
        }
        count
    }

    pub fn acknowledge_all(&mut self) -> usize {
        self.acknowledge_all_at(Utc::now())
    }

    /// Alerts from the last `window` matching `filter`, newest first.
    pub fn history_at(
        &self,
        window: Duration,
        filter: &HistoryFilter,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let cutoff = now
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut alerts: Vec<Alert> = self
            .history
            .iter()
            .filter(|a| a.timestamp >= cutoff && filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    pub fn history(&self, window: Duration, filter: &HistoryFilter) -> Vec<Alert> {
        self.history_at(window, filter, Utc::now())
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear_history(&mut self) {
        self.clear_history_at(Utc::now());
    }

    /// Also drops the active set and restarts the stats clock.
    pub fn clear_history_at(&mut self, now: DateTime<Utc>) {
        self.history.clear();
        self.active.clear();
        self.type_counts.clear();
        self.started_at = now;
    }

    pub fn stats(&self) -> AlertStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> AlertStats {
        let mut stats = AlertStats {
            total_alerts: self.history.len(),
            ..AlertStats::default()
        };

        for alert in self.history.iter() {
            match alert.priority {
                AlertPriority::Critical => stats.critical_count += 1,
                AlertPriority::High => stats.high_count += 1,
                AlertPriority::Medium => stats.medium_count += 1,
                AlertPriority::Low => stats.low_count += 1,
                AlertPriority::Info => stats.info_count += 1,
            }
        }

        let elapsed_minutes = (now - self.started_at).num_milliseconds() as f64 / 60_000.0;
        if elapsed_minutes > 0.0 {
            stats.alerts_per_minute = stats.total_alerts as f64 / elapsed_minutes;
        }

        stats.most_common_type = self
            .type_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(t, _)| *t);
        stats.last_alert_time = self.history.last().map(|a| a.timestamp);
        stats
    }

    // =========================================================================
    // RULE MANAGEMENT
    // =========================================================================

    /// Add a rule, assigning a short random id when `rule.id` is empty.
    pub fn add_rule(&mut self, mut rule: AlertRule) -> Result<String, ConfigError> {
        if rule.id.is_empty() {
            rule.id = Uuid::new_v4().simple().to_string()[..8].to_string();
        }
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(ConfigError::DuplicateAlertRule(rule.id));
        }

        debug!(rule = %rule.id, name = %rule.name, "alert_rule_added");
        let id = rule.id.clone();
        self.rules.push(rule);
        Ok(id)
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> Result<AlertRule, ConfigError> {
        let idx = self
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| ConfigError::UnknownAlertRule(rule_id.to_string()))?;
        self.last_triggered.remove(rule_id);
        Ok(self.rules.remove(idx))
    }

    pub fn enable_rule(&mut self, rule_id: &str, enabled: bool) -> Result<(), ConfigError> {
        self.rule_mut(rule_id)?.enabled = enabled;
        Ok(())
    }

    pub fn update_threshold(&mut self, rule_id: &str, threshold: f64) -> Result<(), ConfigError> {
        let rule = self.rule_mut(rule_id)?;
        debug!(rule = %rule_id, old = rule.threshold, new = threshold, "alert_threshold_updated");
        rule.threshold = threshold;
        Ok(())
    }

    pub fn rule(&self, rule_id: &str) -> Result<&AlertRule, ConfigError> {
        self.rules
            .iter()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| ConfigError::UnknownAlertRule(rule_id.to_string()))
    }

    fn rule_mut(&mut self, rule_id: &str) -> Result<&mut AlertRule, ConfigError> {
        self.rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| ConfigError::UnknownAlertRule(rule_id.to_string()))
    }

    pub fn rules_summary(&self) -> Vec<RuleSummary> {
        self.rules.iter().map(RuleSummary::from).collect()
    }

    pub fn reset_cooldowns(&mut self) {
        self.last_triggered.clear();
    }
}

pub fn sort_alerts(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
}

fn build_alert(
    rule: &AlertRule,
    value: f64,
    features: &Features,
    signal: Option<&PredictionSignal>,
    now: DateTime<Utc>,
) -> Alert {
    let message = render(&rule.message_template, |key| match key {
        "value" => Some(TemplateValue::Number(value)),
        "threshold" => Some(TemplateValue::Number(rule.threshold)),
        "direction" => signal.map(|s| TemplateValue::Text(s.action.clone())),
        "regime" => signal.map(|s| TemplateValue::Text(s.regime.clone())),
        other => features.value_of(other).map(TemplateValue::Number),
    })
    .unwrap_or_else(|| {
        format!(
            "{}: Value={:.2}, Threshold={:.2}",
            rule.name, value, rule.threshold
        )
    });

    Alert {
        id: Uuid::new_v4().simple().to_string()[..8].to_string(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        priority: rule.priority,
        alert_type: rule.alert_type,
        message,
        value,
        threshold: rule.threshold,
        timestamp: now,
        acknowledged: false,
        acknowledged_at: None,
    }
}
