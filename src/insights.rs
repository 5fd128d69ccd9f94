//! Insight generator
//!
//! Turns rule triggers into an active set keyed by rule id: a retrigger
//! replaces the existing entry, entries older than the TTL drop out, and
//! the top `max_insights` are served sorted by priority then recency.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::InsightConfig;
use crate::features::Features;
use crate::rules::{InsightPriority, RuleEngine, TriggeredRule};

/// Placeholder id for the "nothing to report" insight
pub const NORMAL_CONDITIONS_ID: u32 = 0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub rule_id: u32,
    pub priority: InsightPriority,
    pub message: String,
    pub action: String,
    pub how_to_overcome: String,
    pub expected_impact: String,
    pub triggered_at: DateTime<Utc>,
    pub age_secs: f64,
}

impl Insight {
    fn from_trigger(rule: TriggeredRule, now: DateTime<Utc>) -> Self {
        Self {
            rule_id: rule.rule_id,
            priority: rule.priority,
            age_secs: age_secs(rule.triggered_at, now),
            message: rule.message,
            action: rule.action,
            how_to_overcome: rule.how_to_overcome,
            expected_impact: rule.expected_impact,
            triggered_at: rule.triggered_at,
        }
    }

    /// Shown when no rule is active.
    pub fn normal_conditions(now: DateTime<Utc>) -> Self {
        Self {
            rule_id: NORMAL_CONDITIONS_ID,
            priority: InsightPriority::Low,
            message: "Market conditions normal, no action required".to_string(),
            action: "Continue monitoring; no immediate action needed".to_string(),
            how_to_overcome: "Maintain current strategy parameters".to_string(),
            expected_impact: "Steady execution quality".to_string(),
            triggered_at: now,
            age_secs: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsightCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

pub struct InsightGenerator {
    rules: RuleEngine,
    active: Vec<Insight>,
    ttl: Duration,
    max_insights: usize,
}

impl InsightGenerator {
    pub fn new(rules: RuleEngine, config: &InsightConfig) -> Self {
        Self {
            rules,
            active: Vec::new(),
            ttl: Duration::seconds(config.ttl_secs as i64),
            max_insights: config.max_insights,
        }
    }

    pub fn generate(&mut self, features: &Features) -> Vec<Insight> {
        self.generate_at(features, Utc::now())
    }

    /// Evaluate rules, merge, expire and return the top insights.
    pub fn generate_at(&mut self, features: &Features, now: DateTime<Utc>) -> Vec<Insight> {
        let fresh: Vec<Insight> = self
            .rules
            .evaluate_at(features, now)
            .into_iter()
            .map(|t| Insight::from_trigger(t, now))
            .collect();

        self.merge(fresh);
        self.expire(now);
        self.top_at(self.max_insights, now)
    }

    fn merge(&mut self, fresh: Vec<Insight>) {
        for insight in fresh {
            match self.active.iter_mut().find(|a| a.rule_id == insight.rule_id) {
                Some(existing) => *existing = insight,
                None => self.active.push(insight),
            }
        }
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.active.retain(|i| now - i.triggered_at < ttl);
    }

    /// Up to `k` active insights, priority first then newest first.
    pub fn top_at(&self, k: usize, now: DateTime<Utc>) -> Vec<Insight> {
        let mut sorted: Vec<Insight> = self
            .active
            .iter()
            .map(|i| Insight {
                age_secs: age_secs(i.triggered_at, now),
                ..i.clone()
            })
            .collect();
        sort_insights(&mut sorted);
        sorted.truncate(k);
        sorted
    }

    pub fn all_active_at(&mut self, now: DateTime<Utc>) -> Vec<Insight> {
        self.expire(now);
        self.top_at(usize::MAX, now)
    }

    /// Like `top_at`, but never empty.
    pub fn top_or_default_at(&self, now: DateTime<Utc>) -> Vec<Insight> {
        let top = self.top_at(self.max_insights, now);
        if top.is_empty() {
            vec![Insight::normal_conditions(now)]
        } else {
            top
        }
    }

    /// Drop all active insights and reset rule cooldowns.
    pub fn clear_all(&mut self) {
        self.active.clear();
        self.rules.reset_cooldowns();
    }

    pub fn set_ttl(&mut self, seconds: u64) {
        self.ttl = Duration::seconds(seconds as i64);
    }

    pub fn set_max_insights(&mut self, count: usize) {
        self.max_insights = count;
    }

    pub fn counts(&self) -> InsightCounts {
        self.active
            .iter()
            .fold(InsightCounts::default(), |mut c, i| {
                match i.priority {
                    InsightPriority::High => c.high += 1,
                    InsightPriority::Medium => c.medium += 1,
                    InsightPriority::Low => c.low += 1,
                }
                c
            })
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn rule_engine_mut(&mut self) -> &mut RuleEngine {
        &mut self.rules
    }
}

pub fn sort_insights(insights: &mut [Insight]) {
    insights.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then_with(|| b.triggered_at.cmp(&a.triggered_at))
    });
}

fn age_secs(at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - at).num_milliseconds().max(0) as f64 / 1000.0
}
