//! Evaluation pipeline
//!
//! `MonitorSession` owns one store handle plus the feature, insight and
//! alert stages, and is driven by a periodic caller. It is constructed
//! explicitly and never shared through globals; the connector writes into
//! the same `Arc<StateStore>` from its own thread.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::alerts::{Alert, AlertManager, AlertStats, HistoryFilter, PredictionSignal};
use crate::config::AppConfig;
use crate::feed::{FeedConnector, FeedStatsSnapshot, SessionState};
use crate::features::{FeatureEngine, Features};
use crate::insights::{Insight, InsightGenerator};
use crate::models::{ConnectionStatus, PricePoint, SeriesPoint};
use crate::rules::RuleEngine;
use crate::store::{BufferSizes, MarketScalars, StateStore};

/// Everything one evaluation cycle produced
#[derive(Debug, Clone, Serialize)]
pub struct TickOutput {
    pub features: Features,
    pub insights: Vec<Insight>,
    pub new_alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub connection_status: ConnectionStatus,
    /// `None` when no connector is attached (synthetic mode, tests)
    pub session_state: Option<SessionState>,
    pub consecutive_failures: u32,
    pub feed: Option<FeedStatsSnapshot>,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub buffers: BufferSizes,
    pub market: MarketScalars,
    pub last_update: Option<DateTime<Utc>>,
    pub ticks: u64,
}

pub struct MonitorSession {
    store: Arc<StateStore>,
    features: FeatureEngine,
    insights: InsightGenerator,
    alerts: AlertManager,
    last_features: Option<Features>,
    ticks: u64,
}

impl MonitorSession {
    pub fn new(config: &AppConfig, store: Arc<StateStore>) -> Self {
        let rules = RuleEngine::new(&config.thresholds, config.insights.rule_cooldown_secs);
        Self {
            features: FeatureEngine::new(Arc::clone(&store), config.windows.clone()),
            insights: InsightGenerator::new(rules, &config.insights),
            alerts: AlertManager::new(&config.alerts),
            store,
            last_features: None,
            ticks: 0,
        }
    }

    /// Session over a fresh store sized from `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let store = Arc::new(StateStore::new(config.buffers.clone()));
        Self::new(config, store)
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn tick(
        &mut self,
        signal: Option<&PredictionSignal>,
        previous_regime: Option<&str>,
    ) -> TickOutput {
        self.tick_at(Utc::now(), signal, previous_regime)
    }

    /// Features, then insights, then alerts, all against the same snapshot.
    pub fn tick_at(
        &mut self,
        now: DateTime<Utc>,
        signal: Option<&PredictionSignal>,
        previous_regime: Option<&str>,
    ) -> TickOutput {
        let features = self.features.compute_at(now);
        let insights = self.insights.generate_at(&features, now);
        let new_alerts = self
            .alerts
            .evaluate_at(&features, signal, previous_regime, now);

        self.ticks += 1;
        debug!(
            tick = self.ticks,
            trades = features.trade_count,
            insights = insights.len(),
            alerts = new_alerts.len(),
            "pipeline_tick"
        );

        self.last_features = Some(features);
        TickOutput {
            features,
            insights,
            new_alerts,
        }
    }

    // =========================================================================
    // PULL APIS
    // =========================================================================

    pub fn latest_features(&self) -> Option<&Features> {
        self.last_features.as_ref()
    }

    /// Top insights, or the "conditions normal" placeholder.
    pub fn top_insights_at(&self, now: DateTime<Utc>) -> Vec<Insight> {
        self.insights.top_or_default_at(now)
    }

    pub fn active_alerts_at(&mut self, now: DateTime<Utc>) -> Vec<Alert> {
        self.alerts.active_at(now)
    }

    pub fn alert_history_at(
        &self,
        window: Duration,
        filter: &HistoryFilter,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        self.alerts.history_at(window, filter, now)
    }

    pub fn acknowledge_alert(&mut self, alert_id: &str) -> bool {
        self.alerts.acknowledge(alert_id)
    }

    pub fn alert_stats_at(&self, now: DateTime<Utc>) -> AlertStats {
        self.alerts.stats_at(now)
    }

    pub fn price_chart_at(&self, now: DateTime<Utc>) -> Vec<PricePoint> {
        self.features.price_chart_at(now)
    }

    pub fn spread_chart_at(&self, now: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.features.spread_chart_at(now)
    }

    pub fn volatility_chart_at(&self, now: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.features.volatility_chart_at(now)
    }

    pub fn velocity_chart_at(&self, now: DateTime<Utc>) -> Vec<SeriesPoint> {
        self.features.velocity_chart_at(now)
    }

    pub fn status(&self, connector: Option<&FeedConnector>) -> StatusReport {
        let summary = self.store.summary();
        StatusReport {
            connection_status: summary.connection_status,
            session_state: connector.map(|c| c.session_state()),
            consecutive_failures: connector.map_or(0, |c| c.consecutive_failures()),
            feed: connector.map(|c| c.stats()),
            error_count: summary.error_count,
            last_error: summary.last_error,
            buffers: summary.buffers,
            market: summary.market,
            last_update: summary.last_update,
            ticks: self.ticks,
        }
    }

    pub fn insights(&self) -> &InsightGenerator {
        &self.insights
    }

    pub fn insights_mut(&mut self) -> &mut InsightGenerator {
        &mut self.insights
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn alerts_mut(&mut self) -> &mut AlertManager {
        &mut self.alerts
    }

    /// Drop derived state; the store is left alone.
    pub fn reset(&mut self) {
        self.features.reset();
        self.insights.clear_all();
        self.alerts.clear_history();
        self.alerts.reset_cooldowns();
        self.last_features = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::InsightCounts;
    use crate::models::{DepthSnapshot, Trade};
    use crate::synthetic::{Scenario, SyntheticMarket};

    #[test]
    fn empty_store_yields_placeholder() {
        let mut session = MonitorSession::from_config(&AppConfig::default());
        let now = Utc::now();
        let out = session.tick_at(now, None, None);

        assert_eq!(out.features.trade_count, 0);
        let top = session.top_insights_at(now);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].rule_id, crate::insights::NORMAL_CONDITIONS_ID);
    }

    #[test]
    fn wide_book_reaches_insights_and_alerts() {
        let mut session = MonitorSession::from_config(&AppConfig::default());
        let now = Utc::now();
        let store = Arc::clone(session.store());
        store.add_trade(Trade::new(now, 100.0, 1.0, false, 1));
        store.add_depth(DepthSnapshot::top_of_book(now, 99.95, 5.0, 100.05, 5.0));

        let out = session.tick_at(now, None, None);
        assert!(out.features.spread_bps > 6.0);
        assert!(out.insights.iter().any(|i| i.rule_id == 1));
        assert!(out.new_alerts.iter().any(|a| a.rule_id == "spread_wide"));
        assert_eq!(session.latest_features().map(|f| f.spread_bps), Some(out.features.spread_bps));
    }

    #[test]
    fn status_without_connector() {
        let mut session = MonitorSession::from_config(&AppConfig::default());
        let now = Utc::now();
        let mut market = SyntheticMarket::new(5, Scenario::Normal).unwrap();
        market.seed_store(session.store(), now, 50);
        session.tick_at(now, None, None);

        let status = session.status(None);
        assert_eq!(status.connection_status, ConnectionStatus::Disconnected);
        assert!(status.session_state.is_none());
        assert_eq!(status.buffers.trades, 50);
        assert_eq!(status.ticks, 1);
        assert!(status.market.mid_price > 0.0);
    }

    #[test]
    fn reset_clears_derived_state() {
        let mut session = MonitorSession::from_config(&AppConfig::default());
        let now = Utc::now();
        session
            .store()
            .add_depth(DepthSnapshot::top_of_book(now, 99.9, 1.0, 100.1, 1.0));
        session.tick_at(now, None, None);
        assert!(session.alerts().history_len() > 0);

        session.reset();
        assert!(session.latest_features().is_none());
        assert_eq!(session.alerts().history_len(), 0);
        assert_eq!(session.insights().counts(), InsightCounts::default());
    }
}
