//! Configurable alert catalog
//!
//! Broader than the fixed insight rules: rules are keyed by string id, can
//! be added, removed, toggled and re-thresholded at runtime, and each
//! carries its own cooldown. Triggered alerts land in an active set
//! (merged by rule id, TTL-expired) and a bounded, acknowledgeable history.

mod manager;
mod types;

pub use manager::{sort_alerts, AlertManager};
pub use types::{
    default_alert_rules, Alert, AlertPriority, AlertRule, AlertStats, AlertType, HistoryFilter,
    PredictionSignal, RuleSummary,
};
