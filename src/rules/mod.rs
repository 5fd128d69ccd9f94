//! Threshold rules over feature snapshots

pub mod catalog;
mod engine;
pub mod template;

pub use catalog::{default_rules, Comparator, InsightPriority, RuleDefinition, Threshold};
pub use engine::{RuleEngine, TriggeredRule};
pub use template::{render, render_or_raw, TemplateValue};
