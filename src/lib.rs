//! tickpulse: real-time market microstructure monitor
//!
//! Feed connector → state store → feature engine → rule, insight and
//! alert layers. The connector runs on its own thread; everything
//! downstream is pulled by a periodic caller through `MonitorSession`.

pub mod alerts;
pub mod config;
pub mod error;
pub mod feed;
pub mod features;
pub mod insights;
pub mod models;
pub mod pipeline;
pub mod rules;
pub mod store;
pub mod synthetic;

pub use config::AppConfig;
pub use pipeline::{MonitorSession, StatusReport, TickOutput};
