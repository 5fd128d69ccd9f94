//! Market data feed: wire decoding, session state machine, connector

pub mod connector;
pub mod session;
pub mod wire;

pub use connector::{FeedConnector, FeedStats, FeedStatsSnapshot};
pub use session::{
    BackoffCalculator, HeartbeatAction, HeartbeatMonitor, SessionManager, SessionMetrics,
    SessionState, TransitionReason,
};
pub use wire::{parse_message, FeedMessage};
