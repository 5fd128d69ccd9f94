//! Error taxonomy
//!
//! Feed failures are split into transient (retry with backoff) and fatal
//! (log, back off at the maximum delay). Wire errors never escape the
//! connector: the offending message is dropped and counted.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure of a single connection attempt or an established session.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("transient feed error: {0}")]
    Transient(String),

    #[error("fatal feed error: {0}")]
    Fatal(String),
}

impl FeedError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FeedError::Fatal(_))
    }
}

/// A single inbound message that could not be turned into a market event.
#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("malformed json: {0}")]
    Json(String),

    #[error("unrecognized envelope")]
    UnknownEnvelope,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid number in '{field}': {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("non-positive {field}: {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("crossed book: best bid {bid} >= best ask {ask}")]
    CrossedBook { bid: f64, ask: f64 },
}

/// A feature sub-computation could not produce a value; callers fall back
/// to the default for that field.
#[derive(Debug, Error, PartialEq)]
pub enum ComputationError {
    #[error("not enough data: need {needed}, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("degenerate input: {0}")]
    Degenerate(&'static str),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown rule id {0}")]
    UnknownRule(u32),

    #[error("unknown alert rule '{0}'")]
    UnknownAlertRule(String),

    #[error("duplicate alert rule '{0}'")]
    DuplicateAlertRule(String),
}

/// Map a websocket error onto the retry taxonomy.
///
/// Bad URLs and HTTP 4xx handshake rejections will not heal on retry.
pub fn classify_ws_error(err: &tungstenite::Error) -> FeedError {
    use tungstenite::Error as WsError;

    match err {
        WsError::Url(e) => FeedError::Fatal(format!("invalid url: {e}")),
        WsError::HttpFormat(e) => FeedError::Fatal(format!("bad http request: {e}")),
        WsError::Http(resp) if resp.status().is_client_error() => {
            FeedError::Fatal(format!("handshake rejected: {}", resp.status()))
        }
        other => FeedError::Transient(other.to_string()),
    }
}
