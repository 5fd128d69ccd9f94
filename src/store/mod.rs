//! Shared market state
//!
//! The store is the only object shared between the feed thread and the
//! evaluation tick. Every buffer is bounded; every read returns a copy.

mod ring;
mod state;

pub use ring::{BoundedBuffer, Timestamped};
pub use state::{BufferSizes, MarketScalars, StateStore, StoreSummary};
