//! Feature derivation over sliding windows

pub mod calc;
mod engine;

pub use engine::{FeatureEngine, FeatureKey, Features};
