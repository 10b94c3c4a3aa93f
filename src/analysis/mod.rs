//! Market analysis: directional signal, range prediction and chain analytics.

pub mod chain;
pub mod range;
pub mod signal;
pub mod stats;

pub use range::RangePredictor;
pub use signal::SignalEngine;
