//! Realised trade history.

pub mod track_record;

pub use track_record::{Reliability, TrackRecord, TradeStats};
