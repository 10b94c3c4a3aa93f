//! Option pricing, multi-leg strategy evaluation, preset builders and strike
//! suggestion.

pub mod pricing;
pub mod strategy;
pub mod strikes;
pub mod templates;

pub use pricing::{BlackScholes, Greeks, PricingModel};
pub use strategy::{OptionLeg, PayoffBound, Position, Strategy, StrategyEngine, StrategyKind, StrategyMetrics};
pub use strikes::StrikeSelector;
