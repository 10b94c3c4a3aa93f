//! Position sizing and Monte Carlo risk simulation.

pub mod simulation;
pub mod sizing;

pub use simulation::{EquitySimResult, RiskSimulator, SimulationParams};
pub use sizing::{PositionSizer, SizeResult, SizingMethod, SizingRequest};
