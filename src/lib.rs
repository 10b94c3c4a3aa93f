//! OPTEDGE: quantitative decision core for short-horizon options trading
//!
//! Library crate: directional signal, range forecast, strategy evaluation,
//! position sizing, risk simulation and the final trade decision. Callers
//! hand in validated in-memory data and render the returned records.

pub mod config;
pub mod types;
pub mod analysis;
pub mod options;
pub mod risk;
pub mod engine;
pub mod history;

pub use config::AnalysisConfig;
pub use engine::{AnalysisReport, AnalysisRequest, DecisionPipeline};
pub use types::{CoreError, CoreResult, Warning, WarningKind};
