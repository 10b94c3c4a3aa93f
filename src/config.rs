//! Analysis configuration.
//!
//! One immutable `AnalysisConfig` value is built by the caller (usually from
//! TOML text) and handed to each component constructor. Every key is optional;
//! missing keys fall back to the defaults documented on each section.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{CoreError, CoreResult};

/// Top-level configuration, grouped by component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub signal: SignalConfig,
    pub range: RangeConfig,
    pub strategy: StrategyConfig,
    pub sizing: SizingConfig,
    pub simulation: SimulationConfig,
    pub decision: DecisionConfig,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// RSI / PCR thresholds for the directional signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// PCR below this is bullish.
    pub pcr_oversold: f64,
    /// PCR above this is bearish.
    pub pcr_overbought: f64,
    /// Restrict PCR to the nearest expiry.
    pub pcr_nearest_expiry: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            pcr_oversold: 0.7,
            pcr_overbought: 1.3,
            pcr_nearest_expiry: true,
        }
    }
}

/// Range prediction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// ATR lookback in bars.
    pub lookback: usize,
    pub atr_weight: f64,
    pub implied_weight: f64,
    /// Two-sided probability the normal range should cover.
    pub confidence_level: f64,
    /// Returns used for the empirical tail quantile.
    pub fat_tail_window: usize,
    pub fat_tail_confidence: f64,
    pub fat_tail_max_multiplier: f64,
    pub trading_days_per_year: f64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            lookback: 30,
            atr_weight: 0.5,
            implied_weight: 0.5,
            confidence_level: 0.6827, // one sigma
            fat_tail_window: 60,
            fat_tail_confidence: 0.99,
            fat_tail_max_multiplier: 2.0,
            trading_days_per_year: 252.0,
        }
    }
}

/// Strategy pricing and margin parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub lot_size: u32,
    /// Fraction of spot blocked per naked short lot.
    pub margin_pct: f64,
    pub risk_free_rate: f64,
    /// Half-width of the payoff scan domain in standard deviations.
    pub domain_sigmas: f64,
    pub grid_points: usize,
    /// |delta| band targeted by strike suggestion.
    pub delta_band_min: f64,
    pub delta_band_max: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            lot_size: 50,
            margin_pct: 0.20,
            risk_free_rate: 0.065,
            domain_sigmas: 4.0,
            grid_points: 2001,
            delta_band_min: 0.40,
            delta_band_max: 0.60,
        }
    }
}

/// Position sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub kelly_safety_factor: f64,
    /// Below this many trades the Kelly estimate is flagged as unreliable.
    pub kelly_sample_minimum: usize,
    /// Sample size at which the uncertainty discount vanishes.
    pub kelly_reference_sample: usize,
    /// Hard cap on risk per trade, in percent of account.
    pub max_risk_percent: f64,
    pub vol_ratio_floor: f64,
    pub vol_ratio_ceiling: f64,
    /// Lot count above which a concentration warning is raised.
    pub max_lots_warning: u32,
    /// Base risk for the fixed-fraction and volatility-adjusted methods, percent.
    pub base_risk_percent: f64,
    /// Normal volatility level, percent.
    pub baseline_volatility: f64,
    /// Volatility above which size reductions are flagged, percent.
    pub high_volatility: f64,
    /// Fewest closed trades optimal-f will work with.
    pub optimal_f_min_trades: usize,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            kelly_safety_factor: 0.25,
            kelly_sample_minimum: 50,
            kelly_reference_sample: 100,
            max_risk_percent: 2.0,
            vol_ratio_floor: 0.5,
            vol_ratio_ceiling: 1.5,
            max_lots_warning: 10,
            base_risk_percent: 2.0,
            baseline_volatility: 15.0,
            high_volatility: 25.0,
            optimal_f_min_trades: 10,
        }
    }
}

impl SizingConfig {
    /// Risk cap as a fraction of account.
    pub fn max_risk_fraction(&self) -> f64 {
        self.max_risk_percent / 100.0
    }
}

/// Monte Carlo parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub monte_carlo_max_sims: usize,
    pub monte_carlo_max_trades: usize,
    pub seed: u64,
    /// Ruin is equity strictly below this fraction of the start.
    pub ruin_fraction: f64,
    pub min_win_rate: f64,
    pub max_win_rate: f64,
    pub min_reward_risk: f64,
    pub min_risk_per_trade: f64,
    pub max_risk_per_trade: f64,
    /// Steps at which percentile bands are recorded.
    pub band_checkpoints: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            monte_carlo_max_sims: 10_000,
            monte_carlo_max_trades: 1_000,
            seed: 42,
            ruin_fraction: 0.5,
            min_win_rate: 0.01,
            max_win_rate: 0.99,
            min_reward_risk: 0.1,
            min_risk_per_trade: 0.001,
            max_risk_per_trade: 0.10,
            band_checkpoints: 50,
        }
    }
}

/// Final decision gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub risk_of_ruin_cap: f64,
    /// Risk of ruin above this is allowed but flagged.
    pub risk_of_ruin_warning: f64,
    pub min_trade_score: f64,
    pub min_risk_reward: f64,
    /// Vol edge magnitude that adjusts signal-validation confidence.
    pub vol_edge_threshold: f64,
    /// Reject when this many risk flags accumulate.
    pub max_risk_flags: usize,
    /// Annualizes the one-session fat-tail range for expected value.
    pub trading_days_per_year: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            risk_of_ruin_cap: 0.20,
            risk_of_ruin_warning: 0.10,
            min_trade_score: 60.0,
            min_risk_reward: 1.5,
            vol_edge_threshold: 0.15,
            max_risk_flags: 3,
            trading_days_per_year: 252.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl AnalysisConfig {
    /// Parse configuration from TOML text and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AnalysisConfig =
            toml::from_str(contents).context("Failed to parse analysis config")?;
        config.validate().context("Invalid analysis config")?;
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> CoreResult<()> {
        let s = &self.signal;
        if s.rsi_period == 0 {
            return Err(invalid("signal.rsi_period must be positive"));
        }
        if !(0.0 < s.rsi_oversold && s.rsi_oversold < s.rsi_overbought && s.rsi_overbought < 100.0) {
            return Err(invalid("signal RSI thresholds must satisfy 0 < oversold < overbought < 100"));
        }
        if !(0.0 < s.pcr_oversold && s.pcr_oversold < s.pcr_overbought && s.pcr_overbought < 2.0) {
            return Err(invalid("signal PCR thresholds must satisfy 0 < oversold < overbought < 2"));
        }

        let r = &self.range;
        if r.lookback == 0 || r.fat_tail_window < 2 {
            return Err(invalid("range.lookback and range.fat_tail_window are too small"));
        }
        if r.atr_weight < 0.0 || r.implied_weight < 0.0 || (r.atr_weight + r.implied_weight - 1.0).abs() > 1e-9 {
            return Err(invalid("range.atr_weight + range.implied_weight must equal 1"));
        }
        if !(0.0 < r.confidence_level && r.confidence_level < 1.0)
            || !(0.5 < r.fat_tail_confidence && r.fat_tail_confidence < 1.0)
        {
            return Err(invalid("range confidence levels must lie in (0, 1)"));
        }
        if r.fat_tail_max_multiplier < 1.0 || r.trading_days_per_year <= 0.0 {
            return Err(invalid("range.fat_tail_max_multiplier must be >= 1"));
        }

        let st = &self.strategy;
        if st.lot_size == 0 || st.margin_pct <= 0.0 || st.domain_sigmas <= 0.0 || st.grid_points < 3 {
            return Err(invalid("strategy lot_size, margin_pct, domain_sigmas and grid_points must be positive"));
        }
        if !(0.0 <= st.delta_band_min && st.delta_band_min <= st.delta_band_max && st.delta_band_max <= 1.0) {
            return Err(invalid("strategy delta band must satisfy 0 <= min <= max <= 1"));
        }

        let z = &self.sizing;
        if !(0.0 < z.kelly_safety_factor && z.kelly_safety_factor <= 1.0) {
            return Err(invalid("sizing.kelly_safety_factor must lie in (0, 1]"));
        }
        if z.kelly_reference_sample == 0 {
            return Err(invalid("sizing.kelly_reference_sample must be positive"));
        }
        if !(0.0 < z.max_risk_percent && z.max_risk_percent <= 100.0) {
            return Err(invalid("sizing.max_risk_percent must lie in (0, 100]"));
        }
        if !(0.0 < z.vol_ratio_floor && z.vol_ratio_floor <= z.vol_ratio_ceiling) {
            return Err(invalid("sizing vol ratio bounds are inconsistent"));
        }
        if z.base_risk_percent <= 0.0 || z.baseline_volatility <= 0.0 {
            return Err(invalid("sizing.base_risk_percent and sizing.baseline_volatility must be positive"));
        }

        let m = &self.simulation;
        if m.monte_carlo_max_sims == 0 || m.monte_carlo_max_trades == 0 {
            return Err(invalid("simulation caps must be positive"));
        }
        if !(0.0 <= m.min_win_rate && m.min_win_rate <= m.max_win_rate && m.max_win_rate <= 1.0) {
            return Err(invalid("simulation win-rate bounds must satisfy 0 <= min <= max <= 1"));
        }
        if !(0.0 < m.min_risk_per_trade && m.min_risk_per_trade <= m.max_risk_per_trade && m.max_risk_per_trade < 1.0) {
            return Err(invalid("simulation risk-per-trade bounds are inconsistent"));
        }
        if !(0.0 < m.ruin_fraction && m.ruin_fraction < 1.0) {
            return Err(invalid("simulation.ruin_fraction must lie in (0, 1)"));
        }

        let d = &self.decision;
        if !(0.0..=1.0).contains(&d.risk_of_ruin_cap) || !(0.0..=100.0).contains(&d.min_trade_score) {
            return Err(invalid("decision gates out of range"));
        }
        if d.trading_days_per_year <= 0.0 {
            return Err(invalid("decision.trading_days_per_year must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> CoreError {
    CoreError::Config(message.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
