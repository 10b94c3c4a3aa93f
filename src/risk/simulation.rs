//! Monte Carlo equity simulation and risk of ruin.
//!
//! Each trade risks a fixed fraction of current equity and either wins
//! `risk × reward:risk` or loses `risk`. Trades are independent draws from a
//! seeded generator, so identical inputs give identical outputs. Serially
//! correlated losing streaks are not modelled and ruin is likely understated
//! for regime-dependent strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::analysis::stats::{mean, percentile_sorted, sort_floats};
use crate::config::SimulationConfig;
use crate::types::{CoreError, CoreResult, Warning, WarningKind};

/// Win-rate shifts applied by `stress_test`.
const STRESS_SCENARIOS: [(&str, f64); 4] = [
    ("base_case", 0.0),
    ("pessimistic", -0.10),
    ("optimistic", 0.10),
    ("worst_case", -0.20),
];

// ---------------------------------------------------------------------------
// Parameters and results
// ---------------------------------------------------------------------------

/// One simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub win_rate: f64,
    pub avg_rr: f64,
    /// Fraction of current equity risked per trade.
    pub risk_per_trade: f64,
    pub num_simulations: usize,
    pub num_trades: usize,
    pub starting_equity: f64,
}

impl SimulationParams {
    /// 1 000 paths of 200 trades from 100 000.
    pub fn new(win_rate: f64, avg_rr: f64, risk_per_trade: f64) -> Self {
        Self {
            win_rate,
            avg_rr,
            risk_per_trade,
            num_simulations: 1_000,
            num_trades: 200,
            starting_equity: 100_000.0,
        }
    }
}

/// Terminal equity at the standard percentiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentileOutcomes {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

impl PercentileOutcomes {
    fn from_sorted(sorted: &[f64]) -> Self {
        let at = |p: f64| percentile_sorted(sorted, p).unwrap_or_default();
        Self {
            p5: at(5.0),
            p25: at(25.0),
            p50: at(50.0),
            p75: at(75.0),
            p95: at(95.0),
        }
    }
}

/// Per-path maximum drawdown as a fraction, always ≤ 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownStats {
    pub mean: f64,
    pub median: f64,
    /// Most negative path drawdown.
    pub worst: f64,
}

/// Equity percentiles after `trade` trades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileBand {
    pub trade: usize,
    pub equity: PercentileOutcomes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySimResult {
    /// Parameters after clamping and capping.
    pub params: SimulationParams,
    pub terminal: PercentileOutcomes,
    pub expected_equity: f64,
    pub risk_of_ruin: f64,
    pub drawdown: DrawdownStats,
    pub probability_of_profit: f64,
    pub avg_return_pct: f64,
    pub bands: Vec<PercentileBand>,
    pub warnings: Vec<Warning>,
}

impl fmt::Display for EquitySimResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} paths x {} trades: E[equity] {:.0} (p5 {:.0}, p95 {:.0}) | ruin {:.2}% | worst DD {:.1}% | P(profit) {:.1}%",
            self.params.num_simulations,
            self.params.num_trades,
            self.expected_equity,
            self.terminal.p5,
            self.terminal.p95,
            self.risk_of_ruin * 100.0,
            self.drawdown.worst * 100.0,
            self.probability_of_profit * 100.0,
        )
    }
}

/// One win-rate shock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    pub win_rate_shift: f64,
    pub win_rate: f64,
    pub expected_equity: f64,
    pub risk_of_ruin: f64,
    pub avg_return_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeVerdict {
    Excellent,
    Good,
    Slight,
    Negative,
}

impl fmt::Display for EdgeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeVerdict::Excellent => write!(f, "Excellent edge"),
            EdgeVerdict::Good => write!(f, "Good edge"),
            EdgeVerdict::Slight => write!(f, "Slight edge"),
            EdgeVerdict::Negative => write!(f, "Negative expectancy - do not trade"),
        }
    }
}

/// Closed-form expectancy check without simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuickAssessment {
    /// Expected R-multiple per trade: p·b − (1 − p).
    pub ev_per_trade: f64,
    pub kelly_fraction: f64,
    pub recommended_risk: f64,
    pub verdict: EdgeVerdict,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct RiskSimulator {
    config: SimulationConfig,
}

impl RiskSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Clamp, cap and simulate.
    pub fn simulate_equity_paths(&self, params: &SimulationParams) -> CoreResult<EquitySimResult> {
        let (used, warnings) = self.prepare(params)?;
        for w in &warnings {
            warn!(warning = %w, "Simulation input adjusted");
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let win_return = used.risk_per_trade * used.avg_rr;
        let loss_return = -used.risk_per_trade;
        let ruin_level = used.starting_equity * self.config.ruin_fraction;
        let checkpoints = checkpoint_steps(used.num_trades, self.config.band_checkpoints);

        let mut terminal = Vec::with_capacity(used.num_simulations);
        let mut drawdowns = Vec::with_capacity(used.num_simulations);
        let mut band_samples: Vec<Vec<f64>> = vec![Vec::with_capacity(used.num_simulations); checkpoints.len()];
        let mut ruined = 0usize;

        for _ in 0..used.num_simulations {
            let mut equity = used.starting_equity;
            let mut peak = equity;
            let mut max_dd = 0.0f64;
            let mut hit_ruin = false;
            let mut next_checkpoint = 0;

            for step in 0..=used.num_trades {
                if step > 0 {
                    let u: f64 = rng.gen();
                    equity *= 1.0 + if u < used.win_rate { win_return } else { loss_return };
                    peak = peak.max(equity);
                    max_dd = max_dd.min((equity - peak) / peak);
                    hit_ruin |= equity < ruin_level;
                }
                if checkpoints.get(next_checkpoint) == Some(&step) {
                    band_samples[next_checkpoint].push(equity);
                    next_checkpoint += 1;
                }
            }

            if hit_ruin {
                ruined += 1;
            }
            terminal.push(equity);
            drawdowns.push(max_dd);
        }

        let n = used.num_simulations as f64;
        let expected_equity = mean(&terminal).unwrap_or(used.starting_equity);
        let profitable = terminal.iter().filter(|&&e| e > used.starting_equity).count();
        sort_floats(&mut terminal);
        sort_floats(&mut drawdowns);

        let bands = checkpoints
            .iter()
            .zip(band_samples.iter_mut())
            .map(|(&trade, samples)| {
                sort_floats(samples);
                PercentileBand {
                    trade,
                    equity: PercentileOutcomes::from_sorted(samples),
                }
            })
            .collect();

        let result = EquitySimResult {
            params: used,
            terminal: PercentileOutcomes::from_sorted(&terminal),
            expected_equity,
            risk_of_ruin: ruined as f64 / n,
            drawdown: DrawdownStats {
                mean: mean(&drawdowns).unwrap_or_default(),
                median: percentile_sorted(&drawdowns, 50.0).unwrap_or_default(),
                worst: drawdowns.first().copied().unwrap_or_default(),
            },
            probability_of_profit: profitable as f64 / n,
            avg_return_pct: (expected_equity / used.starting_equity - 1.0) * 100.0,
            bands,
            warnings,
        };
        info!(result = %result, "Equity simulation complete");
        Ok(result)
    }

    /// Re-run at shocked win rates (clipped to [0.05, 0.95]) with 500 paths
    /// of 100 trades.
    pub fn stress_test(&self, base_win_rate: f64, avg_rr: f64, risk_per_trade: f64) -> CoreResult<Vec<StressScenario>> {
        STRESS_SCENARIOS
            .iter()
            .map(|&(name, shift)| {
                let win_rate = (base_win_rate + shift).clamp(0.05, 0.95);
                let result = self.simulate_equity_paths(&SimulationParams {
                    num_simulations: 500,
                    num_trades: 100,
                    ..SimulationParams::new(win_rate, avg_rr, risk_per_trade)
                })?;
                Ok(StressScenario {
                    name: name.to_string(),
                    win_rate_shift: shift,
                    win_rate: result.params.win_rate,
                    expected_equity: result.expected_equity,
                    risk_of_ruin: result.risk_of_ruin,
                    avg_return_pct: result.avg_return_pct,
                })
            })
            .collect()
    }

    fn prepare(&self, params: &SimulationParams) -> CoreResult<(SimulationParams, Vec<Warning>)> {
        let c = &self.config;
        for (field, value) in [
            ("win_rate", params.win_rate),
            ("avg_rr", params.avg_rr),
            ("risk_per_trade", params.risk_per_trade),
        ] {
            if !value.is_finite() {
                return Err(CoreError::invalid(field, format!("{field} must be finite")));
            }
        }
        if !params.starting_equity.is_finite() || params.starting_equity <= 0.0 {
            return Err(CoreError::invalid("starting_equity", "starting equity must be positive"));
        }
        if params.num_simulations == 0 || params.num_trades == 0 {
            return Err(CoreError::invalid("num_simulations", "simulation and trade counts must be positive"));
        }

        let mut warnings = Vec::new();
        let mut clamp = |field: &str, value: f64, lo: f64, hi: f64| {
            let used = value.max(lo).min(hi);
            if used != value {
                warnings.push(Warning::new(
                    WarningKind::InputClamp,
                    format!("{field} {value} clamped to {used}"),
                ));
            }
            used
        };
        let win_rate = clamp("win_rate", params.win_rate, c.min_win_rate, c.max_win_rate);
        let avg_rr = clamp("avg_rr", params.avg_rr, c.min_reward_risk, f64::INFINITY);
        let risk_per_trade = clamp(
            "risk_per_trade",
            params.risk_per_trade,
            c.min_risk_per_trade,
            c.max_risk_per_trade,
        );

        let mut cap = |field: &str, value: usize, max: usize| {
            if value > max {
                warnings.push(Warning::new(
                    WarningKind::ComputationCap,
                    format!("{field} {value} capped at {max}"),
                ));
                max
            } else {
                value
            }
        };
        let num_simulations = cap("num_simulations", params.num_simulations, c.monte_carlo_max_sims);
        let num_trades = cap("num_trades", params.num_trades, c.monte_carlo_max_trades);

        let used = SimulationParams {
            win_rate,
            avg_rr,
            risk_per_trade,
            num_simulations,
            num_trades,
            starting_equity: params.starting_equity,
        };
        debug!(?used, "Simulation parameters");
        Ok((used, warnings))
    }
}

/// Trade steps, including 0 and the last trade, at which bands are kept.
fn checkpoint_steps(num_trades: usize, max_points: usize) -> Vec<usize> {
    let max_points = max_points.max(2);
    if num_trades < max_points {
        return (0..=num_trades).collect();
    }
    let mut steps: Vec<usize> = (0..max_points)
        .map(|i| i * num_trades / (max_points - 1))
        .collect();
    steps.dedup();
    steps
}

/// Win rate at which expectancy is zero: 1 / (1 + rr).
pub fn breakeven_win_rate(avg_rr: f64) -> CoreResult<f64> {
    if !avg_rr.is_finite() || avg_rr <= 0.0 {
        return Err(CoreError::invalid("avg_rr", format!("reward:risk must be positive, got {avg_rr}")));
    }
    Ok(1.0 / (1.0 + avg_rr))
}

/// Win rate needed for an expected R-multiple of `target_return` per trade:
/// (target + 1) / (rr + 1).
pub fn required_win_rate(avg_rr: f64, target_return: f64) -> CoreResult<f64> {
    if !avg_rr.is_finite() || avg_rr <= 0.0 {
        return Err(CoreError::invalid("avg_rr", format!("reward:risk must be positive, got {avg_rr}")));
    }
    Ok((target_return + 1.0) / (avg_rr + 1.0))
}

/// Expectancy, raw Kelly and a quarter-Kelly risk suggestion.
pub fn quick_assessment(win_rate: f64, avg_rr: f64, risk_per_trade: f64) -> CoreResult<QuickAssessment> {
    if !(0.0..=1.0).contains(&win_rate) {
        return Err(CoreError::invalid("win_rate", format!("win rate must lie in [0, 1], got {win_rate}")));
    }
    if !avg_rr.is_finite() || avg_rr <= 0.0 {
        return Err(CoreError::invalid("avg_rr", format!("reward:risk must be positive, got {avg_rr}")));
    }
    let ev_per_trade = win_rate * avg_rr - (1.0 - win_rate);
    let kelly_fraction = (ev_per_trade / avg_rr).max(0.0);
    let verdict = if ev_per_trade > 0.30 {
        EdgeVerdict::Excellent
    } else if ev_per_trade > 0.15 {
        EdgeVerdict::Good
    } else if ev_per_trade > 0.0 {
        EdgeVerdict::Slight
    } else {
        EdgeVerdict::Negative
    };
    let recommended_risk = if kelly_fraction > 0.0 {
        risk_per_trade.min(kelly_fraction * 0.25)
    } else {
        0.0
    };
    Ok(QuickAssessment {
        ev_per_trade,
        kelly_fraction,
        recommended_risk,
        verdict,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_simulator() -> RiskSimulator {
        RiskSimulator::new(SimulationConfig::default())
    }

    fn make_params(win_rate: f64) -> SimulationParams {
        SimulationParams {
            num_simulations: 500,
            num_trades: 200,
            ..SimulationParams::new(win_rate, 1.0, 0.05)
        }
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let sim = make_simulator();
        let a = sim.simulate_equity_paths(&make_params(0.55)).unwrap();
        let b = sim.simulate_equity_paths(&make_params(0.55)).unwrap();
        assert_eq!(a, b);

        let other = RiskSimulator::new(SimulationConfig {
            seed: 7,
            ..Default::default()
        });
        let c = other.simulate_equity_paths(&make_params(0.55)).unwrap();
        assert_ne!(a.terminal, c.terminal);
    }

    #[test]
    fn test_lower_win_rate_has_higher_ruin() {
        let sim = make_simulator();
        let weak = sim.simulate_equity_paths(&make_params(0.4)).unwrap();
        let strong = sim.simulate_equity_paths(&make_params(0.6)).unwrap();
        assert!(weak.risk_of_ruin > strong.risk_of_ruin);
        assert!(weak.expected_equity < strong.expected_equity);
    }

    #[test]
    fn test_certain_wins_never_ruin() {
        let sim = RiskSimulator::new(SimulationConfig {
            min_win_rate: 0.0,
            max_win_rate: 1.0,
            ..Default::default()
        });
        let result = sim.simulate_equity_paths(&make_params(1.0)).unwrap();
        assert!(result.warnings.is_empty());
        assert_eq!(result.risk_of_ruin, 0.0);
        assert_eq!(result.drawdown.worst, 0.0);
        assert_eq!(result.probability_of_profit, 1.0);
        // Every path is the same strictly increasing sequence
        assert_relative_eq!(result.terminal.p5, 100_000.0 * 1.05f64.powi(200), max_relative = 1e-9);
        assert_eq!(result.terminal.p5, result.terminal.p95);
        for pair in result.bands.windows(2) {
            assert!(pair[1].equity.p5 > pair[0].equity.p5);
        }
    }

    #[test]
    fn test_default_bounds_clamp_win_rate() {
        let result = make_simulator().simulate_equity_paths(&make_params(1.0)).unwrap();
        assert_eq!(result.params.win_rate, 0.99);
        assert!(result.warnings.iter().any(|w| w.kind == WarningKind::InputClamp));
        // At 5% risk and 1:1, one loss in a hundred cannot halve equity
        assert_eq!(result.risk_of_ruin, 0.0);
    }

    #[test]
    fn test_caps_are_reported() {
        let sim = make_simulator();
        let result = sim
            .simulate_equity_paths(&SimulationParams {
                num_simulations: 20_000,
                num_trades: 5,
                ..SimulationParams::new(0.5, 1.5, 0.5)
            })
            .unwrap();
        assert_eq!(result.params.num_simulations, 10_000);
        assert_eq!(result.params.risk_per_trade, 0.10);
        assert!(result.warnings.iter().any(|w| w.kind == WarningKind::ComputationCap));
        assert!(result.warnings.iter().any(|w| w.kind == WarningKind::InputClamp));
    }

    #[test]
    fn test_result_shape() {
        let result = make_simulator().simulate_equity_paths(&make_params(0.5)).unwrap();
        let t = result.terminal;
        assert!(t.p5 <= t.p25 && t.p25 <= t.p50 && t.p50 <= t.p75 && t.p75 <= t.p95);
        assert!(result.drawdown.worst <= result.drawdown.median);
        assert!(result.drawdown.median <= 0.0 && result.drawdown.mean <= 0.0);
        assert!((0.0..=1.0).contains(&result.risk_of_ruin));
        assert!(result.bands.len() <= 50);
        assert_eq!(result.bands[0].trade, 0);
        assert_eq!(result.bands[0].equity.p5, 100_000.0);
        assert_eq!(result.bands.last().unwrap().trade, 200);
    }

    #[test]
    fn test_rejects_invalid_params() {
        let sim = make_simulator();
        assert!(sim.simulate_equity_paths(&SimulationParams::new(f64::NAN, 1.0, 0.02)).is_err());
        let mut zero = SimulationParams::new(0.5, 1.0, 0.02);
        zero.num_trades = 0;
        assert!(sim.simulate_equity_paths(&zero).is_err());
        zero = SimulationParams::new(0.5, 1.0, 0.02);
        zero.starting_equity = 0.0;
        assert!(sim.simulate_equity_paths(&zero).is_err());
    }

    #[test]
    fn test_checkpoint_steps() {
        assert_eq!(checkpoint_steps(3, 50), vec![0, 1, 2, 3]);
        let steps = checkpoint_steps(1000, 50);
        assert_eq!(steps.len(), 50);
        assert_eq!(steps[0], 0);
        assert_eq!(*steps.last().unwrap(), 1000);
    }

    #[test]
    fn test_stress_test_ordering() {
        let scenarios = make_simulator().stress_test(0.5, 1.5, 0.05).unwrap();
        assert_eq!(scenarios.len(), 4);
        let by_name = |n: &str| scenarios.iter().find(|s| s.name == n).unwrap();
        assert_relative_eq!(by_name("worst_case").win_rate, 0.3);
        assert!(by_name("worst_case").risk_of_ruin >= by_name("optimistic").risk_of_ruin);
        assert!(by_name("pessimistic").expected_equity < by_name("optimistic").expected_equity);
    }

    #[test]
    fn test_win_rate_formulas() {
        assert_relative_eq!(breakeven_win_rate(2.0).unwrap(), 1.0 / 3.0);
        assert_relative_eq!(required_win_rate(1.0, 0.2).unwrap(), 0.6);
        assert!(breakeven_win_rate(0.0).is_err());

        let q = quick_assessment(0.6, 2.0, 0.02).unwrap();
        assert_relative_eq!(q.ev_per_trade, 0.8);
        assert_eq!(q.verdict, EdgeVerdict::Excellent);
        assert_relative_eq!(q.recommended_risk, 0.02);
        assert_eq!(quick_assessment(0.3, 1.0, 0.02).unwrap().verdict, EdgeVerdict::Negative);
    }
}
