//! Position sizing.
//!
//! Kelly criterion with a quarter-Kelly safety factor and a sample-size
//! uncertainty discount, fixed-fraction and volatility-adjusted risk, and
//! the conversion of a risk fraction into whole lots of a strategy.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::config::SizingConfig;
use crate::options::strategy::{PayoffBound, StrategyMetrics};
use crate::types::{CoreError, CoreResult, Warning, WarningKind};

/// Risk levels, in percent, used when no ladder is given.
pub const DEFAULT_LADDER: [f64; 4] = [1.0, 2.0, 3.0, 5.0];

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SizingMethod {
    Kelly,
    FixedFraction,
    VolatilityAdjusted,
}

impl fmt::Display for SizingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingMethod::Kelly => write!(f, "kelly"),
            SizingMethod::FixedFraction => write!(f, "fixed"),
            SizingMethod::VolatilityAdjusted => write!(f, "volatility_adjusted"),
        }
    }
}

/// Every step of the Kelly calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KellyAdjustment {
    pub win_rate: f64,
    pub avg_rr: f64,
    pub sample_size: usize,
    /// (p·b − q)/b, may be negative.
    pub full_kelly: f64,
    pub safety_factor: f64,
    /// min(1, n / reference sample).
    pub uncertainty_factor: f64,
    /// max(0, full) × safety × uncertainty, before the risk cap.
    pub adjusted: f64,
    /// `adjusted` after the risk cap.
    pub fraction: f64,
    pub capped: bool,
    pub warnings: Vec<Warning>,
}

/// Fixed-fraction allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAllocation {
    pub fraction: f64,
    pub capital_at_risk: Decimal,
    pub capped: bool,
    pub warnings: Vec<Warning>,
}

/// Volatility-regime adjustment of a base risk fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityAdjustment {
    /// baseline / current before clipping.
    pub raw_ratio: f64,
    pub ratio: f64,
    pub fraction: f64,
    pub capped: bool,
}

/// Whole-lot position for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeResult {
    pub method: SizingMethod,
    /// Risk fraction of the account targeted by the method.
    pub fraction: f64,
    pub lots: u32,
    /// account × fraction.
    pub risk_budget: Decimal,
    /// Loss per strategy lot used for the conversion.
    pub risk_per_lot: Decimal,
    /// lots × risk per lot.
    pub capital_at_risk: Decimal,
    /// capital at risk as percent of account.
    pub risk_pct: f64,
    pub kelly: Option<KellyAdjustment>,
    pub warnings: Vec<Warning>,
}

impl fmt::Display for SizeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} lots, risk {} of budget {} ({:.2}% of account)",
            self.method, self.lots, self.capital_at_risk, self.risk_budget, self.risk_pct
        )
    }
}

/// Inputs shared by every sizing method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingRequest {
    pub account: Decimal,
    pub win_rate: f64,
    pub avg_rr: f64,
    pub sample_size: usize,
    /// Current IV or VIX in percent; needed by the volatility method.
    pub current_volatility: Option<f64>,
}

/// Results of all three methods side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingComparison {
    pub kelly: SizeResult,
    pub fixed: SizeResult,
    pub volatility_adjusted: SizeResult,
}

impl SizingComparison {
    /// The method risking the least capital.
    pub fn most_conservative(&self) -> &SizeResult {
        [&self.kelly, &self.fixed, &self.volatility_adjusted]
            .into_iter()
            .min_by(|a, b| a.capital_at_risk.cmp(&b.capital_at_risk).then(a.fraction.total_cmp(&b.fraction)))
            .unwrap_or(&self.fixed)
    }
}

/// One rung of a fixed-fraction risk ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderRung {
    pub risk_percent: f64,
    pub result: SizeResult,
}

/// Fraction of the largest loss that maximised terminal wealth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalF {
    pub fraction: f64,
    pub terminal_wealth: f64,
    pub largest_loss: f64,
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Kelly fraction with safety and sample-size discounts.
    ///
    /// Kelly formula: f* = (bp − q) / b
    /// where b = average reward:risk, p = win rate, q = 1 − p.
    pub fn kelly_fraction(&self, win_rate: f64, avg_rr: f64, sample_size: usize) -> CoreResult<KellyAdjustment> {
        if !win_rate.is_finite() || !(0.0..=1.0).contains(&win_rate) {
            return Err(CoreError::invalid("win_rate", format!("win rate must lie in [0, 1], got {win_rate}")));
        }
        if !avg_rr.is_finite() || avg_rr <= 0.0 {
            return Err(CoreError::invalid("avg_rr", format!("reward:risk must be positive, got {avg_rr}")));
        }

        let mut warnings = Vec::new();
        let full_kelly = (avg_rr * win_rate - (1.0 - win_rate)) / avg_rr;
        let safety_factor = self.config.kelly_safety_factor;
        let uncertainty_factor = (sample_size as f64 / self.config.kelly_reference_sample as f64).min(1.0);

        if sample_size < self.config.kelly_sample_minimum {
            warnings.push(Warning::new(
                WarningKind::SmallSample,
                format!(
                    "sample size {sample_size} < {}: win rate estimate unreliable, Kelly scaled by {uncertainty_factor:.2}",
                    self.config.kelly_sample_minimum
                ),
            ));
        }
        if full_kelly <= 0.0 {
            warnings.push(Warning::new(
                WarningKind::Sizing,
                format!("Kelly fraction {full_kelly:.4} <= 0: no edge at win rate {win_rate:.2}"),
            ));
        }

        let adjusted = full_kelly.max(0.0) * safety_factor * uncertainty_factor;
        let cap = self.config.max_risk_fraction();
        let capped = adjusted > cap;
        let fraction = adjusted.min(cap);

        debug!(
            raw_kelly = format!("{:.2}%", full_kelly * 100.0),
            adjusted = format!("{:.2}%", adjusted * 100.0),
            fraction = format!("{:.2}%", fraction * 100.0),
            sample_size,
            "Kelly sized"
        );

        Ok(KellyAdjustment {
            win_rate,
            avg_rr,
            sample_size,
            full_kelly,
            safety_factor,
            uncertainty_factor,
            adjusted,
            fraction,
            capped,
            warnings,
        })
    }

    /// account × risk fraction, capped.
    pub fn fixed_fraction(&self, account: Decimal, risk_fraction: f64) -> CoreResult<RiskAllocation> {
        validate_account(account)?;
        if !risk_fraction.is_finite() || risk_fraction < 0.0 {
            return Err(CoreError::invalid(
                "risk_fraction",
                format!("risk fraction must be >= 0, got {risk_fraction}"),
            ));
        }
        let cap = self.config.max_risk_fraction();
        let capped = risk_fraction > cap;
        let fraction = risk_fraction.min(cap);
        let mut warnings = Vec::new();
        if capped {
            warnings.push(Warning::new(
                WarningKind::Sizing,
                format!(
                    "requested risk {:.2}% capped at {:.2}%",
                    risk_fraction * 100.0,
                    cap * 100.0
                ),
            ));
        }
        Ok(RiskAllocation {
            fraction,
            capital_at_risk: money(account, fraction)?,
            capped,
            warnings,
        })
    }

    /// Scale a base risk fraction by baseline/current volatility, clipped to
    /// the configured ratio bounds, then capped. Volatilities share units.
    pub fn volatility_adjusted_size(
        &self,
        base_risk: f64,
        current_vol: f64,
        baseline_vol: f64,
    ) -> CoreResult<VolatilityAdjustment> {
        if !base_risk.is_finite() || base_risk < 0.0 {
            return Err(CoreError::invalid("base_risk", format!("base risk must be >= 0, got {base_risk}")));
        }
        if !current_vol.is_finite() || current_vol <= 0.0 || !baseline_vol.is_finite() || baseline_vol <= 0.0 {
            return Err(CoreError::invalid(
                "volatility",
                format!("volatilities must be positive, got current {current_vol} baseline {baseline_vol}"),
            ));
        }
        let raw_ratio = baseline_vol / current_vol;
        let ratio = raw_ratio.clamp(self.config.vol_ratio_floor, self.config.vol_ratio_ceiling);
        let scaled = base_risk * ratio;
        let cap = self.config.max_risk_fraction();
        Ok(VolatilityAdjustment {
            raw_ratio,
            ratio,
            fraction: scaled.min(cap),
            capped: scaled > cap,
        })
    }

    /// Size a strategy with one method.
    pub fn size_position(
        &self,
        request: &SizingRequest,
        method: SizingMethod,
        metrics: &StrategyMetrics,
    ) -> CoreResult<SizeResult> {
        validate_account(request.account)?;
        let base_risk = self.config.base_risk_percent / 100.0;
        let mut warnings = Vec::new();
        let mut kelly = None;

        let fraction = match method {
            SizingMethod::Kelly => {
                let k = self.kelly_fraction(request.win_rate, request.avg_rr, request.sample_size)?;
                warnings.extend(k.warnings.iter().cloned());
                let fraction = k.fraction;
                kelly = Some(k);
                fraction
            }
            SizingMethod::FixedFraction => {
                let allocation = self.fixed_fraction(request.account, base_risk)?;
                warnings.extend(allocation.warnings);
                allocation.fraction
            }
            SizingMethod::VolatilityAdjusted => match request.current_volatility {
                Some(current) => {
                    let adj = self.volatility_adjusted_size(base_risk, current, self.config.baseline_volatility)?;
                    if current > self.config.high_volatility {
                        warnings.push(Warning::new(
                            WarningKind::Sizing,
                            format!("high volatility {current:.1}%: size scaled by {:.2}", adj.ratio),
                        ));
                    }
                    adj.fraction
                }
                None => {
                    warnings.push(Warning::new(
                        WarningKind::Sizing,
                        "no current volatility supplied; using fixed fraction",
                    ));
                    base_risk.min(self.config.max_risk_fraction())
                }
            },
        };

        let result = self.allocate(method, fraction, request.account, metrics, kelly, warnings)?;
        info!(result = %result, "Position sized");
        Ok(result)
    }

    /// Kelly, fixed and volatility-adjusted sizes for the same strategy.
    pub fn compare_sizing_methods(
        &self,
        request: &SizingRequest,
        metrics: &StrategyMetrics,
    ) -> CoreResult<SizingComparison> {
        Ok(SizingComparison {
            kelly: self.size_position(request, SizingMethod::Kelly, metrics)?,
            fixed: self.size_position(request, SizingMethod::FixedFraction, metrics)?,
            volatility_adjusted: self.size_position(request, SizingMethod::VolatilityAdjusted, metrics)?,
        })
    }

    /// Fixed-fraction sizes at several risk levels (percent of account).
    pub fn risk_ladder(
        &self,
        account: Decimal,
        metrics: &StrategyMetrics,
        levels: &[f64],
    ) -> CoreResult<Vec<LadderRung>> {
        let levels = if levels.is_empty() { &DEFAULT_LADDER[..] } else { levels };
        levels
            .iter()
            .map(|&risk_percent| {
                let allocation = self.fixed_fraction(account, risk_percent / 100.0)?;
                let result = self.allocate(
                    SizingMethod::FixedFraction,
                    allocation.fraction,
                    account,
                    metrics,
                    None,
                    allocation.warnings,
                )?;
                Ok(LadderRung { risk_percent, result })
            })
            .collect()
    }

    /// Ralph Vince optimal-f over a realised P&L sequence: the fraction of
    /// the largest loss, searched on 0.01..=0.50, that maximises terminal
    /// wealth.
    pub fn optimal_f(&self, pnls: &[f64], starting_capital: f64) -> CoreResult<OptimalF> {
        if pnls.len() < self.config.optimal_f_min_trades {
            return Err(CoreError::insufficient("closed trades", self.config.optimal_f_min_trades, pnls.len()));
        }
        if !starting_capital.is_finite() || starting_capital <= 0.0 {
            return Err(CoreError::invalid("starting_capital", "starting capital must be positive"));
        }
        let largest_loss = -pnls.iter().cloned().fold(0.0, f64::min);
        if largest_loss <= 0.0 {
            return Err(CoreError::insufficient("losing trades", 1, 0));
        }

        let mut best = OptimalF {
            fraction: 0.0,
            terminal_wealth: f64::NEG_INFINITY,
            largest_loss,
        };
        for step in 1..=50 {
            let f = step as f64 / 100.0;
            let mut wealth = starting_capital;
            for pnl in pnls {
                let units = f * wealth / largest_loss;
                wealth += units * pnl;
                if wealth <= 0.0 {
                    wealth = 0.0;
                    break;
                }
            }
            if wealth > best.terminal_wealth {
                best.fraction = f;
                best.terminal_wealth = wealth;
            }
        }
        debug!(fraction = best.fraction, terminal = format!("{:.2}", best.terminal_wealth), "Optimal f");
        Ok(best)
    }

    /// Allocation in percent inversely proportional to each volatility.
    pub fn risk_parity(&self, volatilities: &[f64]) -> CoreResult<Vec<f64>> {
        if volatilities.is_empty() {
            return Err(CoreError::invalid("volatilities", "no volatilities supplied"));
        }
        if let Some(bad) = volatilities.iter().find(|v| !v.is_finite() || **v <= 0.0) {
            return Err(CoreError::invalid("volatilities", format!("volatility must be positive, got {bad}")));
        }
        let inverse: Vec<f64> = volatilities.iter().map(|v| 1.0 / v).collect();
        let total: f64 = inverse.iter().sum();
        Ok(inverse.iter().map(|i| i / total * 100.0).collect())
    }

    /// Convert a risk fraction into whole lots; never rounds up.
    fn allocate(
        &self,
        method: SizingMethod,
        fraction: f64,
        account: Decimal,
        metrics: &StrategyMetrics,
        kelly: Option<KellyAdjustment>,
        mut warnings: Vec<Warning>,
    ) -> CoreResult<SizeResult> {
        let risk_budget = money(account, fraction)?;
        if metrics.max_loss == PayoffBound::Unbounded {
            warnings.push(Warning::new(
                WarningKind::Sizing,
                format!(
                    "max loss unbounded: sizing against estimated margin {:.0}",
                    metrics.estimated_margin
                ),
            ));
        }
        let risk_per_lot = Decimal::from_f64(metrics.risk_per_unit())
            .ok_or_else(|| CoreError::invalid("max_loss", "loss per lot is not representable"))?
            .round_dp(2);

        let lots = if risk_per_lot > Decimal::ZERO {
            (risk_budget / risk_per_lot).floor().to_u32().unwrap_or(u32::MAX)
        } else {
            warnings.push(Warning::new(WarningKind::Sizing, "cannot size: max loss is zero"));
            0
        };

        if lots == 0 && risk_per_lot > Decimal::ZERO {
            warnings.push(Warning::new(
                WarningKind::Sizing,
                format!("risk budget {risk_budget} is below one lot's loss of {risk_per_lot}: 0 lots"),
            ));
        }
        if lots > self.config.max_lots_warning {
            warnings.push(Warning::new(WarningKind::Sizing, format!("large position: {lots} lots")));
        }

        let capital_at_risk = risk_per_lot * Decimal::from(lots);
        let risk_pct = (capital_at_risk / account * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0);

        Ok(SizeResult {
            method,
            fraction,
            lots,
            risk_budget,
            risk_per_lot,
            capital_at_risk,
            risk_pct,
            kelly,
            warnings,
        })
    }
}

fn validate_account(account: Decimal) -> CoreResult<()> {
    if account <= Decimal::ZERO {
        return Err(CoreError::invalid("account", format!("account must be positive, got {account}")));
    }
    Ok(())
}

/// account × fraction rounded to paise.
fn money(account: Decimal, fraction: f64) -> CoreResult<Decimal> {
    let fraction = Decimal::from_f64(fraction)
        .ok_or_else(|| CoreError::invalid("fraction", format!("fraction {fraction} is not representable")))?;
    Ok((account * fraction).round_dp(2))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
