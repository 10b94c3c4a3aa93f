//! Trade/no-trade decision.
//!
//! Combines volatility edge, probability-weighted expected value, a weighted
//! trade score, directional-signal validation and simulated risk of ruin
//! into one `Decision` with reasoning, risk flags and every upstream warning.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::DecisionConfig;
use crate::options::pricing::{years_from_days, TerminalDistribution};
use crate::options::strategy::{profit_probability, Direction, PayoffBound, Strategy, StrategyMetrics};
use crate::risk::simulation::EquitySimResult;
use crate::risk::sizing::SizeResult;
use crate::types::{CoreError, CoreResult, OptionChain, RangeForecast, Signal, SignalKind, Warning, WarningKind};

/// Integration steps for expected value.
const EV_STEPS: usize = 2000;
/// Integration half-width in standard deviations.
const EV_WIDTH: f64 = 6.0;
/// Near-ATM band used by the liquidity score, as a fraction of spot.
const LIQUIDITY_BAND: f64 = 0.05;

const WEIGHT_VOL_EDGE: f64 = 0.25;
const WEIGHT_EXPECTED_VALUE: f64 = 0.25;
const WEIGHT_REGIME: f64 = 0.20;
const WEIGHT_OI_SUPPORT: f64 = 0.15;
const WEIGHT_LIQUIDITY: f64 = 0.15;

// ---------------------------------------------------------------------------
// Component records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolEdgeLabel {
    StrongPremiumSelling,
    ModeratePremiumSelling,
    Neutral,
    ModerateLongVol,
    StrongLongVol,
}

impl fmt::Display for VolEdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolEdgeLabel::StrongPremiumSelling => "Strong premium-selling edge",
            VolEdgeLabel::ModeratePremiumSelling => "Moderate premium-selling edge",
            VolEdgeLabel::Neutral => "Neutral volatility",
            VolEdgeLabel::ModerateLongVol => "Moderate long-vol edge",
            VolEdgeLabel::StrongLongVol => "Strong long-vol edge",
        };
        write!(f, "{s}")
    }
}

/// Implied vs realised volatility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolEdge {
    /// (implied − realised) / implied, clamped to [−1, 1].
    pub score: f64,
    pub raw_edge: f64,
    pub implied_vol: f64,
    pub realized_vol: f64,
    pub label: VolEdgeLabel,
}

/// Probability-weighted payoff of a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedValue {
    pub expected_value: f64,
    pub win_probability: f64,
    /// Max profit / |max loss|; for unbounded legs, expected gain over
    /// expected loss. `None` when no loss is possible.
    pub risk_reward_ratio: Option<f64>,
    /// Annualized volatility the integral used.
    pub volatility_used: f64,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreLabel {
    Low,
    Medium,
    High,
}

impl fmt::Display for ScoreLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreLabel::Low => write!(f, "Low"),
            ScoreLabel::Medium => write!(f, "Medium"),
            ScoreLabel::High => write!(f, "High"),
        }
    }
}

/// Weighted contribution of each input, in score points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub vol_edge: f64,
    pub expected_value: f64,
    pub regime: f64,
    pub oi_support: f64,
    pub liquidity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeScore {
    /// 0–100.
    pub score: f64,
    pub label: ScoreLabel,
    pub components: ScoreComponents,
}

/// Outcome of checking a strategy against the directional signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalValidation {
    pub allowed: bool,
    /// 0–100.
    pub confidence: f64,
    pub signal: SignalKind,
    pub signal_confidence: f64,
    pub reasons: Vec<String>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    ExtremeGreed,
    ModerateGreed,
    Balanced,
    ModerateFear,
    ExtremeFear,
}

/// Contrarian PCR reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAnalysis {
    pub regime: MarketRegime,
    pub bias: String,
    pub strategy_hint: String,
    pub pcr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskFlag {
    LowVolEdge,
    NegativeExpectedValue,
    PoorRiskReward,
    LowTradeScore,
    SignalRejected,
    HighRiskOfRuin,
    ZeroLots,
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskFlag::LowVolEdge => "Low vol edge",
            RiskFlag::NegativeExpectedValue => "Negative EV",
            RiskFlag::PoorRiskReward => "Poor R:R",
            RiskFlag::LowTradeScore => "Low trade score",
            RiskFlag::SignalRejected => "Signal validation failed",
            RiskFlag::HighRiskOfRuin => "High risk of ruin",
            RiskFlag::ZeroLots => "Zero lots",
        };
        write!(f, "{s}")
    }
}

/// Everything the final decision is made from.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs<'a> {
    pub vol_edge: &'a VolEdge,
    pub expected_value: &'a ExpectedValue,
    pub trade_score: &'a TradeScore,
    pub validation: &'a SignalValidation,
    pub simulation: Option<&'a EquitySimResult>,
    pub sizing: Option<&'a SizeResult>,
    /// Warnings from signal, range and strategy evaluation.
    pub upstream_warnings: &'a [Warning],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// 0–100.
    pub confidence: f64,
    pub trade_score: f64,
    pub score_label: ScoreLabel,
    pub reasoning: Vec<String>,
    pub risk_flags: Vec<RiskFlag>,
    pub warnings: Vec<Warning>,
    pub summary: String,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary)?;
        for line in &self.reasoning {
            writeln!(f, "  - {line}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "  ! {warning}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Positive edge favours selling premium, negative favours buying it.
    pub fn compute_vol_edge(&self, implied_vol: f64, realized_vol: f64) -> CoreResult<VolEdge> {
        if !implied_vol.is_finite() || implied_vol <= 0.0 {
            return Err(CoreError::invalid("implied_vol", format!("implied vol must be positive, got {implied_vol}")));
        }
        if !realized_vol.is_finite() || realized_vol < 0.0 {
            return Err(CoreError::invalid("realized_vol", format!("realized vol must be >= 0, got {realized_vol}")));
        }
        let raw_edge = (implied_vol - realized_vol) / implied_vol;
        let score = raw_edge.clamp(-1.0, 1.0);
        let label = if score > 0.20 {
            VolEdgeLabel::StrongPremiumSelling
        } else if score > 0.10 {
            VolEdgeLabel::ModeratePremiumSelling
        } else if score >= -0.10 {
            VolEdgeLabel::Neutral
        } else if score >= -0.20 {
            VolEdgeLabel::ModerateLongVol
        } else {
            VolEdgeLabel::StrongLongVol
        };
        debug!(score = format!("{:.3}", score), %label, "Vol edge");
        Ok(VolEdge {
            score,
            raw_edge,
            implied_vol,
            realized_vol,
            label,
        })
    }

    /// Expected expiry payoff under the lognormal model used for POP. The
    /// volatility is the larger of the implied vol and the vol implied by
    /// the forecast's fat-tail range.
    pub fn compute_expected_value(
        &self,
        strategy: &Strategy,
        metrics: &StrategyMetrics,
        range: Option<&RangeForecast>,
        implied_vol: f64,
        dte_days: f64,
    ) -> CoreResult<ExpectedValue> {
        if !implied_vol.is_finite() || implied_vol < 0.0 {
            return Err(CoreError::invalid("implied_vol", format!("implied vol must be >= 0, got {implied_vol}")));
        }
        let tail_vol = range.and_then(|r| r.fat_tail_annual_vol(self.config.trading_days_per_year));
        let volatility_used = tail_vol.map_or(implied_vol, |v| v.max(implied_vol));

        let (dist, clamps) = TerminalDistribution::new(strategy.spot(), volatility_used, years_from_days(dte_days));
        let payoff = |s: f64| strategy.payoff_at(s);
        let expected_value = dist.expectation(payoff, EV_WIDTH, EV_STEPS);
        let win_probability = profit_probability(strategy, &dist, &metrics.breakevens);

        let risk_reward_ratio = match (metrics.risk_reward_ratio, metrics.max_profit, metrics.max_loss) {
            (Some(rr), _, _) => Some(rr),
            (None, PayoffBound::Finite(_), PayoffBound::Finite(loss)) if loss >= 0.0 => None,
            _ => {
                let gain = dist.expectation(|s| payoff(s).max(0.0), EV_WIDTH, EV_STEPS);
                let loss = dist.expectation(|s| (-payoff(s)).max(0.0), EV_WIDTH, EV_STEPS);
                (loss > 0.0).then(|| gain / loss)
            }
        };

        let warnings = clamps
            .iter()
            .map(|c| {
                Warning::new(
                    WarningKind::NumericClamp,
                    format!("expected value {:?} {} raised to {}", c.input, c.requested, c.used),
                )
            })
            .collect();

        debug!(
            ev = format!("{:.2}", expected_value),
            win_probability = format!("{:.3}", win_probability),
            vol = format!("{:.4}", volatility_used),
            tail_vol = ?tail_vol,
            "Expected value"
        );
        Ok(ExpectedValue {
            expected_value,
            win_probability,
            risk_reward_ratio,
            volatility_used,
            warnings,
        })
    }

    /// Weighted 0–100 score. The EV component is zero for non-positive EV and
    /// otherwise tiered by reward:risk; the other inputs are 0–100 scores.
    pub fn compute_trade_score(
        &self,
        vol_edge: &VolEdge,
        ev: &ExpectedValue,
        regime_alignment: f64,
        oi_support: f64,
        liquidity: f64,
    ) -> TradeScore {
        let ev_score = if ev.expected_value <= 0.0 {
            0.0
        } else {
            match ev.risk_reward_ratio {
                Some(rr) if rr >= 2.0 => 100.0,
                Some(rr) if rr >= 1.5 => 80.0,
                Some(rr) if rr >= 1.0 => 60.0,
                _ => 40.0,
            }
        };

        let components = ScoreComponents {
            vol_edge: vol_edge.score.abs() * 100.0 * WEIGHT_VOL_EDGE,
            expected_value: ev_score * WEIGHT_EXPECTED_VALUE,
            regime: regime_alignment.clamp(0.0, 100.0) * WEIGHT_REGIME,
            oi_support: oi_support.clamp(0.0, 100.0) * WEIGHT_OI_SUPPORT,
            liquidity: liquidity.clamp(0.0, 100.0) * WEIGHT_LIQUIDITY,
        };
        let score = (components.vol_edge
            + components.expected_value
            + components.regime
            + components.oi_support
            + components.liquidity)
            .clamp(0.0, 100.0);
        let label = if score > 75.0 {
            ScoreLabel::High
        } else if score >= 50.0 {
            ScoreLabel::Medium
        } else {
            ScoreLabel::Low
        };
        debug!(score = format!("{:.1}", score), %label, ?components, "Trade score");
        TradeScore {
            score,
            label,
            components,
        }
    }

    /// Check the strategy's direction against the signal, then adjust for
    /// vol edge and risk of ruin.
    pub fn validate_with_directional_signal(
        &self,
        signal: &Signal,
        direction: Direction,
        vol_edge_score: f64,
        risk_of_ruin: f64,
    ) -> SignalValidation {
        let mut allowed = true;
        let mut confidence = 50.0;
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        let wanted = match direction {
            Direction::Bullish => Some(SignalKind::CallBuy),
            Direction::Bearish => Some(SignalKind::PutBuy),
            Direction::Neutral => None,
        };
        match (wanted, signal.kind) {
            (Some(want), got) if want == got => {
                reasons.push(format!("Signal {got} aligns with {direction} strategy"));
                confidence = signal.confidence;
            }
            (Some(_), SignalKind::NoSignal) => {
                reasons.push(format!("No directional signal for {direction} strategy"));
                allowed = false;
            }
            (Some(_), got) => {
                reasons.push(format!("Signal {got} conflicts with {direction} strategy"));
                allowed = false;
            }
            (None, SignalKind::NoSignal) => {
                reasons.push("Neutral market suits a neutral strategy".to_string());
                confidence = 70.0;
            }
            (None, got) => {
                reasons.push(format!("Directional signal {got} for a neutral strategy"));
                warnings.push(Warning::new(
                    WarningKind::Signal,
                    format!("{got} is active; consider a directional trade instead"),
                ));
                confidence = signal.confidence.min(50.0);
            }
        }

        let threshold = self.config.vol_edge_threshold;
        if vol_edge_score > threshold {
            reasons.push(format!("Premium-selling edge ({:.1}%)", vol_edge_score * 100.0));
            confidence = (confidence + 10.0).min(100.0);
        } else if vol_edge_score < -threshold {
            reasons.push(format!("Premium-buying edge ({:.1}%), less attractive", vol_edge_score * 100.0));
            confidence = (confidence - 5.0).max(0.0);
        }

        if risk_of_ruin > self.config.risk_of_ruin_cap {
            warnings.push(Warning::new(
                WarningKind::Risk,
                format!(
                    "risk of ruin {:.1}% exceeds max {:.1}%",
                    risk_of_ruin * 100.0,
                    self.config.risk_of_ruin_cap * 100.0
                ),
            ));
            allowed = false;
        } else if risk_of_ruin > self.config.risk_of_ruin_warning {
            warnings.push(Warning::new(
                WarningKind::Risk,
                format!("risk of ruin {:.1}% is elevated", risk_of_ruin * 100.0),
            ));
        }

        debug!(allowed, confidence, signal = %signal.kind, %direction, "Signal validation");
        SignalValidation {
            allowed,
            confidence,
            signal: signal.kind,
            signal_confidence: signal.confidence,
            reasons,
            warnings,
        }
    }

    /// Final decision. Pure function of its inputs.
    pub fn generate_trade_decision(&self, inputs: &DecisionInputs<'_>) -> Decision {
        let mut reasoning = Vec::new();
        let mut flags = Vec::new();
        let mut allowed = true;

        let vol = inputs.vol_edge;
        if vol.score.abs() > self.config.vol_edge_threshold {
            reasoning.push(format!("{} ({:+.1}%)", vol.label, vol.score * 100.0));
        } else {
            reasoning.push("Neutral volatility environment".to_string());
            flags.push(RiskFlag::LowVolEdge);
        }

        let ev = inputs.expected_value;
        if ev.expected_value > 0.0 {
            reasoning.push(format!(
                "Positive expected value: {:.0} (win probability {:.1}%)",
                ev.expected_value,
                ev.win_probability * 100.0
            ));
        } else {
            reasoning.push(format!("Negative expected value: {:.0}", ev.expected_value));
            flags.push(RiskFlag::NegativeExpectedValue);
            allowed = false;
        }

        match ev.risk_reward_ratio {
            Some(rr) if rr >= self.config.min_risk_reward => reasoning.push(format!("Good risk-reward: {rr:.2}")),
            Some(rr) => {
                reasoning.push(format!("Low risk-reward: {rr:.2}"));
                flags.push(RiskFlag::PoorRiskReward);
            }
            None => reasoning.push("Risk-reward undefined: no loss possible".to_string()),
        }

        let score = inputs.trade_score;
        if score.score >= self.config.min_trade_score {
            reasoning.push(format!("Trade score: {:.0}/100 ({})", score.score, score.label));
        } else {
            reasoning.push(format!("Trade score too low: {:.0}/100", score.score));
            flags.push(RiskFlag::LowTradeScore);
            allowed = false;
        }

        let validation = inputs.validation;
        reasoning.extend(validation.reasons.iter().cloned());
        if !validation.allowed {
            flags.push(RiskFlag::SignalRejected);
            allowed = false;
        }

        if let Some(sim) = inputs.simulation {
            if sim.risk_of_ruin > self.config.risk_of_ruin_cap {
                reasoning.push(format!("High risk of ruin: {:.1}%", sim.risk_of_ruin * 100.0));
                flags.push(RiskFlag::HighRiskOfRuin);
                allowed = false;
            } else {
                reasoning.push(format!("Acceptable risk of ruin: {:.1}%", sim.risk_of_ruin * 100.0));
            }
        }

        if let Some(size) = inputs.sizing {
            if size.lots == 0 {
                reasoning.push("Position size rounds down to zero lots".to_string());
                flags.push(RiskFlag::ZeroLots);
                allowed = false;
            } else {
                reasoning.push(format!("Size: {} lots risking {}", size.lots, size.capital_at_risk));
            }
        }

        if flags.len() >= self.config.max_risk_flags {
            reasoning.push(format!("Multiple risk factors present ({})", flags.len()));
            allowed = false;
        }

        let confidence = ((score.score + validation.confidence) / 2.0).clamp(0.0, 100.0);

        let mut warnings: Vec<Warning> = Vec::new();
        let sources = inputs
            .upstream_warnings
            .iter()
            .chain(&ev.warnings)
            .chain(&validation.warnings)
            .chain(inputs.simulation.map(|s| s.warnings.as_slice()).unwrap_or_default())
            .chain(inputs.sizing.map(|s| s.warnings.as_slice()).unwrap_or_default());
        for w in sources {
            if !warnings.contains(w) {
                warnings.push(w.clone());
            }
        }

        let summary = summarize(allowed, confidence, &flags);
        if allowed {
            info!(confidence = format!("{:.0}", confidence), score = format!("{:.0}", score.score), "Trade allowed");
        } else {
            warn!(flags = ?flags, "Trade rejected");
        }
        Decision {
            allowed,
            confidence,
            trade_score: score.score,
            score_label: score.label,
            reasoning,
            risk_flags: flags,
            warnings,
            summary,
        }
    }
}

fn summarize(allowed: bool, confidence: f64, flags: &[RiskFlag]) -> String {
    if !allowed {
        format!("DO NOT TRADE - {} risk factor(s) detected", flags.len())
    } else if confidence >= 75.0 {
        format!("TRADE RECOMMENDED - High confidence ({confidence:.0}/100)")
    } else if confidence >= 60.0 {
        format!("TRADE WITH CAUTION - Medium confidence ({confidence:.0}/100)")
    } else {
        format!("MARGINAL TRADE - Low confidence ({confidence:.0}/100)")
    }
}

// ---------------------------------------------------------------------------
// Market-context scores
// ---------------------------------------------------------------------------

/// PCR extremes score higher than a balanced market. Undefined PCR scores 50.
pub fn regime_alignment(pcr: Option<f64>) -> f64 {
    match pcr {
        Some(p) if p < 0.7 || p > 1.3 => 80.0,
        Some(p) if (0.8..=1.2).contains(&p) => 50.0,
        Some(_) => 65.0,
        None => 50.0,
    }
}

/// Participation score from total open interest.
pub fn oi_support(total_oi: u64) -> f64 {
    match total_oi {
        oi if oi > 5_000_000 => 90.0,
        oi if oi > 2_000_000 => 70.0,
        oi if oi > 1_000_000 => 50.0,
        _ => 30.0,
    }
}

/// Share of near-ATM rows (±5% of spot) that traded and carry OI, 0–100.
pub fn liquidity_score(chain: &OptionChain) -> f64 {
    let spot = chain.spot();
    let near: Vec<_> = chain
        .rows()
        .iter()
        .filter(|r| (r.strike - spot).abs() <= LIQUIDITY_BAND * spot)
        .collect();
    if near.is_empty() {
        return 0.0;
    }
    let active = near.iter().filter(|r| r.volume > 0 && r.open_interest > 0).count();
    active as f64 / near.len() as f64 * 100.0
}

/// Contrarian regime reading from PCR.
pub fn analyze_regime(pcr: f64) -> RegimeAnalysis {
    let (regime, bias, hint) = if pcr < 0.7 {
        (MarketRegime::ExtremeGreed, "Bearish contrarian", "Consider selling calls or bearish spreads")
    } else if pcr < 0.9 {
        (MarketRegime::ModerateGreed, "Neutral to bearish", "Neutral strategies or short premium")
    } else if pcr < 1.1 {
        (MarketRegime::Balanced, "Neutral", "Iron condors, butterflies")
    } else if pcr < 1.3 {
        (MarketRegime::ModerateFear, "Neutral to bullish", "Bullish spreads or long calls")
    } else {
        (MarketRegime::ExtremeFear, "Bullish contrarian", "Consider selling puts or bullish spreads")
    };
    RegimeAnalysis {
        regime,
        bias: bias.to_string(),
        strategy_hint: hint.to_string(),
        pcr,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
