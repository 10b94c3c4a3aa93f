//! End-to-end analysis pipeline.
//!
//! `DecisionPipeline` runs signal → range → strategy metrics → sizing →
//! simulation → decision for one request and returns every intermediate
//! record next to the final `Decision`. It holds only configuration; nothing
//! is carried between calls.

pub mod decision;

use anyhow::Context;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::stats::realized_vol;
use crate::analysis::{RangePredictor, SignalEngine};
use crate::config::AnalysisConfig;
use crate::history::TradeStats;
use crate::options::strategy::{Strategy, StrategyEngine, StrategyMetrics};
use crate::risk::{EquitySimResult, PositionSizer, RiskSimulator, SimulationParams, SizeResult, SizingMethod, SizingRequest};
use crate::types::{
    validate_implied_vol, CoreError, CoreResult, OptionChain, OptionType, PriceHistory, RangeForecast, RangeMethod, Signal, Warning,
    WarningKind,
};
use decision::{
    analyze_regime, liquidity_score, oi_support, regime_alignment, Decision, DecisionEngine, DecisionInputs,
    ExpectedValue, RegimeAnalysis, SignalValidation, TradeScore, VolEdge,
};

pub use decision::RiskFlag;

/// Band around spot used to read ATM implied vol from the chain.
const ATM_IV_BAND: f64 = 0.02;

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

/// Everything one analysis needs. Inputs are borrowed and never modified.
#[derive(Debug, Clone)]
pub struct AnalysisRequest<'a> {
    pub history: &'a PriceHistory,
    pub chain: &'a OptionChain,
    pub strategy: &'a Strategy,
    pub track_record: &'a TradeStats,
    pub account: Decimal,
    pub dte_days: f64,
    /// Overrides the chain's ATM implied vol.
    pub implied_vol: Option<f64>,
    pub range_method: RangeMethod,
    pub sizing_method: SizingMethod,
    pub num_simulations: usize,
    pub num_trades: usize,
}

impl<'a> AnalysisRequest<'a> {
    /// Weekly expiry, ensemble range, Kelly sizing, 1 000 × 200 simulation.
    pub fn new(
        history: &'a PriceHistory,
        chain: &'a OptionChain,
        strategy: &'a Strategy,
        track_record: &'a TradeStats,
        account: Decimal,
    ) -> Self {
        Self {
            history,
            chain,
            strategy,
            track_record,
            account,
            dte_days: 7.0,
            implied_vol: None,
            range_method: RangeMethod::Ensemble,
            sizing_method: SizingMethod::Kelly,
            num_simulations: 1_000,
            num_trades: 200,
        }
    }
}

/// Every intermediate record plus the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub signal: Signal,
    pub range: RangeForecast,
    pub metrics: StrategyMetrics,
    pub implied_vol: f64,
    pub realized_vol: Option<f64>,
    pub vol_edge: VolEdge,
    pub expected_value: ExpectedValue,
    pub trade_score: TradeScore,
    pub validation: SignalValidation,
    pub sizing: SizeResult,
    pub simulation: EquitySimResult,
    /// `None` when PCR is undefined.
    pub regime: Option<RegimeAnalysis>,
    pub decision: Decision,
}

impl AnalysisReport {
    /// Pretty JSON for the rendering adapter.
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialise analysis report")
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct DecisionPipeline {
    config: AnalysisConfig,
    signal: SignalEngine,
    range: RangePredictor,
    strategy: StrategyEngine,
    sizer: PositionSizer,
    simulator: RiskSimulator,
    decision: DecisionEngine,
}

impl DecisionPipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            signal: SignalEngine::new(config.signal.clone()),
            range: RangePredictor::new(config.range.clone()),
            strategy: StrategyEngine::new(config.strategy.clone()),
            sizer: PositionSizer::new(config.sizing.clone()),
            simulator: RiskSimulator::new(config.simulation.clone()),
            decision: DecisionEngine::new(config.decision.clone()),
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run the full flow for one request.
    ///
    /// Steps:
    /// 1. Directional signal from RSI and PCR.
    /// 2. Range forecast with the requested method.
    /// 3. Strategy metrics at the chain's implied vol.
    /// 4. Vol edge, expected value and trade score.
    /// 5. Size from the track record, then simulate that risk per trade.
    /// 6. Validate against the signal and decide.
    pub fn analyze(&self, request: &AnalysisRequest<'_>) -> CoreResult<AnalysisReport> {
        let history = request.history;
        let chain = request.chain;
        let stats = request.track_record;

        let avg_rr = stats.avg_rr.ok_or_else(|| {
            CoreError::insufficient("winning and losing trades in the track record", 2, stats.wins.min(1) + stats.losses.min(1))
        })?;
        let implied_vol = match request.implied_vol {
            Some(iv) => {
                validate_implied_vol(iv)?;
                iv
            }
            None => chain
                .atm_implied_vol(ATM_IV_BAND)
                .ok_or_else(|| CoreError::insufficient("quoted ATM implied vols", 1, 0))?,
        };

        // Step 1 – signal
        let signal = self.signal.generate_signal(history, chain)?;

        // Step 2 – range
        let range = match request.range_method {
            RangeMethod::Statistical => self.range.predict_statistical(history, implied_vol, self.config.range.lookback)?,
            RangeMethod::RuleBased => self.range.predict_rule_based(history, chain, implied_vol)?,
            RangeMethod::ImpliedVol => self.range.predict_implied_vol(history, chain)?,
            RangeMethod::Ensemble => self.range.predict_ensemble(history, chain, implied_vol)?,
        };

        // Step 3 – strategy
        let metrics = self.strategy.analyze(request.strategy, implied_vol, request.dte_days)?;

        // Step 4 – edge, EV, score
        let mut upstream: Vec<Warning> = Vec::new();
        upstream.extend(stats.warnings.iter().cloned());
        upstream.extend(signal.warnings.iter().cloned());
        upstream.extend(range.warnings.iter().cloned());
        upstream.extend(metrics.warnings.iter().cloned());

        let closes = history.closes();
        let window = &closes[closes.len().saturating_sub(self.config.range.lookback + 1)..];
        let realized = realized_vol(window, self.config.decision.trading_days_per_year);
        let vol_edge = match realized {
            Some(rv) => self.decision.compute_vol_edge(implied_vol, rv)?,
            None => {
                upstream.push(Warning::new(
                    WarningKind::InsufficientData,
                    "too few closes for realized vol; vol edge assumes realized equals implied",
                ));
                self.decision.compute_vol_edge(implied_vol, implied_vol)?
            }
        };
        let expected_value = self.decision.compute_expected_value(
            request.strategy,
            &metrics,
            Some(&range),
            implied_vol,
            request.dte_days,
        )?;
        let total_oi = chain.total_oi(OptionType::Call, None) + chain.total_oi(OptionType::Put, None);
        let trade_score = self.decision.compute_trade_score(
            &vol_edge,
            &expected_value,
            regime_alignment(signal.pcr),
            oi_support(total_oi),
            liquidity_score(chain),
        );

        // Step 5 – size and simulate
        let sizing_request = SizingRequest {
            account: request.account,
            win_rate: stats.win_rate,
            avg_rr,
            sample_size: stats.sample_size,
            current_volatility: Some(implied_vol * 100.0),
        };
        let sizing = self.sizer.size_position(&sizing_request, request.sizing_method, &metrics)?;

        let mut params = SimulationParams::new(stats.win_rate, avg_rr, sizing.fraction);
        params.num_simulations = request.num_simulations;
        params.num_trades = request.num_trades;
        params.starting_equity = request.account.to_f64().unwrap_or(params.starting_equity);
        let simulation = self.simulator.simulate_equity_paths(&params)?;

        // Step 6 – validate and decide
        let validation = self.decision.validate_with_directional_signal(
            &signal,
            metrics.direction,
            vol_edge.score,
            simulation.risk_of_ruin,
        );
        let regime = signal.pcr.map(analyze_regime);
        debug!(regime = ?regime.as_ref().map(|r| r.regime), "Market regime");

        let decision = self.decision.generate_trade_decision(&DecisionInputs {
            vol_edge: &vol_edge,
            expected_value: &expected_value,
            trade_score: &trade_score,
            validation: &validation,
            simulation: Some(&simulation),
            sizing: Some(&sizing),
            upstream_warnings: &upstream,
        });

        if decision.allowed {
            info!(
                strategy = request.strategy.name(),
                lots = sizing.lots,
                confidence = format!("{:.0}", decision.confidence),
                "Analysis complete: trade"
            );
        } else {
            warn!(
                strategy = request.strategy.name(),
                flags = decision.risk_flags.len(),
                "Analysis complete: no trade"
            );
        }

        Ok(AnalysisReport {
            signal,
            range,
            metrics,
            implied_vol,
            realized_vol: realized,
            vol_edge,
            expected_value,
            trade_score,
            validation,
            sizing,
            simulation,
            regime,
            decision,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::TrackRecord;
    use crate::options::strategy::{OptionLeg, Position, StrategyKind};
    use crate::types::{OptionChainRow, SignalKind};
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    // ---- helpers -----------------------------------------------------------

    /// Steady decline with small bounces: RSI well under 30.
    fn make_falling_history() -> PriceHistory {
        let mut closes = vec![26600.0];
        for i in 1..40 {
            let last = closes[i - 1];
            closes.push(if i % 5 == 0 { last + 5.0 } else { last - 15.0 });
        }
        PriceHistory::from_closes(Utc.with_ymd_and_hms(2026, 8, 1, 15, 30, 0).unwrap(), &closes).unwrap()
    }

    fn make_chain(call_oi: u64, put_oi: u64, iv: f64) -> OptionChain {
        let expiry = NaiveDate::from_ymd_opt(2026, 10, 29).unwrap();
        let rows = (0..6)
            .flat_map(|i| {
                let strike = 25900.0 + 100.0 * i as f64;
                [
                    OptionChainRow {
                        strike,
                        option_type: OptionType::Call,
                        open_interest: call_oi,
                        volume: 500,
                        implied_vol: iv,
                        expiry,
                    },
                    OptionChainRow {
                        strike,
                        option_type: OptionType::Put,
                        open_interest: put_oi,
                        volume: 500,
                        implied_vol: iv,
                        expiry,
                    },
                ]
            })
            .collect();
        OptionChain::new(26150.0, rows).unwrap()
    }

    fn make_bull_spread() -> Strategy {
        Strategy::new("bull call spread", StrategyKind::BullCallSpread, 26150.0, 50)
            .unwrap()
            .with_leg(OptionLeg::new(OptionType::Call, Position::Buy, 26100.0, 120.0, 1).unwrap())
            .unwrap()
            .with_leg(OptionLeg::new(OptionType::Call, Position::Sell, 26300.0, 50.0, 1).unwrap())
            .unwrap()
    }

    /// 60 trades, 55% winners at 2:1.
    fn make_stats() -> TradeStats {
        let pnls: Vec<f64> = (0..60).map(|i| if i < 33 { 200.0 } else { -100.0 }).collect();
        TrackRecord::from_pnls(&pnls, 50).unwrap().stats()
    }

    fn make_pipeline() -> DecisionPipeline {
        DecisionPipeline::new(AnalysisConfig::default())
    }

    // ---- tests -------------------------------------------------------------

    #[test]
    fn test_full_pipeline_produces_consistent_report() {
        let pipeline = make_pipeline();
        let history = make_falling_history();
        let chain = make_chain(100_000, 50_000, 0.15);
        let strategy = make_bull_spread();
        let stats = make_stats();
        let request = AnalysisRequest::new(&history, &chain, &strategy, &stats, dec!(1000000));

        let report = pipeline.analyze(&request).unwrap();
        assert_eq!(report.signal.kind, SignalKind::CallBuy);
        assert_eq!(report.implied_vol, 0.15);
        assert!(report.range.fat_tail_width() >= report.range.width());
        assert!(report.validation.allowed);
        // 2% cap over 3 500 per lot
        assert_eq!(report.sizing.lots, 5);
        assert!((0.0..=1.0).contains(&report.simulation.risk_of_ruin));
        assert_eq!(report.decision.trade_score, report.trade_score.score);
        assert!(report.regime.is_some());
        for w in &report.range.warnings {
            assert!(report.decision.warnings.contains(w));
        }

        let json = report.to_json().unwrap();
        assert!(json.contains("\"decision\""));
    }

    #[test]
    fn test_bullish_strategy_without_signal_is_rejected() {
        let pipeline = make_pipeline();
        let history = make_falling_history();
        // PCR 1.0: no confluence
        let chain = make_chain(100_000, 100_000, 0.15);
        let strategy = make_bull_spread();
        let stats = make_stats();
        let request = AnalysisRequest::new(&history, &chain, &strategy, &stats, dec!(1000000));

        let report = pipeline.analyze(&request).unwrap();
        assert_eq!(report.signal.kind, SignalKind::NoSignal);
        assert!(!report.decision.allowed);
        assert!(report.decision.risk_flags.contains(&RiskFlag::SignalRejected));
    }

    #[test]
    fn test_missing_implied_vol_is_an_error() {
        let pipeline = make_pipeline();
        let history = make_falling_history();
        let chain = make_chain(100_000, 50_000, 0.0);
        let strategy = make_bull_spread();
        let stats = make_stats();
        let request = AnalysisRequest::new(&history, &chain, &strategy, &stats, dec!(1000000));
        assert!(matches!(
            pipeline.analyze(&request),
            Err(CoreError::InsufficientData { .. })
        ));

        let with_override = AnalysisRequest {
            implied_vol: Some(0.15),
            range_method: RangeMethod::Statistical,
            ..request
        };
        assert!(pipeline.analyze(&with_override).is_ok());
    }

    #[test]
    fn test_out_of_range_implied_vol_override_is_rejected() {
        let pipeline = make_pipeline();
        let history = make_falling_history();
        let chain = make_chain(100_000, 50_000, 0.15);
        let strategy = make_bull_spread();
        let stats = make_stats();
        let request = AnalysisRequest {
            implied_vol: Some(2.5),
            ..AnalysisRequest::new(&history, &chain, &strategy, &stats, dec!(1000000))
        };
        assert!(matches!(
            pipeline.analyze(&request),
            Err(CoreError::InputValidation { ref field, .. }) if field == "implied_vol"
        ));
    }

    #[test]
    fn test_track_record_without_losses_is_an_error() {
        let pipeline = make_pipeline();
        let history = make_falling_history();
        let chain = make_chain(100_000, 50_000, 0.15);
        let strategy = make_bull_spread();
        let stats = TrackRecord::from_pnls(&[100.0; 10], 5).unwrap().stats();
        let request = AnalysisRequest::new(&history, &chain, &strategy, &stats, dec!(1000000));
        assert!(pipeline.analyze(&request).is_err());
    }
}
