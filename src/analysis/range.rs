//! Next-session range prediction.
//!
//! The statistical method blends realised movement (ATR) with the move the
//! option market prices in (implied volatility), then widens the result by
//! an empirical fat-tail multiplier. Rule-based and implied-vol methods and
//! a confidence-weighted ensemble are layered on top.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::stats::{normal_quantile, percentile, sample_std, simple_returns};
use crate::config::RangeConfig;
use crate::types::{
    validate_implied_vol, CoreError, CoreResult, OptionChain, PriceBar, PriceHistory, RangeForecast,
    RangeMethod, Warning, WarningKind,
};

/// ATR period used by the rule-based method.
const RULE_ATR_PERIOD: usize = 14;
/// ATM band for the implied-vol method, as a fraction of spot.
const ATM_BAND: f64 = 0.02;
const HIGH_VOL: f64 = 0.18;
const LOW_VOL: f64 = 0.12;
const HIGH_PCR: f64 = 1.3;
const LOW_PCR: f64 = 0.7;

/// Average true range and how many true ranges it averaged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtrReading {
    pub value: f64,
    pub bars_used: usize,
}

/// Fat-tail multiplier with any warnings raised computing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatTailEstimate {
    pub multiplier: f64,
    /// Empirical |return| quantile over normal-equivalent quantile, before floor/cap.
    pub raw_ratio: Option<f64>,
    pub warnings: Vec<Warning>,
}

/// Pivot and Fibonacci-style levels derived from a forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntradayLevels {
    pub spot: f64,
    pub upper_target: f64,
    pub lower_target: f64,
    pub resistance_1: f64,
    pub resistance_2: f64,
    pub support_1: f64,
    pub support_2: f64,
    pub pivot: f64,
}

pub struct RangePredictor {
    config: RangeConfig,
}

impl RangePredictor {
    pub fn new(config: RangeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RangeConfig {
        &self.config
    }

    /// Mean true range over the last `period` bars (fewer if history is
    /// shorter). `None` with fewer than two bars.
    pub fn average_true_range(&self, bars: &[PriceBar], period: usize) -> Option<AtrReading> {
        if bars.len() < 2 || period == 0 {
            return None;
        }
        let ranges: Vec<f64> = bars
            .windows(2)
            .map(|w| {
                let prev_close = w[0].close;
                let bar = &w[1];
                (bar.high - bar.low)
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs())
            })
            .collect();
        let used = &ranges[ranges.len().saturating_sub(period)..];
        Some(AtrReading {
            value: used.iter().sum::<f64>() / used.len() as f64,
            bars_used: used.len(),
        })
    }

    /// One-day move implied by an annualized volatility.
    pub fn implied_daily_move(&self, spot: f64, implied_vol: f64) -> f64 {
        spot * implied_vol / self.config.trading_days_per_year.sqrt()
    }

    /// Empirical tail quantile over its normal equivalent, floored at 1.0
    /// and capped at `fat_tail_max_multiplier`.
    pub fn fat_tail_multiplier(&self, closes: &[f64]) -> FatTailEstimate {
        let window = self.config.fat_tail_window;
        let confidence = self.config.fat_tail_confidence;
        let mut warnings = Vec::new();

        if closes.len() < window + 1 {
            let msg = format!(
                "Fat-tail estimate needs {} closes, have {}; multiplier left at 1.0",
                window + 1,
                closes.len()
            );
            warn!(required = window + 1, available = closes.len(), "Fat-tail history too short");
            warnings.push(Warning::new(WarningKind::InsufficientData, msg));
            return FatTailEstimate {
                multiplier: 1.0,
                raw_ratio: None,
                warnings,
            };
        }

        let returns = simple_returns(&closes[closes.len() - window - 1..]);
        let sigma = sample_std(&returns).unwrap_or(0.0);
        if sigma <= 0.0 || !sigma.is_finite() {
            warnings.push(Warning::new(
                WarningKind::FatTail,
                "Zero return dispersion; fat-tail multiplier left at 1.0",
            ));
            return FatTailEstimate {
                multiplier: 1.0,
                raw_ratio: None,
                warnings,
            };
        }

        let abs_returns: Vec<f64> = returns.iter().map(|r| r.abs()).collect();
        let empirical = percentile(&abs_returns, confidence * 100.0).unwrap_or(0.0);
        let normal = normal_quantile(confidence) * sigma;
        let raw = empirical / normal;

        let mut multiplier = raw;
        if raw < 1.0 {
            warnings.push(Warning::new(
                WarningKind::FatTail,
                format!("Empirical tail narrower than normal (ratio {raw:.2}); floored at 1.0"),
            ));
            multiplier = 1.0;
        } else if raw > self.config.fat_tail_max_multiplier {
            warnings.push(Warning::new(
                WarningKind::FatTail,
                format!(
                    "Fat-tail ratio {raw:.2} capped at {:.2}",
                    self.config.fat_tail_max_multiplier
                ),
            ));
            multiplier = self.config.fat_tail_max_multiplier;
        }

        debug!(empirical, normal, raw, multiplier, "Fat-tail multiplier");
        FatTailEstimate {
            multiplier,
            raw_ratio: Some(raw),
            warnings,
        }
    }

    /// ATR / implied-move blend around the last close, with fat-tail bounds.
    pub fn predict_statistical(
        &self,
        history: &PriceHistory,
        implied_vol: f64,
        lookback: usize,
    ) -> CoreResult<RangeForecast> {
        validate_implied_vol(implied_vol)?;
        if lookback == 0 {
            return Err(CoreError::invalid("lookback", "lookback must be positive"));
        }
        let spot = history
            .last_close()
            .ok_or_else(|| CoreError::insufficient("price bars", 1, 0))?;

        let mut warnings = Vec::new();
        let implied_move = self.implied_daily_move(spot, implied_vol);
        let atr = self.average_true_range(history.bars(), lookback);

        let expected_move = match atr {
            Some(reading) => {
                if reading.bars_used < lookback {
                    warnings.push(Warning::new(
                        WarningKind::InsufficientData,
                        format!("ATR averaged {} bars, lookback is {lookback}", reading.bars_used),
                    ));
                }
                self.config.atr_weight * reading.value + self.config.implied_weight * implied_move
            }
            None => {
                warnings.push(Warning::new(
                    WarningKind::InsufficientData,
                    "Fewer than two bars; range uses implied move only",
                ));
                implied_move
            }
        };

        let full_history = history.len() > lookback;
        let confidence = if full_history { 75.0 } else { 65.0 };
        let fat_tail = self.fat_tail_multiplier(&history.closes());
        warnings.extend(fat_tail.warnings);

        let half_width = expected_move * self.z_score();
        let forecast = self.build(
            RangeMethod::Statistical,
            spot,
            half_width,
            fat_tail.multiplier,
            confidence,
            atr.map(|a| a.value),
            implied_move,
            warnings,
        );
        info!(
            range = %forecast,
            atr = ?forecast.atr,
            implied_move = format!("{:.1}", implied_move),
            "Statistical range predicted"
        );
        Ok(forecast)
    }

    /// ATR(14) scaled by PCR, volatility and OI-concentration rules.
    pub fn predict_rule_based(
        &self,
        history: &PriceHistory,
        chain: &OptionChain,
        implied_vol: f64,
    ) -> CoreResult<RangeForecast> {
        validate_implied_vol(implied_vol)?;
        let spot = chain.spot();
        let mut warnings = Vec::new();
        let implied_move = self.implied_daily_move(spot, implied_vol);

        let atr = self.average_true_range(history.bars(), RULE_ATR_PERIOD);
        let base = match atr {
            Some(a) => a.value,
            None => {
                warnings.push(Warning::new(
                    WarningKind::InsufficientData,
                    "No ATR available; rule-based range uses implied move",
                ));
                implied_move
            }
        };

        let pcr = chain.put_call_ratio(false);
        let concentration = chain.oi_concentration(3);
        let far_from_spot = concentration
            .center_strike
            .map_or(false, |c| (c - spot).abs() > ATM_BAND * spot);

        let (multiplier, reason) = match pcr {
            Some(p) if p > HIGH_PCR && implied_vol > HIGH_VOL => (1.5, "High PCR with high vol: expanding range"),
            Some(p) if p < LOW_PCR && implied_vol < LOW_VOL => (0.7, "Low PCR with low vol: compressed range"),
            _ if concentration.overall_pct > 50.0 && far_from_spot => (0.8, "OI concentrated away from spot: range-bound"),
            _ if concentration.overall_pct < 30.0 => (1.2, "Diffuse OI: lack of conviction"),
            _ => (1.0, "Normal conditions"),
        };
        if pcr.is_none() {
            warnings.push(Warning::new(WarningKind::Signal, "PCR undefined; PCR rules skipped"));
        }

        let total_oi: u64 = chain.rows().iter().map(|r| r.open_interest).sum();
        let total_volume: u64 = chain.rows().iter().map(|r| r.volume).sum();
        let confidence = if total_oi > 1_000_000 && total_volume > 100_000 { 80.0 } else { 70.0 };

        let fat_tail = self.fat_tail_multiplier(&history.closes());
        warnings.extend(fat_tail.warnings);

        debug!(multiplier, reason, concentration = concentration.overall_pct, "Rule-based range");
        Ok(self.build(
            RangeMethod::RuleBased,
            spot,
            base * multiplier * self.z_score(),
            fat_tail.multiplier,
            confidence,
            atr.map(|a| a.value),
            implied_move,
            warnings,
        ))
    }

    /// One-sd move from ATM implied vol (strikes within 2% of spot).
    /// Falls back to the statistical method when no ATM IV is quoted.
    pub fn predict_implied_vol(&self, history: &PriceHistory, chain: &OptionChain) -> CoreResult<RangeForecast> {
        let spot = chain.spot();
        let atm_vol = chain
            .rows()
            .iter()
            .filter(|r| r.implied_vol > 0.0 && (r.strike - spot).abs() < ATM_BAND * spot)
            .map(|r| r.implied_vol)
            .collect::<Vec<_>>();

        if atm_vol.is_empty() {
            let fallback_vol = chain.atm_implied_vol(ATM_BAND).unwrap_or(0.0);
            let mut forecast = self.predict_statistical(history, fallback_vol, self.config.lookback)?;
            forecast.warnings.push(Warning::new(
                WarningKind::InsufficientData,
                "No ATM implied vol within 2% of spot; statistical range used",
            ));
            return Ok(forecast);
        }

        let iv = atm_vol.iter().sum::<f64>() / atm_vol.len() as f64;
        let implied_move = self.implied_daily_move(spot, iv);
        let fat_tail = self.fat_tail_multiplier(&history.closes());

        Ok(self.build(
            RangeMethod::ImpliedVol,
            spot,
            implied_move * self.z_score(),
            fat_tail.multiplier,
            68.0,
            None,
            implied_move,
            fat_tail.warnings,
        ))
    }

    /// Confidence-weighted blend of the statistical, rule-based and
    /// implied-vol ranges.
    pub fn predict_ensemble(
        &self,
        history: &PriceHistory,
        chain: &OptionChain,
        implied_vol: f64,
    ) -> CoreResult<RangeForecast> {
        let methods = [
            self.predict_statistical(history, implied_vol, self.config.lookback)?,
            self.predict_rule_based(history, chain, implied_vol)?,
            self.predict_implied_vol(history, chain)?,
        ];
        let total_confidence: f64 = methods.iter().map(|m| m.confidence).sum();
        let spot = chain.spot();

        let down = methods.iter().map(|m| (m.spot - m.lower) * m.confidence).sum::<f64>() / total_confidence;
        let up = methods.iter().map(|m| (m.upper - m.spot) * m.confidence).sum::<f64>() / total_confidence;
        let multiplier = methods[0].fat_tail_multiplier;

        let mut warnings: Vec<Warning> = Vec::new();
        for w in methods.iter().flat_map(|m| m.warnings.iter()) {
            if !warnings.contains(w) {
                warnings.push(w.clone());
            }
        }

        let lower = (spot - down).max(0.0);
        let upper = spot + up;
        let forecast = RangeForecast {
            method: RangeMethod::Ensemble,
            spot,
            lower,
            upper,
            expected_move: (upper - lower) / 2.0,
            fat_tail_lower: (spot - down * multiplier).max(0.0),
            fat_tail_upper: spot + up * multiplier,
            fat_tail_multiplier: multiplier,
            confidence: total_confidence / methods.len() as f64,
            confidence_level: self.config.confidence_level,
            atr: methods[0].atr,
            implied_move: methods[0].implied_move,
            warnings,
        };
        info!(range = %forecast, "Ensemble range predicted");
        Ok(forecast)
    }

    /// Pivot and 0.382 / 0.618 levels off spot.
    pub fn intraday_levels(&self, forecast: &RangeForecast) -> IntradayLevels {
        let width = forecast.width();
        IntradayLevels {
            spot: forecast.spot,
            upper_target: forecast.upper,
            lower_target: forecast.lower,
            resistance_1: forecast.spot + width * 0.382,
            resistance_2: forecast.spot + width * 0.618,
            support_1: forecast.spot - width * 0.382,
            support_2: forecast.spot - width * 0.618,
            pivot: (forecast.upper + forecast.lower) / 2.0,
        }
    }

    fn z_score(&self) -> f64 {
        normal_quantile((1.0 + self.config.confidence_level) / 2.0)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        method: RangeMethod,
        spot: f64,
        half_width: f64,
        multiplier: f64,
        confidence: f64,
        atr: Option<f64>,
        implied_move: f64,
        warnings: Vec<Warning>,
    ) -> RangeForecast {
        let multiplier = multiplier.max(1.0);
        RangeForecast {
            method,
            spot,
            lower: (spot - half_width).max(0.0),
            upper: spot + half_width,
            expected_move: half_width,
            fat_tail_lower: (spot - half_width * multiplier).max(0.0),
            fat_tail_upper: spot + half_width * multiplier,
            fat_tail_multiplier: multiplier,
            confidence,
            confidence_level: self.config.confidence_level,
            atr,
            implied_move,
            warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptionChainRow, OptionType};
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, TimeZone, Utc};

    // ---- helpers ----

    fn make_predictor() -> RangePredictor {
        RangePredictor::new(RangeConfig::default())
    }

    /// Bars oscillating around `base` with a fixed high-low spread.
    fn make_history(n: usize, base: f64, spread: f64) -> PriceHistory {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let bars = (0..n)
            .map(|i| {
                let close = base + ((i as f64) * 1.3).sin() * spread;
                PriceBar {
                    timestamp: start + chrono::Duration::days(i as i64),
                    open: close,
                    high: close + spread / 2.0,
                    low: close - spread / 2.0,
                    close,
                    volume: 1.0,
                }
            })
            .collect();
        PriceHistory::new(bars).unwrap()
    }

    /// Mostly quiet closes with a few large shocks.
    fn make_fat_tailed_history(n: usize) -> PriceHistory {
        let mut closes = vec![26000.0];
        for i in 1..n {
            let r = if i % 25 == 0 { 0.04 } else if i % 2 == 0 { 0.002 } else { -0.002 };
            let prev = closes[i - 1];
            closes.push(prev * (1.0 + r));
        }
        PriceHistory::from_closes(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(), &closes).unwrap()
    }

    fn make_chain(spot: f64, put_oi: u64, call_oi: u64, iv: f64) -> OptionChain {
        let expiry = NaiveDate::from_ymd_opt(2026, 1, 29).unwrap();
        let row = |strike: f64, option_type: OptionType, oi: u64| OptionChainRow {
            strike,
            option_type,
            open_interest: oi,
            volume: oi / 5,
            implied_vol: iv,
            expiry,
        };
        OptionChain::new(
            spot,
            vec![
                row(spot - 200.0, OptionType::Put, put_oi / 2),
                row(spot, OptionType::Put, put_oi / 2),
                row(spot, OptionType::Call, call_oi / 2),
                row(spot + 200.0, OptionType::Call, call_oi / 2),
            ],
        )
        .unwrap()
    }

    // ---- ATR ----

    #[test]
    fn test_atr_uses_true_range() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let bars = vec![
            PriceBar { timestamp: start, open: 100.0, high: 101.0, low: 99.0, close: 100.0, volume: 0.0 },
            // gap up: |high - prev close| = 12 dominates h-l = 2
            PriceBar {
                timestamp: start + chrono::Duration::days(1),
                open: 110.0,
                high: 112.0,
                low: 110.0,
                close: 111.0,
                volume: 0.0,
            },
        ];
        let atr = make_predictor().average_true_range(&bars, 14).unwrap();
        assert_relative_eq!(atr.value, 12.0);
        assert_eq!(atr.bars_used, 1);
        assert!(make_predictor().average_true_range(&bars[..1], 14).is_none());
    }

    // ---- statistical ----

    #[test]
    fn test_statistical_blend_default_weights() {
        let history = make_history(40, 26000.0, 100.0);
        let p = make_predictor();
        let f = p.predict_statistical(&history, 0.15, 30).unwrap();
        let atr = p.average_true_range(history.bars(), 30).unwrap().value;
        let spot = history.last_close().unwrap();
        let implied = spot * 0.15 / 252f64.sqrt();
        let z = normal_quantile((1.0 + 0.6827) / 2.0);
        assert_relative_eq!(f.expected_move, (0.5 * atr + 0.5 * implied) * z, epsilon = 1e-6);
        assert_relative_eq!(f.upper - spot, spot - f.lower, epsilon = 1e-6);
        assert_eq!(f.confidence, 75.0);
        assert_eq!(f.method, RangeMethod::Statistical);
    }

    #[test]
    fn test_expected_move_monotonic_in_vol_and_atr() {
        let p = make_predictor();
        let history = make_history(40, 26000.0, 100.0);
        let low = p.predict_statistical(&history, 0.10, 30).unwrap();
        let high = p.predict_statistical(&history, 0.30, 30).unwrap();
        assert!(high.expected_move > low.expected_move);

        let wide = make_history(40, 26000.0, 300.0);
        let wide_f = p.predict_statistical(&wide, 0.10, 30).unwrap();
        assert!(wide_f.expected_move > low.expected_move);
    }

    #[test]
    fn test_fat_tail_width_never_narrower() {
        let p = make_predictor();
        for history in [make_history(40, 26000.0, 100.0), make_fat_tailed_history(120)] {
            let f = p.predict_statistical(&history, 0.14, 30).unwrap();
            assert!(f.fat_tail_multiplier >= 1.0);
            assert!(f.fat_tail_width() >= f.width() - 1e-9);
        }
    }

    #[test]
    fn test_fat_tail_detected_on_shocks() {
        let est = make_predictor().fat_tail_multiplier(&make_fat_tailed_history(120).closes());
        assert!(est.multiplier > 1.0, "multiplier {}", est.multiplier);
        assert!(est.raw_ratio.is_some());
    }

    #[test]
    fn test_short_history_no_fabrication() {
        let p = make_predictor();
        let history = make_history(10, 26000.0, 100.0);
        let f = p.predict_statistical(&history, 0.15, 30).unwrap();
        assert_eq!(f.fat_tail_multiplier, 1.0);
        assert_eq!(f.confidence, 65.0);
        assert!(f.warnings.iter().any(|w| w.kind == WarningKind::InsufficientData));
    }

    #[test]
    fn test_single_bar_uses_implied_move() {
        let p = make_predictor();
        let history = make_history(1, 26000.0, 100.0);
        let f = p.predict_statistical(&history, 0.16, 30).unwrap();
        assert!(f.atr.is_none());
        assert_relative_eq!(f.implied_move, history.last_close().unwrap() * 0.16 / 252f64.sqrt());
    }

    #[test]
    fn test_flat_history_multiplier_one() {
        let closes = vec![100.0; 80];
        let est = make_predictor().fat_tail_multiplier(&closes);
        assert_eq!(est.multiplier, 1.0);
        assert_eq!(est.warnings[0].kind, WarningKind::FatTail);
    }

    #[test]
    fn test_invalid_vol_rejected() {
        let history = make_history(40, 26000.0, 100.0);
        assert!(make_predictor().predict_statistical(&history, -0.1, 30).is_err());
        assert!(make_predictor().predict_statistical(&history, f64::NAN, 30).is_err());
        assert!(matches!(
            make_predictor().predict_statistical(&history, 2.5, 30),
            Err(CoreError::InputValidation { .. })
        ));
    }

    // ---- rule-based / iv / ensemble ----

    #[test]
    fn test_rule_based_widens_in_fearful_market() {
        let p = make_predictor();
        let history = make_history(40, 26000.0, 100.0);
        let calm = p.predict_rule_based(&history, &make_chain(26000.0, 500, 1000, 0.10), 0.10).unwrap();
        let fearful = p.predict_rule_based(&history, &make_chain(26000.0, 2000, 1000, 0.25), 0.25).unwrap();
        assert!(fearful.expected_move > calm.expected_move);
        assert_eq!(fearful.method, RangeMethod::RuleBased);
    }

    #[test]
    fn test_iv_method_uses_atm_iv() {
        let p = make_predictor();
        let history = make_history(40, 26000.0, 100.0);
        let f = p.predict_implied_vol(&history, &make_chain(26000.0, 1000, 1000, 0.20)).unwrap();
        assert_eq!(f.method, RangeMethod::ImpliedVol);
        assert_relative_eq!(f.implied_move, 26000.0 * 0.20 / 252f64.sqrt(), epsilon = 1e-9);
        assert_eq!(f.confidence, 68.0);
    }

    #[test]
    fn test_ensemble_lies_between_methods() {
        let p = make_predictor();
        let history = make_history(40, 26000.0, 100.0);
        let chain = make_chain(26000.0, 1000, 1000, 0.15);
        let e = p.predict_ensemble(&history, &chain, 0.15).unwrap();
        let s = p.predict_statistical(&history, 0.15, 30).unwrap();
        let i = p.predict_implied_vol(&history, &chain).unwrap();
        let r = p.predict_rule_based(&history, &chain, 0.15).unwrap();
        let half = e.upper - e.spot;
        let halves = [s.upper - s.spot, i.upper - i.spot, r.upper - r.spot];
        let min = halves.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = halves.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(half >= min - 1e-9 && half <= max + 1e-9);
        assert!(e.fat_tail_width() >= e.width());
    }

    #[test]
    fn test_intraday_levels() {
        let p = make_predictor();
        let history = make_history(40, 26000.0, 100.0);
        let f = p.predict_statistical(&history, 0.15, 30).unwrap();
        let levels = p.intraday_levels(&f);
        assert!(levels.support_2 < levels.support_1);
        assert!(levels.resistance_1 < levels.resistance_2);
        assert_relative_eq!(levels.pivot, (f.upper + f.lower) / 2.0);
    }
}
