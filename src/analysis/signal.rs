//! Directional signal from RSI / PCR confluence.
//!
//! A call-buy needs an oversold RSI *and* a low put-call ratio; a put-buy
//! needs an overbought RSI *and* a high put-call ratio. Anything else is
//! `NO_SIGNAL`. Confidence measures how far past both thresholds the
//! indicators sit.

use tracing::{debug, info, warn};

use crate::config::SignalConfig;
use crate::types::{
    CoreError, CoreResult, OptionChain, PriceHistory, Signal, SignalKind, Warning, WarningKind,
};

pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Wilder-smoothed RSI over `period` changes.
    ///
    /// The first average gain/loss is the simple mean of the first `period`
    /// changes; each later change updates `avg = (avg·(period−1) + x)/period`.
    /// A zero average loss yields 100, or 50 when there were no gains either.
    pub fn compute_rsi(&self, prices: &[f64], period: usize) -> CoreResult<f64> {
        if period == 0 {
            return Err(CoreError::invalid("period", "RSI period must be positive"));
        }
        if prices.len() < period + 1 {
            return Err(CoreError::insufficient("prices for RSI", period + 1, prices.len()));
        }
        if let Some(bad) = prices.iter().find(|p| !p.is_finite()) {
            return Err(CoreError::invalid("prices", format!("non-finite price {bad}")));
        }

        let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
        let p = period as f64;
        let (seed, rest) = changes.split_at(period);
        let mut avg_gain = seed.iter().map(|c| c.max(0.0)).sum::<f64>() / p;
        let mut avg_loss = seed.iter().map(|c| (-c).max(0.0)).sum::<f64>() / p;

        for change in rest {
            avg_gain = (avg_gain * (p - 1.0) + change.max(0.0)) / p;
            avg_loss = (avg_loss * (p - 1.0) + (-change).max(0.0)) / p;
        }

        if avg_loss == 0.0 {
            return Ok(if avg_gain == 0.0 { 50.0 } else { 100.0 });
        }
        let rs = avg_gain / avg_loss;
        Ok((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
    }

    /// Put OI / call OI, optionally for the nearest expiry only.
    /// `None` when call OI is zero.
    pub fn compute_pcr(&self, chain: &OptionChain, by_expiry: bool) -> Option<f64> {
        chain.put_call_ratio(by_expiry)
    }

    /// Compute RSI and PCR from market data and classify.
    pub fn generate_signal(&self, history: &PriceHistory, chain: &OptionChain) -> CoreResult<Signal> {
        let rsi = self.compute_rsi(&history.closes(), self.config.rsi_period)?;
        let pcr = self.compute_pcr(chain, self.config.pcr_nearest_expiry);
        let signal = self.evaluate(rsi, pcr);
        info!(
            signal = %signal.kind,
            confidence = format!("{:.1}", signal.confidence),
            rsi = format!("{:.1}", rsi),
            pcr = ?pcr,
            "Signal generated"
        );
        Ok(signal)
    }

    /// Classify pre-computed indicators.
    pub fn evaluate(&self, rsi: f64, pcr: Option<f64>) -> Signal {
        let c = &self.config;
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        let rsi_percentile = (rsi / 100.0).clamp(0.0, 1.0);
        let pcr_percentile = pcr.map(pcr_percentile);

        let Some(pcr_value) = pcr else {
            warn!(rsi, "PCR undefined (zero call OI), no signal");
            warnings.push(Warning::new(
                WarningKind::Signal,
                "Put-call ratio undefined: total call open interest is zero",
            ));
            reasons.push("PCR unavailable, confluence cannot be established".to_string());
            return Signal {
                kind: SignalKind::NoSignal,
                confidence: 0.0,
                rsi,
                pcr: None,
                rsi_percentile,
                pcr_percentile: None,
                reasons,
                warnings,
            };
        };

        let rsi_oversold = rsi < c.rsi_oversold;
        let rsi_overbought = rsi > c.rsi_overbought;
        let pcr_bullish = pcr_value < c.pcr_oversold;
        let pcr_bearish = pcr_value > c.pcr_overbought;

        let (kind, confidence) = if rsi_oversold && pcr_bullish {
            reasons.push(format!("RSI {rsi:.1} below oversold {:.0}", c.rsi_oversold));
            reasons.push(format!("PCR {pcr_value:.2} below bullish threshold {:.2}", c.pcr_oversold));
            let rsi_distance = (c.rsi_oversold - rsi) / c.rsi_oversold;
            let pcr_distance = (c.pcr_oversold - pcr_value) / c.pcr_oversold;
            (SignalKind::CallBuy, confluence(rsi_distance, pcr_distance))
        } else if rsi_overbought && pcr_bearish {
            reasons.push(format!("RSI {rsi:.1} above overbought {:.0}", c.rsi_overbought));
            reasons.push(format!("PCR {pcr_value:.2} above bearish threshold {:.2}", c.pcr_overbought));
            let rsi_distance = (rsi - c.rsi_overbought) / (100.0 - c.rsi_overbought);
            let pcr_distance = (pcr_value - c.pcr_overbought) / (2.0 - c.pcr_overbought);
            (SignalKind::PutBuy, confluence(rsi_distance, pcr_distance))
        } else {
            if rsi_oversold && !pcr_bullish {
                reasons.push(format!(
                    "RSI {rsi:.1} oversold but PCR {pcr_value:.2} not below {:.2}",
                    c.pcr_oversold
                ));
            } else if rsi_overbought && !pcr_bearish {
                reasons.push(format!(
                    "RSI {rsi:.1} overbought but PCR {pcr_value:.2} not above {:.2}",
                    c.pcr_overbought
                ));
            } else if pcr_bullish || pcr_bearish {
                reasons.push(format!(
                    "PCR {pcr_value:.2} extreme but RSI {rsi:.1} inside {:.0}–{:.0}",
                    c.rsi_oversold, c.rsi_overbought
                ));
            } else {
                reasons.push(format!("RSI {rsi:.1} and PCR {pcr_value:.2} both neutral"));
            }
            (SignalKind::NoSignal, 0.0)
        };

        debug!(%kind, confidence, rsi, pcr = pcr_value, "Signal evaluated");

        Signal {
            kind,
            confidence,
            rsi,
            pcr: Some(pcr_value),
            rsi_percentile,
            pcr_percentile,
            reasons,
            warnings,
        }
    }
}

/// Mean of the two clipped threshold distances, scaled to 0–100.
fn confluence(rsi_distance: f64, pcr_distance: f64) -> f64 {
    let mean = (rsi_distance.clamp(0.0, 1.0) + pcr_distance.clamp(0.0, 1.0)) / 2.0;
    (mean * 100.0).clamp(0.0, 100.0)
}

/// Map PCR to 0–1 around a neutral 1.0: 0.5 → 1.0, 1.0 → 0.5, 2.0 → 0.0.
fn pcr_percentile(pcr: f64) -> f64 {
    let p = if pcr <= 1.0 {
        0.5 + (1.0 - pcr)
    } else {
        0.5 - 0.5 * (pcr - 1.0)
    };
    p.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
