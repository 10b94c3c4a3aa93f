//! Closed-trade track record.
//!
//! Turns realised trade P&L into the win rate, reward:risk and sample size
//! that drive Kelly sizing and the equity simulation, and diagnoses whether
//! the sample is large enough to trust.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::types::{CoreError, CoreResult, Warning, WarningKind};

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
    Reliable,
    /// Fewer trades than the sizing sample minimum.
    InsufficientData,
}

/// Summary statistics of a closed-trade sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub sample_size: usize,
    pub wins: usize,
    pub losses: usize,
    /// Winning trades over all trades; scratches count as non-wins.
    pub win_rate: f64,
    pub avg_win: f64,
    /// Mean losing P&L as a positive number.
    pub avg_loss: f64,
    /// avg_win / avg_loss; `None` without both a win and a loss.
    pub avg_rr: Option<f64>,
    /// Mean P&L per trade.
    pub expectancy: f64,
    pub total_pnl: f64,
    pub reliability: Reliability,
    pub warnings: Vec<Warning>,
}

impl fmt::Display for TradeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rr = self
            .avg_rr
            .map(|r| format!("{r:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        write!(
            f,
            "{} trades | win rate {:.1}% | R:R {rr} | expectancy {:.2} | total {:.2}",
            self.sample_size,
            self.win_rate * 100.0,
            self.expectancy,
            self.total_pnl,
        )
    }
}

// ---------------------------------------------------------------------------
// Track record
// ---------------------------------------------------------------------------

pub struct TrackRecord {
    pnls: Vec<f64>,
    /// Sample size below which the statistics are flagged.
    minimum_sample: usize,
}

impl TrackRecord {
    pub fn new(minimum_sample: usize) -> Self {
        Self {
            pnls: Vec::new(),
            minimum_sample,
        }
    }

    pub fn from_pnls(pnls: &[f64], minimum_sample: usize) -> CoreResult<Self> {
        let mut record = Self::new(minimum_sample);
        for &pnl in pnls {
            record.add_trade(pnl)?;
        }
        Ok(record)
    }

    /// Record one closed trade's P&L.
    pub fn add_trade(&mut self, pnl: f64) -> CoreResult<()> {
        if !pnl.is_finite() {
            return Err(CoreError::invalid("pnl", format!("trade P&L must be finite, got {pnl}")));
        }
        self.pnls.push(pnl);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.pnls.len()
    }

    pub fn pnls(&self) -> &[f64] {
        &self.pnls
    }

    pub fn stats(&self) -> TradeStats {
        let sample_size = self.pnls.len();
        let winners: Vec<f64> = self.pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losers: Vec<f64> = self.pnls.iter().copied().filter(|p| *p < 0.0).map(f64::abs).collect();
        let mean = |xs: &[f64]| if xs.is_empty() { 0.0 } else { xs.iter().sum::<f64>() / xs.len() as f64 };

        let total_pnl: f64 = self.pnls.iter().sum();
        let avg_win = mean(&winners);
        let avg_loss = mean(&losers);
        let avg_rr = (!winners.is_empty() && !losers.is_empty()).then(|| avg_win / avg_loss);
        let win_rate = if sample_size == 0 {
            0.0
        } else {
            winners.len() as f64 / sample_size as f64
        };

        let mut warnings = Vec::new();
        let reliability = if sample_size < self.minimum_sample {
            warnings.push(Warning::new(
                WarningKind::SmallSample,
                format!(
                    "track record has {sample_size} trades, {} needed for reliable statistics",
                    self.minimum_sample
                ),
            ));
            Reliability::InsufficientData
        } else {
            Reliability::Reliable
        };
        if sample_size > 0 && avg_rr.is_none() {
            warnings.push(Warning::new(
                WarningKind::InsufficientData,
                "reward:risk undefined without both winning and losing trades",
            ));
        }

        let stats = TradeStats {
            sample_size,
            wins: winners.len(),
            losses: losers.len(),
            win_rate,
            avg_win,
            avg_loss,
            avg_rr,
            expectancy: if sample_size == 0 { 0.0 } else { total_pnl / sample_size as f64 },
            total_pnl,
            reliability,
            warnings,
        };
        debug!(stats = %stats, reliability = ?stats.reliability, "Track record");
        stats
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
