//! Option-chain analytics.
//!
//! Open-interest aggregates over a validated `OptionChain`: put-call ratio,
//! OI concentration, max pain, OI-derived support/resistance and ATM implied
//! volatility.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{OptionChain, OptionChainRow, OptionType};

/// OI concentration at the most crowded strikes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OiConcentration {
    /// Share of total OI held by the top-N rows, 0–100.
    pub overall_pct: f64,
    pub call_pct: f64,
    pub put_pct: f64,
    /// OI-weighted mean strike of the top-N rows.
    pub center_strike: Option<f64>,
}

/// Strikes with the heaviest put (support) and call (resistance) OI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OiLevels {
    pub support: Vec<f64>,
    pub resistance: Vec<f64>,
}

impl OptionChain {
    /// Distinct expiries, earliest first.
    pub fn expiries(&self) -> Vec<NaiveDate> {
        let mut expiries: Vec<NaiveDate> = self.rows().iter().map(|r| r.expiry).collect();
        expiries.sort();
        expiries.dedup();
        expiries
    }

    pub fn nearest_expiry(&self) -> Option<NaiveDate> {
        self.rows().iter().map(|r| r.expiry).min()
    }

    /// Rows for one expiry, or all rows when `expiry` is `None`.
    pub fn rows_for(&self, expiry: Option<NaiveDate>) -> impl Iterator<Item = &OptionChainRow> {
        self.rows()
            .iter()
            .filter(move |r| expiry.map_or(true, |e| r.expiry == e))
    }

    /// Sum of OI for one option type.
    pub fn total_oi(&self, option_type: OptionType, expiry: Option<NaiveDate>) -> u64 {
        self.rows_for(expiry)
            .filter(|r| r.option_type == option_type)
            .map(|r| r.open_interest)
            .sum()
    }

    /// Put OI / call OI. `None` when call OI is zero.
    pub fn put_call_ratio(&self, nearest_expiry_only: bool) -> Option<f64> {
        let expiry = if nearest_expiry_only { self.nearest_expiry() } else { None };
        let calls = self.total_oi(OptionType::Call, expiry);
        if calls == 0 {
            return None;
        }
        let puts = self.total_oi(OptionType::Put, expiry);
        Some(puts as f64 / calls as f64)
    }

    /// Mean IV of rows with strikes within `band` (fraction of spot) of spot.
    /// Falls back to the rows at the strike nearest spot. Zero IVs are ignored.
    pub fn atm_implied_vol(&self, band: f64) -> Option<f64> {
        let spot = self.spot();
        let near: Vec<f64> = self
            .rows()
            .iter()
            .filter(|r| r.implied_vol > 0.0 && (r.strike - spot).abs() <= band * spot)
            .map(|r| r.implied_vol)
            .collect();
        if !near.is_empty() {
            return Some(near.iter().sum::<f64>() / near.len() as f64);
        }

        let nearest = self
            .rows()
            .iter()
            .filter(|r| r.implied_vol > 0.0)
            .map(|r| (r.strike - spot).abs())
            .fold(f64::INFINITY, f64::min);
        let at_nearest: Vec<f64> = self
            .rows()
            .iter()
            .filter(|r| r.implied_vol > 0.0 && (r.strike - spot).abs() == nearest)
            .map(|r| r.implied_vol)
            .collect();
        if at_nearest.is_empty() {
            None
        } else {
            Some(at_nearest.iter().sum::<f64>() / at_nearest.len() as f64)
        }
    }

    /// Implied vol for one strike/type, if quoted.
    pub fn implied_vol_at(&self, strike: f64, option_type: OptionType) -> Option<f64> {
        self.rows()
            .iter()
            .find(|r| r.option_type == option_type && (r.strike - strike).abs() < 1e-9 && r.implied_vol > 0.0)
            .map(|r| r.implied_vol)
    }

    /// Distinct strikes, ascending.
    pub fn strikes(&self) -> Vec<f64> {
        let mut strikes: Vec<f64> = self.rows().iter().map(|r| r.strike).collect();
        crate::analysis::stats::sort_floats(&mut strikes);
        strikes.dedup();
        strikes
    }

    /// OI share held by the `top_n` largest rows overall and per type.
    pub fn oi_concentration(&self, top_n: usize) -> OiConcentration {
        let rows: Vec<&OptionChainRow> = self.rows().iter().collect();
        let calls: Vec<&OptionChainRow> = rows.iter().copied().filter(|r| r.option_type == OptionType::Call).collect();
        let puts: Vec<&OptionChainRow> = rows.iter().copied().filter(|r| r.option_type == OptionType::Put).collect();

        let top = top_rows(&rows, top_n);
        let top_oi: u64 = top.iter().map(|r| r.open_interest).sum();
        let center_strike = if top_oi > 0 {
            Some(top.iter().map(|r| r.strike * r.open_interest as f64).sum::<f64>() / top_oi as f64)
        } else {
            None
        };

        OiConcentration {
            overall_pct: share_pct(&rows, top_n),
            call_pct: share_pct(&calls, top_n),
            put_pct: share_pct(&puts, top_n),
            center_strike,
        }
    }

    /// Settlement strike that minimises total payout to option holders.
    pub fn max_pain(&self) -> Option<f64> {
        let mut best: Option<(f64, f64)> = None;
        for settle in self.strikes() {
            let payout: f64 = self
                .rows()
                .iter()
                .map(|r| {
                    let intrinsic = match r.option_type {
                        OptionType::Call => (settle - r.strike).max(0.0),
                        OptionType::Put => (r.strike - settle).max(0.0),
                    };
                    intrinsic * r.open_interest as f64
                })
                .sum();
            if best.map_or(true, |(_, p)| payout < p) {
                best = Some((settle, payout));
            }
        }
        best.map(|(strike, _)| strike)
    }

    /// Top-N put-OI strikes (support) and call-OI strikes (resistance),
    /// each sorted ascending.
    pub fn oi_levels(&self, top_n: usize) -> OiLevels {
        OiLevels {
            support: top_strikes_by_oi(self, OptionType::Put, top_n),
            resistance: top_strikes_by_oi(self, OptionType::Call, top_n),
        }
    }
}

fn top_rows<'a>(rows: &[&'a OptionChainRow], n: usize) -> Vec<&'a OptionChainRow> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| b.open_interest.cmp(&a.open_interest));
    sorted.truncate(n);
    sorted
}

fn share_pct(rows: &[&OptionChainRow], n: usize) -> f64 {
    let total: u64 = rows.iter().map(|r| r.open_interest).sum();
    if total == 0 {
        return 0.0;
    }
    let top: u64 = top_rows(rows, n).iter().map(|r| r.open_interest).sum();
    top as f64 / total as f64 * 100.0
}

fn top_strikes_by_oi(chain: &OptionChain, option_type: OptionType, n: usize) -> Vec<f64> {
    let mut by_strike: BTreeMap<u64, (f64, u64)> = BTreeMap::new();
    for row in chain.rows().iter().filter(|r| r.option_type == option_type) {
        let entry = by_strike.entry(row.strike.to_bits()).or_insert((row.strike, 0));
        entry.1 += row.open_interest;
    }
    let mut levels: Vec<(f64, u64)> = by_strike.into_values().filter(|(_, oi)| *oi > 0).collect();
    levels.sort_by(|a, b| b.1.cmp(&a.1));
    levels.truncate(n);
    let mut strikes: Vec<f64> = levels.into_iter().map(|(s, _)| s).collect();
    crate::analysis::stats::sort_floats(&mut strikes);
    strikes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
