//! Deterministic market fixtures.
//!
//! Price histories, option chains and track records with known shapes so
//! integration tests can assert on signal and sizing outcomes.

use chrono::{NaiveDate, TimeZone, Utc};

use optedge::history::{TrackRecord, TradeStats};
use optedge::types::{OptionChain, OptionChainRow, OptionType, PriceHistory};

pub const SPOT: f64 = 26150.0;

/// Route library logs to the test writer; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("optedge=debug"))
        .with_test_writer()
        .try_init();
}

/// 40 daily closes falling 15 a day with a 5-point bounce every fifth day.
pub fn falling_history() -> PriceHistory {
    let mut closes = vec![26600.0];
    for i in 1..40 {
        let last = closes[i - 1];
        closes.push(if i % 5 == 0 { last + 5.0 } else { last - 15.0 });
    }
    PriceHistory::from_closes(Utc.with_ymd_and_hms(2026, 8, 1, 15, 30, 0).unwrap(), &closes).unwrap()
}

/// Closes alternating ±20 around a flat level.
pub fn choppy_history() -> PriceHistory {
    let closes: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { SPOT - 20.0 } else { SPOT + 20.0 }).collect();
    PriceHistory::from_closes(Utc.with_ymd_and_hms(2026, 8, 1, 15, 30, 0).unwrap(), &closes).unwrap()
}

/// Strikes 25 700–26 600 every 100 around `SPOT`, one weekly expiry, flat IV.
pub fn chain(call_oi: u64, put_oi: u64, iv: f64) -> OptionChain {
    let expiry = NaiveDate::from_ymd_opt(2026, 10, 29).unwrap();
    let rows = (0..10)
        .flat_map(|i| {
            let strike = 25700.0 + 100.0 * i as f64;
            [(OptionType::Call, call_oi), (OptionType::Put, put_oi)].map(|(option_type, open_interest)| {
                OptionChainRow {
                    strike,
                    option_type,
                    open_interest,
                    volume: 2_000,
                    implied_vol: iv,
                    expiry,
                }
            })
        })
        .collect();
    OptionChain::new(SPOT, rows).unwrap()
}

/// `n` trades with the given share of 2R winners against 1R losers.
pub fn track_record(n: usize, win_rate: f64) -> TradeStats {
    let wins = (n as f64 * win_rate).round() as usize;
    let pnls: Vec<f64> = (0..n).map(|i| if i < wins { 200.0 } else { -100.0 }).collect();
    TrackRecord::from_pnls(&pnls, 50).unwrap().stats()
}
