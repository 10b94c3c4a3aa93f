//! Delta-targeted strike suggestion.
//!
//! Picks the strike nearest spot whose |delta| falls inside the configured
//! band, pricing each candidate with its own chain IV. When nothing lands in
//! the band the nearest-ATM strike is returned with a warning.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::pricing::{years_from_days, BlackScholes, PricingInput, PricingModel};
use crate::config::StrategyConfig;
use crate::types::{CoreError, CoreResult, OptionChain, OptionType, Signal, SignalKind, Warning, WarningKind};

/// Band used around spot when a row has no IV of its own.
const ATM_IV_BAND: f64 = 0.02;

/// A suggested strike with the delta that justified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeSuggestion {
    pub strike: f64,
    pub option_type: OptionType,
    pub delta: f64,
    pub implied_vol: f64,
    pub in_band: bool,
    pub warnings: Vec<Warning>,
}

pub struct StrikeSelector<P: PricingModel = BlackScholes> {
    config: StrategyConfig,
    pricer: P,
}

impl StrikeSelector<BlackScholes> {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            pricer: BlackScholes,
        }
    }
}

impl<P: PricingModel> StrikeSelector<P> {
    pub fn with_pricer(config: StrategyConfig, pricer: P) -> Self {
        Self { config, pricer }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Suggest a strike of `option_type` from the nearest expiry.
    pub fn suggest(&self, chain: &OptionChain, option_type: OptionType, dte_days: f64) -> CoreResult<StrikeSuggestion> {
        let spot = chain.spot();
        let fallback_iv = chain.atm_implied_vol(ATM_IV_BAND);
        let t = years_from_days(dte_days);

        let mut candidates: Vec<(f64, f64, f64)> = Vec::new();
        for row in chain
            .rows_for(chain.nearest_expiry())
            .filter(|r| r.option_type == option_type)
        {
            let iv = if row.implied_vol > 0.0 {
                row.implied_vol
            } else {
                match fallback_iv {
                    Some(iv) => iv,
                    None => continue,
                }
            };
            let valuation = self.pricer.value(&PricingInput {
                spot,
                strike: row.strike,
                time_to_expiry: t,
                volatility: iv,
                rate: self.config.risk_free_rate,
                option_type,
            });
            candidates.push((row.strike, valuation.greeks.delta, iv));
        }

        if candidates.is_empty() {
            return Err(CoreError::insufficient(&format!("priced {option_type} rows"), 1, 0));
        }

        let distance = |c: &&(f64, f64, f64)| (c.0 - spot).abs();
        let in_band = candidates
            .iter()
            .filter(|c| {
                let d = c.1.abs();
                d >= self.config.delta_band_min && d <= self.config.delta_band_max
            })
            .min_by(|a, b| distance(a).total_cmp(&distance(b)));

        if let Some(&(strike, delta, implied_vol)) = in_band {
            debug!(strike, delta = format!("{:.3}", delta), %option_type, "Strike in delta band");
            return Ok(StrikeSuggestion {
                strike,
                option_type,
                delta,
                implied_vol,
                in_band: true,
                warnings: vec![],
            });
        }

        // Non-empty, so a nearest candidate exists.
        let nearest = candidates.iter().min_by(|a, b| distance(a).total_cmp(&distance(b)));
        let Some(&(strike, delta, implied_vol)) = nearest else {
            return Err(CoreError::insufficient(&format!("priced {option_type} rows"), 1, 0));
        };
        warn!(strike, delta = format!("{:.3}", delta), "No strike in delta band, using nearest ATM");
        Ok(StrikeSuggestion {
            strike,
            option_type,
            delta,
            implied_vol,
            in_band: false,
            warnings: vec![Warning::new(
                WarningKind::Signal,
                format!(
                    "no {option_type} strike with |delta| in [{:.2}, {:.2}]; using nearest ATM {strike:.0}",
                    self.config.delta_band_min, self.config.delta_band_max
                ),
            )],
        })
    }

    /// Suggest a strike matching a directional signal; `None` when the
    /// signal is not directional.
    pub fn suggest_for_signal(
        &self,
        chain: &OptionChain,
        signal: &Signal,
        dte_days: f64,
    ) -> CoreResult<Option<StrikeSuggestion>> {
        let option_type = match signal.kind {
            SignalKind::CallBuy => OptionType::Call,
            SignalKind::PutBuy => OptionType::Put,
            SignalKind::NoSignal => return Ok(None),
        };
        self.suggest(chain, option_type, dte_days).map(Some)
    }
}
