//! Option pricing model.
//!
//! A single `PricingModel` interface serves mark-to-market, Greeks and strike
//! selection. `BlackScholes` is the production model. The lognormal terminal
//! distribution shared by probability-of-profit and expected-value
//! calculations lives here too.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::stats::{normal_cdf, normal_pdf};
use crate::types::OptionType;

/// Volatility floor applied before pricing.
pub const MIN_VOLATILITY: f64 = 0.01;
/// Time-to-expiry floor in years applied before pricing.
pub const MIN_TIME_TO_EXPIRY: f64 = 0.001;
/// Days per year for converting DTE to year fractions.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Convert calendar days to a year fraction.
pub fn years_from_days(days: f64) -> f64 {
    days / DAYS_PER_YEAR
}

// ---------------------------------------------------------------------------
// Model interface
// ---------------------------------------------------------------------------

/// Inputs to price one option.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingInput {
    pub spot: f64,
    pub strike: f64,
    /// Years.
    pub time_to_expiry: f64,
    /// Annualized, decimal.
    pub volatility: f64,
    pub rate: f64,
    pub option_type: OptionType,
}

/// First-order Greeks. Theta is per calendar day; vega and rho per one
/// percentage point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

impl Greeks {
    /// Greeks scaled by a signed position size.
    pub fn scaled(&self, factor: f64) -> Greeks {
        Greeks {
            delta: self.delta * factor,
            gamma: self.gamma * factor,
            theta: self.theta * factor,
            vega: self.vega * factor,
            rho: self.rho * factor,
        }
    }

    pub fn add(&self, other: &Greeks) -> Greeks {
        Greeks {
            delta: self.delta + other.delta,
            gamma: self.gamma + other.gamma,
            theta: self.theta + other.theta,
            vega: self.vega + other.vega,
            rho: self.rho + other.rho,
        }
    }
}

/// Which pricing input was clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClampedInput {
    Volatility,
    TimeToExpiry,
}

/// A pricing input that was raised to its floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericClamp {
    pub input: ClampedInput,
    pub requested: f64,
    pub used: f64,
}

/// Model price, Greeks and any input clamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub price: f64,
    pub greeks: Greeks,
    pub clamps: Vec<NumericClamp>,
}

/// Prices a single European option.
#[cfg_attr(test, mockall::automock)]
pub trait PricingModel {
    fn value(&self, input: &PricingInput) -> Valuation;
}

// ---------------------------------------------------------------------------
// Black-Scholes
// ---------------------------------------------------------------------------

/// Black-Scholes-Merton without dividends.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlackScholes;

impl PricingModel for BlackScholes {
    fn value(&self, input: &PricingInput) -> Valuation {
        let mut clamps = Vec::new();
        let sigma = floor_input(input.volatility, MIN_VOLATILITY, ClampedInput::Volatility, &mut clamps);
        let t = floor_input(input.time_to_expiry, MIN_TIME_TO_EXPIRY, ClampedInput::TimeToExpiry, &mut clamps);
        if !clamps.is_empty() {
            debug!(strike = input.strike, ?clamps, "Pricing inputs clamped");
        }

        let s = input.spot;
        let k = input.strike;
        let r = input.rate;
        let sqrt_t = t.sqrt();
        let d1 = ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / (sigma * sqrt_t);
        let d2 = d1 - sigma * sqrt_t;
        let discount = (-r * t).exp();
        let pdf_d1 = normal_pdf(d1);

        let gamma = pdf_d1 / (s * sigma * sqrt_t);
        let vega = s * pdf_d1 * sqrt_t / 100.0;
        let decay = -s * pdf_d1 * sigma / (2.0 * sqrt_t);

        let (price, delta, theta_year, rho) = match input.option_type {
            OptionType::Call => {
                let nd2 = normal_cdf(d2);
                (
                    s * normal_cdf(d1) - k * discount * nd2,
                    normal_cdf(d1),
                    decay - r * k * discount * nd2,
                    k * t * discount * nd2 / 100.0,
                )
            }
            OptionType::Put => {
                let nmd2 = normal_cdf(-d2);
                (
                    k * discount * nmd2 - s * normal_cdf(-d1),
                    normal_cdf(d1) - 1.0,
                    decay + r * k * discount * nmd2,
                    -k * t * discount * nmd2 / 100.0,
                )
            }
        };

        Valuation {
            price: price.max(0.0),
            greeks: Greeks {
                delta,
                gamma,
                theta: theta_year / DAYS_PER_YEAR,
                vega,
                rho,
            },
            clamps,
        }
    }
}

fn floor_input(value: f64, floor: f64, input: ClampedInput, clamps: &mut Vec<NumericClamp>) -> f64 {
    if value.is_finite() && value >= floor {
        return value;
    }
    clamps.push(NumericClamp {
        input,
        requested: value,
        used: floor,
    });
    floor
}

// ---------------------------------------------------------------------------
// Terminal distribution
// ---------------------------------------------------------------------------

/// Lognormal terminal spot: `ln S_T ~ N(ln S − ½σ²T, σ√T)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerminalDistribution {
    pub mu: f64,
    pub sd: f64,
}

impl TerminalDistribution {
    /// Floors volatility and time like the pricer does; clamps are returned.
    pub fn new(spot: f64, volatility: f64, time_to_expiry: f64) -> (Self, Vec<NumericClamp>) {
        let mut clamps = Vec::new();
        let sigma = floor_input(volatility, MIN_VOLATILITY, ClampedInput::Volatility, &mut clamps);
        let t = floor_input(time_to_expiry, MIN_TIME_TO_EXPIRY, ClampedInput::TimeToExpiry, &mut clamps);
        let dist = Self {
            mu: spot.ln() - 0.5 * sigma * sigma * t,
            sd: sigma * t.sqrt(),
        };
        (dist, clamps)
    }

    /// P(S_T <= x).
    pub fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        if x.is_infinite() {
            return 1.0;
        }
        normal_cdf((x.ln() - self.mu) / self.sd)
    }

    /// P(a < S_T <= b).
    pub fn probability_between(&self, a: f64, b: f64) -> f64 {
        (self.cdf(b) - self.cdf(a)).max(0.0)
    }

    /// Spot at `k` standard deviations in log space.
    pub fn quantile_at_sd(&self, k: f64) -> f64 {
        (self.mu + k * self.sd).exp()
    }

    /// E[f(S_T)] by trapezoid integration in log space over ±`width` sd.
    pub fn expectation<F: Fn(f64) -> f64>(&self, f: F, width: f64, steps: usize) -> f64 {
        let steps = steps.max(2);
        let dz = 2.0 * width / steps as f64;
        let mut total = 0.0;
        let mut mass = 0.0;
        for i in 0..=steps {
            let z = -width + i as f64 * dz;
            let end_weight = if i == 0 || i == steps { 0.5 } else { 1.0 };
            let weight = end_weight * normal_pdf(z) * dz;
            total += weight * f((self.mu + z * self.sd).exp());
            mass += weight;
        }
        // Renormalise the truncated density.
        if mass > 0.0 {
            total / mass
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
