//! Multi-leg option strategies.
//!
//! A `Strategy` is an ordered set of legs with their entry premiums. The
//! `StrategyEngine` evaluates it: expiry payoff net of premium, model
//! mark-to-market, breakevens, bounded/unbounded max profit and loss,
//! aggregate Greeks, probability of profit and margin.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use super::pricing::{
    years_from_days, BlackScholes, Greeks, NumericClamp, PricingInput, PricingModel, TerminalDistribution,
};
use crate::config::StrategyConfig;
use crate::types::{CoreError, CoreResult, OptionType, Warning, WarningKind};

/// Slope magnitude treated as flat when testing for unbounded payoff.
const SLOPE_EPSILON: f64 = 1e-9;
/// Net delta per lot beyond which a custom strategy counts as directional.
const DIRECTIONAL_DELTA: f64 = 0.15;

// ---------------------------------------------------------------------------
// Legs
// ---------------------------------------------------------------------------

/// Long or short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Buy,
    Sell,
}

impl Position {
    /// +1 for long, −1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Position::Buy => 1.0,
            Position::Sell => -1.0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Buy => write!(f, "BUY"),
            Position::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Position {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "LONG" => Ok(Position::Buy),
            "SELL" | "SHORT" => Ok(Position::Sell),
            other => Err(CoreError::invalid("position", format!("unknown position '{other}'"))),
        }
    }
}

/// One option leg. Quantity is in lots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    pub option_type: OptionType,
    pub position: Position,
    pub strike: f64,
    /// Per-unit premium paid (buy) or received (sell).
    pub entry_premium: f64,
    pub quantity: u32,
}

impl OptionLeg {
    pub fn new(
        option_type: OptionType,
        position: Position,
        strike: f64,
        entry_premium: f64,
        quantity: u32,
    ) -> CoreResult<Self> {
        let leg = Self {
            option_type,
            position,
            strike,
            entry_premium,
            quantity,
        };
        leg.validate()?;
        Ok(leg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.strike.is_finite() || self.strike <= 0.0 {
            return Err(CoreError::invalid("strike", format!("strike must be positive, got {}", self.strike)));
        }
        if self.quantity == 0 {
            return Err(CoreError::invalid("quantity", "quantity must be positive"));
        }
        if !self.entry_premium.is_finite() || self.entry_premium < 0.0 {
            return Err(CoreError::invalid(
                "entry_premium",
                format!("premium must be >= 0, got {}", self.entry_premium),
            ));
        }
        Ok(())
    }

    /// Intrinsic value per unit at `spot`.
    pub fn intrinsic(&self, spot: f64) -> f64 {
        match self.option_type {
            OptionType::Call => (spot - self.strike).max(0.0),
            OptionType::Put => (self.strike - spot).max(0.0),
        }
    }

    /// Signed contract units: ±quantity × lot size.
    pub fn signed_units(&self, lot_size: u32) -> f64 {
        self.position.sign() * self.quantity as f64 * lot_size as f64
    }

    /// Expiry P&L of this leg with an explicit entry premium.
    fn pnl_with_premium(&self, spot: f64, premium: f64, lot_size: u32) -> f64 {
        (self.intrinsic(spot) - premium) * self.signed_units(lot_size)
    }
}

impl fmt::Display for OptionLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x {:.0} {} @ {:.2}",
            self.position, self.quantity, self.strike, self.option_type, self.entry_premium
        )
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Named strategy shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    LongCall,
    LongPut,
    BullCallSpread,
    BearPutSpread,
    LongStraddle,
    LongStrangle,
    ShortStrangle,
    IronCondor,
    Custom,
}

impl StrategyKind {
    /// Directional intent of the shape; `None` for custom strategies.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            StrategyKind::LongCall | StrategyKind::BullCallSpread => Some(Direction::Bullish),
            StrategyKind::LongPut | StrategyKind::BearPutSpread => Some(Direction::Bearish),
            StrategyKind::LongStraddle
            | StrategyKind::LongStrangle
            | StrategyKind::ShortStrangle
            | StrategyKind::IronCondor => Some(Direction::Neutral),
            StrategyKind::Custom => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::LongCall => "LONG_CALL",
            StrategyKind::LongPut => "LONG_PUT",
            StrategyKind::BullCallSpread => "BULL_CALL_SPREAD",
            StrategyKind::BearPutSpread => "BEAR_PUT_SPREAD",
            StrategyKind::LongStraddle => "LONG_STRADDLE",
            StrategyKind::LongStrangle => "LONG_STRANGLE",
            StrategyKind::ShortStrangle => "SHORT_STRANGLE",
            StrategyKind::IronCondor => "IRON_CONDOR",
            StrategyKind::Custom => "CUSTOM",
        };
        write!(f, "{s}")
    }
}

/// Market view a strategy expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bullish => write!(f, "bullish"),
            Direction::Bearish => write!(f, "bearish"),
            Direction::Neutral => write!(f, "neutral"),
        }
    }
}

/// Premium paid and received at entry, in currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetPremium {
    pub debit: f64,
    pub credit: f64,
    /// credit − debit; positive for a net credit.
    pub net: f64,
}

/// Whether the strategy collects or pays premium overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PremiumStyle {
    Credit,
    Debit,
}

impl fmt::Display for PremiumStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PremiumStyle::Credit => write!(f, "CREDIT"),
            PremiumStyle::Debit => write!(f, "DEBIT"),
        }
    }
}

/// A multi-leg option position on one underlying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    name: String,
    kind: StrategyKind,
    spot: f64,
    lot_size: u32,
    legs: Vec<OptionLeg>,
}

impl Strategy {
    pub fn new(name: impl Into<String>, kind: StrategyKind, spot: f64, lot_size: u32) -> CoreResult<Self> {
        if !spot.is_finite() || spot <= 0.0 {
            return Err(CoreError::invalid("spot", format!("spot must be positive, got {spot}")));
        }
        if lot_size == 0 {
            return Err(CoreError::invalid("lot_size", "lot size must be positive"));
        }
        Ok(Self {
            name: name.into(),
            kind,
            spot,
            lot_size,
            legs: Vec::new(),
        })
    }

    /// Validate and append a leg.
    pub fn add_leg(&mut self, leg: OptionLeg) -> CoreResult<()> {
        leg.validate()?;
        self.legs.push(leg);
        Ok(())
    }

    /// Builder form of `add_leg`.
    pub fn with_leg(mut self, leg: OptionLeg) -> CoreResult<Self> {
        self.add_leg(leg)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn spot(&self) -> f64 {
        self.spot
    }

    pub fn lot_size(&self) -> u32 {
        self.lot_size
    }

    pub fn legs(&self) -> &[OptionLeg] {
        &self.legs
    }

    fn require_legs(&self) -> CoreResult<()> {
        if self.legs.is_empty() {
            return Err(CoreError::invalid("legs", format!("strategy '{}' has no legs", self.name)));
        }
        Ok(())
    }

    /// Expiry P&L at one spot, net of entry premiums.
    pub fn payoff_at(&self, spot: f64) -> f64 {
        self.legs
            .iter()
            .map(|leg| leg.pnl_with_premium(spot, leg.entry_premium, self.lot_size))
            .sum()
    }

    /// Expiry P&L across a spot domain, net of entry premiums.
    pub fn payoff_at_expiry(&self, spots: &[f64]) -> Vec<f64> {
        spots.iter().map(|&s| self.payoff_at(s)).collect()
    }

    /// Expiry P&L with premiums supplied per leg (same order as the legs).
    pub fn payoff_with_premiums(&self, spots: &[f64], entry_premiums: &[f64]) -> CoreResult<Vec<f64>> {
        if entry_premiums.len() != self.legs.len() {
            return Err(CoreError::invalid(
                "entry_premiums",
                format!("{} premiums for {} legs", entry_premiums.len(), self.legs.len()),
            ));
        }
        if let Some(bad) = entry_premiums.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(CoreError::invalid("entry_premiums", format!("invalid premium {bad}")));
        }
        Ok(spots
            .iter()
            .map(|&s| {
                self.legs
                    .iter()
                    .zip(entry_premiums)
                    .map(|(leg, &premium)| leg.pnl_with_premium(s, premium, self.lot_size))
                    .sum()
            })
            .collect())
    }

    /// Premium paid on buys and received on sells.
    pub fn net_premium(&self) -> NetPremium {
        let mut debit = 0.0;
        let mut credit = 0.0;
        for leg in &self.legs {
            let amount = leg.entry_premium * leg.quantity as f64 * self.lot_size as f64;
            match leg.position {
                Position::Buy => debit += amount,
                Position::Sell => credit += amount,
            }
        }
        NetPremium {
            debit,
            credit,
            net: credit - debit,
        }
    }

    pub fn premium_style(&self) -> PremiumStyle {
        if self.net_premium().net > 0.0 {
            PremiumStyle::Credit
        } else {
            PremiumStyle::Debit
        }
    }

    /// Payoff slope once spot is above every strike: net call units.
    pub fn upside_slope(&self) -> f64 {
        self.legs
            .iter()
            .filter(|l| l.option_type == OptionType::Call)
            .map(|l| l.signed_units(self.lot_size))
            .sum()
    }

    fn strike_bounds(&self) -> Option<(f64, f64)> {
        let min = self.legs.iter().map(|l| l.strike).fold(f64::INFINITY, f64::min);
        let max = self.legs.iter().map(|l| l.strike).fold(f64::NEG_INFINITY, f64::max);
        if self.legs.is_empty() {
            None
        } else {
            Some((min, max))
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let legs: Vec<String> = self.legs.iter().map(|l| l.to_string()).collect();
        write!(
            f,
            "{} [{}] spot {:.0} lot {}: {}",
            self.name,
            self.kind,
            self.spot,
            self.lot_size,
            legs.join(", ")
        )
    }
}

// ---------------------------------------------------------------------------
// Evaluation results
// ---------------------------------------------------------------------------

/// A finite extreme or an unbounded one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PayoffBound {
    Finite(f64),
    Unbounded,
}

impl PayoffBound {
    pub fn finite(&self) -> Option<f64> {
        match self {
            PayoffBound::Finite(v) => Some(*v),
            PayoffBound::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, PayoffBound::Unbounded)
    }
}

impl fmt::Display for PayoffBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoffBound::Finite(v) => write!(f, "{v:.2}"),
            PayoffBound::Unbounded => write!(f, "UNBOUNDED"),
        }
    }
}

/// Max profit and max loss (loss reported as the minimum payoff, ≤ 0 when a loss is possible).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitLossBounds {
    pub max_profit: PayoffBound,
    pub max_loss: PayoffBound,
}

/// Closed spot interval scanned for breakevens and extremes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotDomain {
    pub lower: f64,
    pub upper: f64,
}

impl SpotDomain {
    /// Evenly spaced points including both ends.
    pub fn grid(&self, points: usize) -> Vec<f64> {
        let points = points.max(2);
        let step = (self.upper - self.lower) / (points - 1) as f64;
        (0..points).map(|i| self.lower + step * i as f64).collect()
    }
}

/// Current model value of the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkToMarket {
    /// Unrealised P&L in currency.
    pub pnl: f64,
    /// Model price per unit, per leg.
    pub leg_prices: Vec<f64>,
    pub clamps: Vec<NumericClamp>,
}

/// Full evaluation of a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub name: String,
    pub kind: StrategyKind,
    pub direction: Direction,
    pub max_profit: PayoffBound,
    pub max_loss: PayoffBound,
    pub breakevens: Vec<f64>,
    pub probability_of_profit: f64,
    pub net_greeks: Greeks,
    pub estimated_margin: f64,
    pub net_premium: NetPremium,
    pub premium_style: PremiumStyle,
    /// |max profit / max loss| when both are finite and a loss is possible.
    pub risk_reward_ratio: Option<f64>,
    pub mark_to_market: f64,
    pub warnings: Vec<Warning>,
}

impl StrategyMetrics {
    /// Capital at risk per strategy unit: |max loss|, or margin when the loss is unbounded.
    pub fn risk_per_unit(&self) -> f64 {
        match self.max_loss {
            PayoffBound::Finite(loss) => (-loss).max(0.0),
            PayoffBound::Unbounded => self.estimated_margin,
        }
    }
}

impl fmt::Display for StrategyMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bes: Vec<String> = self.breakevens.iter().map(|b| format!("{b:.2}")).collect();
        write!(
            f,
            "{} ({}, {}): max profit {} | max loss {} | BE [{}] | POP {:.1}% | margin {:.0}",
            self.name,
            self.premium_style,
            self.direction,
            self.max_profit,
            self.max_loss,
            bes.join(", "),
            self.probability_of_profit * 100.0,
            self.estimated_margin,
        )
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct StrategyEngine<P: PricingModel = BlackScholes> {
    config: StrategyConfig,
    pricer: P,
}

impl StrategyEngine<BlackScholes> {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            pricer: BlackScholes,
        }
    }
}

impl<P: PricingModel> StrategyEngine<P> {
    pub fn with_pricer(config: StrategyConfig, pricer: P) -> Self {
        Self { config, pricer }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn pricer(&self) -> &P {
        &self.pricer
    }

    /// ±`domain_sigmas` lognormal sd around spot, widened to cover every
    /// strike by 10%.
    pub fn spot_domain(&self, strategy: &Strategy, iv: f64, dte_days: f64) -> SpotDomain {
        let (dist, _) = TerminalDistribution::new(strategy.spot(), iv, years_from_days(dte_days));
        let spread = self.config.domain_sigmas * dist.sd;
        let mut lower = strategy.spot() * (-spread).exp();
        let mut upper = strategy.spot() * spread.exp();
        if let Some((min_strike, max_strike)) = strategy.strike_bounds() {
            lower = lower.min(min_strike * 0.9);
            upper = upper.max(max_strike * 1.1);
        }
        SpotDomain { lower, upper }
    }

    /// Model value of every leg at `spot`, net of entry premiums.
    pub fn mark_to_market(&self, strategy: &Strategy, spot: f64, iv: f64, dte_days: f64) -> MarkToMarket {
        let t = years_from_days(dte_days);
        let mut pnl = 0.0;
        let mut leg_prices = Vec::with_capacity(strategy.legs().len());
        let mut clamps = Vec::new();
        for leg in strategy.legs() {
            let valuation = self.pricer.value(&PricingInput {
                spot,
                strike: leg.strike,
                time_to_expiry: t,
                volatility: iv,
                rate: self.config.risk_free_rate,
                option_type: leg.option_type,
            });
            pnl += (valuation.price - leg.entry_premium) * leg.signed_units(strategy.lot_size());
            leg_prices.push(valuation.price);
            merge_clamps(&mut clamps, valuation.clamps);
        }
        MarkToMarket { pnl, leg_prices, clamps }
    }

    /// Every spot where the expiry payoff changes sign or meets a flat zero
    /// segment, ascending.
    ///
    /// The grid locates sign changes and zero-segment edges; bisection
    /// refines them. Below the domain and above it the payoff is linear, so
    /// tail crossings are solved directly.
    pub fn calculate_breakevens(&self, strategy: &Strategy, domain: &SpotDomain) -> Vec<f64> {
        let mut xs = vec![0.0];
        xs.extend(domain.grid(self.config.grid_points));
        let payoff = |s: f64| strategy.payoff_at(s);
        let mut roots = Vec::new();
        let mut prev: Option<(f64, f64)> = None;

        for &x in &xs {
            let v = payoff(x);
            if let Some((px, pv)) = prev {
                if pv != 0.0 && v != 0.0 && pv.signum() != v.signum() {
                    roots.push(bisect(payoff, px, x));
                } else if pv != 0.0 && v == 0.0 {
                    roots.push(zero_edge(payoff, x, px));
                } else if pv == 0.0 && v != 0.0 {
                    roots.push(zero_edge(payoff, px, x));
                }
            }
            prev = Some((x, v));
        }

        let slope = strategy.upside_slope();
        let at_upper = strategy.payoff_at(domain.upper);
        if slope.abs() > SLOPE_EPSILON && at_upper != 0.0 && at_upper.signum() != slope.signum() {
            roots.push(domain.upper - at_upper / slope);
        }

        crate::analysis::stats::sort_floats(&mut roots);
        roots.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
        roots
    }

    /// Extremes of the expiry payoff. Candidates are the grid, every strike
    /// and zero spot; an upward or downward slope at the upper boundary
    /// marks profit or loss as unbounded.
    pub fn calculate_max_profit_loss(&self, strategy: &Strategy, domain: &SpotDomain) -> ProfitLossBounds {
        let grid = domain.grid(self.config.grid_points);
        let mut candidates = grid.clone();
        candidates.push(0.0);
        candidates.extend(strategy.legs().iter().map(|l| l.strike));

        let values: Vec<f64> = candidates.iter().map(|&s| strategy.payoff_at(s)).collect();
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);

        let n = grid.len();
        let slope = (strategy.payoff_at(grid[n - 1]) - strategy.payoff_at(grid[n - 2])) / (grid[n - 1] - grid[n - 2]);

        let max_profit = if slope > SLOPE_EPSILON {
            PayoffBound::Unbounded
        } else {
            PayoffBound::Finite(max)
        };
        let max_loss = if slope < -SLOPE_EPSILON {
            PayoffBound::Unbounded
        } else {
            PayoffBound::Finite(min)
        };
        ProfitLossBounds { max_profit, max_loss }
    }

    /// Σ signed per-leg Greeks × quantity × lot size at the strategy spot.
    pub fn aggregate_greeks(&self, strategy: &Strategy, iv: f64, dte_days: f64) -> (Greeks, Vec<NumericClamp>) {
        let t = years_from_days(dte_days);
        let mut total = Greeks::default();
        let mut clamps = Vec::new();
        for leg in strategy.legs() {
            let valuation = self.pricer.value(&PricingInput {
                spot: strategy.spot(),
                strike: leg.strike,
                time_to_expiry: t,
                volatility: iv,
                rate: self.config.risk_free_rate,
                option_type: leg.option_type,
            });
            total = total.add(&valuation.greeks.scaled(leg.signed_units(strategy.lot_size())));
            merge_clamps(&mut clamps, valuation.clamps);
        }
        (total, clamps)
    }

    /// Probability that the expiry payoff is strictly positive under the
    /// lognormal terminal distribution.
    pub fn calculate_pop(&self, strategy: &Strategy, iv: f64, dte_days: f64) -> (f64, Vec<NumericClamp>) {
        let (dist, clamps) = TerminalDistribution::new(strategy.spot(), iv, years_from_days(dte_days));
        let domain = self.spot_domain(strategy, iv, dte_days);
        let breakevens = self.calculate_breakevens(strategy, &domain);
        (profit_probability(strategy, &dist, &breakevens), clamps)
    }

    /// Expected expiry payoff under the same lognormal model as POP.
    pub fn expected_payoff(&self, strategy: &Strategy, iv: f64, dte_days: f64) -> (f64, Vec<NumericClamp>) {
        let (dist, clamps) = TerminalDistribution::new(strategy.spot(), iv, years_from_days(dte_days));
        let ev = dist.expectation(|s| strategy.payoff_at(s), 6.0, self.config.grid_points.max(400));
        (ev, clamps)
    }

    /// |max loss| for defined risk; otherwise spot × margin_pct per naked short unit.
    pub fn estimate_margin(&self, strategy: &Strategy, bounds: &ProfitLossBounds) -> f64 {
        match bounds.max_loss {
            PayoffBound::Finite(loss) => (-loss).max(0.0),
            PayoffBound::Unbounded => strategy
                .legs()
                .iter()
                .filter(|l| l.position == Position::Sell)
                .map(|l| strategy.spot() * self.config.margin_pct * l.quantity as f64 * strategy.lot_size() as f64)
                .sum(),
        }
    }

    /// Evaluate every metric for a strategy.
    pub fn analyze(&self, strategy: &Strategy, iv: f64, dte_days: f64) -> CoreResult<StrategyMetrics> {
        strategy.require_legs()?;
        if !iv.is_finite() || iv < 0.0 {
            return Err(CoreError::invalid("iv", format!("implied vol must be >= 0, got {iv}")));
        }
        if !dte_days.is_finite() || dte_days < 0.0 {
            return Err(CoreError::invalid("dte", format!("days to expiry must be >= 0, got {dte_days}")));
        }

        let domain = self.spot_domain(strategy, iv, dte_days);
        let breakevens = self.calculate_breakevens(strategy, &domain);
        let bounds = self.calculate_max_profit_loss(strategy, &domain);
        let (net_greeks, mut clamps) = self.aggregate_greeks(strategy, iv, dte_days);
        let (pop, pop_clamps) = self.calculate_pop(strategy, iv, dte_days);
        merge_clamps(&mut clamps, pop_clamps);
        let mtm = self.mark_to_market(strategy, strategy.spot(), iv, dte_days);
        merge_clamps(&mut clamps, mtm.clamps);

        let estimated_margin = self.estimate_margin(strategy, &bounds);
        let risk_reward_ratio = match (bounds.max_profit, bounds.max_loss) {
            (PayoffBound::Finite(p), PayoffBound::Finite(l)) if l < 0.0 => Some((p / l).abs()),
            _ => None,
        };
        let direction = strategy.kind().direction().unwrap_or_else(|| {
            let delta_per_lot = net_greeks.delta / strategy.lot_size() as f64;
            if delta_per_lot > DIRECTIONAL_DELTA {
                Direction::Bullish
            } else if delta_per_lot < -DIRECTIONAL_DELTA {
                Direction::Bearish
            } else {
                Direction::Neutral
            }
        });

        let mut warnings: Vec<Warning> = clamps.iter().map(clamp_warning).collect();
        if bounds.max_loss.is_unbounded() {
            warnings.push(Warning::new(
                WarningKind::Risk,
                format!("{} has unbounded loss; margin estimated from naked short legs", strategy.name()),
            ));
        }

        let metrics = StrategyMetrics {
            name: strategy.name().to_string(),
            kind: strategy.kind(),
            direction,
            max_profit: bounds.max_profit,
            max_loss: bounds.max_loss,
            breakevens,
            probability_of_profit: pop,
            net_greeks,
            estimated_margin,
            net_premium: strategy.net_premium(),
            premium_style: strategy.premium_style(),
            risk_reward_ratio,
            mark_to_market: mtm.pnl,
            warnings,
        };
        info!(metrics = %metrics, "Strategy analysed");
        debug!(greeks = ?metrics.net_greeks, lower = domain.lower, upper = domain.upper, "Strategy detail");
        Ok(metrics)
    }
}

/// Lognormal mass of the spots where the expiry payoff is strictly positive.
///
/// The payoff is linear between consecutive strikes and breakevens, so each
/// such interval is either wholly profitable or not.
pub fn profit_probability(strategy: &Strategy, dist: &TerminalDistribution, breakevens: &[f64]) -> f64 {
    let mut cuts = vec![0.0];
    cuts.extend_from_slice(breakevens);
    cuts.extend(strategy.legs().iter().map(|l| l.strike));
    crate::analysis::stats::sort_floats(&mut cuts);
    cuts.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    let mut pop = 0.0;
    for (i, &a) in cuts.iter().enumerate() {
        let (b, probe) = match cuts.get(i + 1) {
            Some(&b) => (b, (a + b) / 2.0),
            None => (f64::INFINITY, a * 2.0 + 1.0),
        };
        if strategy.payoff_at(probe) > 0.0 {
            pop += dist.probability_between(a, b);
        }
    }
    pop.clamp(0.0, 1.0)
}

/// Bisection for a sign change of `f` in [a, b].
fn bisect<F: Fn(f64) -> f64>(f: F, mut a: f64, mut b: f64) -> f64 {
    let mut fa = f(a);
    for _ in 0..200 {
        let mid = 0.5 * (a + b);
        let fm = f(mid);
        if fm == 0.0 || (b - a).abs() < 1e-9 {
            return mid;
        }
        if fm.signum() == fa.signum() {
            a = mid;
            fa = fm;
        } else {
            b = mid;
        }
    }
    0.5 * (a + b)
}

/// Boundary between a spot with zero payoff and one without.
fn zero_edge<F: Fn(f64) -> f64>(f: F, mut zero: f64, mut nonzero: f64) -> f64 {
    for _ in 0..200 {
        if (nonzero - zero).abs() < 1e-9 {
            break;
        }
        let mid = 0.5 * (zero + nonzero);
        if f(mid) == 0.0 {
            zero = mid;
        } else {
            nonzero = mid;
        }
    }
    0.5 * (zero + nonzero)
}

fn merge_clamps(into: &mut Vec<NumericClamp>, from: Vec<NumericClamp>) {
    for clamp in from {
        if !into.iter().any(|c| c.input == clamp.input) {
            into.push(clamp);
        }
    }
}

fn clamp_warning(clamp: &NumericClamp) -> Warning {
    Warning::new(
        WarningKind::NumericClamp,
        format!("{:?} {} raised to {}", clamp.input, clamp.requested, clamp.used),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
