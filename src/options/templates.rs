//! Preset strategy builders.
//!
//! Each builder checks strike ordering for its shape and returns a fully
//! validated `Strategy`.

use serde::{Deserialize, Serialize};

use super::strategy::{OptionLeg, Position, Strategy, StrategyKind};
use crate::types::{CoreError, CoreResult, OptionType};

/// Strike and per-unit premium quoted for one leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegQuote {
    pub strike: f64,
    pub premium: f64,
}

impl LegQuote {
    pub fn new(strike: f64, premium: f64) -> Self {
        Self { strike, premium }
    }
}

/// Common market context for a template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateContext {
    pub spot: f64,
    pub lot_size: u32,
    /// Lots per leg.
    pub quantity: u32,
}

impl TemplateContext {
    pub fn new(spot: f64, lot_size: u32) -> Self {
        Self {
            spot,
            lot_size,
            quantity: 1,
        }
    }

    fn leg(&self, option_type: OptionType, position: Position, quote: LegQuote) -> CoreResult<OptionLeg> {
        OptionLeg::new(option_type, position, quote.strike, quote.premium, self.quantity)
    }

    fn strategy(&self, name: String, kind: StrategyKind) -> CoreResult<Strategy> {
        Strategy::new(name, kind, self.spot, self.lot_size)
    }
}

fn require_ascending(field: &str, strikes: &[f64]) -> CoreResult<()> {
    if strikes.windows(2).all(|w| w[0] < w[1]) {
        Ok(())
    } else {
        Err(CoreError::invalid(
            field,
            format!("strikes must be strictly ascending, got {strikes:?}"),
        ))
    }
}

pub fn long_call(ctx: &TemplateContext, call: LegQuote) -> CoreResult<Strategy> {
    ctx.strategy(format!("Long Call {:.0}", call.strike), StrategyKind::LongCall)?
        .with_leg(ctx.leg(OptionType::Call, Position::Buy, call)?)
}

pub fn long_put(ctx: &TemplateContext, put: LegQuote) -> CoreResult<Strategy> {
    ctx.strategy(format!("Long Put {:.0}", put.strike), StrategyKind::LongPut)?
        .with_leg(ctx.leg(OptionType::Put, Position::Buy, put)?)
}

/// Buy the lower call, sell the higher call.
pub fn bull_call_spread(ctx: &TemplateContext, long: LegQuote, short: LegQuote) -> CoreResult<Strategy> {
    require_ascending("bull_call_spread", &[long.strike, short.strike])?;
    ctx.strategy(
        format!("Bull Call Spread {:.0}/{:.0}", long.strike, short.strike),
        StrategyKind::BullCallSpread,
    )?
    .with_leg(ctx.leg(OptionType::Call, Position::Buy, long)?)?
    .with_leg(ctx.leg(OptionType::Call, Position::Sell, short)?)
}

/// Buy the higher put, sell the lower put.
pub fn bear_put_spread(ctx: &TemplateContext, long: LegQuote, short: LegQuote) -> CoreResult<Strategy> {
    require_ascending("bear_put_spread", &[short.strike, long.strike])?;
    ctx.strategy(
        format!("Bear Put Spread {:.0}/{:.0}", long.strike, short.strike),
        StrategyKind::BearPutSpread,
    )?
    .with_leg(ctx.leg(OptionType::Put, Position::Buy, long)?)?
    .with_leg(ctx.leg(OptionType::Put, Position::Sell, short)?)
}

pub fn long_straddle(ctx: &TemplateContext, call: LegQuote, put: LegQuote) -> CoreResult<Strategy> {
    if call.strike != put.strike {
        return Err(CoreError::invalid(
            "long_straddle",
            format!("call strike {} and put strike {} differ", call.strike, put.strike),
        ));
    }
    ctx.strategy(format!("Long Straddle {:.0}", call.strike), StrategyKind::LongStraddle)?
        .with_leg(ctx.leg(OptionType::Call, Position::Buy, call)?)?
        .with_leg(ctx.leg(OptionType::Put, Position::Buy, put)?)
}

pub fn long_strangle(ctx: &TemplateContext, put: LegQuote, call: LegQuote) -> CoreResult<Strategy> {
    require_ascending("long_strangle", &[put.strike, call.strike])?;
    ctx.strategy(
        format!("Long Strangle {:.0}/{:.0}", put.strike, call.strike),
        StrategyKind::LongStrangle,
    )?
    .with_leg(ctx.leg(OptionType::Put, Position::Buy, put)?)?
    .with_leg(ctx.leg(OptionType::Call, Position::Buy, call)?)
}

pub fn short_strangle(ctx: &TemplateContext, put: LegQuote, call: LegQuote) -> CoreResult<Strategy> {
    require_ascending("short_strangle", &[put.strike, call.strike])?;
    ctx.strategy(
        format!("Short Strangle {:.0}/{:.0}", put.strike, call.strike),
        StrategyKind::ShortStrangle,
    )?
    .with_leg(ctx.leg(OptionType::Put, Position::Sell, put)?)?
    .with_leg(ctx.leg(OptionType::Call, Position::Sell, call)?)
}

/// Long put wing, short put, short call, long call wing; strikes ascending.
pub fn iron_condor(
    ctx: &TemplateContext,
    long_put: LegQuote,
    short_put: LegQuote,
    short_call: LegQuote,
    long_call: LegQuote,
) -> CoreResult<Strategy> {
    require_ascending(
        "iron_condor",
        &[long_put.strike, short_put.strike, short_call.strike, long_call.strike],
    )?;
    ctx.strategy(
        format!(
            "Iron Condor {:.0}/{:.0}/{:.0}/{:.0}",
            long_put.strike, short_put.strike, short_call.strike, long_call.strike
        ),
        StrategyKind::IronCondor,
    )?
    .with_leg(ctx.leg(OptionType::Put, Position::Buy, long_put)?)?
    .with_leg(ctx.leg(OptionType::Put, Position::Sell, short_put)?)?
    .with_leg(ctx.leg(OptionType::Call, Position::Sell, short_call)?)?
    .with_leg(ctx.leg(OptionType::Call, Position::Buy, long_call)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::strategy::PremiumStyle;

    fn make_ctx() -> TemplateContext {
        TemplateContext::new(26000.0, 50)
    }

    #[test]
    fn test_iron_condor_template() {
        let ic = iron_condor(
            &make_ctx(),
            LegQuote::new(25700.0, 10.0),
            LegQuote::new(25800.0, 40.0),
            LegQuote::new(26200.0, 40.0),
            LegQuote::new(26500.0, 10.0),
        )
        .unwrap();
        assert_eq!(ic.kind(), StrategyKind::IronCondor);
        assert_eq!(ic.legs().len(), 4);
        assert_eq!(ic.net_premium().net, 3000.0);
        assert_eq!(ic.name(), "Iron Condor 25700/25800/26200/26500");
    }

    #[test]
    fn test_iron_condor_rejects_unordered_strikes() {
        let result = iron_condor(
            &make_ctx(),
            LegQuote::new(25800.0, 10.0),
            LegQuote::new(25700.0, 40.0),
            LegQuote::new(26200.0, 40.0),
            LegQuote::new(26500.0, 10.0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_vertical_spreads_are_debits() {
        let ctx = make_ctx();
        let bull = bull_call_spread(&ctx, LegQuote::new(26000.0, 120.0), LegQuote::new(26200.0, 50.0)).unwrap();
        assert_eq!(bull.premium_style(), PremiumStyle::Debit);
        assert!(bull_call_spread(&ctx, LegQuote::new(26200.0, 50.0), LegQuote::new(26000.0, 120.0)).is_err());

        let bear = bear_put_spread(&ctx, LegQuote::new(26000.0, 110.0), LegQuote::new(25800.0, 45.0)).unwrap();
        assert_eq!(bear.premium_style(), PremiumStyle::Debit);
        assert!(bear_put_spread(&ctx, LegQuote::new(25800.0, 45.0), LegQuote::new(26000.0, 110.0)).is_err());
    }

    #[test]
    fn test_straddle_requires_same_strike() {
        let ctx = make_ctx();
        assert!(long_straddle(&ctx, LegQuote::new(26000.0, 100.0), LegQuote::new(26000.0, 90.0)).is_ok());
        assert!(long_straddle(&ctx, LegQuote::new(26100.0, 100.0), LegQuote::new(26000.0, 90.0)).is_err());
    }

    #[test]
    fn test_strangles_and_quantity() {
        let ctx = TemplateContext {
            quantity: 2,
            ..make_ctx()
        };
        let long = long_strangle(&ctx, LegQuote::new(25800.0, 40.0), LegQuote::new(26200.0, 45.0)).unwrap();
        assert!(long.legs().iter().all(|l| l.quantity == 2));
        let short = short_strangle(&ctx, LegQuote::new(25800.0, 40.0), LegQuote::new(26200.0, 45.0)).unwrap();
        assert_eq!(short.premium_style(), PremiumStyle::Credit);
        assert_eq!(short.net_premium().net, (40.0 + 45.0) * 2.0 * 50.0);
    }

    #[test]
    fn test_single_leg_templates() {
        let ctx = make_ctx();
        let call = long_call(&ctx, LegQuote::new(26000.0, 150.0)).unwrap();
        assert_eq!(call.kind(), StrategyKind::LongCall);
        let put = long_put(&ctx, LegQuote::new(26000.0, 140.0)).unwrap();
        assert_eq!(put.legs()[0].option_type, OptionType::Put);
        assert!(long_put(&ctx, LegQuote::new(26000.0, -1.0)).is_err());
    }
}
