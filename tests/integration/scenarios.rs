use approx::assert_relative_eq;
use rust_decimal_macros::dec;

use optedge::analysis::{RangePredictor, SignalEngine};
use optedge::config::{SignalConfig, SimulationConfig, SizingConfig, RangeConfig, StrategyConfig};
use optedge::options::templates::{iron_condor, long_call, LegQuote, TemplateContext};
use optedge::options::StrategyEngine;
use optedge::risk::simulation::breakeven_win_rate;
use optedge::risk::{PositionSizer, RiskSimulator, SimulationParams};
use optedge::types::SignalKind;

use crate::common::{chain, falling_history, init_tracing, SPOT};

// -- A: confluence --

#[test]
fn test_oversold_rsi_with_low_pcr_buys_calls() {
    init_tracing();
    let engine = SignalEngine::new(SignalConfig::default());
    let signal = engine.evaluate(25.0, Some(0.6));
    assert_eq!(signal.kind, SignalKind::CallBuy);
    assert!(signal.confidence > 0.0);

    let from_data = engine.generate_signal(&falling_history(), &chain(200_000, 100_000, 0.15)).unwrap();
    assert_eq!(from_data.kind, SignalKind::CallBuy);
    assert!(from_data.rsi < 30.0);
}

#[test]
fn test_balanced_open_interest_gives_unit_pcr() {
    let engine = SignalEngine::new(SignalConfig::default());
    assert_eq!(engine.compute_pcr(&chain(120_000, 120_000, 0.15), false), Some(1.0));
    assert_eq!(engine.compute_pcr(&chain(0, 120_000, 0.15), false), None);
}

// -- B: iron condor credit --

#[test]
fn test_iron_condor_credit_equals_payoff_at_spot() {
    init_tracing();
    let ctx = TemplateContext::new(26000.0, 50);
    let condor = iron_condor(
        &ctx,
        LegQuote::new(25700.0, 10.0),
        LegQuote::new(25800.0, 40.0),
        LegQuote::new(26200.0, 40.0),
        LegQuote::new(26500.0, 10.0),
    )
    .unwrap();
    assert_relative_eq!(condor.net_premium().net, 3000.0);
    assert_relative_eq!(condor.payoff_at(26000.0), 3000.0);

    let metrics = StrategyEngine::new(StrategyConfig::default()).analyze(&condor, 0.15, 7.0).unwrap();
    assert_eq!(metrics.breakevens.len(), 2);
    assert_relative_eq!(metrics.breakevens[0], 25740.0, epsilon = 1e-3);
    assert_relative_eq!(metrics.breakevens[1], 26260.0, epsilon = 1e-3);
    // Wider call wing: 300 × 50 − 3 000
    assert_relative_eq!(metrics.max_loss.finite().unwrap(), -12000.0, epsilon = 1e-6);
}

#[test]
fn test_long_call_grows_one_for_one_above_strike() {
    let ctx = TemplateContext::new(SPOT, 50);
    let call = long_call(&ctx, LegQuote::new(26000.0, 150.0)).unwrap();
    assert_relative_eq!(call.payoff_at(27000.0) - call.payoff_at(26900.0), 100.0 * 50.0);
    assert_relative_eq!(call.payoff_at(27000.0), (27000.0 - 26000.0 - 150.0) * 50.0);
}

// -- C: Kelly uncertainty --

#[test]
fn test_more_history_earns_more_kelly() {
    let sizer = PositionSizer::new(SizingConfig::default());
    let small = sizer.kelly_fraction(0.55, 2.0, 30).unwrap();
    let large = sizer.kelly_fraction(0.55, 2.0, 100).unwrap();
    assert!(large.adjusted > small.adjusted);
    assert!(large.fraction <= sizer.config().max_risk_fraction());

    let mut last = 0.0;
    for n in [10, 30, 50, 80, 100, 200] {
        let k = sizer.kelly_fraction(0.55, 2.0, n).unwrap();
        assert!(k.fraction >= last);
        last = k.fraction;
    }

    let fixed = sizer.fixed_fraction(dec!(100000), 0.01).unwrap();
    assert_eq!(fixed.capital_at_risk, dec!(1000));
}

// -- D: risk of ruin --

#[test]
fn test_weaker_edge_ruins_more_often() {
    init_tracing();
    let sim = RiskSimulator::new(SimulationConfig::default());
    let weak = sim.simulate_equity_paths(&SimulationParams::new(0.4, 1.0, 0.05)).unwrap();
    let strong = sim.simulate_equity_paths(&SimulationParams::new(0.6, 1.0, 0.05)).unwrap();
    assert!(weak.risk_of_ruin > strong.risk_of_ruin);
    assert!((0.0..=1.0).contains(&weak.risk_of_ruin));

    // Same seed, same answer
    let again = sim.simulate_equity_paths(&SimulationParams::new(0.4, 1.0, 0.05)).unwrap();
    assert_eq!(weak, again);
    assert_relative_eq!(breakeven_win_rate(1.0).unwrap(), 0.5);
}

#[test]
fn test_certain_wins_compound_without_drawdown() {
    let sim = RiskSimulator::new(SimulationConfig {
        min_win_rate: 0.0,
        max_win_rate: 1.0,
        ..Default::default()
    });
    let result = sim.simulate_equity_paths(&SimulationParams::new(1.0, 1.0, 0.02)).unwrap();
    assert_eq!(result.risk_of_ruin, 0.0);
    assert_eq!(result.drawdown.worst, 0.0);
    for pair in result.bands.windows(2) {
        assert!(pair[1].equity.p5 > pair[0].equity.p5);
    }
}

// -- range --

#[test]
fn test_fat_tail_range_contains_normal_range() {
    let predictor = RangePredictor::new(RangeConfig::default());
    let history = falling_history();
    let chain = chain(200_000, 100_000, 0.15);
    for forecast in [
        predictor.predict_statistical(&history, 0.15, 30).unwrap(),
        predictor.predict_rule_based(&history, &chain, 0.15).unwrap(),
        predictor.predict_ensemble(&history, &chain, 0.15).unwrap(),
    ] {
        assert!(forecast.fat_tail_multiplier >= 1.0);
        assert!(forecast.fat_tail_width() >= forecast.width());
        assert!(forecast.lower < forecast.spot && forecast.spot < forecast.upper);
    }
}
