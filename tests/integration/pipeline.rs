use rust_decimal_macros::dec;

use optedge::engine::RiskFlag;
use optedge::options::strategy::Direction;
use optedge::options::templates::{bull_call_spread, iron_condor, LegQuote, TemplateContext};
use optedge::options::StrikeSelector;
use optedge::risk::SizingMethod;
use optedge::types::{RangeMethod, SignalKind};
use optedge::{AnalysisConfig, AnalysisRequest, DecisionPipeline};

use crate::common::{chain, choppy_history, falling_history, init_tracing, track_record, SPOT};

#[test]
fn test_config_from_toml_drives_pipeline() {
    init_tracing();
    let config = AnalysisConfig::from_toml_str(
        r#"
        [signal]
        rsi_oversold = 35.0

        [sizing]
        max_risk_percent = 1.0

        [simulation]
        seed = 7
        "#,
    )
    .unwrap();
    assert_eq!(config.signal.rsi_oversold, 35.0);
    assert_eq!(config.signal.rsi_period, 14);

    let pipeline = DecisionPipeline::new(config);
    let history = falling_history();
    let chain = chain(200_000, 100_000, 0.15);
    let ctx = TemplateContext::new(SPOT, 50);
    let strategy = bull_call_spread(&ctx, LegQuote::new(26100.0, 120.0), LegQuote::new(26300.0, 50.0)).unwrap();
    let stats = track_record(60, 0.55);

    let report = pipeline
        .analyze(&AnalysisRequest::new(&history, &chain, &strategy, &stats, dec!(1000000)))
        .unwrap();
    assert_eq!(report.signal.kind, SignalKind::CallBuy);
    assert_eq!(report.metrics.direction, Direction::Bullish);
    // 1% of 1 000 000 over 3 500 per lot
    assert_eq!(report.sizing.lots, 2);
    assert!(report.sizing.fraction <= 0.01 + 1e-12);
    assert!((0.0..=100.0).contains(&report.decision.confidence));
    // Only soft flags may remain on an allowed trade
    let soft_only = report
        .decision
        .risk_flags
        .iter()
        .all(|f| matches!(f, RiskFlag::LowVolEdge | RiskFlag::PoorRiskReward));
    assert_eq!(report.decision.allowed, soft_only);
}

#[test]
fn test_neutral_condor_on_balanced_chain() {
    init_tracing();
    let pipeline = DecisionPipeline::new(AnalysisConfig::default());
    let history = choppy_history();
    let chain = chain(150_000, 150_000, 0.14);
    let ctx = TemplateContext::new(SPOT, 50);
    let strategy = iron_condor(
        &ctx,
        LegQuote::new(25800.0, 10.0),
        LegQuote::new(25900.0, 40.0),
        LegQuote::new(26400.0, 40.0),
        LegQuote::new(26500.0, 10.0),
    )
    .unwrap();
    let stats = track_record(80, 0.6);
    let request = AnalysisRequest {
        range_method: RangeMethod::Statistical,
        sizing_method: SizingMethod::FixedFraction,
        ..AnalysisRequest::new(&history, &chain, &strategy, &stats, dec!(500000))
    };

    let report = pipeline.analyze(&request).unwrap();
    assert_eq!(report.signal.kind, SignalKind::NoSignal);
    assert_eq!(report.metrics.direction, Direction::Neutral);
    assert!(report.validation.allowed);
    assert_eq!(report.validation.reasons[0], "Neutral market suits a neutral strategy");
    assert!(report.metrics.probability_of_profit > 0.0 && report.metrics.probability_of_profit < 1.0);
    assert!(report.range.fat_tail_width() >= report.range.width());
}

#[test]
fn test_zero_lot_budget_blocks_trade() {
    init_tracing();
    let pipeline = DecisionPipeline::new(AnalysisConfig::default());
    let history = falling_history();
    let chain = chain(200_000, 100_000, 0.15);
    let ctx = TemplateContext::new(SPOT, 50);
    let strategy = bull_call_spread(&ctx, LegQuote::new(26100.0, 120.0), LegQuote::new(26300.0, 50.0)).unwrap();
    let stats = track_record(60, 0.55);

    // 2% of 100 000 cannot cover one 3 500 lot
    let report = pipeline
        .analyze(&AnalysisRequest::new(&history, &chain, &strategy, &stats, dec!(100000)))
        .unwrap();
    assert_eq!(report.sizing.lots, 0);
    assert!(!report.decision.allowed);
    assert!(report.decision.risk_flags.contains(&RiskFlag::ZeroLots));
    assert!(report.decision.summary.starts_with("DO NOT TRADE"));
}

#[test]
fn test_strike_suggestion_matches_signal() {
    init_tracing();
    let config = AnalysisConfig::default();
    let pipeline = DecisionPipeline::new(config.clone());
    let history = falling_history();
    let chain = chain(200_000, 100_000, 0.15);
    let ctx = TemplateContext::new(SPOT, 50);
    let strategy = bull_call_spread(&ctx, LegQuote::new(26100.0, 120.0), LegQuote::new(26300.0, 50.0)).unwrap();
    let stats = track_record(60, 0.55);
    let report = pipeline
        .analyze(&AnalysisRequest::new(&history, &chain, &strategy, &stats, dec!(1000000)))
        .unwrap();

    let selector = StrikeSelector::new(config.strategy);
    let suggestion = selector
        .suggest_for_signal(&chain, &report.signal, 7.0)
        .unwrap()
        .expect("call buy gives a strike");
    assert!(suggestion.in_band);
    assert!(suggestion.delta >= 0.40 && suggestion.delta <= 0.60);
}
