//! Shared types for the OPTEDGE decision core.
//!
//! Market inputs (price bars, option chain rows), the cross-component
//! outputs (signal, range forecast), warnings and the error taxonomy.
//! Inputs are validated once at construction and are read-only afterwards.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Price history
// ---------------------------------------------------------------------------

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Check prices are positive and finite, high >= low, volume >= 0.
    pub fn validate(&self) -> CoreResult<()> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(CoreError::invalid(field, format!("price must be positive, got {value}")));
            }
        }
        if self.high < self.low {
            return Err(CoreError::invalid(
                "high",
                format!("high {} below low {}", self.high, self.low),
            ));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(CoreError::invalid("volume", format!("volume must be >= 0, got {}", self.volume)));
        }
        Ok(())
    }
}

/// Ordered, validated bar series.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawPriceHistory")]
pub struct PriceHistory {
    bars: Vec<PriceBar>,
}

impl PriceHistory {
    /// Validate every bar and require strictly increasing timestamps.
    pub fn new(bars: Vec<PriceBar>) -> CoreResult<Self> {
        for bar in &bars {
            bar.validate()?;
        }
        if let Some(pair) = bars.windows(2).find(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(CoreError::invalid(
                "timestamp",
                format!("bars out of order at {}", pair[1].timestamp),
            ));
        }
        Ok(Self { bars })
    }

    /// Build a history from closes only, one bar per day starting at `start`.
    /// High/low equal the close; used where only settlement prices exist.
    pub fn from_closes(start: DateTime<Utc>, closes: &[f64]) -> CoreResult<Self> {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                timestamp: start + chrono::Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 0.0,
            })
            .collect();
        Self::new(bars)
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

/// Wire shape of `PriceHistory`; deserialization goes through `PriceHistory::new`.
#[derive(Deserialize)]
struct RawPriceHistory {
    bars: Vec<PriceBar>,
}

impl TryFrom<RawPriceHistory> for PriceHistory {
    type Error = CoreError;

    fn try_from(raw: RawPriceHistory) -> CoreResult<Self> {
        Self::new(raw.bars)
    }
}

// ---------------------------------------------------------------------------
// Option chain
// ---------------------------------------------------------------------------

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "CE"),
            OptionType::Put => write!(f, "PE"),
        }
    }
}

impl FromStr for OptionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CE" | "CALL" | "C" => Ok(OptionType::Call),
            "PE" | "PUT" | "P" => Ok(OptionType::Put),
            other => Err(CoreError::invalid("option_type", format!("unknown option type '{other}'"))),
        }
    }
}

/// One strike/type row of an option chain snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChainRow {
    pub strike: f64,
    pub option_type: OptionType,
    pub open_interest: u64,
    pub volume: u64,
    /// Annualized implied volatility as a decimal (0.15 = 15%).
    pub implied_vol: f64,
    pub expiry: NaiveDate,
}

impl OptionChainRow {
    pub fn validate(&self) -> CoreResult<()> {
        if !self.strike.is_finite() || self.strike <= 0.0 {
            return Err(CoreError::invalid("strike", format!("strike must be positive, got {}", self.strike)));
        }
        validate_implied_vol(self.implied_vol)
    }
}

/// Upper bound on an annualized implied vol accepted as input.
pub const MAX_IMPLIED_VOL: f64 = 2.0;

/// Reject non-finite or out-of-range annualized implied vols.
pub fn validate_implied_vol(implied_vol: f64) -> CoreResult<()> {
    if !implied_vol.is_finite() || !(0.0..=MAX_IMPLIED_VOL).contains(&implied_vol) {
        return Err(CoreError::invalid(
            "implied_vol",
            format!("implied vol {implied_vol} outside [0, {MAX_IMPLIED_VOL}]"),
        ));
    }
    Ok(())
}

/// All chain rows for one instant, with the underlying spot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawOptionChain")]
pub struct OptionChain {
    spot: f64,
    rows: Vec<OptionChainRow>,
}

impl OptionChain {
    /// Validate spot and every row. An empty chain is rejected.
    pub fn new(spot: f64, rows: Vec<OptionChainRow>) -> CoreResult<Self> {
        if !spot.is_finite() || spot <= 0.0 {
            return Err(CoreError::invalid("spot", format!("spot must be positive, got {spot}")));
        }
        if rows.is_empty() {
            return Err(CoreError::invalid("rows", "option chain has no rows"));
        }
        for row in &rows {
            row.validate()?;
        }
        Ok(Self { spot, rows })
    }

    pub fn spot(&self) -> f64 {
        self.spot
    }

    pub fn rows(&self) -> &[OptionChainRow] {
        &self.rows
    }
}

#[derive(Deserialize)]
struct RawOptionChain {
    spot: f64,
    rows: Vec<OptionChainRow>,
}

impl TryFrom<RawOptionChain> for OptionChain {
    type Error = CoreError;

    fn try_from(raw: RawOptionChain) -> CoreResult<Self> {
        Self::new(raw.spot, raw.rows)
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Directional bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    CallBuy,
    PutBuy,
    NoSignal,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::CallBuy => write!(f, "CALL_BUY"),
            SignalKind::PutBuy => write!(f, "PUT_BUY"),
            SignalKind::NoSignal => write!(f, "NO_SIGNAL"),
        }
    }
}

/// Output of the signal engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    /// 0–100.
    pub confidence: f64,
    pub rsi: f64,
    /// `None` when total call OI is zero.
    pub pcr: Option<f64>,
    pub rsi_percentile: f64,
    pub pcr_percentile: Option<f64>,
    pub reasons: Vec<String>,
    pub warnings: Vec<Warning>,
}

impl Signal {
    pub fn is_directional(&self) -> bool {
        self.kind != SignalKind::NoSignal
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pcr = self
            .pcr
            .map(|p| format!("{p:.2}"))
            .unwrap_or_else(|| "undefined".to_string());
        writeln!(f, "Signal: {} ({:.0}% confidence)", self.kind, self.confidence)?;
        writeln!(f, "  RSI: {:.1} | PCR: {pcr}", self.rsi)?;
        for reason in &self.reasons {
            writeln!(f, "  - {reason}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "  ! {warning}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Range forecast
// ---------------------------------------------------------------------------

/// How a range forecast was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeMethod {
    Statistical,
    RuleBased,
    ImpliedVol,
    Ensemble,
}

impl fmt::Display for RangeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeMethod::Statistical => write!(f, "statistical"),
            RangeMethod::RuleBased => write!(f, "rule-based"),
            RangeMethod::ImpliedVol => write!(f, "implied-vol"),
            RangeMethod::Ensemble => write!(f, "ensemble"),
        }
    }
}

/// Predicted trading range with normal and fat-tail bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeForecast {
    pub method: RangeMethod,
    pub spot: f64,
    pub lower: f64,
    pub upper: f64,
    /// Half-width of the normal range.
    pub expected_move: f64,
    pub fat_tail_lower: f64,
    pub fat_tail_upper: f64,
    /// Always >= 1.0.
    pub fat_tail_multiplier: f64,
    /// 0–100.
    pub confidence: f64,
    pub confidence_level: f64,
    pub atr: Option<f64>,
    pub implied_move: f64,
    pub warnings: Vec<Warning>,
}

impl RangeForecast {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn fat_tail_width(&self) -> f64 {
        self.fat_tail_upper - self.fat_tail_lower
    }

    /// Annualized volatility whose one-session move at `confidence_level`
    /// reaches the upper fat-tail bound.
    pub fn fat_tail_annual_vol(&self, trading_days_per_year: f64) -> Option<f64> {
        let z = crate::analysis::stats::normal_quantile((1.0 + self.confidence_level) / 2.0);
        if self.spot <= 0.0 || !z.is_finite() || z <= 0.0 {
            return None;
        }
        let half_width = self.fat_tail_upper - self.spot;
        Some(half_width / (z * self.spot) * trading_days_per_year.sqrt())
    }
}

impl fmt::Display for RangeForecast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:.0} – {:.0} (±{:.0}, {:.0}% conf) | fat-tail {:.0} – {:.0} (×{:.2})",
            self.method,
            self.lower,
            self.upper,
            self.expected_move,
            self.confidence,
            self.fat_tail_lower,
            self.fat_tail_upper,
            self.fat_tail_multiplier,
        )
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Category of a recovered, non-fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    InsufficientData,
    SmallSample,
    NumericClamp,
    InputClamp,
    ComputationCap,
    FatTail,
    Signal,
    Sizing,
    Risk,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarningKind::InsufficientData => "insufficient-data",
            WarningKind::SmallSample => "small-sample",
            WarningKind::NumericClamp => "numeric-clamp",
            WarningKind::InputClamp => "input-clamp",
            WarningKind::ComputationCap => "computation-cap",
            WarningKind::FatTail => "fat-tail",
            WarningKind::Signal => "signal",
            WarningKind::Sizing => "sizing",
            WarningKind::Risk => "risk",
        };
        write!(f, "{s}")
    }
}

/// A recovered condition surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that abort a component call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid input ({field}): {message}")]
    InputValidation { field: String, message: String },

    #[error("Insufficient data: need {required} {what}, have {available}")]
    InsufficientData {
        what: String,
        required: usize,
        available: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        CoreError::InputValidation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn insufficient(what: &str, required: usize, available: usize) -> Self {
        CoreError::InsufficientData {
            what: what.to_string(),
            required,
            available,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_bar(day: i64, close: f64) -> PriceBar {
        PriceBar {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 9, 15, 0).unwrap() + chrono::Duration::days(day),
            open: close,
            high: close + 10.0,
            low: close - 10.0,
            close,
            volume: 1000.0,
        }
    }

    fn make_row(strike: f64, option_type: OptionType, oi: u64) -> OptionChainRow {
        OptionChainRow {
            strike,
            option_type,
            open_interest: oi,
            volume: 100,
            implied_vol: 0.15,
            expiry: NaiveDate::from_ymd_opt(2026, 1, 29).unwrap(),
        }
    }

    // -- Price history --

    #[test]
    fn test_history_accepts_ordered_bars() {
        let history = PriceHistory::new(vec![make_bar(0, 100.0), make_bar(1, 101.0)]).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.closes(), vec![100.0, 101.0]);
        assert_eq!(history.last_close(), Some(101.0));
    }

    #[test]
    fn test_history_rejects_out_of_order() {
        let err = PriceHistory::new(vec![make_bar(1, 100.0), make_bar(0, 101.0)]).unwrap_err();
        assert!(matches!(err, CoreError::InputValidation { ref field, .. } if field == "timestamp"));
    }

    #[test]
    fn test_bar_rejects_high_below_low() {
        let mut bar = make_bar(0, 100.0);
        bar.high = 80.0;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn test_bar_rejects_non_positive_price() {
        let mut bar = make_bar(0, 100.0);
        bar.close = 0.0;
        assert!(bar.validate().is_err());
        bar.close = f64::NAN;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn test_from_closes() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let history = PriceHistory::from_closes(start, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.bars()[2].high, 3.0);
    }

    #[test]
    fn test_history_deserialization_is_validated() {
        let history = PriceHistory::new(vec![make_bar(0, 100.0), make_bar(1, 101.0)]).unwrap();
        let mut json = serde_json::to_value(&history).unwrap();
        let back: PriceHistory = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back.closes(), vec![100.0, 101.0]);

        json["bars"].as_array_mut().unwrap().reverse();
        assert!(serde_json::from_value::<PriceHistory>(json).is_err());
    }

    // -- Option chain --

    #[test]
    fn test_chain_deserialization_is_validated() {
        let chain = OptionChain::new(26000.0, vec![make_row(26000.0, OptionType::Call, 10)]).unwrap();
        let mut json = serde_json::to_value(&chain).unwrap();
        let back: OptionChain = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back.rows().len(), 1);

        json["rows"] = serde_json::json!([]);
        assert!(serde_json::from_value::<OptionChain>(json.clone()).is_err());
        json["spot"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<OptionChain>(json).is_err());
    }

    #[test]
    fn test_chain_validates_rows() {
        let mut bad = make_row(26000.0, OptionType::Call, 10);
        bad.implied_vol = 2.5;
        assert!(OptionChain::new(26000.0, vec![bad]).is_err());

        let chain = OptionChain::new(26000.0, vec![make_row(26000.0, OptionType::Put, 10)]).unwrap();
        assert_eq!(chain.rows().len(), 1);
        assert_eq!(chain.spot(), 26000.0);
    }

    #[test]
    fn test_chain_rejects_empty_and_bad_spot() {
        assert!(OptionChain::new(26000.0, vec![]).is_err());
        assert!(OptionChain::new(-1.0, vec![make_row(100.0, OptionType::Call, 1)]).is_err());
    }

    #[test]
    fn test_option_type_parse_and_display() {
        assert_eq!("CE".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("put".parse::<OptionType>().unwrap(), OptionType::Put);
        assert!("XX".parse::<OptionType>().is_err());
        assert_eq!(OptionType::Call.to_string(), "CE");
        assert_eq!(OptionType::Put.to_string(), "PE");
    }

    // -- Display --

    #[test]
    fn test_signal_kind_display() {
        assert_eq!(SignalKind::CallBuy.to_string(), "CALL_BUY");
        assert_eq!(SignalKind::PutBuy.to_string(), "PUT_BUY");
        assert_eq!(SignalKind::NoSignal.to_string(), "NO_SIGNAL");
    }

    #[test]
    fn test_signal_display_undefined_pcr() {
        let signal = Signal {
            kind: SignalKind::NoSignal,
            confidence: 0.0,
            rsi: 50.0,
            pcr: None,
            rsi_percentile: 0.5,
            pcr_percentile: None,
            reasons: vec!["no confluence".into()],
            warnings: vec![Warning::new(WarningKind::Signal, "PCR undefined")],
        };
        let s = signal.to_string();
        assert!(s.contains("NO_SIGNAL"));
        assert!(s.contains("undefined"));
        assert!(s.contains("[signal] PCR undefined"));
    }

    #[test]
    fn test_signal_serializes_to_json() {
        let signal = Signal {
            kind: SignalKind::CallBuy,
            confidence: 15.5,
            rsi: 25.0,
            pcr: Some(0.6),
            rsi_percentile: 0.25,
            pcr_percentile: Some(0.9),
            reasons: vec![],
            warnings: vec![],
        };
        let json = serde_json::to_string(&signal).unwrap();
        let parsed: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, SignalKind::CallBuy);
        assert_eq!(parsed.pcr, Some(0.6));
    }

    // -- Errors --

    #[test]
    fn test_core_error_display() {
        let e = CoreError::insufficient("prices", 15, 3);
        assert_eq!(format!("{e}"), "Insufficient data: need 15 prices, have 3");

        let e = CoreError::invalid("strike", "must be positive");
        assert_eq!(format!("{e}"), "Invalid input (strike): must be positive");
    }
}
