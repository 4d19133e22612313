use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// One OHLCV interval as returned by the data bridge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Absolute candle body, `|close - open|`.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Full candle range, `high - low`.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Bar resolution, spelled the way the bridge expects it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    #[default]
    H1,
    H4,
    D1,
    W1,
    MN1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
        }
    }

    /// Length of one bar in minutes (a month counts as 30 days).
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1_440,
            Timeframe::W1 => 10_080,
            Timeframe::MN1 => 43_200,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            "W1" => Ok(Timeframe::W1),
            "MN1" => Ok(Timeframe::MN1),
            other => Err(Error::Config(format!("unknown timeframe '{other}'"))),
        }
    }
}

/// Direction of a generated signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Buy => write!(f, "BUY"),
            Classification::Sell => write!(f, "SELL"),
            Classification::Hold => write!(f, "HOLD"),
        }
    }
}

/// Derived indicator values for a single bar. `None` until the indicator's
/// window has filled.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub sma_fast: Option<f64>,
    pub sma_slow: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub rsi: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub band_upper: Option<f64>,
    pub band_mid: Option<f64>,
    pub band_lower: Option<f64>,
    pub atr: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
}

/// Named rule outcomes produced by the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComponent {
    Uptrend,
    Downtrend,
    Sideways,
    Overbought,
    Oversold,
    NeutralRsi,
    MacdBullishCross,
    MacdBearishCross,
    BbOversold,
    BbOverbought,
    StrongBullishCandle,
    StrongBearishCandle,
}

impl ScoreComponent {
    pub fn name(&self) -> &'static str {
        match self {
            ScoreComponent::Uptrend => "uptrend",
            ScoreComponent::Downtrend => "downtrend",
            ScoreComponent::Sideways => "sideways",
            ScoreComponent::Overbought => "overbought",
            ScoreComponent::Oversold => "oversold",
            ScoreComponent::NeutralRsi => "neutral_rsi",
            ScoreComponent::MacdBullishCross => "macd_bullish_cross",
            ScoreComponent::MacdBearishCross => "macd_bearish_cross",
            ScoreComponent::BbOversold => "bb_oversold",
            ScoreComponent::BbOverbought => "bb_overbought",
            ScoreComponent::StrongBullishCandle => "strong_bullish_candle",
            ScoreComponent::StrongBearishCandle => "strong_bearish_candle",
        }
    }
}

impl std::fmt::Display for ScoreComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Signed contributions of every rule that fired during one evaluation.
///
/// A component can be recorded once; a second attempt is rejected and the
/// first value is kept.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreBreakdown {
    components: BTreeMap<ScoreComponent, i32>,
}

impl ScoreBreakdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, component: ScoreComponent, value: i32) -> Result<(), Error> {
        match self.components.entry(component) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
            Entry::Occupied(_) => Err(Error::DuplicateComponent(component)),
        }
    }

    pub fn get(&self, component: ScoreComponent) -> Option<i32> {
        self.components.get(&component).copied()
    }

    pub fn contains(&self, component: ScoreComponent) -> bool {
        self.components.contains_key(&component)
    }

    /// Sum of all recorded contributions.
    pub fn aggregate(&self) -> i32 {
        self.components
            .values()
            .fold(0i32, |acc, v| acc.saturating_add(*v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScoreComponent, i32)> + '_ {
        self.components.iter().map(|(c, v)| (*c, *v))
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl std::fmt::Display for ScoreBreakdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(c, v)| format!("{c}={v:+}"))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Pivot-point levels over a trailing window of bars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    pub pivot: f64,
    pub resistance_1: f64,
    pub resistance_2: f64,
    pub support_1: f64,
    pub support_2: f64,
    pub recent_high: f64,
    pub recent_low: f64,
}

/// Whether stop-loss / take-profit could be attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    /// Both levels are set.
    Set,
    /// HOLD decisions carry no levels.
    NotApplicable,
    /// Directional decision, but ATR was missing or unusable.
    AtrUnavailable,
}

/// The outcome of one decision pass for one instrument. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDecision {
    pub instrument: String,
    pub classification: Classification,
    /// Percentage in `[0, 100]`.
    pub reliability: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_status: RiskStatus,
    pub aggregate_score: i32,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignalDecision {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Which strategy produced an explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplanationSource {
    #[serde(rename = "AI")]
    Ai,
    #[serde(rename = "FALLBACK")]
    Fallback,
}

impl std::fmt::Display for ExplanationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExplanationSource::Ai => write!(f, "AI"),
            ExplanationSource::Fallback => write!(f, "FALLBACK"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplanationResult {
    pub source: ExplanationSource,
    pub text: String,
}

/// Indicator values of the last bar, kept alongside an emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    pub atr: Option<f64>,
    pub rsi: Option<f64>,
    pub macd_line: Option<f64>,
}

/// Everything one successful run hands to the persistence sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: String,
    /// Broker-specific spelling the data was fetched with.
    pub alias: String,
    pub timeframe: Timeframe,
    pub decision: SignalDecision,
    pub explanation: ExplanationResult,
    pub score_breakdown: ScoreBreakdown,
    pub support_resistance: Option<SupportResistance>,
    pub market_conditions: MarketConditions,
}

impl SignalRecord {
    pub fn new(
        alias: impl Into<String>,
        timeframe: Timeframe,
        decision: SignalDecision,
        explanation: ExplanationResult,
        score_breakdown: ScoreBreakdown,
        support_resistance: Option<SupportResistance>,
        market_conditions: MarketConditions,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alias: alias.into(),
            timeframe,
            decision,
            explanation,
            score_breakdown,
            support_resistance,
            market_conditions,
        }
    }
}

/// Where market data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Bridge,
    Paper,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Bridge => write!(f, "bridge"),
            DataSource::Paper => write!(f, "paper"),
        }
    }
}
