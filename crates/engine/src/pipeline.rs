use chrono::{DateTime, Utc};

use common::{
    Bar, Error, IndicatorSnapshot, MarketConditions, Result, ScoreBreakdown, SignalDecision,
    SupportResistance,
};
use risk::DecisionEngine;
use strategy::{support_resistance, IndicatorEngine, ScoringEngine};

use crate::config::AnalysisConfig;

/// Indicator state, score and levels of the latest bar.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub close: f64,
    pub latest: IndicatorSnapshot,
    pub breakdown: ScoreBreakdown,
    pub levels: Option<SupportResistance>,
}

impl Assessment {
    pub fn market_conditions(&self) -> MarketConditions {
        MarketConditions {
            atr: self.latest.atr,
            rsi: self.latest.rsi,
            macd_line: self.latest.macd_line,
        }
    }
}

/// The synchronous part of a run: indicators, scoring, levels and decision.
#[derive(Debug, Clone, Default)]
pub struct SignalPipeline {
    indicators: IndicatorEngine,
    scoring: ScoringEngine,
    decision: DecisionEngine,
}

impl SignalPipeline {
    pub fn new(indicators: IndicatorEngine, scoring: ScoringEngine, decision: DecisionEngine) -> Self {
        Self {
            indicators,
            scoring,
            decision,
        }
    }

    pub fn from_config(config: &AnalysisConfig, ttl_hours: i64) -> Result<Self> {
        Ok(Self::new(
            IndicatorEngine::new(config.indicators.clone())?,
            ScoringEngine::new(config.scoring.clone()),
            DecisionEngine::new(config.decision.clone(), ttl_hours)?,
        ))
    }

    pub fn required_history(&self) -> usize {
        self.indicators.required_history()
    }

    pub fn assess(&self, bars: &[Bar]) -> Result<Assessment> {
        let snapshots = self.indicators.compute(bars)?;
        let (Some(bar), Some(latest)) = (bars.last(), snapshots.last()) else {
            return Err(Error::InsufficientHistory {
                available: bars.len(),
                required: self.required_history(),
            });
        };
        Ok(Assessment {
            close: bar.close,
            latest: *latest,
            breakdown: self.scoring.score_latest(bars, &snapshots),
            levels: support_resistance(bars, self.indicators.params().levels_window),
        })
    }

    pub fn decide(&self, instrument: &str, assessment: &Assessment, now: DateTime<Utc>) -> SignalDecision {
        self.decision.decide(
            instrument,
            assessment.breakdown.aggregate(),
            assessment.close,
            assessment.latest.atr,
            now,
        )
    }

    /// `assess` followed by `decide`.
    pub fn evaluate(
        &self,
        instrument: &str,
        bars: &[Bar],
        now: DateTime<Utc>,
    ) -> Result<(Assessment, SignalDecision)> {
        let assessment = self.assess(bars)?;
        let decision = self.decide(instrument, &assessment, now);
        Ok((assessment, decision))
    }
}
