use common::{Bar, IndicatorSnapshot, ScoreBreakdown, ScoreComponent};
use tracing::warn;

use crate::config::ScoringRules;

/// Turns indicator state into a named, signed score breakdown.
///
/// Rules whose inputs are undefined are skipped; scoring itself never fails.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    rules: ScoringRules,
}

impl ScoringEngine {
    pub fn new(rules: ScoringRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ScoringRules {
        &self.rules
    }

    /// Score the most recent bar of a computed series.
    pub fn score_latest(&self, bars: &[Bar], snapshots: &[IndicatorSnapshot]) -> ScoreBreakdown {
        let (Some(bar), Some(current)) = (bars.last(), snapshots.last()) else {
            return ScoreBreakdown::new();
        };
        let previous = snapshots.len().checked_sub(2).map(|i| &snapshots[i]);
        self.score(current, previous, bar)
    }

    pub fn score(
        &self,
        current: &IndicatorSnapshot,
        previous: Option<&IndicatorSnapshot>,
        bar: &Bar,
    ) -> ScoreBreakdown {
        let r = &self.rules;
        let mut breakdown = ScoreBreakdown::new();
        let close = bar.close;

        // ── Trend ──
        if let (Some(fast), Some(slow)) = (current.sma_fast, current.sma_slow) {
            if close > fast && fast > slow {
                add(&mut breakdown, ScoreComponent::Uptrend, r.trend_weight);
            } else if close < fast && fast < slow {
                add(&mut breakdown, ScoreComponent::Downtrend, -r.trend_weight);
            } else {
                add(&mut breakdown, ScoreComponent::Sideways, r.sideways_weight);
            }
        }

        // ── Momentum ──
        if let Some(rsi) = current.rsi {
            if rsi > r.rsi_overbought {
                add(&mut breakdown, ScoreComponent::Overbought, -r.rsi_extreme_weight);
            } else if rsi < r.rsi_oversold {
                add(&mut breakdown, ScoreComponent::Oversold, r.rsi_extreme_weight);
            } else {
                add(&mut breakdown, ScoreComponent::NeutralRsi, r.neutral_rsi_weight);
            }
        }

        // ── MACD crossover ──
        if let Some(prev) = previous {
            if let (Some(line), Some(signal), Some(prev_line), Some(prev_signal)) = (
                current.macd_line,
                current.macd_signal,
                prev.macd_line,
                prev.macd_signal,
            ) {
                if prev_line <= prev_signal && line > signal {
                    add(&mut breakdown, ScoreComponent::MacdBullishCross, r.macd_cross_weight);
                } else if prev_line >= prev_signal && line < signal {
                    add(&mut breakdown, ScoreComponent::MacdBearishCross, -r.macd_cross_weight);
                }
            }
        }

        // ── Bollinger Bands ──
        if let (Some(upper), Some(lower)) = (current.band_upper, current.band_lower) {
            if close < lower {
                add(&mut breakdown, ScoreComponent::BbOversold, r.band_weight);
            } else if close > upper {
                add(&mut breakdown, ScoreComponent::BbOverbought, -r.band_weight);
            }
        }

        // ── Candle body ──
        let range = bar.range();
        if range > 0.0 && bar.body() > r.strong_candle_ratio * range {
            if bar.close > bar.open {
                add(&mut breakdown, ScoreComponent::StrongBullishCandle, r.candle_weight);
            } else {
                add(&mut breakdown, ScoreComponent::StrongBearishCandle, -r.candle_weight);
            }
        }

        breakdown
    }
}

fn add(breakdown: &mut ScoreBreakdown, component: ScoreComponent, value: i32) {
    if let Err(e) = breakdown.record(component, value) {
        warn!(component = %component, value, "Score component ignored: {e}");
    }
}
