use common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Indicator periods, read from the `[indicators]` table of the analysis file.
///
/// Example `config/analysis.toml`:
/// ```toml
/// [indicators]
/// sma_fast = 20
/// sma_slow = 50
/// rsi_period = 14
/// min_history = 50
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndicatorParams {
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_width: f64,
    pub atr_period: usize,
    pub stoch_k: usize,
    pub stoch_smooth: usize,
    pub stoch_d: usize,
    /// Bars required before any computation is attempted.
    pub min_history: usize,
    /// Trailing window for pivot support/resistance.
    pub levels_window: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            sma_fast: 20,
            sma_slow: 50,
            ema_fast: 12,
            ema_slow: 26,
            rsi_period: 14,
            macd_signal: 9,
            bb_period: 5,
            bb_width: 2.0,
            atr_period: 14,
            stoch_k: 5,
            stoch_smooth: 3,
            stoch_d: 3,
            min_history: 50,
            levels_window: 50,
        }
    }
}

impl IndicatorParams {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("sma_fast", self.sma_fast),
            ("sma_slow", self.sma_slow),
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
            ("macd_signal", self.macd_signal),
            ("atr_period", self.atr_period),
            ("stoch_k", self.stoch_k),
            ("stoch_smooth", self.stoch_smooth),
            ("stoch_d", self.stoch_d),
            ("levels_window", self.levels_window),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Config(format!("indicators.{name} must be positive")));
        }
        if self.rsi_period < 2 || self.bb_period < 2 {
            return Err(Error::Config(
                "indicators.rsi_period and indicators.bb_period must be >= 2".into(),
            ));
        }
        if self.ema_fast >= self.ema_slow {
            return Err(Error::Config(
                "indicators.ema_fast must be less than indicators.ema_slow".into(),
            ));
        }
        if self.sma_fast >= self.sma_slow {
            return Err(Error::Config(
                "indicators.sma_fast must be less than indicators.sma_slow".into(),
            ));
        }
        if !(self.bb_width.is_finite() && self.bb_width > 0.0) {
            return Err(Error::Config("indicators.bb_width must be positive".into()));
        }
        Ok(())
    }
}

/// Rule thresholds and weights, read from the `[scoring]` table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringRules {
    pub trend_weight: i32,
    pub sideways_weight: i32,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub rsi_extreme_weight: i32,
    pub neutral_rsi_weight: i32,
    pub macd_cross_weight: i32,
    pub band_weight: i32,
    /// Body share of the candle range above which a candle counts as strong.
    pub strong_candle_ratio: f64,
    pub candle_weight: i32,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            trend_weight: 30,
            sideways_weight: 5,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            rsi_extreme_weight: 15,
            neutral_rsi_weight: 5,
            macd_cross_weight: 20,
            band_weight: 15,
            strong_candle_ratio: 0.7,
            candle_weight: 10,
        }
    }
}

impl ScoringRules {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.rsi_oversold)
            || !(0.0..=100.0).contains(&self.rsi_overbought)
            || self.rsi_oversold >= self.rsi_overbought
        {
            return Err(Error::Config(
                "scoring.rsi_oversold must be below scoring.rsi_overbought, both within 0..=100"
                    .into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.strong_candle_ratio) {
            return Err(Error::Config(
                "scoring.strong_candle_ratio must be within 0..=1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        IndicatorParams::default().validate().unwrap();
        ScoringRules::default().validate().unwrap();
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let params: IndicatorParams = toml::from_str("rsi_period = 21").unwrap();
        assert_eq!(params.rsi_period, 21);
        assert_eq!(params.sma_slow, 50);
    }

    #[test]
    fn rejects_inverted_periods() {
        let params = IndicatorParams {
            ema_fast: 26,
            ema_slow: 12,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(Error::Config(_))));

        let rules = ScoringRules {
            rsi_oversold: 80.0,
            ..Default::default()
        };
        assert!(rules.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ScoringRules>("trend_wieght = 10").is_err());
    }
}
