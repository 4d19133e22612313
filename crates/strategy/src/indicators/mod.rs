pub mod atr;
pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod stochastic;

pub use atr::AtrIndicator;
pub use bollinger::{Bands, BollingerIndicator};
pub use macd::{MacdIndicator, MacdSeries};
pub use rsi::RsiIndicator;
pub use stochastic::{StochasticIndicator, StochasticSeries};

use common::{Bar, Error, IndicatorSnapshot, Result};
use tracing::debug;

use crate::config::IndicatorParams;

/// Computes every indicator over a bar series in one pass.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    params: IndicatorParams,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self {
            params: IndicatorParams::default(),
        }
    }
}

impl IndicatorEngine {
    pub fn new(params: IndicatorParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }

    /// Bars needed before `compute` will run.
    pub fn required_history(&self) -> usize {
        self.params.min_history.max(2)
    }

    /// One snapshot per input bar, oldest first. Fails without partial output
    /// when the series is shorter than the minimum history.
    pub fn compute(&self, bars: &[Bar]) -> Result<Vec<IndicatorSnapshot>> {
        let required = self.required_history();
        if bars.len() < required {
            return Err(Error::InsufficientHistory {
                available: bars.len(),
                required,
            });
        }

        let p = &self.params;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let sma_fast = moving_average::sma(&closes, p.sma_fast);
        let sma_slow = moving_average::sma(&closes, p.sma_slow);
        let ema_fast = moving_average::ema(&closes, p.ema_fast);
        let ema_slow = moving_average::ema(&closes, p.ema_slow);
        let rsi = RsiIndicator::new(p.rsi_period).series(&closes);
        let macd = MacdIndicator::new(p.ema_fast, p.ema_slow, p.macd_signal).series(&closes);
        let bands = BollingerIndicator::new(p.bb_period, p.bb_width).series(&closes);
        let atr = AtrIndicator::new(p.atr_period).series(bars);
        let stoch = StochasticIndicator::new(p.stoch_k, p.stoch_smooth, p.stoch_d).series(bars);

        let snapshots: Vec<IndicatorSnapshot> = (0..bars.len())
            .map(|i| IndicatorSnapshot {
                sma_fast: sma_fast[i],
                sma_slow: sma_slow[i],
                ema_fast: ema_fast[i],
                ema_slow: ema_slow[i],
                rsi: rsi[i],
                macd_line: macd.line[i],
                macd_signal: macd.signal[i],
                macd_hist: macd.hist[i],
                band_upper: bands[i].map(|b| b.upper),
                band_mid: bands[i].map(|b| b.mid),
                band_lower: bands[i].map(|b| b.lower),
                atr: atr[i],
                stoch_k: stoch.k[i],
                stoch_d: stoch.d[i],
            })
            .collect();

        debug!(bars = bars.len(), "Indicators computed");
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn flat_bars(n: usize, price: f64) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Bar {
                timestamp: start + Duration::hours(i as i64),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn too_few_bars_is_insufficient_history() {
        let engine = IndicatorEngine::default();
        let err = engine.compute(&flat_bars(49, 1.1)).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientHistory {
                available: 49,
                required: 50
            }
        ));
    }

    #[test]
    fn one_snapshot_per_bar_with_warmup() {
        let engine = IndicatorEngine::default();
        let out = engine.compute(&flat_bars(60, 1.25)).unwrap();
        assert_eq!(out.len(), 60);
        assert!(out[18].sma_fast.is_none());
        assert_eq!(out[19].sma_fast, Some(1.25));
        assert!(out[48].sma_slow.is_none());
        assert_eq!(out[49].sma_slow, Some(1.25));
        assert_eq!(out[59].rsi, Some(50.0));
        assert_eq!(out[59].atr, Some(0.0));
        assert_eq!(out[59].stoch_k, Some(50.0));
    }

    #[test]
    fn min_history_is_at_least_two() {
        let params = IndicatorParams {
            min_history: 0,
            ..Default::default()
        };
        let engine = IndicatorEngine::new(params).unwrap();
        assert_eq!(engine.required_history(), 2);
        assert!(engine.compute(&flat_bars(1, 1.0)).is_err());
        let out = engine.compute(&flat_bars(2, 1.0)).unwrap();
        assert!(out.iter().all(|s| s.sma_fast.is_none() && s.rsi.is_none()));
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = IndicatorParams {
            rsi_period: 1,
            ..Default::default()
        };
        assert!(IndicatorEngine::new(params).is_err());
    }
}
