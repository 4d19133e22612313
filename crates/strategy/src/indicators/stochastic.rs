use common::Bar;

use super::moving_average::{on_defined, sma};

/// Stochastic oscillator (slow form).
///
/// Raw %K = (close − lowest low) / (highest high − lowest low) × 100 over
/// `k_period` bars, 50 when the range is flat. %K is the `k_smooth` SMA of the
/// raw value and %D the `d_period` SMA of %K.
#[derive(Debug, Clone)]
pub struct StochasticIndicator {
    pub k_period: usize,
    pub k_smooth: usize,
    pub d_period: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StochasticSeries {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
}

impl StochasticIndicator {
    pub fn new(k_period: usize, k_smooth: usize, d_period: usize) -> Self {
        assert!(
            k_period >= 1 && k_smooth >= 1 && d_period >= 1,
            "Stochastic periods must be >= 1"
        );
        Self {
            k_period,
            k_smooth,
            d_period,
        }
    }

    pub fn series(&self, bars: &[Bar]) -> StochasticSeries {
        let mut raw = vec![None; bars.len()];
        if bars.len() >= self.k_period {
            for i in (self.k_period - 1)..bars.len() {
                let window = &bars[i + 1 - self.k_period..=i];
                raw[i] = Some(raw_k(window, bars[i].close));
            }
        }

        let k = bounded(on_defined(&raw, |run| sma(run, self.k_smooth)));
        let d = bounded(on_defined(&k, |run| sma(run, self.d_period)));
        StochasticSeries { k, d }
    }
}

fn raw_k(window: &[Bar], close: f64) -> f64 {
    let lowest = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let highest = window
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    if highest > lowest {
        ((close - lowest) / (highest - lowest) * 100.0).clamp(0.0, 100.0)
    } else {
        50.0
    }
}

fn bounded(series: Vec<Option<f64>>) -> Vec<Option<f64>> {
    series
        .into_iter()
        .map(|v| v.map(|x| x.clamp(0.0, 100.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn bar(i: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i),
            open: close,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn flat_range_reads_fifty() {
        let bars: Vec<Bar> = (0..12).map(|i| bar(i, 1.0, 1.0, 1.0)).collect();
        let out = StochasticIndicator::new(5, 3, 3).series(&bars);
        assert_eq!(out.k[11], Some(50.0));
        assert_eq!(out.d[11], Some(50.0));
    }

    #[test]
    fn warmup_matches_periods() {
        let bars: Vec<Bar> = (0..12).map(|i| bar(i, 2.0 + i as f64, i as f64, 1.0 + i as f64)).collect();
        let out = StochasticIndicator::new(5, 3, 3).series(&bars);
        // raw from 4, %K from 6, %D from 8
        assert!(out.k[5].is_none());
        assert!(out.k[6].is_some());
        assert!(out.d[7].is_none());
        assert!(out.d[8].is_some());
    }

    #[test]
    fn close_at_high_is_hundred() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 10.0 + i as f64, 5.0, 10.0 + i as f64)).collect();
        let out = StochasticIndicator::new(5, 3, 3).series(&bars);
        assert!((out.d[9].unwrap() - 100.0).abs() < 1e-9);
    }
}
