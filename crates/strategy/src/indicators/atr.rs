use common::Bar;

/// ATR (Average True Range) with Wilder smoothing.
///
/// TR = max(high − low, |high − prev close|, |low − prev close|). The first
/// value, at index `period`, is the plain mean of the first `period` true
/// ranges.
#[derive(Debug, Clone)]
pub struct AtrIndicator {
    pub period: usize,
}

impl AtrIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self { period }
    }

    pub fn series(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let mut out = vec![None; bars.len()];
        if bars.len() < self.period + 1 {
            return out;
        }

        let p = self.period as f64;
        let ranges: Vec<f64> = bars
            .windows(2)
            .map(|w| true_range(&w[1], w[0].close))
            .collect();

        let mut atr = ranges[..self.period].iter().sum::<f64>() / p;
        out[self.period] = Some(atr);
        for (i, tr) in ranges.iter().enumerate().skip(self.period) {
            atr = (atr * (p - 1.0) + tr) / p;
            out[i + 1] = Some(atr);
        }
        out
    }
}

fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev_close).abs();
    let lc = (bar.low - prev_close).abs();
    hl.max(hc).max(lc)
}
