use super::moving_average::mean;

/// Bollinger Bands: SMA(period) ± `width` × population standard deviation.
#[derive(Debug, Clone)]
pub struct BollingerIndicator {
    pub period: usize,
    pub width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub mid: f64,
    pub lower: f64,
}

impl BollingerIndicator {
    pub fn new(period: usize, width: f64) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        Self { period, width }
    }

    pub fn series(&self, closes: &[f64]) -> Vec<Option<Bands>> {
        let mut out = vec![None; closes.len()];
        if closes.len() < self.period {
            return out;
        }
        for i in (self.period - 1)..closes.len() {
            let window = &closes[i + 1 - self.period..=i];
            let mid = mean(window);
            let variance =
                window.iter().map(|v| (v - mid).powi(2)).sum::<f64>() / self.period as f64;
            let spread = self.width * variance.sqrt();
            out[i] = Some(Bands {
                upper: mid + spread,
                mid,
                lower: mid - spread,
            });
        }
        out
    }
}
