/// Arithmetic mean, computed relative to the first element so that a window
/// of identical values averages to exactly that value.
pub fn mean(window: &[f64]) -> f64 {
    let Some(&base) = window.first() else {
        return 0.0;
    };
    base + window.iter().map(|v| v - base).sum::<f64>() / window.len() as f64
}

/// Simple moving average of each trailing `period` window.
/// Entries before the first full window are `None`.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        out[i] = Some(mean(window));
    }
    out
}

/// Exponential moving average, seeded with the SMA of the first `period`
/// values and updated as `ema += k * (x - ema)` with `k = 2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut current = mean(&values[..period]);
    out[period - 1] = Some(current);
    for (i, &value) in values.iter().enumerate().skip(period) {
        // Incremental form keeps a constant input exactly constant.
        current += k * (value - current);
        out[i] = Some(current);
    }
    out
}

/// Apply `f` to the defined run of a series that starts with a `None` prefix,
/// re-aligning the result to the original length.
pub fn on_defined<F>(series: &[Option<f64>], f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Vec<Option<f64>>,
{
    let Some(start) = series.iter().position(Option::is_some) else {
        return vec![None; series.len()];
    };
    let run: Vec<f64> = series[start..].iter().map_while(|v| *v).collect();
    let mut out = vec![None; start];
    out.extend(f(&run));
    out.resize(series.len(), None);
    out
}
