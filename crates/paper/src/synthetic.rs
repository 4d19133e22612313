//! Deterministic bar series for offline runs and tests.

use chrono::{DateTime, Duration, TimeZone, Utc};

use common::{Bar, Timeframe};

/// Extra high/low beyond the candle body.
const WICK: f64 = 0.0001;

fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Build bars from a close path; each bar opens at the previous close.
fn from_closes(first_open: f64, closes: &[f64], timeframe: Timeframe, wick: f64) -> Vec<Bar> {
    let step = Duration::minutes(timeframe.minutes());
    let start = origin();
    let mut open = first_open;
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let bar = Bar {
                timestamp: start + step * i as i32,
                open,
                high: open.max(close) + wick,
                low: open.min(close) - wick,
                close,
                volume: 1_000.0,
            };
            open = close;
            bar
        })
        .collect()
}

/// Constant price, no movement at all.
pub fn flat(price: f64, count: usize, timeframe: Timeframe) -> Vec<Bar> {
    from_closes(price, &vec![price; count], timeframe, 0.0)
}

/// Closes rise (or fall) linearly from `start` to `end`; every bar spans
/// `half_range` either side of its body.
pub fn linear(start: f64, end: f64, count: usize, half_range: f64, timeframe: Timeframe) -> Vec<Bar> {
    let closes: Vec<f64> = match count {
        0 => Vec::new(),
        1 => vec![end],
        n => (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect(),
    };
    from_closes(start, &closes, timeframe, half_range)
}

/// Alternating moves of `+lead` and `-retrace`, always finishing with a
/// `lead` move. A positive lead larger than the retrace drifts up; negate
/// both for the mirrored downtrend.
pub fn zigzag(start: f64, lead: f64, retrace: f64, count: usize, timeframe: Timeframe) -> Vec<Bar> {
    let mut price = start;
    let closes: Vec<f64> = (0..count)
        .map(|i| {
            let from_end = count - 1 - i;
            price += if from_end % 2 == 0 { lead } else { -retrace };
            price
        })
        .collect();
    from_closes(start, &closes, timeframe, WICK)
}

/// Two overlaid sine waves around a per-symbol base price. Stable across
/// runs for a given symbol.
pub fn wave(symbol: &str, count: usize, timeframe: Timeframe) -> Vec<Bar> {
    let base = base_price(symbol);
    let phase = symbol.bytes().map(f64::from).sum::<f64>() / 10.0;
    let closes: Vec<f64> = (0..count)
        .map(|i| {
            let t = i as f64;
            base * (1.0 + 0.004 * (t / 9.0 + phase).sin() + 0.0015 * (t / 3.5).sin())
        })
        .collect();
    let first_open = closes.first().copied().unwrap_or(base);
    from_closes(first_open, &closes, timeframe, base * 0.0004)
}

fn base_price(symbol: &str) -> f64 {
    let upper = symbol.to_uppercase();
    if upper.contains("JPY") {
        150.0
    } else if upper.contains("XAU") || upper.contains("GOLD") {
        2300.0
    } else if upper.contains("XAG") || upper.contains("SILVER") {
        28.0
    } else {
        1.1
    }
}
