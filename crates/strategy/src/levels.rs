use common::{Bar, SupportResistance};

/// Classic pivot levels over the trailing `window` bars.
///
/// Returns `None` for an empty series or a zero window.
pub fn support_resistance(bars: &[Bar], window: usize) -> Option<SupportResistance> {
    if window == 0 {
        return None;
    }
    let last = bars.last()?;
    let recent = &bars[bars.len().saturating_sub(window)..];

    let high = recent.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = recent.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let pivot = (high + low + last.close) / 3.0;

    Some(SupportResistance {
        pivot,
        resistance_1: 2.0 * pivot - low,
        resistance_2: pivot + (high - low),
        support_1: 2.0 * pivot - high,
        support_2: pivot - (high - low),
        recent_high: high,
        recent_low: low,
    })
}
