use common::{Classification, ScoreBreakdown};

/// Components at or below this magnitude never make it into the text.
const FACTOR_THRESHOLD: u32 = 15;
const MAX_FACTORS: usize = 3;
const GENERIC_FACTORS: &str = "technical indicators";

/// Deterministic explanation built only from the score breakdown.
/// Never returns an empty string.
pub fn explain(instrument: &str, classification: Classification, breakdown: &ScoreBreakdown) -> String {
    let factors = main_factors(breakdown);
    let factors = if factors.is_empty() {
        GENERIC_FACTORS.to_string()
    } else {
        factors.join(", ")
    };

    match classification {
        Classification::Buy => format!(
            "Bullish signal on {instrument} supported by {factors}. \
             Positive momentum and favorable technical conditions for buying."
        ),
        Classification::Sell => format!(
            "Bearish signal on {instrument} based on {factors}. \
             Selling pressure and a negative technical setup."
        ),
        Classification::Hold => format!(
            "Sideways market on {instrument}. Mixed signals from the technical indicators. \
             Wait for confirmation before opening new positions."
        ),
    }
}

/// Phrases for the strongest components, strongest first, ties by name.
fn main_factors(breakdown: &ScoreBreakdown) -> Vec<&'static str> {
    let mut strong: Vec<_> = breakdown
        .iter()
        .filter(|(_, value)| value.unsigned_abs() > FACTOR_THRESHOLD)
        .collect();
    strong.sort_by(|(a_name, a), (b_name, b)| {
        b.unsigned_abs()
            .cmp(&a.unsigned_abs())
            .then_with(|| a_name.name().cmp(b_name.name()))
    });
    strong
        .into_iter()
        .filter_map(|(component, _)| phrase(component.name()))
        .take(MAX_FACTORS)
        .collect()
}

fn phrase(name: &str) -> Option<&'static str> {
    if name.contains("trend") {
        Some("favorable trend")
    } else if name.contains("rsi") {
        Some("RSI in a favorable zone")
    } else if name.contains("macd") {
        Some("positive MACD signal")
    } else if name.contains("bb") {
        Some("price near a volatility band")
    } else {
        None
    }
}
