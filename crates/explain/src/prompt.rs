use common::{Classification, ScoreBreakdown, SignalDecision, SupportResistance};

/// Everything the explanation is built from.
#[derive(Debug, Clone, Copy)]
pub struct ExplanationContext<'a> {
    pub instrument: &'a str,
    pub decision: &'a SignalDecision,
    pub breakdown: &'a ScoreBreakdown,
    pub levels: Option<&'a SupportResistance>,
}

impl ExplanationContext<'_> {
    pub fn classification(&self) -> Classification {
        self.decision.classification
    }
}

pub fn build_prompt(ctx: &ExplanationContext<'_>, max_words: usize) -> String {
    let d = ctx.decision;
    let fmt_level = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.5}"));
    let levels = ctx.levels.map_or_else(
        || "n/a".to_string(),
        |l| {
            format!(
                "pivot {:.5}, R1 {:.5}, R2 {:.5}, S1 {:.5}, S2 {:.5}",
                l.pivot, l.resistance_1, l.resistance_2, l.support_1, l.support_2
            )
        },
    );

    format!(
        "Analyze this trading signal for {instrument}:\n\n\
         Signal type: {classification}\n\
         Reliability: {reliability:.0}%\n\
         Entry: {entry:.5}, stop-loss: {stop}, take-profit: {target}\n\
         Technical analysis scores: {breakdown}\n\
         Support/resistance levels: {levels}\n\n\
         Give a professional explanation (max {max_words} words) covering:\n\
         1. The main reason for the signal\n\
         2. The key technical factors\n\
         3. The risks to consider\n\
         4. Trade management suggestions\n\n\
         Use professional but clear language.",
        instrument = ctx.instrument,
        classification = d.classification,
        reliability = d.reliability,
        entry = d.entry_price,
        stop = fmt_level(d.stop_loss),
        target = fmt_level(d.take_profit),
        breakdown = ctx.breakdown,
    )
}
