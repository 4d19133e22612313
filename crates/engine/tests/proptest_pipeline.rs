use chrono::{Duration, TimeZone, Utc};
use common::{Bar, Classification, ScoreComponent};
use engine::SignalPipeline;
use proptest::prelude::*;

/// Bars whose closes rise strictly, each opening at the previous close.
fn rising_bars() -> impl Strategy<Value = Vec<Bar>> {
    (
        0.5f64..2.0,
        prop::collection::vec((0.0001f64..0.01, 0.0f64..0.005, 0.0f64..0.005), 50..120),
    )
        .prop_map(|(start_price, steps)| {
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let mut price = start_price;
            steps
                .into_iter()
                .enumerate()
                .map(|(i, (step, up, down))| {
                    let open = price;
                    let close = price + step;
                    price = close;
                    Bar {
                        timestamp: start + Duration::hours(i as i64),
                        open,
                        high: close + up,
                        low: open - down,
                        close,
                        volume: 1.0,
                    }
                })
                .collect()
        })
}

proptest! {
    #[test]
    fn rising_closes_fire_uptrend_and_buy_tracks_the_threshold(bars in rising_bars()) {
        let pipeline = SignalPipeline::default();
        let (assessment, decision) = pipeline.evaluate("EURUSD", &bars, Utc::now()).unwrap();

        let close = assessment.close;
        let fast = assessment.latest.sma_fast.unwrap();
        let slow = assessment.latest.sma_slow.unwrap();
        prop_assert!(close > fast && fast > slow, "close {} fast {} slow {}", close, fast, slow);
        prop_assert!(assessment.breakdown.contains(ScoreComponent::Uptrend));

        let aggregate = assessment.breakdown.aggregate();
        prop_assert_eq!(decision.aggregate_score, aggregate);
        prop_assert_eq!(decision.classification == Classification::Buy, aggregate > 35);
    }
}
