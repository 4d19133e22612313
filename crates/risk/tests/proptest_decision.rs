use chrono::Utc;
use common::{Classification, RiskStatus};
use proptest::prelude::*;
use risk::DecisionEngine;

proptest! {
    /// Reliability stays a percentage for every possible aggregate.
    #[test]
    fn reliability_always_within_bounds(aggregate in any::<i32>()) {
        let engine = DecisionEngine::default();
        let d = engine.decide("EURUSD", aggregate, 1.1, Some(0.001), Utc::now());
        prop_assert!((0.0..=100.0).contains(&d.reliability));
    }

    /// Stop and target always sit on opposite sides of the entry, oriented
    /// by direction; HOLD never carries levels.
    #[test]
    fn risk_levels_are_ordered(
        aggregate in -2000i32..2000,
        close in 0.0001f64..1_000_000.0,
        atr in proptest::option::of(0.0f64..1000.0),
    ) {
        let engine = DecisionEngine::default();
        let d = engine.decide("TEST", aggregate, close, atr, Utc::now());
        match (d.classification, d.stop_loss, d.take_profit) {
            (Classification::Buy, Some(stop), Some(target)) => {
                prop_assert!(stop < d.entry_price && d.entry_price < target);
            }
            (Classification::Sell, Some(stop), Some(target)) => {
                prop_assert!(target < d.entry_price && d.entry_price < stop);
            }
            (Classification::Hold, None, None) => {
                prop_assert_eq!(d.risk_status, RiskStatus::NotApplicable);
            }
            (_, None, None) => {
                prop_assert_eq!(d.risk_status, RiskStatus::AtrUnavailable);
            }
            other => prop_assert!(false, "inconsistent levels: {:?}", other),
        }
    }

    /// Identical inputs give identical decisions apart from timestamps.
    #[test]
    fn decisions_are_deterministic(
        aggregate in -200i32..200,
        close in 0.5f64..2.0,
        atr in 0.0001f64..0.01,
    ) {
        let engine = DecisionEngine::default();
        let a = engine.decide("EURUSD", aggregate, close, Some(atr), Utc::now());
        let b = engine.decide("EURUSD", aggregate, close, Some(atr), Utc::now());
        prop_assert_eq!(a.classification, b.classification);
        prop_assert_eq!(a.reliability, b.reliability);
        prop_assert_eq!(a.stop_loss, b.stop_loss);
        prop_assert_eq!(a.take_profit, b.take_profit);
        prop_assert_eq!(a.aggregate_score, b.aggregate_score);
    }
}
