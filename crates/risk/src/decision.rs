use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::{Classification, Error, Result, RiskStatus, SignalDecision};

/// Default lifetime of a signal before it is considered stale.
pub const DEFAULT_SIGNAL_TTL_HOURS: i64 = 8;

/// Classification thresholds and ATR multiples, read from the `[decision]`
/// table of the analysis file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionPolicy {
    /// Aggregate strictly above this is a BUY.
    pub buy_threshold: i32,
    /// Aggregate strictly below this is a SELL.
    pub sell_threshold: i32,
    /// Reliability of a HOLD and the base added to |aggregate| otherwise.
    pub baseline_reliability: f64,
    /// Upper bound for directional reliability.
    pub reliability_cap: f64,
    pub stop_atr_multiple: f64,
    pub target_atr_multiple: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            buy_threshold: 35,
            sell_threshold: -35,
            baseline_reliability: 50.0,
            reliability_cap: 90.0,
            stop_atr_multiple: 2.0,
            target_atr_multiple: 3.0,
        }
    }
}

impl DecisionPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.sell_threshold > self.buy_threshold {
            return Err(Error::Config(
                "decision.sell_threshold must not exceed decision.buy_threshold".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.baseline_reliability)
            || !(0.0..=100.0).contains(&self.reliability_cap)
        {
            return Err(Error::Config(
                "decision reliabilities must be within 0..=100".into(),
            ));
        }
        for (name, value) in [
            ("stop_atr_multiple", self.stop_atr_multiple),
            ("target_atr_multiple", self.target_atr_multiple),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("decision.{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Maps an aggregate score to a classification, a reliability percentage and
/// ATR-derived stop/target levels.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    policy: DecisionPolicy,
    ttl: Duration,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self {
            policy: DecisionPolicy::default(),
            ttl: Duration::hours(DEFAULT_SIGNAL_TTL_HOURS),
        }
    }
}

impl DecisionEngine {
    pub fn new(policy: DecisionPolicy, ttl_hours: i64) -> Result<Self> {
        policy.validate()?;
        if ttl_hours <= 0 {
            return Err(Error::Config("signal TTL must be positive".into()));
        }
        Ok(Self {
            policy,
            ttl: Duration::hours(ttl_hours),
        })
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn classify(&self, aggregate: i32) -> Classification {
        if aggregate > self.policy.buy_threshold {
            Classification::Buy
        } else if aggregate < self.policy.sell_threshold {
            Classification::Sell
        } else {
            Classification::Hold
        }
    }

    /// Always within `[0, 100]`; defined for every `i32`, `i32::MIN` included.
    pub fn reliability(&self, classification: Classification, aggregate: i32) -> f64 {
        let p = &self.policy;
        let value = match classification {
            Classification::Hold => p.baseline_reliability,
            Classification::Buy | Classification::Sell => {
                (p.baseline_reliability + f64::from(aggregate.unsigned_abs()))
                    .min(p.reliability_cap)
            }
        };
        value.clamp(0.0, 100.0)
    }

    pub fn decide(
        &self,
        instrument: &str,
        aggregate: i32,
        close: f64,
        atr: Option<f64>,
        now: DateTime<Utc>,
    ) -> SignalDecision {
        let classification = self.classify(aggregate);
        let reliability = self.reliability(classification, aggregate);

        let (stop_loss, take_profit, risk_status) = match classification {
            Classification::Hold => (None, None, RiskStatus::NotApplicable),
            side => match self.levels(side, close, atr) {
                Some((stop, target)) => (Some(stop), Some(target), RiskStatus::Set),
                None => {
                    warn!(
                        instrument = %instrument,
                        classification = %side,
                        atr = ?atr,
                        "ATR unavailable, signal emitted without stop-loss/take-profit"
                    );
                    (None, None, RiskStatus::AtrUnavailable)
                }
            },
        };

        debug!(
            instrument = %instrument,
            aggregate,
            classification = %classification,
            reliability,
            "Decision made"
        );

        SignalDecision {
            instrument: instrument.to_string(),
            classification,
            reliability,
            entry_price: close,
            stop_loss,
            take_profit,
            risk_status,
            aggregate_score: aggregate,
            generated_at: now,
            expires_at: now + self.ttl,
        }
    }

    /// `(stop, target)` for a directional decision, or `None` when the ATR
    /// cannot place both levels strictly on either side of the entry.
    fn levels(&self, side: Classification, close: f64, atr: Option<f64>) -> Option<(f64, f64)> {
        let atr = atr.filter(|a| a.is_finite() && *a > 0.0)?;
        let stop_distance = self.policy.stop_atr_multiple * atr;
        let target_distance = self.policy.target_atr_multiple * atr;
        let (stop, target) = match side {
            Classification::Buy => (close - stop_distance, close + target_distance),
            Classification::Sell => (close + stop_distance, close - target_distance),
            Classification::Hold => return None,
        };
        let ordered = match side {
            Classification::Buy => stop < close && close < target,
            _ => target < close && close < stop,
        };
        ordered.then_some((stop, target))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn thresholds_are_exclusive() {
        let engine = DecisionEngine::default();
        assert_eq!(engine.classify(35), Classification::Hold);
        assert_eq!(engine.classify(36), Classification::Buy);
        assert_eq!(engine.classify(-35), Classification::Hold);
        assert_eq!(engine.classify(-36), Classification::Sell);
    }

    #[test]
    fn buy_levels_from_atr() {
        let engine = DecisionEngine::default();
        let d = engine.decide("EURUSD", 45, 1.0900, Some(0.0010), now());
        assert_eq!(d.classification, Classification::Buy);
        assert_eq!(d.risk_status, RiskStatus::Set);
        assert!((d.stop_loss.unwrap() - 1.0880).abs() < 1e-9);
        assert!((d.take_profit.unwrap() - 1.0930).abs() < 1e-9);
        assert!(d.reliability >= 80.0);
        assert_eq!(d.reliability, 90.0);
        assert_eq!(d.entry_price, 1.0900);
    }

    #[test]
    fn sell_levels_are_mirrored() {
        let engine = DecisionEngine::default();
        let d = engine.decide("GBPUSD", -40, 1.2500, Some(0.0020), now());
        assert_eq!(d.classification, Classification::Sell);
        assert!((d.stop_loss.unwrap() - 1.2540).abs() < 1e-9);
        assert!((d.take_profit.unwrap() - 1.2440).abs() < 1e-9);
        assert_eq!(d.reliability, 90.0);
    }

    #[test]
    fn hold_has_no_levels() {
        let engine = DecisionEngine::default();
        let d = engine.decide("USDJPY", 10, 150.0, Some(0.5), now());
        assert_eq!(d.classification, Classification::Hold);
        assert_eq!(d.reliability, 50.0);
        assert!(d.stop_loss.is_none() && d.take_profit.is_none());
        assert_eq!(d.risk_status, RiskStatus::NotApplicable);
    }

    #[test]
    fn missing_atr_keeps_classification() {
        let engine = DecisionEngine::default();
        for atr in [None, Some(0.0), Some(-1.0), Some(f64::NAN), Some(f64::INFINITY)] {
            let d = engine.decide("EURUSD", 60, 1.1, atr, now());
            assert_eq!(d.classification, Classification::Buy);
            assert_eq!(d.risk_status, RiskStatus::AtrUnavailable);
            assert!(d.stop_loss.is_none() && d.take_profit.is_none());
        }
    }

    #[test]
    fn extreme_aggregates_do_not_overflow() {
        let engine = DecisionEngine::default();
        assert_eq!(engine.reliability(Classification::Sell, i32::MIN), 90.0);
        assert_eq!(engine.reliability(Classification::Buy, i32::MAX), 90.0);
        let d = engine.decide("EURUSD", i32::MIN, 1.1, Some(0.001), now());
        assert_eq!(d.classification, Classification::Sell);
    }

    #[test]
    fn reliability_formula_between_threshold_and_cap() {
        let engine = DecisionEngine::default();
        assert_eq!(engine.reliability(Classification::Buy, 36), 86.0);
        assert_eq!(engine.reliability(Classification::Sell, -39), 89.0);
    }

    #[test]
    fn expiry_uses_ttl() {
        let engine = DecisionEngine::new(DecisionPolicy::default(), 4).unwrap();
        let d = engine.decide("EURUSD", 0, 1.1, None, now());
        assert_eq!(d.expires_at - d.generated_at, Duration::hours(4));
        assert!(!d.is_expired(now()));
        assert!(d.is_expired(now() + Duration::hours(4)));

        let d = DecisionEngine::default().decide("EURUSD", 0, 1.1, None, now());
        assert_eq!(d.expires_at - d.generated_at, Duration::hours(8));
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let policy = DecisionPolicy {
            buy_threshold: -10,
            sell_threshold: 10,
            ..Default::default()
        };
        assert!(DecisionEngine::new(policy, 8).is_err());
        assert!(DecisionEngine::new(DecisionPolicy::default(), 0).is_err());
    }
}
