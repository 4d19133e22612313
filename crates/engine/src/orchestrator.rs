use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{
    AliasAttempt, AttemptFailure, Config, Error, GatewayError, MarketDataGateway, SignalRecord,
    SignalSink, Timeframe,
};
use explain::{ExplanationContext, ExplanationGenerator};

use crate::pipeline::SignalPipeline;
use crate::resolver::SymbolResolver;

/// Where a single instrument run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    Idle,
    Resolving,
    Fetching,
    Computing,
    Deciding,
    Explaining,
    Emitted,
    Failed,
}

impl RunState {
    /// A run is in flight.
    pub fn is_active(&self) -> bool {
        !matches!(self, RunState::Idle | RunState::Emitted | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "IDLE",
            RunState::Resolving => "RESOLVING",
            RunState::Fetching => "FETCHING",
            RunState::Computing => "COMPUTING",
            RunState::Deciding => "DECIDING",
            RunState::Explaining => "EXPLAINING",
            RunState::Emitted => "EMITTED",
            RunState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Who asked for a run. Manual triggers ignore failure backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SymbolUnresolved,
    InsufficientHistory,
    BridgeUnreachable,
    BridgeTimeout,
    SinkFailed,
    Internal,
}

impl FailureKind {
    fn of(error: &Error) -> Self {
        match error {
            Error::SymbolUnresolved { attempts, .. }
                if !attempts.is_empty() && attempts.iter().all(|a| a.failure.is_transport()) =>
            {
                let all_timeouts = attempts.iter().all(|a| {
                    matches!(
                        a.failure,
                        AttemptFailure::Gateway {
                            error: GatewayError::Timeout
                        }
                    )
                });
                if all_timeouts {
                    FailureKind::BridgeTimeout
                } else {
                    FailureKind::BridgeUnreachable
                }
            }
            Error::SymbolUnresolved { .. } => FailureKind::SymbolUnresolved,
            Error::InsufficientHistory { .. } => FailureKind::InsufficientHistory,
            Error::BridgeTimeout | Error::Gateway(GatewayError::Timeout) => FailureKind::BridgeTimeout,
            Error::BridgeUnreachable(_) | Error::Gateway(GatewayError::Unreachable(_)) => {
                FailureKind::BridgeUnreachable
            }
            _ => FailureKind::Internal,
        }
    }

    fn is_transport(&self) -> bool {
        matches!(self, FailureKind::BridgeUnreachable | FailureKind::BridgeTimeout)
    }
}

/// Some alias answered with bars, just not enough of them: the symbol exists,
/// its history is short. Reports the longest series seen.
fn short_history(attempts: &[AliasAttempt]) -> Option<Error> {
    attempts
        .iter()
        .filter_map(|a| match a.failure {
            AttemptFailure::TooFewBars {
                available,
                required,
            } => Some((available, required)),
            _ => None,
        })
        .max_by_key(|(available, _)| *available)
        .map(|(available, required)| Error::InsufficientHistory {
            available,
            required,
        })
}

/// Result of one trigger for one instrument.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Emitted(Box<SignalRecord>),
    Failed {
        instrument: String,
        stage: RunState,
        kind: FailureKind,
        message: String,
    },
    /// A run for this instrument was already in flight.
    Rejected { instrument: String },
    /// Scheduled trigger inside the failure backoff window.
    Skipped {
        instrument: String,
        retry_at: DateTime<Utc>,
    },
}

impl RunOutcome {
    pub fn instrument(&self) -> &str {
        match self {
            RunOutcome::Emitted(record) => &record.decision.instrument,
            RunOutcome::Failed { instrument, .. }
            | RunOutcome::Rejected { instrument }
            | RunOutcome::Skipped { instrument, .. } => instrument,
        }
    }

    pub fn is_emitted(&self) -> bool {
        matches!(self, RunOutcome::Emitted(_))
    }
}

/// Run policy shared by every instrument.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub timeframe: Timeframe,
    pub bar_count: usize,
    pub inter_instrument_delay: Duration,
    pub batch_workers: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H1,
            bar_count: 500,
            inter_instrument_delay: Duration::from_millis(500),
            batch_workers: 1,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(30 * 60),
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeframe: config.timeframe,
            bar_count: config.bar_count,
            inter_instrument_delay: config.inter_instrument_delay,
            batch_workers: config.batch_workers,
            ..Self::default()
        }
    }
}

/// `base · 2^(failures−1)`, capped at `max`; zero when nothing failed.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    base.saturating_mul(2u32.saturating_pow(failures - 1)).min(max)
}

#[derive(Debug, Clone, Default)]
struct Slot {
    state: RunState,
    consecutive_failures: u32,
    retry_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Point-in-time view of one instrument, for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentStatus {
    pub instrument: String,
    pub state: RunState,
    pub consecutive_failures: u32,
    pub retry_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

type Slots = Mutex<HashMap<String, Slot>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns an instrument's slot for the duration of a run. Dropping it before
/// `succeed`/`fail` marks the run as cancelled.
struct RunGuard<'a> {
    slots: &'a Slots,
    instrument: String,
    backoff_base: Duration,
    backoff_max: Duration,
    finished: bool,
}

impl RunGuard<'_> {
    fn update<F: FnOnce(&mut Slot)>(&self, f: F) {
        let mut slots = lock(self.slots);
        f(slots.entry(self.instrument.clone()).or_default());
    }

    fn advance(&self, state: RunState) {
        self.update(|slot| slot.state = state);
        debug!(instrument = %self.instrument, state = %state, "Run advanced");
    }

    fn succeed(mut self) {
        self.finished = true;
        let now = Utc::now();
        self.update(|slot| {
            slot.state = RunState::Emitted;
            slot.consecutive_failures = 0;
            slot.retry_at = None;
            slot.last_success_at = Some(now);
            slot.last_error = None;
        });
    }

    fn fail(mut self, kind: FailureKind, message: String) -> RunOutcome {
        self.finished = true;
        let now = Utc::now();
        let mut stage = RunState::Idle;
        let mut retry_at = now;
        self.update(|slot| {
            stage = slot.state;
            slot.state = RunState::Failed;
            slot.consecutive_failures = slot.consecutive_failures.saturating_add(1);
            let delay = backoff_delay(self.backoff_base, self.backoff_max, slot.consecutive_failures);
            retry_at = now
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::weeks(1));
            slot.retry_at = Some(retry_at);
            slot.last_error = Some(message.clone());
        });
        warn!(
            instrument = %self.instrument,
            stage = %stage,
            kind = ?kind,
            retry_at = %retry_at,
            "Run failed: {message}"
        );
        RunOutcome::Failed {
            instrument: self.instrument.clone(),
            stage,
            kind,
            message,
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut slots = lock(self.slots);
        let slot = slots.entry(self.instrument.clone()).or_default();
        warn!(instrument = %self.instrument, stage = %slot.state, "Run cancelled");
        slot.state = RunState::Failed;
        slot.last_error = Some("cancelled".into());
    }
}

/// Keeps at least `delay` between a launch and whatever came before it:
/// the previous launch or the previous run finishing.
struct Pacer {
    delay: Duration,
    last: tokio::sync::Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: tokio::sync::Mutex::new(None),
        }
    }

    async fn before_launch(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut last = self.last.lock().await;
        if let Some(at) = *last {
            tokio::time::sleep_until(at + self.delay).await;
        }
        *last = Some(Instant::now());
    }

    async fn after_run(&self) {
        if self.delay.is_zero() {
            return;
        }
        *self.last.lock().await = Some(Instant::now());
    }
}

/// Drives instruments through resolve → fetch → compute → decide → explain →
/// emit, at most one run per instrument at a time.
pub struct SignalOrchestrator {
    gateway: Arc<dyn MarketDataGateway>,
    resolver: SymbolResolver,
    pipeline: SignalPipeline,
    explainer: ExplanationGenerator,
    sink: Arc<dyn SignalSink>,
    settings: RunSettings,
    slots: Slots,
}

impl SignalOrchestrator {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        resolver: SymbolResolver,
        pipeline: SignalPipeline,
        explainer: ExplanationGenerator,
        sink: Arc<dyn SignalSink>,
        settings: RunSettings,
    ) -> Self {
        Self {
            gateway,
            resolver,
            pipeline,
            explainer,
            sink,
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run every instrument once, in order, with at most `batch_workers` in
    /// flight. Outcomes come back in the order given.
    pub async fn run_batch(&self, instruments: &[String], trigger: Trigger) -> Vec<RunOutcome> {
        let workers = self.settings.batch_workers.max(1);
        let pacer = Pacer::new(self.settings.inter_instrument_delay);
        let pacer = &pacer;
        info!(instruments = instruments.len(), workers, trigger = ?trigger, "Batch started");

        let outcomes: Vec<RunOutcome> = stream::iter(instruments.iter().cloned())
            .map(|instrument: String| async move {
                pacer.before_launch().await;
                let outcome = self.run_instrument(&instrument, trigger).await;
                pacer.after_run().await;
                outcome
            })
            .buffered(workers)
            .collect()
            .await;

        let emitted = outcomes.iter().filter(|o| o.is_emitted()).count();
        info!(emitted, total = outcomes.len(), "Batch finished");
        outcomes
    }

    pub async fn run_instrument(&self, instrument: &str, trigger: Trigger) -> RunOutcome {
        let instrument = instrument.trim().to_uppercase();
        let guard = match self.acquire(&instrument, trigger) {
            Ok(guard) => guard,
            Err(outcome) => return outcome,
        };
        info!(instrument = %instrument, trigger = ?trigger, "Run started");
        self.execute(guard).await
    }

    /// Atomic check-and-set of the instrument's slot.
    fn acquire(&self, instrument: &str, trigger: Trigger) -> Result<RunGuard<'_>, RunOutcome> {
        let now = Utc::now();
        let mut slots = lock(&self.slots);
        let slot = slots.entry(instrument.to_string()).or_default();

        if slot.state.is_active() {
            debug!(instrument = %instrument, state = %slot.state, "Run already in flight, trigger rejected");
            return Err(RunOutcome::Rejected {
                instrument: instrument.to_string(),
            });
        }
        if trigger == Trigger::Scheduled {
            if let Some(retry_at) = slot.retry_at.filter(|at| *at > now) {
                debug!(instrument = %instrument, retry_at = %retry_at, "Instrument in backoff, skipped");
                return Err(RunOutcome::Skipped {
                    instrument: instrument.to_string(),
                    retry_at,
                });
            }
        }

        slot.state = RunState::Resolving;
        slot.last_run_at = Some(now);
        Ok(RunGuard {
            slots: &self.slots,
            instrument: instrument.to_string(),
            backoff_base: self.settings.backoff_base,
            backoff_max: self.settings.backoff_max,
            finished: false,
        })
    }

    async fn execute(&self, guard: RunGuard<'_>) -> RunOutcome {
        let instrument = guard.instrument.clone();
        let timeframe = self.settings.timeframe;

        // ── Resolve ──
        let resolved = match self
            .resolver
            .resolve(self.gateway.as_ref(), &instrument, timeframe, self.settings.bar_count)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                let short = match &e {
                    Error::SymbolUnresolved { attempts, .. } => short_history(attempts),
                    _ => None,
                };
                let e = short.unwrap_or(e);
                let kind = FailureKind::of(&e);
                if kind.is_transport() || kind == FailureKind::InsufficientHistory {
                    guard.advance(RunState::Fetching);
                }
                return guard.fail(kind, e.to_string());
            }
        };

        // ── Fetch ──
        guard.advance(RunState::Fetching);
        let required = self.pipeline.required_history();
        if resolved.bars.len() < required {
            let e = Error::InsufficientHistory {
                available: resolved.bars.len(),
                required,
            };
            return guard.fail(FailureKind::InsufficientHistory, e.to_string());
        }

        // ── Compute ──
        guard.advance(RunState::Computing);
        let assessment = match self.pipeline.assess(&resolved.bars) {
            Ok(assessment) => assessment,
            Err(e) => return guard.fail(FailureKind::of(&e), e.to_string()),
        };

        // ── Decide ──
        guard.advance(RunState::Deciding);
        let decision = self.pipeline.decide(&instrument, &assessment, Utc::now());

        // ── Explain ──
        guard.advance(RunState::Explaining);
        let explanation = self
            .explainer
            .explain(&ExplanationContext {
                instrument: &instrument,
                decision: &decision,
                breakdown: &assessment.breakdown,
                levels: assessment.levels.as_ref(),
            })
            .await;

        // ── Emit ──
        let record = SignalRecord::new(
            resolved.alias,
            timeframe,
            decision,
            explanation,
            assessment.breakdown.clone(),
            assessment.levels,
            assessment.market_conditions(),
        );
        if let Err(e) = self.sink.emit(&record).await {
            return guard.fail(FailureKind::SinkFailed, format!("sink rejected record: {e}"));
        }
        guard.succeed();

        info!(
            instrument = %instrument,
            alias = %record.alias,
            classification = %record.decision.classification,
            reliability = record.decision.reliability,
            aggregate = record.decision.aggregate_score,
            explanation = %record.explanation.source,
            "Signal generated"
        );
        RunOutcome::Emitted(Box::new(record))
    }

    /// Current state of every instrument seen so far, sorted by code.
    pub fn snapshot(&self) -> Vec<InstrumentStatus> {
        let slots = lock(&self.slots);
        let mut statuses: Vec<InstrumentStatus> = slots
            .iter()
            .map(|(instrument, slot)| InstrumentStatus {
                instrument: instrument.clone(),
                state: slot.state,
                consecutive_failures: slot.consecutive_failures,
                retry_at: slot.retry_at,
                last_run_at: slot.last_run_at,
                last_success_at: slot.last_success_at,
                last_error: slot.last_error.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        statuses
    }

    pub fn state(&self, instrument: &str) -> RunState {
        lock(&self.slots)
            .get(&instrument.trim().to_uppercase())
            .map(|slot| slot.state)
            .unwrap_or_default()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use common::{Classification, ExplanationSource};
    use paper::{synthetic, PaperGateway};
    use tokio::sync::mpsc;

    use super::*;
    use crate::resolver::AliasTable;
    use crate::sink::ChannelSink;

    fn quick_settings() -> RunSettings {
        RunSettings {
            inter_instrument_delay: Duration::ZERO,
            ..RunSettings::default()
        }
    }

    fn rising() -> Vec<common::Bar> {
        synthetic::zigzag(1.08, 0.001, 0.00095, 60, Timeframe::H1)
    }

    fn build(
        gateway: PaperGateway,
        table: AliasTable,
        min_bars: usize,
        settings: RunSettings,
    ) -> (SignalOrchestrator, mpsc::Receiver<SignalRecord>) {
        let (sink, rx) = ChannelSink::channel(16);
        let orchestrator = SignalOrchestrator::new(
            Arc::new(gateway),
            SymbolResolver::new(table, min_bars),
            SignalPipeline::default(),
            ExplanationGenerator::fallback_only(),
            Arc::new(sink),
            settings,
        );
        (orchestrator, rx)
    }

    fn single_table(code: &str, aliases: &[&str]) -> AliasTable {
        AliasTable::from_entries([(
            code.to_string(),
            aliases.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )])
        .unwrap()
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let base = Duration::from_secs(60);
        let max = Duration::from_secs(1800);
        assert_eq!(backoff_delay(base, max, 0), Duration::ZERO);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(120));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_secs(240));
        assert_eq!(backoff_delay(base, max, 6), max);
        assert_eq!(backoff_delay(base, max, u32::MAX), max);
    }

    #[test]
    fn active_states() {
        assert!(!RunState::Idle.is_active());
        assert!(RunState::Resolving.is_active());
        assert!(RunState::Explaining.is_active());
        assert!(!RunState::Emitted.is_active());
        assert!(!RunState::Failed.is_active());
    }

    #[tokio::test]
    async fn emits_record_for_first_alias_with_data() {
        let gateway = PaperGateway::new().with_series("EURUSDm", rising());
        let (orch, mut rx) = build(gateway, AliasTable::builtin(), 50, quick_settings());

        let outcome = orch.run_instrument("eurusd", Trigger::Manual).await;
        let record = match outcome {
            RunOutcome::Emitted(record) => record,
            other => panic!("expected emitted, got {other:?}"),
        };
        assert_eq!(record.alias, "EURUSDm");
        assert_eq!(record.decision.instrument, "EURUSD");
        assert_eq!(record.decision.classification, Classification::Buy);
        assert_eq!(record.explanation.source, ExplanationSource::Fallback);
        assert!(record.support_resistance.is_some());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, record.id);
        assert_eq!(orch.state("EURUSD"), RunState::Emitted);
    }

    #[tokio::test]
    async fn unresolved_symbol_fails_at_resolving() {
        let (orch, mut rx) = build(PaperGateway::new(), AliasTable::builtin(), 50, quick_settings());

        match orch.run_instrument("EURUSD", Trigger::Manual).await {
            RunOutcome::Failed { stage, kind, message, .. } => {
                assert_eq!(stage, RunState::Resolving);
                assert_eq!(kind, FailureKind::SymbolUnresolved);
                assert!(message.contains("EURUSD.raw"), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        let status = &orch.snapshot()[0];
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.retry_at.is_some());
    }

    #[tokio::test]
    async fn all_transport_failures_report_the_bridge() {
        let table = single_table("EURUSD", &["EURUSD", "EURUSDm"]);
        let gateway = PaperGateway::new()
            .with_failure("EURUSD", GatewayError::Timeout)
            .with_failure("EURUSDm", GatewayError::Timeout);
        let (orch, _rx) = build(gateway, table.clone(), 50, quick_settings());
        match orch.run_instrument("EURUSD", Trigger::Manual).await {
            RunOutcome::Failed { stage, kind, .. } => {
                assert_eq!(stage, RunState::Fetching);
                assert_eq!(kind, FailureKind::BridgeTimeout);
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let gateway = PaperGateway::new()
            .with_failure("EURUSD", GatewayError::Timeout)
            .with_failure("EURUSDm", GatewayError::Unreachable("connection refused".into()));
        let (orch, _rx) = build(gateway, table.clone(), 50, quick_settings());
        match orch.run_instrument("EURUSD", Trigger::Manual).await {
            RunOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::BridgeUnreachable),
            other => panic!("expected failure, got {other:?}"),
        }

        // One alias reached the bridge and was rejected: a symbol problem.
        let gateway = PaperGateway::new()
            .with_failure("EURUSD", GatewayError::Timeout)
            .with_failure("EURUSDm", GatewayError::SymbolNotFound("EURUSDm".into()));
        let (orch, _rx) = build(gateway, table, 50, quick_settings());
        match orch.run_instrument("EURUSD", Trigger::Manual).await {
            RunOutcome::Failed { stage, kind, .. } => {
                assert_eq!(stage, RunState::Resolving);
                assert_eq!(kind, FailureKind::SymbolUnresolved);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_history_fails_at_fetching() {
        let gateway = PaperGateway::new().with_series("EURUSD", synthetic::flat(1.08, 30, Timeframe::H1));
        let (orch, _rx) = build(gateway, AliasTable::builtin(), 20, quick_settings());

        match orch.run_instrument("EURUSD", Trigger::Manual).await {
            RunOutcome::Failed { stage, kind, message, .. } => {
                assert_eq!(stage, RunState::Fetching);
                assert_eq!(kind, FailureKind::InsufficientHistory);
                assert!(message.contains("30 bars"), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn alias_with_too_few_bars_is_insufficient_history() {
        // Other builtin aliases of EURUSD are unknown to the gateway.
        let gateway = PaperGateway::new().with_series("EURUSD", synthetic::flat(1.08, 30, Timeframe::H1));
        let (orch, mut rx) = build(gateway, AliasTable::builtin(), 50, quick_settings());

        match orch.run_instrument("EURUSD", Trigger::Manual).await {
            RunOutcome::Failed { stage, kind, message, .. } => {
                assert_eq!(stage, RunState::Fetching);
                assert_eq!(kind, FailureKind::InsufficientHistory);
                assert!(message.contains("30 bars available, 50 required"), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());

        // Longest short series wins when a transport error sits in between.
        let table = single_table("EURUSD", &["EURUSD", "EURUSDm", "EURUSD#"]);
        let gateway = PaperGateway::new()
            .with_series("EURUSD", synthetic::flat(1.08, 12, Timeframe::H1))
            .with_failure("EURUSDm", GatewayError::Timeout)
            .with_series("EURUSD#", synthetic::flat(1.08, 41, Timeframe::H1));
        let (orch, _rx) = build(gateway, table, 50, quick_settings());
        match orch.run_instrument("EURUSD", Trigger::Manual).await {
            RunOutcome::Failed { kind, message, .. } => {
                assert_eq!(kind, FailureKind::InsufficientHistory);
                assert!(message.contains("41 bars"), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_trigger_for_same_instrument_is_rejected() {
        let gateway = PaperGateway::new()
            .with_series("EURUSD", rising())
            .with_latency(Duration::from_millis(200));
        let (orch, _rx) = build(gateway, AliasTable::builtin(), 50, quick_settings());

        let (first, second) = tokio::join!(orch.run_instrument("EURUSD", Trigger::Scheduled), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let state = orch.state("EURUSD");
            (state, orch.run_instrument("EURUSD", Trigger::Manual).await)
        });

        assert!(first.is_emitted());
        let (state_during, outcome) = second;
        assert_eq!(state_during, RunState::Resolving);
        assert!(matches!(outcome, RunOutcome::Rejected { ref instrument } if instrument == "EURUSD"));
    }

    #[tokio::test]
    async fn other_instruments_run_concurrently() {
        let gateway = PaperGateway::new()
            .with_series("EURUSD", rising())
            .with_series("GBPUSD", rising())
            .with_latency(Duration::from_millis(100));
        let (orch, _rx) = build(gateway, AliasTable::builtin(), 50, quick_settings());

        let (a, b) = tokio::join!(
            orch.run_instrument("EURUSD", Trigger::Manual),
            orch.run_instrument("GBPUSD", Trigger::Manual)
        );
        assert!(a.is_emitted());
        assert!(b.is_emitted());
    }

    #[tokio::test]
    async fn cancelled_run_releases_the_instrument() {
        let gateway = PaperGateway::new()
            .with_series("EURUSD", rising())
            .with_latency(Duration::from_millis(300));
        let (orch, mut rx) = build(gateway, AliasTable::builtin(), 50, quick_settings());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            orch.run_instrument("EURUSD", Trigger::Manual),
        )
        .await;
        assert!(cancelled.is_err());

        let status = &orch.snapshot()[0];
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.last_error.as_deref(), Some("cancelled"));
        assert_eq!(status.consecutive_failures, 0);
        assert!(rx.try_recv().is_err());

        let outcome = orch.run_instrument("EURUSD", Trigger::Scheduled).await;
        assert!(outcome.is_emitted(), "{outcome:?}");
    }

    #[tokio::test]
    async fn scheduled_runs_back_off_after_failure_but_manual_does_not() {
        let (orch, _rx) = build(PaperGateway::new(), AliasTable::builtin(), 50, quick_settings());

        let first = orch.run_instrument("XAUUSD", Trigger::Scheduled).await;
        assert!(matches!(first, RunOutcome::Failed { .. }));

        match orch.run_instrument("XAUUSD", Trigger::Scheduled).await {
            RunOutcome::Skipped { instrument, retry_at } => {
                assert_eq!(instrument, "XAUUSD");
                let wait = retry_at - Utc::now();
                assert!(wait > chrono::Duration::seconds(50) && wait <= chrono::Duration::seconds(60));
            }
            other => panic!("expected skip, got {other:?}"),
        }

        let manual = orch.run_instrument("XAUUSD", Trigger::Manual).await;
        assert!(matches!(manual, RunOutcome::Failed { .. }));
        let status = &orch.snapshot()[0];
        assert_eq!(status.consecutive_failures, 2);
        let wait = status.retry_at.unwrap() - Utc::now();
        assert!(wait > chrono::Duration::seconds(110));
    }

    #[tokio::test]
    async fn success_clears_failure_history() {
        let gateway = PaperGateway::new();
        gateway
            .set_script("EURUSD", paper::Script::Fail(GatewayError::SymbolNotFound("EURUSD".into())))
            .await;
        let gateway = Arc::new(gateway);
        let (sink, _rx) = ChannelSink::channel(4);
        let orch = SignalOrchestrator::new(
            gateway.clone(),
            SymbolResolver::new(single_table("EURUSD", &["EURUSD"]), 50),
            SignalPipeline::default(),
            ExplanationGenerator::fallback_only(),
            Arc::new(sink),
            quick_settings(),
        );

        assert!(!orch.run_instrument("EURUSD", Trigger::Manual).await.is_emitted());
        gateway.set_script("EURUSD", paper::Script::Bars(rising())).await;
        assert!(orch.run_instrument("EURUSD", Trigger::Manual).await.is_emitted());

        let status = &orch.snapshot()[0];
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.retry_at.is_none());
        assert!(status.last_error.is_none());
        assert!(status.last_success_at.is_some());
    }

    #[tokio::test]
    async fn sink_failure_fails_the_run() {
        let gateway = PaperGateway::new().with_series("EURUSD", rising());
        let (orch, rx) = build(gateway, AliasTable::builtin(), 50, quick_settings());
        drop(rx);

        match orch.run_instrument("EURUSD", Trigger::Manual).await {
            RunOutcome::Failed { stage, kind, .. } => {
                assert_eq!(stage, RunState::Explaining);
                assert_eq!(kind, FailureKind::SinkFailed);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_keeps_order_and_survives_failures() {
        let gateway = PaperGateway::new()
            .with_series("EURUSD", rising())
            .with_series("GBPUSD", rising())
            .with_latency(Duration::from_millis(10));
        let settings = RunSettings {
            batch_workers: 2,
            ..quick_settings()
        };
        let (orch, mut rx) = build(gateway, AliasTable::builtin(), 50, settings);

        let instruments: Vec<String> = ["EURUSD", "BADSYM", "GBPUSD"].map(String::from).to_vec();
        let outcomes = orch.run_batch(&instruments, Trigger::Scheduled).await;

        let order: Vec<&str> = outcomes.iter().map(RunOutcome::instrument).collect();
        assert_eq!(order, vec!["EURUSD", "BADSYM", "GBPUSD"]);
        assert!(outcomes[0].is_emitted());
        assert!(matches!(outcomes[1], RunOutcome::Failed { kind: FailureKind::SymbolUnresolved, .. }));
        assert!(outcomes[2].is_emitted());

        let mut emitted = Vec::new();
        while let Ok(record) = rx.try_recv() {
            emitted.push(record.decision.instrument);
        }
        emitted.sort();
        assert_eq!(emitted, vec!["EURUSD", "GBPUSD"]);
    }

    #[tokio::test]
    async fn batch_spaces_out_launches() {
        let gateway = PaperGateway::new()
            .with_series("EURUSD", rising())
            .with_series("GBPUSD", rising())
            .with_series("USDJPY", rising());
        let settings = RunSettings {
            batch_workers: 3,
            inter_instrument_delay: Duration::from_millis(100),
            ..RunSettings::default()
        };
        let (orch, _rx) = build(gateway, AliasTable::builtin(), 50, settings);

        let instruments: Vec<String> = ["EURUSD", "GBPUSD", "USDJPY"].map(String::from).to_vec();
        let started = Instant::now();
        let outcomes = orch.run_batch(&instruments, Trigger::Manual).await;

        assert!(outcomes.iter().all(RunOutcome::is_emitted));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn slow_runs_still_get_the_full_gap() {
        let gateway = PaperGateway::new()
            .with_series("EURUSD", rising())
            .with_series("GBPUSD", rising())
            .with_latency(Duration::from_millis(300));
        let settings = RunSettings {
            batch_workers: 1,
            inter_instrument_delay: Duration::from_millis(200),
            ..RunSettings::default()
        };
        let (orch, _rx) = build(gateway, AliasTable::builtin(), 50, settings);
        assert_eq!(orch.settings().batch_workers, 1);

        let instruments: Vec<String> = ["EURUSD", "GBPUSD"].map(String::from).to_vec();
        let started = Instant::now();
        let outcomes = orch.run_batch(&instruments, Trigger::Manual).await;

        assert!(outcomes.iter().all(RunOutcome::is_emitted));
        // Two 300 ms fetches plus one 200 ms gap.
        assert!(started.elapsed() >= Duration::from_millis(800), "{:?}", started.elapsed());
    }
}
