use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, DataSource, MarketDataGateway, SignalSink};
use engine::{
    AliasTable, AnalysisConfig, BridgeClient, ChannelSink, LogSink, RunSettings, SignalOrchestrator,
    SignalPipeline, SymbolResolver, ThrottledGateway, Trigger,
};
use explain::{ExplanationGenerator, GeminiClient};
use paper::PaperGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("invalid configuration")?;
    info!(
        source = %cfg.data_source,
        timeframe = %cfg.timeframe,
        instruments = ?cfg.instruments,
        "SignalBot starting"
    );

    let aliases = match &cfg.alias_table_path {
        Some(path) => AliasTable::load(path).with_context(|| format!("alias table {path}"))?,
        None => AliasTable::builtin(),
    };
    let analysis = match &cfg.analysis_config_path {
        Some(path) => AnalysisConfig::load(path).with_context(|| format!("analysis config {path}"))?,
        None => AnalysisConfig::default(),
    };
    let pipeline = SignalPipeline::from_config(&analysis, cfg.signal_ttl_hours)?;
    info!(aliases = aliases.len(), required_history = pipeline.required_history(), "Analysis ready");

    // ── Market data (injected based on DATA_SOURCE) ──────────────────────────
    let source: Arc<dyn MarketDataGateway> = match (cfg.data_source, &cfg.bridge) {
        (DataSource::Bridge, Some(bridge)) => {
            let client = BridgeClient::new(bridge.base_url.clone(), &bridge.api_key, cfg.bridge_timeout)?;
            match client.health().await {
                Ok(health) if health.mt5_initialized => {
                    info!(url = %bridge.base_url, status = %health.status, "Bridge healthy")
                }
                Ok(health) => {
                    warn!(url = %bridge.base_url, status = %health.status, "Bridge up but terminal not initialized")
                }
                Err(e) => warn!(url = %bridge.base_url, "Bridge health check failed: {e}"),
            }
            Arc::new(client)
        }
        (DataSource::Bridge, None) => bail!("bridge data source selected without bridge settings"),
        (DataSource::Paper, _) => {
            info!("Paper data source, using synthetic series");
            Arc::new(PaperGateway::synthetic())
        }
    };
    let gateway = Arc::new(ThrottledGateway::new(
        source,
        cfg.bridge_max_concurrency,
        cfg.bridge_timeout,
    ));

    // ── Explanations ──────────────────────────────────────────────────────────
    let explainer = match &cfg.gemini_api_key {
        Some(key) => {
            info!(model = %cfg.gemini_model, "AI explanations enabled");
            let client = GeminiClient::new(key.as_str(), cfg.gemini_model.as_str())?;
            ExplanationGenerator::new(Arc::new(client), cfg.explanation_timeout)
        }
        None => {
            info!("GEMINI_API_KEY not set, using fallback explanations only");
            ExplanationGenerator::fallback_only()
        }
    };

    // ── Sink ──────────────────────────────────────────────────────────────────
    let (sink, mut records) = ChannelSink::channel(128);
    tokio::spawn(async move {
        let log = LogSink;
        while let Some(record) = records.recv().await {
            if let Err(e) = log.emit(&record).await {
                warn!(id = %record.id, "Failed to log signal: {e}");
            }
        }
    });

    // ── Orchestrator ──────────────────────────────────────────────────────────
    let orchestrator = Arc::new(SignalOrchestrator::new(
        gateway,
        SymbolResolver::new(aliases, cfg.min_bars),
        pipeline,
        explainer,
        Arc::new(sink),
        RunSettings::from_config(&cfg),
    ));

    let scheduler = tokio::spawn(schedule(
        orchestrator.clone(),
        cfg.instruments.clone(),
        cfg.run_interval,
    ));

    let settings = orchestrator.settings();
    info!(
        interval_secs = cfg.run_interval.as_secs(),
        workers = settings.batch_workers,
        delay_ms = settings.inter_instrument_delay.as_millis() as u64,
        "Scheduler started. Waiting for shutdown signal."
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting.");
    scheduler.abort();
    Ok(())
}

/// One batch right away, then one per interval. A batch that overruns the
/// interval delays the next tick instead of stacking.
async fn schedule(orchestrator: Arc<SignalOrchestrator>, instruments: Vec<String>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let outcomes = orchestrator.run_batch(&instruments, Trigger::Scheduled).await;
        let emitted = outcomes.iter().filter(|o| o.is_emitted()).count();
        info!(emitted, not_emitted = outcomes.len() - emitted, "Scheduled batch complete");
        match serde_json::to_string(&orchestrator.snapshot()) {
            Ok(status) => debug!(status = %status, "Instrument status"),
            Err(e) => warn!("Failed to serialize instrument status: {e}"),
        }
    }
}
