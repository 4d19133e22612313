pub mod synthetic;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use common::{Bar, BarRequest, GatewayError, MarketDataGateway};

/// What the paper gateway answers for one alias.
#[derive(Debug, Clone)]
pub enum Script {
    Bars(Vec<Bar>),
    Fail(GatewayError),
}

/// In-memory market data gateway.
///
/// Answers from per-alias scripts, falling back to a deterministic synthetic
/// series (or `SymbolNotFound`) for aliases with no script. Every request is
/// recorded so callers can check which aliases were probed and in what order.
pub struct PaperGateway {
    scripts: RwLock<HashMap<String, Script>>,
    calls: Mutex<Vec<BarRequest>>,
    latency: Option<Duration>,
    synthesize_unknown: bool,
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperGateway {
    /// Gateway that knows no symbols until scripted.
    pub fn new() -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: None,
            synthesize_unknown: false,
        }
    }

    /// Gateway that serves a synthetic wave series for any symbol.
    pub fn synthetic() -> Self {
        info!("PaperGateway initialized with synthetic series");
        Self {
            synthesize_unknown: true,
            ..Self::new()
        }
    }

    pub fn with_series(mut self, alias: &str, bars: Vec<Bar>) -> Self {
        self.scripts
            .get_mut()
            .insert(alias.to_string(), Script::Bars(bars));
        self
    }

    pub fn with_failure(mut self, alias: &str, error: GatewayError) -> Self {
        self.scripts
            .get_mut()
            .insert(alias.to_string(), Script::Fail(error));
        self
    }

    /// Delay applied to every fetch before it answers.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn set_script(&self, alias: &str, script: Script) {
        self.scripts.write().await.insert(alias.to_string(), script);
    }

    /// Symbols requested so far, oldest first.
    pub async fn requested_symbols(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|r| r.symbol.clone())
            .collect()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl MarketDataGateway for PaperGateway {
    async fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<Bar>, GatewayError> {
        self.calls.lock().await.push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let script = self.scripts.read().await.get(&request.symbol).cloned();
        let bars = match script {
            Some(Script::Bars(bars)) => bars,
            Some(Script::Fail(error)) => return Err(error),
            None if self.synthesize_unknown => {
                synthetic::wave(&request.symbol, request.count, request.timeframe)
            }
            None => return Err(GatewayError::SymbolNotFound(request.symbol.clone())),
        };

        // Most recent `count` bars, like the bridge.
        let skip = bars.len().saturating_sub(request.count);
        let bars: Vec<Bar> = bars.into_iter().skip(skip).collect();
        debug!(
            symbol = %request.symbol,
            timeframe = %request.timeframe,
            bars = bars.len(),
            "Paper bars served"
        );
        Ok(bars)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
