use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::{Bar, Result, SignalRecord, Timeframe};

/// A request for the most recent `count` bars of one broker symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub count: usize,
}

impl BarRequest {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, count: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            count,
        }
    }
}

/// Failure modes of a single bar fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GatewayError {
    #[error("bridge unreachable: {0}")]
    Unreachable(String),
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Abstraction over the market data source.
///
/// `BridgeClient` implements this against the remote bridge service.
/// `PaperGateway` implements this for offline runs and tests.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Fetch bars for an exact broker symbol, oldest first.
    async fn fetch_bars(&self, request: &BarRequest) -> std::result::Result<Vec<Bar>, GatewayError>;
}

/// Receives every finished signal. Storage, querying and outcome tracking
/// live behind this trait.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn emit(&self, record: &SignalRecord) -> Result<()>;
}
