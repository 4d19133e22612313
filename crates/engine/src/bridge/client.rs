use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use common::{Bar, BarRequest, Error, GatewayError, MarketDataGateway, Result, Timeframe};

const API_KEY_HEADER: &str = "X-API-Key";

/// REST client for the market data bridge in front of the broker terminal.
pub struct BridgeClient {
    base_url: Url,
    api_key: String,
    http: Client,
}

impl BridgeClient {
    /// `timeout` bounds every request end to end.
    pub fn new(base_url: Url, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// Bridge liveness. Used at startup for a warning only.
    pub async fn health(&self) -> Result<BridgeHealth> {
        let resp = self
            .http
            .get(self.endpoint("health"))
            .send()
            .await
            .map_err(|e| match transport_error(&e) {
                GatewayError::Timeout => Error::BridgeTimeout,
                other => Error::BridgeUnreachable(other.to_string()),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::BridgeUnreachable(format!("HTTP {status}: {body}")));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MarketDataGateway for BridgeClient {
    async fn fetch_bars(&self, request: &BarRequest) -> std::result::Result<Vec<Bar>, GatewayError> {
        let payload = RatesRequest {
            symbol: &request.symbol,
            timeframe: request.timeframe,
            count: request.count,
        };

        debug!(symbol = %request.symbol, timeframe = %request.timeframe, count = request.count, "Requesting bars from bridge");
        let resp = self
            .http
            .post(self.endpoint("bridge/rates"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport_error(&e))?;
        if !status.is_success() {
            return Err(classify_status(status, &body, &request.symbol));
        }

        let parsed: RatesResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Malformed(format!("rates body: {e}")))?;
        let bars = parsed
            .rates
            .into_iter()
            .map(RateRow::into_bar)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(normalize(&request.symbol, bars))
    }
}

fn transport_error(e: &reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unreachable(e.to_string())
    }
}

/// Map a non-2xx bridge answer to a gateway error.
fn classify_status(status: StatusCode, body: &str, symbol: &str) -> GatewayError {
    let detail = body.to_lowercase();
    if detail.contains("not initialized") {
        return GatewayError::Unreachable(format!("terminal not initialized (HTTP {status})"));
    }
    if detail.contains("select symbol") {
        return GatewayError::SymbolNotFound(symbol.to_string());
    }
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
            GatewayError::SymbolNotFound(symbol.to_string())
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::Unreachable(format!("bridge rejected the API key (HTTP {status})"))
        }
        _ => GatewayError::Unreachable(format!("HTTP {status}: {body}")),
    }
}

/// Sort by time and drop repeated timestamps, keeping the first occurrence.
fn normalize(symbol: &str, mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    let before = bars.len();
    bars.dedup_by_key(|b| b.timestamp);
    if bars.len() < before {
        warn!(
            symbol = %symbol,
            dropped = before - bars.len(),
            "Bridge returned duplicate bar timestamps"
        );
    }
    bars
}

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RatesRequest<'a> {
    symbol: &'a str,
    timeframe: Timeframe,
    count: usize,
}

#[derive(Deserialize)]
struct RatesResponse {
    #[serde(default)]
    rates: Vec<RateRow>,
}

#[derive(Deserialize)]
struct RateRow {
    time: BarTime,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    tick_volume: f64,
    #[serde(default)]
    real_volume: f64,
}

impl RateRow {
    fn into_bar(self) -> std::result::Result<Bar, GatewayError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) || self.high < self.low {
            return Err(GatewayError::Malformed(format!(
                "inconsistent prices o={} h={} l={} c={}",
                self.open, self.high, self.low, self.close
            )));
        }
        Ok(Bar {
            timestamp: self.time.to_utc()?,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: if self.real_volume > 0.0 {
                self.real_volume
            } else {
                self.tick_volume
            },
        })
    }
}

/// The bridge serializes the terminal's local time as naive ISO-8601; unix
/// seconds are accepted too. Naive values are taken as UTC.
#[derive(Deserialize)]
#[serde(untagged)]
enum BarTime {
    Unix(i64),
    Text(String),
}

impl BarTime {
    fn to_utc(&self) -> std::result::Result<DateTime<Utc>, GatewayError> {
        let parsed = match self {
            BarTime::Unix(secs) => Utc.timestamp_opt(*secs, 0).single(),
            BarTime::Text(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                        .iter()
                        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                        .map(|naive| Utc.from_utc_datetime(&naive))
                }),
        };
        parsed.ok_or_else(|| GatewayError::Malformed("unparseable bar time".into()))
    }
}

/// `GET /health` answer.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeHealth {
    pub status: String,
    #[serde(default)]
    pub mt5_initialized: bool,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
