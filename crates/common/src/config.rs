use std::time::Duration;

use url::Url;

use crate::{DataSource, Error, Result, Timeframe};

const DEFAULT_INSTRUMENTS: &str = "EURUSD,GBPUSD,USDJPY,AUDUSD,USDCAD";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Connection settings for the remote data bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub base_url: Url,
    pub api_key: String,
}

/// All configuration loaded from environment variables at startup.
/// Any invalid or missing required value is a configuration error; nothing
/// runs until the whole config has been validated.
#[derive(Debug, Clone)]
pub struct Config {
    // Market data
    pub data_source: DataSource,
    /// `Some` whenever `data_source` is `Bridge`.
    pub bridge: Option<BridgeSettings>,
    pub bridge_timeout: Duration,
    pub bridge_max_concurrency: usize,

    // Explanation service
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub explanation_timeout: Duration,

    // Run policy
    pub instruments: Vec<String>,
    pub timeframe: Timeframe,
    pub bar_count: usize,
    pub min_bars: usize,
    pub run_interval: Duration,
    pub inter_instrument_delay: Duration,
    pub batch_workers: usize,
    pub signal_ttl_hours: i64,

    // Optional TOML files
    pub alias_table_path: Option<String>,
    pub analysis_config_path: Option<String>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let data_source = match env
            .optional("DATA_SOURCE")
            .unwrap_or_else(|| "bridge".to_string())
            .to_lowercase()
            .as_str()
        {
            "bridge" => DataSource::Bridge,
            "paper" => DataSource::Paper,
            other => {
                return Err(Error::Config(format!(
                    "DATA_SOURCE must be 'bridge' or 'paper', got: '{other}'"
                )))
            }
        };

        let bridge = match data_source {
            DataSource::Bridge => {
                let raw = env.required("BRIDGE_BASE_URL")?;
                let base_url = Url::parse(raw.trim_end_matches('/')).map_err(|e| {
                    Error::Config(format!("BRIDGE_BASE_URL '{raw}' is not a valid URL: {e}"))
                })?;
                Some(BridgeSettings {
                    base_url,
                    api_key: env.required("BRIDGE_API_KEY")?,
                })
            }
            DataSource::Paper => None,
        };

        let instruments: Vec<String> = env
            .optional("INSTRUMENTS")
            .unwrap_or_else(|| DEFAULT_INSTRUMENTS.to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if instruments.is_empty() {
            return Err(Error::Config("INSTRUMENTS lists no instrument".into()));
        }

        let timeframe = match env.optional("TIMEFRAME") {
            Some(raw) => raw.parse()?,
            None => Timeframe::H1,
        };

        let bar_count = env.parsed("BAR_COUNT", 500usize)?;
        let min_bars = env.parsed("MIN_BARS", 50usize)?;
        if min_bars < 2 {
            return Err(Error::Config("MIN_BARS must be at least 2".into()));
        }
        if bar_count < min_bars {
            return Err(Error::Config(format!(
                "BAR_COUNT ({bar_count}) must be >= MIN_BARS ({min_bars})"
            )));
        }

        let batch_workers = env.parsed("BATCH_WORKERS", 1usize)?;
        let bridge_max_concurrency = env.parsed("BRIDGE_MAX_CONCURRENCY", 2usize)?;
        if batch_workers == 0 || bridge_max_concurrency == 0 {
            return Err(Error::Config(
                "BATCH_WORKERS and BRIDGE_MAX_CONCURRENCY must be positive".into(),
            ));
        }

        let signal_ttl_hours = env.parsed("SIGNAL_TTL_HOURS", 8i64)?;
        if signal_ttl_hours <= 0 {
            return Err(Error::Config("SIGNAL_TTL_HOURS must be positive".into()));
        }

        let bridge_timeout_secs = env.parsed("BRIDGE_TIMEOUT_SECS", 30u64)?;
        let explanation_timeout_secs = env.parsed("EXPLANATION_TIMEOUT_SECS", 15u64)?;
        let run_interval_secs = env.parsed("RUN_INTERVAL_SECS", 300u64)?;
        for (key, secs) in [
            ("BRIDGE_TIMEOUT_SECS", bridge_timeout_secs),
            ("EXPLANATION_TIMEOUT_SECS", explanation_timeout_secs),
            ("RUN_INTERVAL_SECS", run_interval_secs),
        ] {
            if secs == 0 {
                return Err(Error::Config(format!("{key} must be positive")));
            }
        }

        Ok(Config {
            data_source,
            bridge,
            bridge_timeout: Duration::from_secs(bridge_timeout_secs),
            bridge_max_concurrency,
            gemini_api_key: env
                .optional("GEMINI_API_KEY")
                .filter(|key| !key.trim().is_empty()),
            gemini_model: env
                .optional("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            explanation_timeout: Duration::from_secs(explanation_timeout_secs),
            instruments,
            timeframe,
            bar_count,
            min_bars,
            run_interval: Duration::from_secs(run_interval_secs),
            inter_instrument_delay: Duration::from_millis(
                env.parsed("INTER_INSTRUMENT_DELAY_MS", 500u64)?,
            ),
            batch_workers,
            signal_ttl_hours,
            alias_table_path: env.optional("ALIAS_TABLE_PATH"),
            analysis_config_path: env.optional("ANALYSIS_CONFIG_PATH"),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String> {
        self.optional(key).ok_or_else(|| {
            Error::Config(format!(
                "Required environment variable '{key}' is not set. Check your .env file."
            ))
        })
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
            None => Ok(default),
        }
    }
}
