use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::{debug, info};

use common::{
    AliasAttempt, AttemptFailure, Bar, BarRequest, Error, MarketDataGateway, Result, Timeframe,
};

const FOREX_PAIRS: [&str; 17] = [
    "EURUSD", "GBPUSD", "USDJPY", "USDCHF", "AUDUSD", "USDCAD", "NZDUSD", "EURGBP", "EURJPY",
    "EURCHF", "EURAUD", "GBPJPY", "GBPCHF", "AUDCAD", "AUDJPY", "CADJPY", "CHFJPY",
];

/// Broker suffixes tried after the bare forex code.
const FOREX_SUFFIXES: [&str; 4] = ["m", ".", ".raw", "#"];

const METALS_AND_INDICES: [(&str, &[&str]); 8] = [
    ("XAUUSD", &["XAUUSD", "XAUUSDm", "XAUUSD.", "GOLD", "GOLDm", "GOLD.", "Au"]),
    ("XAGUSD", &["XAGUSD", "XAGUSDm", "XAGUSD.", "SILVER", "SILVERm", "SILVER.", "Ag"]),
    ("US500", &["US500", "US500m", "US500.", "SPX500", "SP500", "S&P500"]),
    ("US30", &["US30", "US30m", "US30.", "DJI30", "DJ30", "DJIA", "YM"]),
    ("NAS100", &["NAS100", "NAS100m", "NAS100.", "NASDAQ", "NDX", "NQ"]),
    ("GER30", &["GER30", "GER30m", "GER30.", "DAX30", "DAX", "DE30"]),
    ("UK100", &["UK100", "UK100m", "UK100.", "FTSE", "UKX"]),
    ("JPN225", &["JPN225", "JPN225m", "JPN225.", "NIKKEI", "N225", "NI225"]),
];

/// Canonical instrument code → broker aliases, in the order they are tried.
///
/// Example `config/aliases.toml`:
/// ```toml
/// [aliases]
/// EURUSD = ["EURUSD", "EURUSDm", "EURUSD.raw"]
/// XAUUSD = ["XAUUSD", "GOLD"]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AliasTable {
    entries: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AliasFile {
    aliases: HashMap<String, Vec<String>>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AliasTable {
    /// Common broker spellings for forex majors/minors, metals and indices.
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        for pair in FOREX_PAIRS {
            let mut aliases = vec![pair.to_string()];
            aliases.extend(FOREX_SUFFIXES.iter().map(|s| format!("{pair}{s}")));
            entries.insert(pair.to_string(), aliases);
        }
        for (code, aliases) in METALS_AND_INDICES {
            entries.insert(
                code.to_string(),
                aliases.iter().map(|a| a.to_string()).collect(),
            );
        }
        Self { entries }
    }

    /// Build and validate a table from explicit entries.
    pub fn from_entries<I, K, V>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| {
                (
                    k.into().trim().to_uppercase(),
                    v.into_iter().map(Into::into).collect(),
                )
            })
            .collect();
        let table = Self { entries };
        table.validate()?;
        Ok(table)
    }

    /// Load from a TOML file. The file replaces the built-in table.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read alias table at '{path}': {e}"))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("Invalid alias table at '{path}': {e}")))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: AliasFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        Self::from_entries(file.aliases)
    }

    fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::Config("alias table has no entries".into()));
        }
        for (code, aliases) in &self.entries {
            if code.is_empty() {
                return Err(Error::Config("alias table has a blank instrument code".into()));
            }
            if aliases.is_empty() {
                return Err(Error::Config(format!("{code}: empty alias list")));
            }
            let mut seen = HashSet::new();
            for alias in aliases {
                if alias.trim().is_empty() {
                    return Err(Error::Config(format!("{code}: blank alias")));
                }
                if !seen.insert(alias.as_str()) {
                    return Err(Error::Config(format!("{code}: duplicate alias '{alias}'")));
                }
            }
        }
        Ok(())
    }

    /// Aliases for `canonical`; an unknown code is tried as-is.
    pub fn aliases_for(&self, canonical: &str) -> Vec<String> {
        let key = canonical.trim().to_uppercase();
        match self.entries.get(&key) {
            Some(aliases) => aliases.clone(),
            None => vec![canonical.trim().to_string()],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A canonical code resolved to the alias that produced data.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub alias: String,
    pub bars: Vec<Bar>,
}

/// Finds the first broker alias of an instrument that yields enough history.
#[derive(Debug, Clone)]
pub struct SymbolResolver {
    table: AliasTable,
    min_bars: usize,
}

impl SymbolResolver {
    pub fn new(table: AliasTable, min_bars: usize) -> Self {
        Self { table, min_bars }
    }

    pub fn table(&self) -> &AliasTable {
        &self.table
    }

    /// Probe aliases in table order, stopping at the first success.
    pub async fn resolve(
        &self,
        gateway: &dyn MarketDataGateway,
        canonical: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Resolved> {
        let mut attempts = Vec::new();

        for alias in self.table.aliases_for(canonical) {
            let request = BarRequest::new(alias.clone(), timeframe, count);
            let failure = match gateway.fetch_bars(&request).await {
                Ok(bars) if bars.len() >= self.min_bars => {
                    info!(instrument = %canonical, alias = %alias, bars = bars.len(), "Symbol resolved");
                    return Ok(Resolved { alias, bars });
                }
                Ok(bars) => AttemptFailure::TooFewBars {
                    available: bars.len(),
                    required: self.min_bars,
                },
                Err(error) => AttemptFailure::Gateway { error },
            };
            debug!(instrument = %canonical, alias = %alias, reason = %failure, "Alias rejected");
            attempts.push(AliasAttempt { alias, failure });
        }

        Err(Error::SymbolUnresolved {
            instrument: canonical.to_string(),
            attempts,
        })
    }
}
