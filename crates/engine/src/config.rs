use serde::Deserialize;

use common::{Error, Result};
use risk::DecisionPolicy;
use strategy::{IndicatorParams, ScoringRules};

/// Analysis tuning file (TOML). Every table and field is optional.
///
/// Example `config/analysis.toml`:
/// ```toml
/// [indicators]
/// rsi_period = 14
///
/// [scoring]
/// trend_weight = 30
///
/// [decision]
/// buy_threshold = 35
/// sell_threshold = -35
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub indicators: IndicatorParams,
    pub scoring: ScoringRules,
    pub decision: DecisionPolicy,
}

impl AnalysisConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read analysis config at '{path}': {e}"))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("Invalid analysis config at '{path}': {e}")))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.indicators.validate()?;
        self.scoring.validate()?;
        self.decision.validate()
    }
}
