use serde::Serialize;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::ScoreComponent;

/// Why a single alias did not resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptFailure {
    Gateway { error: GatewayError },
    TooFewBars { available: usize, required: usize },
}

impl AttemptFailure {
    /// True when the bridge itself could not be reached for this alias.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AttemptFailure::Gateway {
                error: GatewayError::Unreachable(_) | GatewayError::Timeout
            }
        )
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Gateway { error } => write!(f, "{error}"),
            AttemptFailure::TooFewBars {
                available,
                required,
            } => write!(f, "only {available} bars, need {required}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AliasAttempt {
    pub alias: String,
    pub failure: AttemptFailure,
}

impl std::fmt::Display for AliasAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.alias, self.failure)
    }
}

fn describe_attempts(attempts: &[AliasAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("No alias of {instrument} yielded data ({})", describe_attempts(.attempts))]
    SymbolUnresolved {
        instrument: String,
        attempts: Vec<AliasAttempt>,
    },

    #[error("Insufficient history: {available} bars available, {required} required")]
    InsufficientHistory { available: usize, required: usize },

    #[error("Bridge unreachable: {0}")]
    BridgeUnreachable(String),

    #[error("Bridge timed out")]
    BridgeTimeout,

    #[error("Explanation service error: {0}")]
    ExplanationService(String),

    #[error("Score component '{0}' recorded twice")]
    DuplicateComponent(ScoreComponent),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
