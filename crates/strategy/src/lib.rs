pub mod config;
pub mod indicators;
pub mod levels;
pub mod scoring;

pub use config::{IndicatorParams, ScoringRules};
pub use indicators::IndicatorEngine;
pub use levels::support_resistance;
pub use scoring::ScoringEngine;
