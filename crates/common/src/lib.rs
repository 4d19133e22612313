pub mod config;
pub mod error;
pub mod gateway;
pub mod types;

pub use config::Config;
pub use error::{AliasAttempt, AttemptFailure, Error, Result};
pub use gateway::{BarRequest, GatewayError, MarketDataGateway, SignalSink};
pub use types::*;
