pub mod bridge;
pub mod config;
pub mod orchestrator;
pub mod pipeline;
pub mod resolver;
pub mod sink;
pub mod throttle;

pub use bridge::{BridgeClient, BridgeHealth};
pub use config::AnalysisConfig;
pub use orchestrator::{
    FailureKind, InstrumentStatus, RunOutcome, RunSettings, RunState, SignalOrchestrator, Trigger,
};
pub use pipeline::{Assessment, SignalPipeline};
pub use resolver::{AliasTable, Resolved, SymbolResolver};
pub use sink::{ChannelSink, LogSink};
pub use throttle::ThrottledGateway;
