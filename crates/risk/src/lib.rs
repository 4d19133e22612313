pub mod decision;

pub use decision::{DecisionEngine, DecisionPolicy, DEFAULT_SIGNAL_TTL_HOURS};
