//! Signal engine: scoring, multi-timeframe filter and per-symbol state machine.

mod config;
mod engine;
mod mtf;
mod state;

pub use config::{ConfirmationRule, MtfConfig, SignalConfig};
pub use engine::{CycleError, EngineAction, SignalEngine};
pub use mtf::{trend, MtfFilter, MtfOutcome, Trend};
pub use state::{Phase, SymbolState};
