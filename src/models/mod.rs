//! Data models for features, signals, positions, closed trades and snapshots.

mod features;
mod position;
mod signal;
mod snapshot;
mod trade;

pub use features::{to_decimal, FeatureBar, FeatureSet, PatternFlag};
pub use position::Position;
pub use signal::{Confirmation, Direction, Signal, TimeframeAlignment};
pub use snapshot::{PortfolioSnapshot, PortfolioStats};
pub use trade::{ClosedTrade, ExitReason};
