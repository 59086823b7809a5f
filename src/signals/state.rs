//! Per-symbol engagement state.

use std::fmt;

use serde::Serialize;

use crate::models::Signal;

/// Where a symbol is in its entry/exit cycle.
#[derive(Debug, Clone)]
pub enum SymbolState {
    /// Looking for a qualifying signal
    Scanning,

    /// Waiting for the signal to confirm
    Armed {
        signal: Signal,

        /// New bars seen since arming
        bars_waited: u32,
    },

    /// A position is open for this symbol
    InPosition { position_id: String },

    /// Cycles left before scanning resumes
    Cooldown { remaining: u32 },
}

impl SymbolState {
    pub fn phase(&self) -> Phase {
        match self {
            SymbolState::Scanning => Phase::Scanning,
            SymbolState::Armed { .. } => Phase::Armed,
            SymbolState::InPosition { .. } => Phase::InPosition,
            SymbolState::Cooldown { .. } => Phase::Cooldown,
        }
    }

    pub fn armed_signal(&self) -> Option<&Signal> {
        match self {
            SymbolState::Armed { signal, .. } => Some(signal),
            _ => None,
        }
    }

    pub fn position_id(&self) -> Option<&str> {
        match self {
            SymbolState::InPosition { position_id } => Some(position_id),
            _ => None,
        }
    }
}

impl Default for SymbolState {
    fn default() -> Self {
        SymbolState::Scanning
    }
}

/// Payload-free view of [`SymbolState`] for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Scanning,
    Armed,
    InPosition,
    Cooldown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Scanning => "SCANNING",
            Phase::Armed => "ARMED",
            Phase::InPosition => "IN_POSITION",
            Phase::Cooldown => "COOLDOWN",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
