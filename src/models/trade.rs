//! Closed trade records appended to the portfolio history.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Manual,
    /// Closed by a close-all sweep (shutdown or end of replay)
    CloseAll,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Manual => "manual",
            ExitReason::CloseAll => "close_all",
        }
    }

    /// Exits that fill at a worse price than the trigger.
    pub fn takes_slippage(&self) -> bool {
        !matches!(self, ExitReason::TakeProfit)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a completed round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Id of the position that was closed
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,

    /// P&L before fees
    pub gross_pnl: Decimal,

    /// Entry plus exit commission
    pub fees: Decimal,

    pub net_pnl: Decimal,

    /// net_pnl / entry notional × 100
    pub pnl_percent: Decimal,

    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub exit_reason: ExitReason,
    pub strategy_tag: String,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.net_pnl > Decimal::ZERO
    }

    pub fn holding_hours(&self) -> f64 {
        (self.exit_time - self.entry_time).num_seconds() as f64 / 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_names() {
        assert_eq!(ExitReason::StopLoss.to_string(), "stop_loss");
        assert_eq!(
            serde_json::to_value(ExitReason::TakeProfit).unwrap(),
            "take_profit"
        );
        assert!(ExitReason::StopLoss.takes_slippage());
        assert!(ExitReason::Manual.takes_slippage());
        assert!(!ExitReason::TakeProfit.takes_slippage());
    }
}
