//! Open position held by the simulated portfolio.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{Direction, ExitReason};

/// An open position.
///
/// Invariants: `size > 0`; for LONG `stop_loss < entry_price < take_profit`,
/// for SHORT the inequalities invert. The stop may move toward the target
/// (trailing) but never away from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,

    /// Fill price including entry slippage
    pub entry_price: Decimal,

    /// Last marked price
    pub current_price: Decimal,

    /// Size in base units
    pub size: Decimal,

    /// Active stop (moves with the trailing stop)
    pub stop_loss: Decimal,

    pub take_profit: Decimal,

    /// Stop at entry; defines 1R
    pub initial_stop: Decimal,

    /// Last trailing stop level, once trailing has activated
    #[serde(default)]
    pub trailing_stop: Option<Decimal>,

    pub entry_time: DateTime<Utc>,

    /// Unrealized P&L in quote currency
    pub pnl: Decimal,

    /// Unrealized P&L as a percentage of entry notional
    pub pnl_percent: Decimal,

    pub strategy_tag: String,

    /// Commission paid on entry, settled at close
    #[serde(default)]
    pub entry_fees: Decimal,
}

impl Position {
    /// Open a new position at `entry_price` with zero P&L.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        symbol: String,
        direction: Direction,
        entry_price: Decimal,
        size: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        strategy_tag: String,
        entry_fees: Decimal,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            symbol,
            direction,
            entry_price,
            current_price: entry_price,
            size,
            stop_loss,
            take_profit,
            initial_stop: stop_loss,
            trailing_stop: None,
            entry_time,
            pnl: Decimal::ZERO,
            pnl_percent: Decimal::ZERO,
            strategy_tag,
            entry_fees,
        }
    }

    /// P&L if the position were closed at `price`, before fees.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.size * self.direction.sign()
    }

    /// Mark the position to `price` and recompute P&L.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.pnl = self.pnl_at(price);

        let cost_basis = self.entry_price * self.size;
        self.pnl_percent = if cost_basis.is_zero() {
            Decimal::ZERO
        } else {
            self.pnl / cost_basis * dec!(100)
        };
    }

    /// Entry notional.
    pub fn cost_basis(&self) -> Decimal {
        self.entry_price * self.size
    }

    /// Notional at the last marked price.
    pub fn market_value(&self) -> Decimal {
        self.current_price * self.size
    }

    /// Initial risk per unit (1R).
    pub fn risk_per_unit(&self) -> Decimal {
        (self.entry_price - self.initial_stop).abs()
    }

    /// Favourable move per unit at `price` (negative when under water).
    pub fn favorable_move(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.direction.sign()
    }

    /// Stop or target hit at `price`, stop taking precedence.
    pub fn exit_trigger(&self, price: Decimal) -> Option<ExitReason> {
        match self.direction {
            Direction::Long => {
                if price <= self.stop_loss {
                    Some(ExitReason::StopLoss)
                } else if price >= self.take_profit {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
            Direction::Short => {
                if price >= self.stop_loss {
                    Some(ExitReason::StopLoss)
                } else if price <= self.take_profit {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(direction: Direction) -> Position {
        let (stop, target) = match direction {
            Direction::Long => (dec!(98), dec!(104)),
            Direction::Short => (dec!(102), dec!(96)),
        };
        Position::new(
            "p1".to_string(),
            "BTC/USDT".to_string(),
            direction,
            dec!(100),
            dec!(10),
            stop,
            target,
            "test".to_string(),
            Decimal::ZERO,
            Utc::now(),
        )
    }

    #[test]
    fn test_long_pnl() {
        let mut pos = position(Direction::Long);
        pos.update_price(dec!(103));
        assert_eq!(pos.pnl, dec!(30));
        assert_eq!(pos.pnl_percent, dec!(3));
        assert_eq!(pos.market_value(), dec!(1030));
    }

    #[test]
    fn test_short_pnl() {
        let mut pos = position(Direction::Short);
        pos.update_price(dec!(103));
        assert_eq!(pos.pnl, dec!(-30));
        assert_eq!(pos.pnl_percent, dec!(-3));
    }

    #[test]
    fn test_exit_triggers() {
        let long = position(Direction::Long);
        assert_eq!(long.exit_trigger(dec!(97.5)), Some(ExitReason::StopLoss));
        assert_eq!(long.exit_trigger(dec!(104)), Some(ExitReason::TakeProfit));
        assert_eq!(long.exit_trigger(dec!(101)), None);

        let short = position(Direction::Short);
        assert_eq!(short.exit_trigger(dec!(102)), Some(ExitReason::StopLoss));
        assert_eq!(short.exit_trigger(dec!(95)), Some(ExitReason::TakeProfit));
        assert_eq!(short.exit_trigger(dec!(99)), None);
    }

    #[test]
    fn test_risk_per_unit_uses_initial_stop() {
        let mut pos = position(Direction::Long);
        pos.stop_loss = dec!(101);
        assert_eq!(pos.risk_per_unit(), dec!(2));
        assert_eq!(pos.favorable_move(dec!(104)), dec!(4));
    }
}
