//! Portfolio ledger: capital, open positions, closed-trade history and drawdown.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    ClosedTrade, Direction, ExitReason, PortfolioSnapshot, PortfolioStats, Position,
};

/// Errors raised by ledger mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// Parameters for opening a position.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: String,
    pub direction: Direction,

    /// Fill price after slippage
    pub entry_price: Decimal,

    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub strategy_tag: String,

    /// Entry commission, settled when the position closes
    pub entry_fees: Decimal,
}

/// Owner of capital and positions.
///
/// `equity = capital + Σ open pnl` at all times; capital only moves when a
/// position closes.
#[derive(Debug, Clone)]
pub struct PortfolioLedger {
    initial_capital: Decimal,
    capital: Decimal,
    positions: HashMap<String, Position>,
    closed_trades: Vec<ClosedTrade>,
    peak_equity: Decimal,
    current_drawdown: Decimal,
    stats: PortfolioStats,
}

impl PortfolioLedger {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            capital: initial_capital,
            positions: HashMap::new(),
            closed_trades: Vec::new(),
            peak_equity: initial_capital,
            current_drawdown: Decimal::ZERO,
            stats: PortfolioStats::default(),
        }
    }

    // ==================== Position Lifecycle ====================

    /// Open a position at its entry price with zero P&L.
    pub fn open(&mut self, request: OpenRequest, now: DateTime<Utc>) -> Result<Position, LedgerError> {
        if request.size <= Decimal::ZERO {
            return Err(LedgerError::InvalidPosition(format!(
                "size must be positive, got {}",
                request.size
            )));
        }

        let ordered = match request.direction {
            Direction::Long => {
                request.stop_loss < request.entry_price && request.entry_price < request.take_profit
            }
            Direction::Short => {
                request.take_profit < request.entry_price && request.entry_price < request.stop_loss
            }
        };
        if !ordered {
            return Err(LedgerError::InvalidPosition(format!(
                "{} levels out of order: stop {} / entry {} / target {}",
                request.direction, request.stop_loss, request.entry_price, request.take_profit
            )));
        }

        let position = Position::new(
            Uuid::new_v4().to_string(),
            request.symbol,
            request.direction,
            request.entry_price,
            request.size,
            request.stop_loss,
            request.take_profit,
            request.strategy_tag,
            request.entry_fees,
            now,
        );

        info!(
            id = %position.id,
            symbol = %position.symbol,
            direction = %position.direction,
            size = %position.size,
            entry = %position.entry_price,
            "Position opened"
        );

        self.positions.insert(position.id.clone(), position.clone());
        Ok(position)
    }

    /// Mark one position to `price`.
    pub fn update_price(&mut self, id: &str, price: Decimal) -> Result<(), LedgerError> {
        let position = self
            .positions
            .get_mut(id)
            .ok_or_else(|| LedgerError::PositionNotFound(id.to_string()))?;
        position.update_price(price);
        self.update_drawdown();
        Ok(())
    }

    /// Mark every position on `symbol` to `price`; returns how many were updated.
    pub fn mark_symbol(&mut self, symbol: &str, price: Decimal) -> usize {
        let mut updated = 0;
        for position in self.positions.values_mut().filter(|p| p.symbol == symbol) {
            position.update_price(price);
            updated += 1;
        }
        if updated > 0 {
            self.update_drawdown();
        }
        updated
    }

    /// Move a position's stop toward its target. Looser stops are ignored.
    ///
    /// Returns whether the stop changed.
    pub fn tighten_stop(&mut self, id: &str, new_stop: Decimal) -> Result<bool, LedgerError> {
        let position = self
            .positions
            .get_mut(id)
            .ok_or_else(|| LedgerError::PositionNotFound(id.to_string()))?;

        let tighter = match position.direction {
            Direction::Long => new_stop > position.stop_loss && new_stop < position.take_profit,
            Direction::Short => new_stop < position.stop_loss && new_stop > position.take_profit,
        };
        if tighter {
            debug!(id = %id, from = %position.stop_loss, to = %new_stop, "Trailing stop moved");
            position.stop_loss = new_stop;
            position.trailing_stop = Some(new_stop);
        }
        Ok(tighter)
    }

    /// Close a position at `exit_price`, settling entry and exit fees.
    pub fn close(
        &mut self,
        id: &str,
        exit_price: Decimal,
        exit_fees: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<ClosedTrade, LedgerError> {
        let mut position = self
            .positions
            .remove(id)
            .ok_or_else(|| LedgerError::PositionNotFound(id.to_string()))?;
        position.update_price(exit_price);

        let gross_pnl = position.pnl_at(exit_price);
        let fees = position.entry_fees + exit_fees;
        let net_pnl = gross_pnl - fees;
        let cost_basis = position.cost_basis();
        let pnl_percent = if cost_basis.is_zero() {
            Decimal::ZERO
        } else {
            net_pnl / cost_basis * dec!(100)
        };

        self.capital += net_pnl;

        let trade = ClosedTrade {
            id: position.id,
            symbol: position.symbol,
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            gross_pnl,
            fees,
            net_pnl,
            pnl_percent,
            entry_time: position.entry_time,
            exit_time: now,
            exit_reason: reason,
            strategy_tag: position.strategy_tag,
        };

        info!(
            id = %trade.id,
            symbol = %trade.symbol,
            reason = %reason,
            exit = %exit_price,
            net_pnl = %net_pnl,
            "Position closed"
        );

        self.stats.record(&trade);
        self.closed_trades.push(trade.clone());
        self.update_drawdown();

        Ok(trade)
    }

    /// Positions on `symbol` whose stop or target is hit at `price`.
    ///
    /// Each position is evaluated independently; nothing is mutated.
    pub fn check_stops(&self, symbol: &str, price: Decimal) -> Vec<(String, ExitReason)> {
        let mut hits: Vec<(String, ExitReason)> = self
            .positions
            .values()
            .filter(|p| p.symbol == symbol)
            .filter_map(|p| p.exit_trigger(price).map(|reason| (p.id.clone(), reason)))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        hits
    }

    fn update_drawdown(&mut self) {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        self.current_drawdown = if self.peak_equity > Decimal::ZERO {
            ((self.peak_equity - equity) / self.peak_equity).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        self.stats
            .observe_drawdown(self.current_drawdown.to_f64().unwrap_or(0.0));
    }

    // ==================== Queries ====================

    pub fn capital(&self) -> Decimal {
        self.capital
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    /// Sum of unrealized P&L.
    pub fn open_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.pnl).sum()
    }

    pub fn equity(&self) -> Decimal {
        self.capital + self.open_pnl()
    }

    /// Notional of open positions at their last marked price.
    pub fn open_notional(&self) -> Decimal {
        self.positions.values().map(|p| p.market_value()).sum()
    }

    /// Open notional as a fraction of capital.
    pub fn exposure(&self) -> Decimal {
        if self.capital <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.open_notional() / self.capital
    }

    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    /// Current drawdown from peak equity (0.0 to 1.0).
    pub fn current_drawdown(&self) -> Decimal {
        self.current_drawdown
    }

    pub fn position(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Open positions, oldest first.
    pub fn positions(&self) -> Vec<&Position> {
        let mut positions: Vec<&Position> = self.positions.values().collect();
        positions.sort_by(|a, b| a.entry_time.cmp(&b.entry_time).then_with(|| a.id.cmp(&b.id)));
        positions
    }

    pub fn positions_for(&self, symbol: &str) -> Vec<&Position> {
        self.positions()
            .into_iter()
            .filter(|p| p.symbol == symbol)
            .collect()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.values().any(|p| p.symbol == symbol)
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed_trades
    }

    /// The last `limit` closed trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Vec<&ClosedTrade> {
        self.closed_trades.iter().rev().take(limit).collect()
    }

    pub fn stats(&self) -> &PortfolioStats {
        &self.stats
    }

    /// Copy of the current state for subscribers.
    pub fn snapshot(&self, now: DateTime<Utc>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp: now,
            capital: self.capital,
            equity: self.equity(),
            open_pnl: self.open_pnl(),
            open_positions: self.positions().into_iter().cloned().collect(),
            exposure_percent: self.exposure() * dec!(100),
            drawdown_percent: self.current_drawdown * dec!(100),
            stats: self.stats.clone(),
        }
    }
}
