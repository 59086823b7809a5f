//! Aggregate portfolio statistics and point-in-time snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{ClosedTrade, Position};

/// Running statistics over closed trades.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,

    /// Win rate (0.0 to 1.0)
    pub win_rate: f64,

    /// Sum of net P&L over closed trades
    pub total_pnl: Decimal,

    pub gross_profit: Decimal,

    /// Absolute value of summed losses
    pub gross_loss: Decimal,

    pub avg_win: Decimal,

    /// Average loss (absolute value)
    pub avg_loss: Decimal,

    /// Gross profit / gross loss
    pub profit_factor: f64,

    pub best_trade: Decimal,
    pub worst_trade: Decimal,

    /// Largest drawdown ever observed (0.0 to 1.0)
    pub max_drawdown: f64,

    pub total_fees: Decimal,
}

impl PortfolioStats {
    /// Fold one closed trade into the running statistics.
    pub fn record(&mut self, trade: &ClosedTrade) {
        if self.total_trades == 0 {
            self.best_trade = trade.net_pnl;
            self.worst_trade = trade.net_pnl;
        } else {
            self.best_trade = self.best_trade.max(trade.net_pnl);
            self.worst_trade = self.worst_trade.min(trade.net_pnl);
        }

        self.total_trades += 1;
        self.total_pnl += trade.net_pnl;
        self.total_fees += trade.fees;

        if trade.is_win() {
            self.winning_trades += 1;
            self.gross_profit += trade.net_pnl;
        } else {
            self.losing_trades += 1;
            self.gross_loss += trade.net_pnl.abs();
        }

        self.win_rate = self.winning_trades as f64 / self.total_trades as f64;

        if self.winning_trades > 0 {
            self.avg_win = self.gross_profit / Decimal::from(self.winning_trades);
        }
        if self.losing_trades > 0 {
            self.avg_loss = self.gross_loss / Decimal::from(self.losing_trades);
        }

        // Left at zero until the first loss
        if self.gross_loss > Decimal::ZERO {
            self.profit_factor = (self.gross_profit / self.gross_loss).to_f64().unwrap_or(0.0);
        }
    }

    /// Record a drawdown observation.
    pub fn observe_drawdown(&mut self, drawdown: f64) {
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
    }
}

impl std::fmt::Display for PortfolioStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Trades:        {} ({} won / {} lost)",
            self.total_trades, self.winning_trades, self.losing_trades
        )?;
        writeln!(f, "Win Rate:      {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Total P&L:     ${:.2}", self.total_pnl)?;
        writeln!(f, "Avg Win:       ${:.2}", self.avg_win)?;
        writeln!(f, "Avg Loss:      ${:.2}", self.avg_loss)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor)?;
        writeln!(f, "Best / Worst:  ${:.2} / ${:.2}", self.best_trade, self.worst_trade)?;
        writeln!(f, "Max Drawdown:  {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "Fees Paid:     ${:.2}", self.total_fees)?;
        Ok(())
    }
}

/// Immutable view of the ledger handed to subscribers and the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub capital: Decimal,
    pub equity: Decimal,
    pub open_pnl: Decimal,
    pub open_positions: Vec<Position>,

    /// Open notional as a percentage of capital
    pub exposure_percent: Decimal,

    /// Current drawdown from peak equity, in percent
    pub drawdown_percent: Decimal,

    pub stats: PortfolioStats,
}

impl std::fmt::Display for PortfolioSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^50}", " PORTFOLIO ")?;
        writeln!(f, "As of: {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f)?;
        writeln!(f, "Capital:       ${:.2}", self.capital)?;
        writeln!(f, "Equity:        ${:.2}", self.equity)?;
        writeln!(f, "Open P&L:      ${:.2}", self.open_pnl)?;
        writeln!(f, "Exposure:      {:.2}%", self.exposure_percent)?;
        writeln!(f, "Drawdown:      {:.2}%", self.drawdown_percent)?;
        writeln!(f, "Positions:     {}", self.open_positions.len())?;
        for pos in &self.open_positions {
            writeln!(
                f,
                "  {:<12} {:<5} {} @ {} (P&L ${:.2})",
                pos.symbol, pos.direction, pos.size, pos.entry_price, pos.pnl
            )?;
        }
        writeln!(f)?;
        write!(f, "{}", self.stats)?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}

impl PortfolioSnapshot {
    /// Total return relative to `initial_capital`, as a fraction.
    pub fn return_on(&self, initial_capital: Decimal) -> Decimal {
        if initial_capital.is_zero() {
            return Decimal::ZERO;
        }
        (self.equity - initial_capital) / initial_capital
    }

    pub fn return_percent_on(&self, initial_capital: Decimal) -> Decimal {
        self.return_on(initial_capital) * dec!(100)
    }
}
