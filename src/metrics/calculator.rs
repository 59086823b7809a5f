//! Performance statistics over closed trades: return, Sharpe, drawdown, expectancy.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::models::ClosedTrade;

/// Trading days used to annualize per-trade Sharpe.
const PERIODS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    pub initial_capital: Decimal,
    pub final_capital: Decimal,

    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,

    pub total_pnl: Decimal,

    /// Percent of initial capital
    pub total_return: f64,

    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: f64,

    /// Average net P&L per trade
    pub expectancy: Decimal,

    /// Largest peak-to-trough fall of the equity curve (fraction)
    pub max_drawdown: f64,
    pub max_drawdown_amount: Decimal,

    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,

    pub avg_holding_hours: f64,
    pub total_fees: Decimal,
}

impl fmt::Display for PerformanceMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^50}", " PERFORMANCE ")?;
        writeln!(f, "Initial Capital: ${:.2}", self.initial_capital)?;
        writeln!(f, "Final Capital:   ${:.2}", self.final_capital)?;
        writeln!(f, "Total P&L:       ${:.2} ({:+.2}%)", self.total_pnl, self.total_return)?;
        writeln!(f, "{:-^50}", "")?;
        writeln!(
            f,
            "Trades:          {} ({} W / {} L)",
            self.total_trades, self.winning_trades, self.losing_trades
        )?;
        writeln!(f, "Win Rate:        {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Avg Win:         ${:.2}", self.avg_win)?;
        writeln!(f, "Avg Loss:        ${:.2}", self.avg_loss)?;
        writeln!(f, "Profit Factor:   {:.2}", self.profit_factor)?;
        writeln!(f, "Expectancy:      ${:.2}", self.expectancy)?;
        writeln!(f, "{:-^50}", "")?;
        writeln!(
            f,
            "Max Drawdown:    {:.2}% (${:.2})",
            self.max_drawdown * 100.0,
            self.max_drawdown_amount
        )?;
        writeln!(f, "Sharpe Ratio:    {:.2}", self.sharpe_ratio)?;
        writeln!(f, "Sortino Ratio:   {:.2}", self.sortino_ratio)?;
        writeln!(f, "Avg Holding:     {:.1}h", self.avg_holding_hours)?;
        writeln!(f, "Fees Paid:       ${:.2}", self.total_fees)?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}

pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Compute metrics for trades closed in chronological order.
    pub fn calculate(initial_capital: Decimal, trades: &[ClosedTrade]) -> PerformanceMetrics {
        let mut metrics = PerformanceMetrics {
            initial_capital,
            final_capital: initial_capital,
            ..Default::default()
        };

        if trades.is_empty() {
            return metrics;
        }

        let pnls: Vec<Decimal> = trades.iter().map(|t| t.net_pnl).collect();
        let (wins, losses): (Vec<Decimal>, Vec<Decimal>) = pnls.iter().partition(|&&p| p > Decimal::ZERO);

        metrics.total_trades = trades.len() as u32;
        metrics.winning_trades = wins.len() as u32;
        metrics.losing_trades = losses.len() as u32;
        metrics.win_rate = wins.len() as f64 / trades.len() as f64;
        metrics.total_pnl = pnls.iter().copied().sum();
        metrics.final_capital = initial_capital + metrics.total_pnl;
        metrics.total_fees = trades.iter().map(|t| t.fees).sum();
        metrics.expectancy = metrics.total_pnl / Decimal::from(trades.len() as u32);

        if initial_capital > Decimal::ZERO {
            metrics.total_return = (metrics.total_pnl / initial_capital * dec!(100))
                .to_f64()
                .unwrap_or(0.0);
        }

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();
        if !wins.is_empty() {
            metrics.avg_win = gross_profit / Decimal::from(wins.len() as u32);
        }
        if !losses.is_empty() {
            metrics.avg_loss = gross_loss / Decimal::from(losses.len() as u32);
        }
        if gross_loss > Decimal::ZERO {
            metrics.profit_factor = (gross_profit / gross_loss).to_f64().unwrap_or(0.0);
        }

        Self::calculate_drawdown(&mut metrics, &pnls);
        Self::calculate_sharpe_sortino(&mut metrics, trades);

        metrics.avg_holding_hours = trades.iter().map(|t| t.holding_hours()).sum::<f64>() / trades.len() as f64;
        metrics
    }

    /// Walk the equity curve from the initial capital.
    fn calculate_drawdown(metrics: &mut PerformanceMetrics, pnls: &[Decimal]) {
        let mut equity = metrics.initial_capital;
        let mut peak = equity;
        let mut max_dd = Decimal::ZERO;
        let mut max_dd_pct = 0.0f64;

        for pnl in pnls {
            equity += pnl;
            if equity > peak {
                peak = equity;
            }

            let dd = peak - equity;
            if dd > max_dd {
                max_dd = dd;
            }
            if peak > Decimal::ZERO {
                let dd_pct = (dd / peak).to_f64().unwrap_or(0.0);
                if dd_pct > max_dd_pct {
                    max_dd_pct = dd_pct;
                }
            }
        }

        metrics.max_drawdown = max_dd_pct;
        metrics.max_drawdown_amount = max_dd;
    }

    /// Per-trade returns, annualized with √252 and a zero risk-free rate.
    fn calculate_sharpe_sortino(metrics: &mut PerformanceMetrics, trades: &[ClosedTrade]) {
        if trades.len() < 2 {
            return;
        }

        let returns: Vec<f64> = trades
            .iter()
            .filter_map(|t| t.pnl_percent.to_f64())
            .map(|p| p / 100.0)
            .collect();
        if returns.len() < 2 {
            return;
        }

        let mean = returns.iter().mean();
        let std_dev = returns.iter().std_dev();
        if std_dev > 0.0 {
            metrics.sharpe_ratio = mean / std_dev * PERIODS_PER_YEAR.sqrt();
        }

        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        if downside.len() >= 2 {
            let downside_dev = downside.iter().std_dev();
            if downside_dev > 0.0 {
                metrics.sortino_ratio = mean / downside_dev * PERIODS_PER_YEAR.sqrt();
            }
        }
    }
}
