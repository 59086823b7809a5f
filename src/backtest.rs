//! Offline replay of a recorded feature series through the live decision path.
//!
//! - Cuts the series into point-in-time windows, one new bar per cycle
//! - Uses each bar's timestamp as the cycle clock, so pauses and daily
//!   limits behave as they would have at the time
//! - Closes whatever is still open on the final bar
//! - Reports performance statistics over the closed trades

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::feed::{load_series, ReplaySeries};
use crate::metrics::{MetricsCalculator, PerformanceMetrics};
use crate::models::{ClosedTrade, FeatureSet};
use crate::trading::Trader;

/// Backtest results summary.
#[derive(Debug, Clone)]
pub struct BacktestResults {
    pub symbol: String,

    /// Bars replayed after warm-up
    pub bars: usize,

    pub signals_armed: usize,
    pub executions: usize,
    pub rejections: usize,

    pub metrics: PerformanceMetrics,

    /// All completed trades, in close order
    pub trades: Vec<ClosedTrade>,

    /// Equity after each cycle
    pub equity_curve: Vec<(DateTime<Utc>, Decimal)>,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl std::fmt::Display for BacktestResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " BACKTEST RESULTS ")?;
        writeln!(f)?;
        writeln!(f, "Symbol: {}", self.symbol)?;
        writeln!(
            f,
            "Period: {} to {} ({} bars)",
            self.start_time.format("%Y-%m-%d %H:%M"),
            self.end_time.format("%Y-%m-%d %H:%M"),
            self.bars
        )?;
        writeln!(f)?;
        writeln!(f, "--- Signals ---")?;
        writeln!(f, "Armed:       {}", self.signals_armed)?;
        writeln!(f, "Executed:    {}", self.executions)?;
        writeln!(f, "Rejected:    {}", self.rejections)?;
        write!(f, "{}", self.metrics)?;
        Ok(())
    }
}

/// Backtesting engine.
pub struct Backtester {
    config: AppConfig,
}

impl Backtester {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Load a recorded series and replay it.
    pub async fn run_file(&self, symbol: &str, path: impl AsRef<Path>) -> Result<BacktestResults> {
        let series = load_series(path).await?;
        self.run(symbol, &series)
    }

    /// Replay `series` bar by bar, starting once the warm-up history exists.
    pub fn run(&self, symbol: &str, series: &FeatureSet) -> Result<BacktestResults> {
        let replay = ReplaySeries::new(series.clone());
        if replay.is_empty() {
            bail!("No bars to replay for {}", symbol);
        }

        let warmup = self.config.signals.min_bars.clamp(1, replay.len());
        info!(symbol, bars = replay.len(), warmup, "Starting backtest");

        let mut trader = Trader::from_config(&self.config);
        let mut results = BacktestResults {
            symbol: symbol.to_string(),
            bars: 0,
            signals_armed: 0,
            executions: 0,
            rejections: 0,
            metrics: PerformanceMetrics::default(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            start_time: series.primary[warmup - 1].timestamp,
            end_time: series.primary[replay.len() - 1].timestamp,
        };

        let mut last_close = None;
        for end in warmup..=replay.len() {
            let window = replay.window(end);
            let Some(bar) = window.latest() else {
                continue;
            };
            let now = bar.timestamp;
            if bar.is_valid() {
                last_close = Some(bar.close_decimal());
            }

            let report = trader.process_symbol(symbol, &window, now);
            results.bars += 1;

            if report.armed.is_some() {
                results.signals_armed += 1;
            }
            if let Some(execution) = &report.execution {
                if execution.is_executed() {
                    results.executions += 1;
                } else {
                    results.rejections += 1;
                    debug!(reason = ?execution.reason, "Entry rejected");
                }
            }
            results.trades.extend(report.closed);
            results.equity_curve.push((now, trader.snapshot(now).equity));
        }

        let mut prices = HashMap::new();
        if let Some(price) = last_close {
            prices.insert(symbol.to_string(), price);
        }
        results.trades.extend(trader.close_all(&prices, results.end_time));

        results.metrics = MetricsCalculator::calculate(self.config.initial_capital, &results.trades);
        info!(
            trades = results.trades.len(),
            pnl = %results.metrics.total_pnl,
            "Backtest complete"
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use crate::models::{Direction, ExitReason, FeatureBar};
    use crate::strategies::test_support::flat_bars;

    fn push_bar(bars: &mut Vec<FeatureBar>, open: f64, close: f64) {
        let ts = bars.last().unwrap().timestamp + Duration::hours(1);
        let mut bar = FeatureBar::new(ts, open, open.max(close) + 0.2, open.min(close) - 0.2, close, 1000.0);
        bar.atr = Some(1.0);
        bars.push(bar);
    }

    fn rally() -> FeatureSet {
        let mut bars = flat_bars(50, 100.0);
        let last = bars.last_mut().unwrap();
        last.trend_bias = Some(Direction::Long);
        last.volume_ratio = Some(1.4);
        last.ema_fast = Some(99.8);
        last.ema_slow = Some(99.5);

        push_bar(&mut bars, 100.5, 101.0); // confirms
        push_bar(&mut bars, 101.0, 102.0);
        push_bar(&mut bars, 102.0, 103.0); // trailing stop moves to 101.5
        push_bar(&mut bars, 103.0, 104.5); // target 104 reached
        push_bar(&mut bars, 104.5, 104.0);
        FeatureSet::new(bars)
    }

    #[test]
    fn test_replay_takes_profit() {
        let results = Backtester::new(AppConfig::default()).run("BTC/USDT", &rally()).unwrap();

        assert_eq!(results.bars, 6);
        assert_eq!(results.signals_armed, 1);
        assert_eq!(results.executions, 1);
        assert_eq!(results.trades.len(), 1);

        let trade = &results.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_eq!(trade.exit_price, dec!(104.5));
        assert!(trade.net_pnl > Decimal::ZERO);
        assert_eq!(results.metrics.winning_trades, 1);
        assert_eq!(results.equity_curve.len(), 6);
        assert!(results.to_string().contains("BACKTEST RESULTS"));
    }

    #[test]
    fn test_open_position_closed_at_end() {
        let mut series = rally();
        series.primary.truncate(52);

        let results = Backtester::new(AppConfig::default()).run("BTC/USDT", &series).unwrap();
        assert_eq!(results.trades.len(), 1);
        assert_eq!(results.trades[0].exit_reason, ExitReason::CloseAll);
    }

    #[test]
    fn test_empty_series() {
        let err = Backtester::new(AppConfig::default())
            .run("BTC/USDT", &FeatureSet::default())
            .unwrap_err();
        assert!(err.to_string().contains("No bars"));
    }

    #[tokio::test]
    async fn test_run_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BTC_USDT.json");
        std::fs::write(&path, serde_json::to_string(&rally()).unwrap()).unwrap();

        let results = Backtester::new(AppConfig::default())
            .run_file("BTC/USDT", &path)
            .await
            .unwrap();
        assert_eq!(results.trades.len(), 1);
    }
}
