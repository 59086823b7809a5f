//! One decision cycle per symbol: state machine, execution, then exits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::config::AppConfig;
use crate::models::{to_decimal, ClosedTrade, ExitReason, FeatureSet, PortfolioSnapshot, Signal};
use crate::portfolio::LedgerError;
use crate::signals::{CycleError, EngineAction, Phase, SignalEngine};

use super::{ExecutionResult, ExecutionSimulator, MarketContext};

/// Everything that happened to one symbol in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub symbol: String,

    /// Phase after the cycle
    pub phase: Phase,

    /// Signal armed this cycle
    pub armed: Option<Signal>,

    /// Execution attempt for a confirmed signal
    pub execution: Option<ExecutionResult>,

    /// Positions closed by this cycle's price
    pub closed: Vec<ClosedTrade>,

    #[serde(skip)]
    pub skipped: Option<CycleError>,
}

/// Single owner of the signal engine and the execution simulator.
pub struct Trader {
    engine: SignalEngine,
    executor: ExecutionSimulator,
}

impl Trader {
    pub fn new(engine: SignalEngine, executor: ExecutionSimulator) -> Self {
        Self { engine, executor }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let engine = SignalEngine::new(config.signals.clone(), config.mtf.clone(), &config.risk);
        let executor = ExecutionSimulator::new(
            config.initial_capital,
            config.risk.clone(),
            &config.gate,
            config.execution.clone(),
        );
        Self::new(engine, executor)
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    pub fn executor(&self) -> &ExecutionSimulator {
        &self.executor
    }

    /// Run one cycle for `symbol` against its latest features.
    ///
    /// The state machine steps first; the latest close is then applied to
    /// open positions, so an exit this cycle starts the cooldown next cycle.
    pub fn process_symbol(&mut self, symbol: &str, features: &FeatureSet, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            symbol: symbol.to_string(),
            phase: Phase::Scanning,
            armed: None,
            execution: None,
            closed: Vec::new(),
            skipped: None,
        };

        match self.engine.step(symbol, features) {
            EngineAction::Armed(signal) => report.armed = Some(signal),
            EngineAction::Confirmed(signal) => {
                let market = features
                    .latest()
                    .map(|bar| MarketContext {
                        spread: bar.spread,
                        volume_ratio: bar.volume_ratio,
                    })
                    .unwrap_or_default();

                let result = self.executor.execute(&signal, &market, now);
                match &result.position_id {
                    Some(id) if result.is_executed() => self.engine.confirm_entry(symbol, id.clone()),
                    _ => self.engine.reject_entry(symbol),
                }
                report.execution = Some(result);
            }
            EngineAction::Skipped(e) => report.skipped = Some(e),
            other => debug!(symbol, action = ?other, "Cycle"),
        }

        if let Some(bar) = features.latest().filter(|b| b.is_valid()) {
            let price = bar.close_decimal();
            let atr = to_decimal(bar.atr_or_fallback());
            report.closed = self.executor.on_price(symbol, price, Some(atr), now);
            self.after_exits(&report.closed);
        }

        report.phase = self.engine.phase(symbol);
        report
    }

    /// Manually close one position.
    pub fn close_position(&mut self, id: &str, price: Decimal, now: DateTime<Utc>) -> Result<ClosedTrade, LedgerError> {
        let trade = self.executor.close_position(id, price, ExitReason::Manual, now)?;
        self.after_exits(std::slice::from_ref(&trade));
        Ok(trade)
    }

    /// Close everything, e.g. on shutdown.
    pub fn close_all(&mut self, prices: &HashMap<String, Decimal>, now: DateTime<Utc>) -> Vec<ClosedTrade> {
        let closed = self.executor.close_all(prices, now);
        self.after_exits(&closed);
        closed
    }

    fn after_exits(&mut self, closed: &[ClosedTrade]) {
        for trade in closed {
            if self.engine.phase(&trade.symbol) == Phase::InPosition
                && !self.executor.ledger().has_position(&trade.symbol)
            {
                self.engine.on_exit(&trade.symbol);
            }
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> PortfolioSnapshot {
        self.executor.snapshot(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::models::{Direction, FeatureBar};
    use crate::strategies::test_support::flat_bars;

    fn trader() -> Trader {
        Trader::from_config(&AppConfig::default())
    }

    fn qualifying() -> FeatureSet {
        let mut bars = flat_bars(50, 100.0);
        let last = bars.last_mut().unwrap();
        last.trend_bias = Some(Direction::Long);
        last.volume_ratio = Some(1.4);
        last.ema_fast = Some(99.8);
        last.ema_slow = Some(99.5);
        FeatureSet::new(bars)
    }

    fn push_bar(features: &mut FeatureSet, open: f64, close: f64) {
        let ts = features.latest().unwrap().timestamp + Duration::hours(1);
        let mut bar = FeatureBar::new(ts, open, open.max(close) + 0.2, open.min(close) - 0.2, close, 1000.0);
        bar.atr = Some(1.0);
        features.primary.push(bar);
    }

    #[test]
    fn test_signal_to_stop_to_cooldown() {
        let mut trader = trader();
        let mut features = qualifying();
        let now = Utc::now();
        let symbol = "BTC/USDT";

        // Scores 65 LONG and arms
        let report = trader.process_symbol(symbol, &features, now);
        assert_eq!(report.armed.as_ref().unwrap().score, 65.0);
        assert_eq!(report.phase, Phase::Armed);

        // Next bar opens above entry: confirmed and executed
        push_bar(&mut features, 100.5, 101.0);
        let report = trader.process_symbol(symbol, &features, now);
        let execution = report.execution.unwrap();
        assert!(execution.is_executed());
        assert_eq!(report.phase, Phase::InPosition);
        let position = trader.executor().ledger().positions_for(symbol)[0].clone();
        assert_eq!(position.stop_loss, rust_decimal_macros::dec!(98));

        // Price drops through the stop
        push_bar(&mut features, 99.0, 97.5);
        let report = trader.process_symbol(symbol, &features, now);
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].exit_reason.as_str(), "stop_loss");
        assert_eq!(report.phase, Phase::Cooldown);
        assert!(matches!(
            trader.engine().state(symbol),
            Some(crate::signals::SymbolState::Cooldown { remaining: 5 })
        ));

        // Five cycles later scanning resumes
        for cycle in 1..=5 {
            push_bar(&mut features, 97.5, 97.5);
            let report = trader.process_symbol(symbol, &features, now);
            let expected = if cycle < 5 { Phase::Cooldown } else { Phase::Scanning };
            assert_eq!(report.phase, expected, "cycle {}", cycle);
        }

        let snapshot = trader.snapshot(now);
        assert_eq!(snapshot.stats.total_trades, 1);
        assert_eq!(snapshot.equity, snapshot.capital);
    }

    #[test]
    fn test_rejected_execution_returns_to_scanning() {
        let mut trader = trader();
        let mut features = qualifying();
        let now = Utc::now();
        trader.process_symbol("BTC/USDT", &features, now);

        push_bar(&mut features, 100.5, 101.0);
        features.primary.last_mut().unwrap().spread = Some(0.05);
        let report = trader.process_symbol("BTC/USDT", &features, now);

        assert!(!report.execution.unwrap().is_executed());
        assert_eq!(report.phase, Phase::Scanning);
        assert_eq!(trader.executor().ledger().position_count(), 0);
    }

    #[test]
    fn test_short_history_is_skipped() {
        let mut trader = trader();
        let features = FeatureSet::new(flat_bars(5, 100.0));
        let report = trader.process_symbol("BTC/USDT", &features, Utc::now());
        assert!(matches!(report.skipped, Some(CycleError::DataInsufficient { .. })));
        assert_eq!(report.phase, Phase::Scanning);
    }

    #[test]
    fn test_manual_close_starts_cooldown() {
        let mut trader = trader();
        let mut features = qualifying();
        let now = Utc::now();
        trader.process_symbol("BTC/USDT", &features, now);
        push_bar(&mut features, 100.5, 101.0);
        let id = trader
            .process_symbol("BTC/USDT", &features, now)
            .execution
            .unwrap()
            .position_id
            .unwrap();

        let trade = trader.close_position(&id, rust_decimal_macros::dec!(101), now).unwrap();
        assert_eq!(trade.exit_reason, ExitReason::Manual);
        assert_eq!(trader.engine().phase("BTC/USDT"), Phase::Cooldown);
    }
}
