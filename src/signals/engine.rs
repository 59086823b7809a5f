//! Signal engine: evaluation plus the per-symbol state machine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Direction, FeatureBar, FeatureSet, Signal};
use crate::strategies::StrategyRegistry;
use crate::trading::RiskConfig;

use super::{ConfirmationRule, MtfConfig, MtfFilter, Phase, SignalConfig, SymbolState};

/// Why a symbol produced no signals this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("insufficient data: {have} bars, need {need}")]
    DataInsufficient { have: usize, need: usize },

    #[error("computation failed: {0}")]
    ComputationFailure(String),
}

/// What the state machine did for a symbol in one cycle.
#[derive(Debug, Clone)]
pub enum EngineAction {
    /// Scanning; nothing qualified
    Idle,

    /// Scanning; evaluation produced nothing usable
    Skipped(CycleError),

    /// A qualifying signal was stored
    Armed(Signal),

    /// Armed and still waiting for confirmation
    Waiting,

    /// Confirmation fired; hand the signal to execution
    Confirmed(Signal),

    /// The armed signal was not confirmed in time
    Expired(Signal),

    Holding,

    CoolingDown { remaining: u32 },

    /// Cooldown finished; scanning resumes next cycle
    Resumed,
}

#[derive(Debug, Default)]
struct SymbolTracker {
    state: SymbolState,
    last_bar: Option<DateTime<Utc>>,
}

/// Scores symbols and drives each one through
/// SCANNING → ARMED → IN_POSITION → COOLDOWN → SCANNING.
///
/// Each symbol's state is owned here and changed only by the transition
/// methods below.
pub struct SignalEngine {
    config: SignalConfig,
    registry: StrategyRegistry,
    mtf: MtfFilter,
    symbols: HashMap<String, SymbolTracker>,
}

impl SignalEngine {
    pub fn new(config: SignalConfig, mtf: MtfConfig, risk: &RiskConfig) -> Self {
        let registry = StrategyRegistry::from_config(&config, risk);
        Self::with_registry(config, mtf, registry)
    }

    pub fn with_registry(config: SignalConfig, mtf: MtfConfig, registry: StrategyRegistry) -> Self {
        Self {
            config,
            registry,
            mtf: MtfFilter::new(mtf),
            symbols: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    // ==================== Evaluation ====================

    /// All candidate signals for the latest bar, best first.
    ///
    /// Too little history or unusable prices yield an error instead of
    /// signals; callers treat both as "nothing this cycle".
    pub fn evaluate(&self, symbol: &str, features: &FeatureSet) -> Result<Vec<Signal>, CycleError> {
        let bars = &features.primary;
        if bars.len() < self.config.min_bars {
            return Err(CycleError::DataInsufficient {
                have: bars.len(),
                need: self.config.min_bars,
            });
        }

        let latest = bars
            .last()
            .ok_or_else(|| CycleError::ComputationFailure("empty bar series".to_string()))?;
        if !latest.is_valid() {
            return Err(CycleError::ComputationFailure(format!(
                "latest bar at {} has invalid prices",
                latest.timestamp
            )));
        }

        let mut signals: Vec<Signal> = self
            .registry
            .analyze_all(symbol, bars)
            .into_iter()
            .filter_map(|signal| self.mtf.apply(signal, features))
            .collect();

        signals.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(signals)
    }

    // ==================== State Machine ====================

    /// Advance `symbol` by one processing cycle.
    pub fn step(&mut self, symbol: &str, features: &FeatureSet) -> EngineAction {
        let latest_ts = features.latest().map(|b| b.timestamp);
        let state = self.tracker(symbol).state.clone();

        let new_bar = {
            let tracker = self.tracker(symbol);
            let is_new = latest_ts.is_some() && latest_ts != tracker.last_bar;
            if is_new {
                tracker.last_bar = latest_ts;
            }
            is_new
        };

        match state {
            SymbolState::Scanning => self.scan(symbol, features),

            SymbolState::Armed { signal, bars_waited } => {
                if !new_bar {
                    return EngineAction::Waiting;
                }
                let bars_waited = bars_waited + 1;

                let confirmed = match (self.config.confirmation, features.latest()) {
                    (ConfirmationRule::PriceBreak, Some(bar)) => price_breaks(&signal, bar),
                    (ConfirmationRule::Bars(n), _) => bars_waited >= n,
                    _ => false,
                };

                if confirmed {
                    info!(symbol, direction = %signal.direction, score = signal.score, "Signal confirmed");
                    self.set_state(symbol, SymbolState::Armed { signal: signal.clone(), bars_waited });
                    EngineAction::Confirmed(signal)
                } else if bars_waited >= self.config.max_armed_bars {
                    info!(symbol, bars_waited, "Armed signal expired");
                    self.set_state(symbol, SymbolState::Scanning);
                    EngineAction::Expired(signal)
                } else {
                    self.set_state(symbol, SymbolState::Armed { signal, bars_waited });
                    EngineAction::Waiting
                }
            }

            SymbolState::InPosition { .. } => EngineAction::Holding,

            SymbolState::Cooldown { remaining } => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    debug!(symbol, "Cooldown finished");
                    self.set_state(symbol, SymbolState::Scanning);
                    EngineAction::Resumed
                } else {
                    self.set_state(symbol, SymbolState::Cooldown { remaining });
                    EngineAction::CoolingDown { remaining }
                }
            }
        }
    }

    fn scan(&mut self, symbol: &str, features: &FeatureSet) -> EngineAction {
        let signals = match self.evaluate(symbol, features) {
            Ok(signals) => signals,
            Err(e) => {
                match &e {
                    CycleError::DataInsufficient { .. } => debug!(symbol, error = %e, "Skipping symbol"),
                    CycleError::ComputationFailure(_) => warn!(symbol, error = %e, "Skipping symbol"),
                }
                return EngineAction::Skipped(e);
            }
        };

        let Some(best) = signals.into_iter().find(|s| s.score >= self.config.min_score) else {
            return EngineAction::Idle;
        };

        info!(
            symbol,
            direction = %best.direction,
            score = best.score,
            strategy = %best.strategy,
            "Signal armed"
        );
        self.set_state(symbol, SymbolState::Armed { signal: best.clone(), bars_waited: 0 });
        EngineAction::Armed(best)
    }

    /// The confirmed signal was executed as `position_id`.
    pub fn confirm_entry(&mut self, symbol: &str, position_id: impl Into<String>) {
        self.set_state(symbol, SymbolState::InPosition { position_id: position_id.into() });
    }

    /// Execution refused the confirmed signal.
    pub fn reject_entry(&mut self, symbol: &str) {
        self.set_state(symbol, SymbolState::Scanning);
    }

    /// Drop an armed signal. Returns whether one was armed.
    pub fn cancel(&mut self, symbol: &str) -> bool {
        let armed = matches!(self.tracker(symbol).state, SymbolState::Armed { .. });
        if armed {
            self.set_state(symbol, SymbolState::Scanning);
        }
        armed
    }

    /// The symbol's position closed; start the cooldown.
    pub fn on_exit(&mut self, symbol: &str) {
        let next = if self.config.cooldown_cycles == 0 {
            SymbolState::Scanning
        } else {
            SymbolState::Cooldown { remaining: self.config.cooldown_cycles }
        };
        self.set_state(symbol, next);
    }

    fn tracker(&mut self, symbol: &str) -> &mut SymbolTracker {
        self.symbols.entry(symbol.to_string()).or_default()
    }

    fn set_state(&mut self, symbol: &str, state: SymbolState) {
        let tracker = self.tracker(symbol);
        let from = tracker.state.phase();
        let to = state.phase();
        tracker.state = state;
        if from != to {
            debug!(symbol, from = %from, to = %to, "State transition");
        }
    }

    // ==================== Queries ====================

    pub fn state(&self, symbol: &str) -> Option<&SymbolState> {
        self.symbols.get(symbol).map(|t| &t.state)
    }

    /// Current phase; unseen symbols are scanning.
    pub fn phase(&self, symbol: &str) -> Phase {
        self.state(symbol).map(|s| s.phase()).unwrap_or(Phase::Scanning)
    }

    /// Phase of every tracked symbol, sorted by symbol.
    pub fn phases(&self) -> Vec<(String, Phase)> {
        let mut phases: Vec<(String, Phase)> = self
            .symbols
            .iter()
            .map(|(symbol, t)| (symbol.clone(), t.state.phase()))
            .collect();
        phases.sort_by(|a, b| a.0.cmp(&b.0));
        phases
    }
}

/// Whether `bar` opened or closed beyond the signal's entry in its direction.
fn price_breaks(signal: &Signal, bar: &FeatureBar) -> bool {
    let entry = signal.entry_price.to_f64().unwrap_or(f64::NAN);
    match signal.direction {
        Direction::Long => bar.open > entry || bar.close > entry,
        Direction::Short => bar.open < entry || bar.close < entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::strategies::test_support::flat_bars;

    fn engine(confirmation: ConfirmationRule) -> SignalEngine {
        let config = SignalConfig {
            confirmation,
            ..SignalConfig::default()
        };
        SignalEngine::new(config, MtfConfig::default(), &RiskConfig::default())
    }

    /// 50 bars whose last bar scores 65 for LONG: trend, volume and EMA structure.
    fn qualifying() -> FeatureSet {
        let mut bars = flat_bars(50, 100.0);
        let last = bars.last_mut().unwrap();
        last.trend_bias = Some(Direction::Long);
        last.volume_ratio = Some(1.4);
        last.ema_fast = Some(99.8);
        last.ema_slow = Some(99.5);
        FeatureSet::new(bars)
    }

    fn next_bar(features: &mut FeatureSet, open: f64, close: f64) {
        let ts = features.latest().unwrap().timestamp + Duration::hours(1);
        let mut bar = FeatureBar::new(ts, open, open.max(close) + 0.5, open.min(close) - 0.5, close, 1000.0);
        bar.atr = Some(1.0);
        features.primary.push(bar);
    }

    #[test]
    fn test_insufficient_data() {
        let engine = engine(ConfirmationRule::PriceBreak);
        let features = FeatureSet::new(flat_bars(10, 100.0));
        assert_eq!(
            engine.evaluate("BTC/USDT", &features).unwrap_err(),
            CycleError::DataInsufficient { have: 10, need: 50 }
        );
    }

    #[test]
    fn test_invalid_latest_bar_is_computation_failure() {
        let mut engine = engine(ConfirmationRule::PriceBreak);
        let mut features = qualifying();
        features.primary.last_mut().unwrap().close = f64::NAN;

        assert!(matches!(
            engine.step("BTC/USDT", &features),
            EngineAction::Skipped(CycleError::ComputationFailure(_))
        ));
        assert_eq!(engine.phase("BTC/USDT"), Phase::Scanning);
    }

    #[test]
    fn test_scan_arms_best_signal() {
        let mut engine = engine(ConfirmationRule::PriceBreak);
        let action = engine.step("BTC/USDT", &qualifying());

        let EngineAction::Armed(signal) = action else {
            panic!("expected Armed, got {:?}", action);
        };
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.score, 65.0);
        assert_eq!(engine.phase("BTC/USDT"), Phase::Armed);
    }

    #[test]
    fn test_below_min_score_stays_scanning() {
        let mut engine = engine(ConfirmationRule::PriceBreak);
        let features = FeatureSet::new(flat_bars(50, 100.0));
        assert!(matches!(engine.step("BTC/USDT", &features), EngineAction::Idle));
        assert_eq!(engine.phase("BTC/USDT"), Phase::Scanning);
    }

    #[test]
    fn test_same_bar_does_not_confirm() {
        let mut engine = engine(ConfirmationRule::Bars(1));
        let features = qualifying();
        engine.step("BTC/USDT", &features);

        assert!(matches!(engine.step("BTC/USDT", &features), EngineAction::Waiting));
        assert_eq!(engine.phase("BTC/USDT"), Phase::Armed);
    }

    #[test]
    fn test_price_break_confirms() {
        let mut engine = engine(ConfirmationRule::PriceBreak);
        let mut features = qualifying();
        engine.step("BTC/USDT", &features);

        next_bar(&mut features, 100.5, 101.0);
        assert!(matches!(engine.step("BTC/USDT", &features), EngineAction::Confirmed(_)));

        engine.confirm_entry("BTC/USDT", "pos-1");
        assert_eq!(engine.phase("BTC/USDT"), Phase::InPosition);
        assert_eq!(engine.state("BTC/USDT").unwrap().position_id(), Some("pos-1"));
        assert!(matches!(engine.step("BTC/USDT", &features), EngineAction::Holding));
    }

    #[test]
    fn test_armed_signal_expires() {
        let mut engine = engine(ConfirmationRule::PriceBreak);
        let mut features = qualifying();
        engine.step("BTC/USDT", &features);

        for _ in 0..2 {
            next_bar(&mut features, 99.0, 98.5);
            assert!(matches!(engine.step("BTC/USDT", &features), EngineAction::Waiting));
        }
        next_bar(&mut features, 99.0, 98.5);
        assert!(matches!(engine.step("BTC/USDT", &features), EngineAction::Expired(_)));
        assert_eq!(engine.phase("BTC/USDT"), Phase::Scanning);
    }

    #[test]
    fn test_cancel_and_reject() {
        let mut engine = engine(ConfirmationRule::PriceBreak);
        engine.step("BTC/USDT", &qualifying());
        assert!(engine.cancel("BTC/USDT"));
        assert!(!engine.cancel("BTC/USDT"));
        assert_eq!(engine.phase("BTC/USDT"), Phase::Scanning);

        engine.step("ETH/USDT", &qualifying());
        engine.reject_entry("ETH/USDT");
        assert_eq!(engine.phase("ETH/USDT"), Phase::Scanning);
    }

    #[test]
    fn test_cooldown_counts_down() {
        let mut engine = engine(ConfirmationRule::PriceBreak);
        let features = qualifying();
        engine.confirm_entry("BTC/USDT", "pos-1");
        engine.on_exit("BTC/USDT");
        assert_eq!(engine.phase("BTC/USDT"), Phase::Cooldown);

        for expected in (1..5).rev() {
            let action = engine.step("BTC/USDT", &features);
            assert!(matches!(action, EngineAction::CoolingDown { remaining } if remaining == expected));
        }
        assert!(matches!(engine.step("BTC/USDT", &features), EngineAction::Resumed));
        assert_eq!(engine.phase("BTC/USDT"), Phase::Scanning);
    }

    #[test]
    fn test_phases_sorted() {
        let mut engine = engine(ConfirmationRule::PriceBreak);
        engine.step("ETH/USDT", &FeatureSet::new(flat_bars(50, 100.0)));
        engine.step("BTC/USDT", &qualifying());

        let phases = engine.phases();
        assert_eq!(phases[0], ("BTC/USDT".to_string(), Phase::Armed));
        assert_eq!(phases[1], ("ETH/USDT".to_string(), Phase::Scanning));
    }
}
