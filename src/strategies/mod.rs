//! Signal-producing strategies and standalone order planners.
//!
//! Bar strategies implement [`Strategy`] and are dispatched through a
//! [`StrategyRegistry`]. The grid and DCA planners manage their own order
//! ladders and are driven directly.

mod breakout;
mod confluence;
mod dca;
mod ema_crossover;
mod grid;
mod mean_reversion;

pub use breakout::BreakoutStrategy;
pub use confluence::{ConfluenceStrategy, ScoreCard};
pub use dca::{DcaAction, DcaConfig, DcaFill, DcaOrder, DcaStatus, SmartDca};
pub use ema_crossover::EmaCrossoverStrategy;
pub use grid::{
    GridConfig, GridExit, GridLevel, GridOrder, GridPlanner, GridSide, GridSpacing, GridStatus,
    ProfitEstimate,
};
pub use mean_reversion::MeanReversionStrategy;

use tracing::{debug, warn};

use crate::models::{to_decimal, Confirmation, Direction, FeatureBar, Signal};
use crate::signals::SignalConfig;
use crate::trading::RiskConfig;

/// Names accepted in `SignalConfig::strategies`.
pub const KNOWN_STRATEGIES: [&str; 4] = ["confluence", "mean_reversion", "breakout", "ema_crossover"];

/// Minimum reward/risk for rule-based proposals.
pub const MIN_RISK_REWARD: f64 = 2.0;

/// Minimum confidence (0.0 to 1.0) for rule-based proposals.
pub const MIN_CONFIDENCE: f64 = 0.6;

/// A bar-driven signal generator.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bars needed before `analyze` can produce anything.
    fn min_bars(&self) -> usize;

    /// Candidate signals for the latest bar of `bars`. Empty when nothing qualifies.
    fn analyze(&self, symbol: &str, bars: &[FeatureBar]) -> Vec<Signal>;
}

/// Turn a rule-based proposal into a signal with `score = confidence × 100`.
///
/// Returns `None` when reward/risk, confidence or level ordering fail.
#[allow(clippy::too_many_arguments)]
pub(crate) fn proposal(
    strategy: &'static str,
    symbol: &str,
    direction: Direction,
    bar: &FeatureBar,
    stop: f64,
    target: f64,
    confidence: f64,
    reasons: Vec<String>,
) -> Option<Signal> {
    let mut signal = Signal::new(
        symbol,
        direction,
        confidence * 100.0,
        bar.close_decimal(),
        to_decimal(stop),
        to_decimal(target),
        strategy,
        bar.timestamp,
    )
    .with_reasons(reasons);
    signal
        .confirmations
        .insert("confidence".to_string(), Confirmation::Value(confidence));

    if signal.risk_reward + 1e-6 < MIN_RISK_REWARD {
        debug!(strategy, symbol, rr = signal.risk_reward, "Proposal below minimum R:R");
        return None;
    }
    if confidence < MIN_CONFIDENCE {
        debug!(strategy, symbol, confidence, "Proposal below minimum confidence");
        return None;
    }
    if let Err(e) = signal.validate() {
        debug!(strategy, symbol, error = %e, "Proposal rejected");
        return None;
    }

    Some(signal)
}

/// Registered strategies, run in registration order.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the strategies named in `signals.strategies`; unknown names are skipped.
    pub fn from_config(signals: &SignalConfig, risk: &RiskConfig) -> Self {
        let mut registry = Self::new();
        for name in &signals.strategies {
            match Self::build(name, signals, risk) {
                Some(strategy) => registry.register(strategy),
                None => warn!(strategy = %name, "Unknown strategy, skipping"),
            }
        }
        registry
    }

    /// Construct a strategy by name.
    pub fn build(name: &str, signals: &SignalConfig, risk: &RiskConfig) -> Option<Box<dyn Strategy>> {
        let strategy: Box<dyn Strategy> = match name {
            "confluence" => Box::new(ConfluenceStrategy::new(signals.clone(), risk)),
            "mean_reversion" => Box::new(MeanReversionStrategy::default()),
            "breakout" => Box::new(BreakoutStrategy::default()),
            "ema_crossover" => Box::new(EmaCrossoverStrategy::default()),
            _ => return None,
        };
        Some(strategy)
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run every strategy with enough history; results sorted by score, best first.
    pub fn analyze_all(&self, symbol: &str, bars: &[FeatureBar]) -> Vec<Signal> {
        let mut signals = Vec::new();
        for strategy in &self.strategies {
            if bars.len() < strategy.min_bars() {
                debug!(
                    strategy = strategy.name(),
                    symbol,
                    have = bars.len(),
                    need = strategy.min_bars(),
                    "Not enough bars for strategy"
                );
                continue;
            }
            signals.extend(strategy.analyze(symbol, bars));
        }

        signals.sort_by(|a, b| b.score.total_cmp(&a.score));
        signals
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, TimeZone, Utc};

    use crate::models::FeatureBar;

    /// `len` flat bars at `price` with an ATR of 1% and neutral indicators.
    pub fn flat_bars(len: usize, price: f64) -> Vec<FeatureBar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..len)
            .map(|i| {
                let mut bar = FeatureBar::new(
                    t0 + Duration::hours(i as i64),
                    price,
                    price * 1.005,
                    price * 0.995,
                    price,
                    1000.0,
                );
                bar.atr = Some(price * 0.01);
                bar
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct Fixed(f64);

    impl Strategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn min_bars(&self) -> usize {
            2
        }

        fn analyze(&self, symbol: &str, _bars: &[FeatureBar]) -> Vec<Signal> {
            vec![Signal::new(
                symbol,
                Direction::Long,
                self.0,
                dec!(100),
                dec!(98),
                dec!(104),
                self.name(),
                Utc::now(),
            )]
        }
    }

    #[test]
    fn test_registry_from_config() {
        let signals = SignalConfig {
            strategies: vec![
                "confluence".to_string(),
                "breakout".to_string(),
                "unknown".to_string(),
            ],
            ..SignalConfig::default()
        };
        let registry = StrategyRegistry::from_config(&signals, &RiskConfig::default());
        assert_eq!(registry.names(), vec!["confluence", "breakout"]);
    }

    #[test]
    fn test_analyze_all_sorts_and_skips_short_history() {
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(Fixed(55.0)));
        registry.register(Box::new(Fixed(80.0)));

        let bars = test_support::flat_bars(3, 100.0);
        let signals = registry.analyze_all("BTC/USDT", &bars);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].score, 80.0);

        assert!(registry.analyze_all("BTC/USDT", &bars[..1]).is_empty());
    }

    #[test]
    fn test_proposal_validation() {
        let bar = &test_support::flat_bars(1, 100.0)[0];

        let ok = proposal("t", "X", Direction::Long, bar, 98.0, 104.0, 0.7, vec![]).unwrap();
        assert!((ok.score - 70.0).abs() < 1e-9);
        assert_eq!(ok.risk_reward, 2.0);

        assert!(proposal("t", "X", Direction::Long, bar, 98.0, 103.0, 0.7, vec![]).is_none());
        assert!(proposal("t", "X", Direction::Long, bar, 98.0, 104.0, 0.55, vec![]).is_none());
        assert!(proposal("t", "X", Direction::Short, bar, 98.0, 104.0, 0.7, vec![]).is_none());
    }
}
