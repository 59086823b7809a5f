//! Multi-timeframe trend confirmation.

use statrs::statistics::Statistics;
use tracing::debug;

use crate::models::{Confirmation, Direction, FeatureBar, FeatureSet, Signal, TimeframeAlignment};
use super::MtfConfig;

/// Trend read from one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

impl Trend {
    fn agrees(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Trend::Up, Direction::Long) | (Trend::Down, Direction::Short)
        )
    }

    fn opposes(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Trend::Down, Direction::Long) | (Trend::Up, Direction::Short)
        )
    }
}

/// How the higher and confirmation timeframes relate to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtfOutcome {
    Aligned,
    Partial,
    Suppressed,
    Neutral,
}

/// Trend from closing prices: up when the close is above its SMA and the SMA
/// has risen over `slope_lookback` bars; down mirrored.
pub fn trend(bars: &[FeatureBar], ma_period: usize, slope_lookback: usize) -> Trend {
    if ma_period == 0 || bars.len() < ma_period + slope_lookback {
        return Trend::Neutral;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let n = closes.len();
    let sma_now = closes[n - ma_period..].iter().mean();
    let sma_prev = closes[n - ma_period - slope_lookback..n - slope_lookback]
        .iter()
        .mean();
    let close = closes[n - 1];

    if close > sma_now && sma_now > sma_prev {
        Trend::Up
    } else if close < sma_now && sma_now < sma_prev {
        Trend::Down
    } else {
        Trend::Neutral
    }
}

pub struct MtfFilter {
    config: MtfConfig,
}

impl MtfFilter {
    pub fn new(config: MtfConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, direction: Direction, higher: Trend, confirmation: Trend) -> MtfOutcome {
        let trends = [higher, confirmation];
        let agree = trends.iter().filter(|t| t.agrees(direction)).count();
        let oppose = trends.iter().filter(|t| t.opposes(direction)).count();

        match (agree, oppose) {
            (2, _) => MtfOutcome::Aligned,
            (1, 0) => MtfOutcome::Partial,
            (0, o) if o > 0 => MtfOutcome::Suppressed,
            _ => MtfOutcome::Neutral,
        }
    }

    /// Annotate and adjust `signal`, or drop it when the higher timeframes
    /// oppose it.
    pub fn apply(&self, mut signal: Signal, features: &FeatureSet) -> Option<Signal> {
        if !self.config.enabled {
            return Some(signal);
        }

        let higher = trend(&features.higher, self.config.ma_period, self.config.slope_lookback);
        let confirmation = trend(
            &features.confirmation,
            self.config.ma_period,
            self.config.slope_lookback,
        );
        let outcome = self.classify(signal.direction, higher, confirmation);

        match outcome {
            MtfOutcome::Aligned => {
                signal.add_score(self.config.aligned_bonus, "Higher timeframes aligned");
                signal.timeframe_alignment = Some(TimeframeAlignment::Aligned);
            }
            MtfOutcome::Partial => {
                signal.add_score(self.config.partial_bonus, "One higher timeframe aligned");
                signal.timeframe_alignment = Some(TimeframeAlignment::Partial);
            }
            MtfOutcome::Suppressed => {
                debug!(
                    symbol = %signal.symbol,
                    direction = %signal.direction,
                    ?higher,
                    ?confirmation,
                    "Signal suppressed by higher timeframes"
                );
                return None;
            }
            MtfOutcome::Neutral => {
                signal.timeframe_alignment = Some(TimeframeAlignment::Neutral);
            }
        }

        signal.confirmations.insert(
            "mtf_eligible".to_string(),
            Confirmation::Flag(outcome != MtfOutcome::Neutral),
        );
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn series(start: f64, step: f64, len: usize) -> Vec<FeatureBar> {
        let t0 = Utc::now();
        (0..len)
            .map(|i| {
                let close = start + step * i as f64;
                FeatureBar::new(t0 + Duration::hours(i as i64), close, close, close, close, 1000.0)
            })
            .collect()
    }

    fn signal(direction: Direction) -> Signal {
        let (stop, target) = match direction {
            Direction::Long => (dec!(96), dec!(108)),
            Direction::Short => (dec!(104), dec!(92)),
        };
        Signal::new("BTC/USDT", direction, 60.0, dec!(100), stop, target, "test", Utc::now())
    }

    #[test]
    fn test_trend_detection() {
        assert_eq!(trend(&series(100.0, 1.0, 30), 20, 5), Trend::Up);
        assert_eq!(trend(&series(100.0, -1.0, 30), 20, 5), Trend::Down);
        assert_eq!(trend(&series(100.0, 0.0, 30), 20, 5), Trend::Neutral);
        assert_eq!(trend(&series(100.0, 1.0, 10), 20, 5), Trend::Neutral);
    }

    #[test]
    fn test_classify() {
        let filter = MtfFilter::new(MtfConfig::default());
        let long = Direction::Long;
        assert_eq!(filter.classify(long, Trend::Up, Trend::Up), MtfOutcome::Aligned);
        assert_eq!(filter.classify(long, Trend::Up, Trend::Neutral), MtfOutcome::Partial);
        assert_eq!(filter.classify(long, Trend::Down, Trend::Down), MtfOutcome::Suppressed);
        assert_eq!(filter.classify(long, Trend::Neutral, Trend::Down), MtfOutcome::Suppressed);
        assert_eq!(filter.classify(long, Trend::Up, Trend::Down), MtfOutcome::Neutral);
        assert_eq!(filter.classify(long, Trend::Neutral, Trend::Neutral), MtfOutcome::Neutral);
    }

    #[test]
    fn test_aligned_adds_bonus() {
        let filter = MtfFilter::new(MtfConfig::default());
        let mut features = FeatureSet::new(Vec::new());
        features.higher = series(100.0, 1.0, 30);
        features.confirmation = series(50.0, 0.5, 30);

        let out = filter.apply(signal(Direction::Long), &features).unwrap();
        assert_eq!(out.score, 80.0);
        assert_eq!(out.strength, 0.8);
        assert_eq!(out.timeframe_alignment, Some(TimeframeAlignment::Aligned));
        assert_eq!(out.confirmations.get("mtf_eligible"), Some(&Confirmation::Flag(true)));
    }

    #[test]
    fn test_opposing_suppresses() {
        let filter = MtfFilter::new(MtfConfig::default());
        let mut features = FeatureSet::new(Vec::new());
        features.higher = series(100.0, 1.0, 30);
        features.confirmation = series(100.0, 1.0, 30);

        assert!(filter.apply(signal(Direction::Short), &features).is_none());
    }

    #[test]
    fn test_missing_data_passes_through() {
        let filter = MtfFilter::new(MtfConfig::default());
        let features = FeatureSet::new(Vec::new());

        let out = filter.apply(signal(Direction::Long), &features).unwrap();
        assert_eq!(out.score, 60.0);
        assert_eq!(out.timeframe_alignment, Some(TimeframeAlignment::Neutral));
    }

    #[test]
    fn test_disabled_is_noop() {
        let filter = MtfFilter::new(MtfConfig {
            enabled: false,
            ..MtfConfig::default()
        });
        let out = filter.apply(signal(Direction::Long), &FeatureSet::default()).unwrap();
        assert_eq!(out.timeframe_alignment, None);
    }
}
