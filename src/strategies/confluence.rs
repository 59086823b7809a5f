//! Confluence scoring: independent confirmations accumulate points toward a
//! 0-100 score per direction.

use std::collections::BTreeMap;

use crate::models::{to_decimal, Confirmation, Direction, FeatureBar, PatternFlag, Signal};
use crate::signals::SignalConfig;
use crate::trading::{LevelCalculator, RiskConfig};

use super::Strategy;

const TREND_POINTS: f64 = 25.0;
const RSI_POINTS: f64 = 15.0;
const MACD_POINTS: f64 = 10.0;
const VOLUME_POINTS: f64 = 20.0;
const HTF_POINTS: f64 = 20.0;
const ADX_MAX_POINTS: f64 = 10.0;

/// Points and the evidence behind them for one direction.
#[derive(Debug, Clone, Default)]
pub struct ScoreCard {
    pub score: f64,
    pub reasons: Vec<String>,
    pub confirmations: BTreeMap<String, Confirmation>,
}

impl ScoreCard {
    fn add(&mut self, points: f64, reason: String) {
        self.score += points;
        self.reasons.push(reason);
    }

    fn flag(&mut self, name: &str, value: bool) {
        self.confirmations.insert(name.to_string(), Confirmation::Flag(value));
    }

    fn value(&mut self, name: &str, value: f64) {
        self.confirmations.insert(name.to_string(), Confirmation::Value(value));
    }
}

pub struct ConfluenceStrategy {
    config: SignalConfig,
    levels: LevelCalculator,
}

impl ConfluenceStrategy {
    pub fn new(config: SignalConfig, risk: &RiskConfig) -> Self {
        let levels = LevelCalculator::new(risk).with_style(config.trading_style);
        Self { config, levels }
    }

    /// Score `bar` for `direction`. The result is clamped to [0, 100].
    pub fn score(&self, bar: &FeatureBar, direction: Direction) -> ScoreCard {
        let mut card = ScoreCard::default();
        let long = direction == Direction::Long;

        // Trend
        let trend_ok = bar.trend_bias == Some(direction);
        if trend_ok {
            card.add(TREND_POINTS, format!("Trend bias {}", direction));
        }
        card.flag("trend", trend_ok);

        // Oscillator zone
        if let Some(rsi) = bar.rsi {
            let zone_ok = if long {
                rsi <= self.config.rsi_neutral_high
            } else {
                rsi >= self.config.rsi_neutral_low
            };
            if zone_ok {
                card.add(RSI_POINTS, format!("RSI {:.1} in favorable zone", rsi));
            }
            card.value("rsi", rsi);
        }

        // Momentum
        if let (Some(macd), Some(signal)) = (bar.macd, bar.macd_signal) {
            let momentum_ok = if long { macd > signal } else { macd < signal };
            if momentum_ok {
                card.add(MACD_POINTS, "MACD confirms momentum".to_string());
            }
            card.flag("macd", momentum_ok);
        }

        // Volume
        if let Some(ratio) = bar.volume_ratio {
            if ratio > self.config.volume_ratio_threshold {
                card.add(VOLUME_POINTS, format!("Volume {:.2}x average", ratio));
            }
            card.value("volume_ratio", ratio);
        }

        // Higher-timeframe alignment from the slow averages
        if let (Some(fast), Some(slow)) = (bar.ema_fast, bar.ema_slow) {
            let aligned = if long {
                fast > slow && bar.close > slow
            } else {
                fast < slow && bar.close < slow
            };
            if aligned {
                card.add(HTF_POINTS, "EMA structure aligned".to_string());
            }
            card.flag("htf_aligned", aligned);
        }

        // Trend strength
        if let Some(adx) = bar.adx {
            let span = (self.config.adx_ceiling - self.config.adx_floor).max(f64::EPSILON);
            let points = ((adx - self.config.adx_floor) / span).clamp(0.0, 1.0) * ADX_MAX_POINTS;
            if points > 0.0 {
                card.add(points, format!("ADX {:.1} trend strength", adx));
            }
            card.value("adx", adx);
        }

        // Patterns, divergences and structures
        let matching: Vec<&PatternFlag> = bar
            .patterns
            .iter()
            .chain(&bar.divergences)
            .chain(&bar.structures)
            .filter(|p| p.supports(direction, self.config.min_pattern_confidence))
            .collect();
        if !matching.is_empty() {
            let bonus = (matching.len() as f64 * self.config.pattern_bonus)
                .min(self.config.pattern_bonus_cap);
            let names: Vec<&str> = matching.iter().map(|p| p.name.as_str()).collect();
            card.add(bonus, format!("Patterns: {}", names.join(", ")));
        }
        card.value("patterns", matching.len() as f64);

        card.score = card.score.clamp(0.0, 100.0);
        card
    }

    fn build_signal(&self, symbol: &str, bar: &FeatureBar, direction: Direction, card: ScoreCard) -> Option<Signal> {
        let entry = bar.close_decimal();
        let atr = to_decimal(bar.atr_or_fallback());
        let levels = self.levels.stop_and_target(entry, direction, atr);

        let mut signal = Signal::new(
            symbol,
            direction,
            card.score,
            entry,
            levels.stop_loss,
            levels.take_profit,
            self.name(),
            bar.timestamp,
        )
        .with_reasons(card.reasons)
        .with_confirmations(card.confirmations);
        signal
            .confirmations
            .insert("atr".to_string(), Confirmation::Value(bar.atr_or_fallback()));

        signal.validate().ok().map(|_| signal)
    }
}

impl Strategy for ConfluenceStrategy {
    fn name(&self) -> &'static str {
        "confluence"
    }

    fn min_bars(&self) -> usize {
        self.config.min_bars
    }

    fn analyze(&self, symbol: &str, bars: &[FeatureBar]) -> Vec<Signal> {
        let Some(bar) = bars.last() else {
            return Vec::new();
        };
        if !bar.is_valid() {
            return Vec::new();
        }

        let mut signals: Vec<Signal> = [Direction::Long, Direction::Short]
            .into_iter()
            .map(|direction| (direction, self.score(bar, direction)))
            .filter(|(_, card)| card.score > 0.0)
            .filter_map(|(direction, card)| self.build_signal(symbol, bar, direction, card))
            .collect();

        signals.sort_by(|a, b| b.score.total_cmp(&a.score));
        signals
    }
}
