//! Fast/slow EMA crossover filtered by ADX and RSI.

use crate::models::{Direction, FeatureBar, Signal};

use super::{proposal, Strategy, MIN_RISK_REWARD};

#[derive(Debug, Clone)]
pub struct EmaCrossoverStrategy {
    pub adx_threshold: f64,

    /// RSI must be above this for longs and below it for shorts
    pub rsi_filter: f64,

    pub stop_atr_multiplier: f64,
    pub high_volume_ratio: f64,
}

impl Default for EmaCrossoverStrategy {
    fn default() -> Self {
        Self {
            adx_threshold: 25.0,
            rsi_filter: 50.0,
            stop_atr_multiplier: 2.0,
            high_volume_ratio: 1.5,
        }
    }
}

impl EmaCrossoverStrategy {
    fn confidence(&self, bar: &FeatureBar, direction: Direction, adx: f64, rsi: f64) -> f64 {
        let mut confidence: f64 = 0.5;

        if adx > 40.0 {
            confidence += 0.15;
        } else if adx > 30.0 {
            confidence += 0.1;
        } else if adx > self.adx_threshold {
            confidence += 0.05;
        }

        let rsi_bonus = match direction {
            Direction::Long if rsi > 60.0 => 0.1,
            Direction::Long if rsi > 55.0 => 0.05,
            Direction::Short if rsi < 40.0 => 0.1,
            Direction::Short if rsi < 45.0 => 0.05,
            _ => 0.0,
        };
        confidence += rsi_bonus;

        if let Some(sma) = bar.sma_200 {
            let with_trend = match direction {
                Direction::Long => bar.close > sma,
                Direction::Short => bar.close < sma,
            };
            if with_trend {
                confidence += 0.1;
            }
        }

        if bar.volume_ratio.is_some_and(|r| r >= self.high_volume_ratio) {
            confidence += 0.1;
        }

        confidence.clamp(0.0, 1.0)
    }
}

impl Strategy for EmaCrossoverStrategy {
    fn name(&self) -> &'static str {
        "ema_crossover"
    }

    fn min_bars(&self) -> usize {
        30
    }

    fn analyze(&self, symbol: &str, bars: &[FeatureBar]) -> Vec<Signal> {
        let [.., prev, last] = bars else {
            return Vec::new();
        };
        let (Some(fast), Some(slow), Some(prev_fast), Some(prev_slow), Some(adx), Some(rsi)) = (
            last.ema_fast,
            last.ema_slow,
            prev.ema_fast,
            prev.ema_slow,
            last.adx,
            last.rsi,
        ) else {
            return Vec::new();
        };

        if adx < self.adx_threshold {
            return Vec::new();
        }

        let cross_up = fast > slow && prev_fast <= prev_slow;
        let cross_down = fast < slow && prev_fast >= prev_slow;

        let mut reasons = Vec::new();
        let direction = if cross_up && rsi > self.rsi_filter {
            reasons.push("Fast EMA crossed above slow EMA".to_string());
            reasons.push(format!("RSI confirms momentum ({:.1} > {})", rsi, self.rsi_filter));
            Direction::Long
        } else if cross_down && rsi < self.rsi_filter {
            reasons.push("Fast EMA crossed below slow EMA".to_string());
            reasons.push(format!("RSI confirms momentum ({:.1} < {})", rsi, self.rsi_filter));
            Direction::Short
        } else {
            return Vec::new();
        };
        reasons.push(format!("ADX confirms trend ({:.1})", adx));

        let atr = last.atr_or_fallback();
        let sign = match direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        };
        let risk = atr * self.stop_atr_multiplier;
        let stop = last.close - sign * risk;
        let target = last.close + sign * risk * MIN_RISK_REWARD;

        let confidence = self.confidence(last, direction, adx, rsi);

        proposal(self.name(), symbol, direction, last, stop, target, confidence, reasons)
            .into_iter()
            .collect()
    }
}
