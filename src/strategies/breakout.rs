//! Range breakout with volume and ADX confirmation.

use crate::models::{Direction, FeatureBar, Signal};

use super::{proposal, Strategy, MIN_RISK_REWARD};

#[derive(Debug, Clone)]
pub struct BreakoutStrategy {
    /// Bars in the support/resistance window, excluding the latest
    pub lookback: usize,

    /// Volume ratio the breakout bar must exceed
    pub volume_multiplier: f64,

    pub adx_threshold: f64,
    pub stop_atr_multiplier: f64,
}

impl Default for BreakoutStrategy {
    fn default() -> Self {
        Self {
            lookback: 20,
            volume_multiplier: 1.5,
            adx_threshold: 25.0,
            stop_atr_multiplier: 1.5,
        }
    }
}

impl BreakoutStrategy {
    fn confidence(&self, bar: &FeatureBar, direction: Direction, volume_ratio: f64) -> f64 {
        let mut confidence: f64 = 0.5;

        if volume_ratio > 2.5 {
            confidence += 0.15;
        } else if volume_ratio > 2.0 {
            confidence += 0.1;
        } else if volume_ratio > 1.5 {
            confidence += 0.05;
        }

        let adx = bar.adx.unwrap_or(20.0);
        if adx > 35.0 {
            confidence += 0.15;
        } else if adx > self.adx_threshold {
            confidence += 0.1;
        }

        let range = bar.high - bar.low;
        if range > 0.0 {
            let body_ratio = (bar.close - bar.open).abs() / range;
            if body_ratio > 0.7 {
                confidence += 0.1;
            } else if body_ratio > 0.5 {
                confidence += 0.05;
            }
        }

        let with_candle = match direction {
            Direction::Long => bar.close > bar.open,
            Direction::Short => bar.close < bar.open,
        };
        if with_candle {
            confidence += 0.05;
        }

        confidence.clamp(0.0, 1.0)
    }
}

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn min_bars(&self) -> usize {
        self.lookback + 5
    }

    fn analyze(&self, symbol: &str, bars: &[FeatureBar]) -> Vec<Signal> {
        let n = bars.len();
        if n < self.lookback + 2 {
            return Vec::new();
        }

        let last = &bars[n - 1];
        let prev = &bars[n - 2];
        let window = &bars[n - 1 - self.lookback..n - 1];
        let resistance = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let support = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        let Some(volume_ratio) = last.volume_ratio else {
            return Vec::new();
        };
        if volume_ratio <= self.volume_multiplier {
            return Vec::new();
        }

        let adx_valid = match last.adx {
            Some(adx) => adx > prev.adx.unwrap_or(0.0) || adx > self.adx_threshold,
            None => true,
        };
        if !adx_valid {
            return Vec::new();
        }

        let close = last.close;
        let mut reasons = Vec::new();
        let direction = if close > resistance && prev.close <= resistance {
            reasons.push(format!("Resistance break ({:.2} > {:.2})", close, resistance));
            Direction::Long
        } else if close < support && prev.close >= support {
            reasons.push(format!("Support break ({:.2} < {:.2})", close, support));
            Direction::Short
        } else {
            return Vec::new();
        };
        reasons.push(format!("Volume {:.1}x average", volume_ratio));
        if let Some(adx) = last.adx {
            if adx > self.adx_threshold {
                reasons.push(format!("ADX confirms trend ({:.1})", adx));
            } else {
                reasons.push("ADX rising".to_string());
            }
        }

        let atr = last.atr_or_fallback();
        let sign = match direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        };
        let stop = close - sign * atr * self.stop_atr_multiplier;
        let risk = (close - stop).abs();

        let mut range_height = resistance - support;
        if range_height <= 0.0 {
            range_height = atr * 4.0;
        }
        let target = if risk > 0.0 && range_height / risk < MIN_RISK_REWARD {
            close + sign * risk * MIN_RISK_REWARD
        } else {
            close + sign * range_height
        };

        let confidence = self.confidence(last, direction, volume_ratio);

        proposal(self.name(), symbol, direction, last, stop, target, confidence, reasons)
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::flat_bars;
    use rust_decimal_macros::dec;

    fn breakout_bars(open: f64, high: f64, low: f64, close: f64, volume_ratio: f64) -> Vec<FeatureBar> {
        let mut bars = flat_bars(30, 100.0);
        let last = bars.last_mut().unwrap();
        last.open = open;
        last.high = high;
        last.low = low;
        last.close = close;
        last.atr = Some(1.0);
        last.adx = Some(30.0);
        last.volume_ratio = Some(volume_ratio);
        bars
    }

    #[test]
    fn test_resistance_break_long() {
        let bars = breakout_bars(100.2, 103.0, 100.1, 102.8, 2.2);
        let signals = BreakoutStrategy::default().analyze("BTC/USDT", &bars);
        assert_eq!(signals.len(), 1);

        let signal = &signals[0];
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.stop_loss, dec!(101.3));
        // Range of 1.0 is below 2R, so the target moves out to 2R
        assert_eq!(signal.take_profit, dec!(105.8));
        // 0.5 + 0.1 volume + 0.1 ADX + 0.1 body + 0.05 candle
        assert!((signal.score - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_support_break_short() {
        let bars = breakout_bars(99.8, 99.9, 96.9, 97.0, 3.0);
        let signals = BreakoutStrategy::default().analyze("BTC/USDT", &bars);
        assert_eq!(signals[0].direction, Direction::Short);
        assert_eq!(signals[0].stop_loss, dec!(98.5));
    }

    #[test]
    fn test_low_volume_ignored() {
        let bars = breakout_bars(100.2, 103.0, 100.1, 102.8, 1.2);
        assert!(BreakoutStrategy::default().analyze("BTC/USDT", &bars).is_empty());
    }

    #[test]
    fn test_inside_range_ignored() {
        let bars = breakout_bars(100.0, 100.4, 99.6, 100.3, 2.0);
        assert!(BreakoutStrategy::default().analyze("BTC/USDT", &bars).is_empty());
    }
}
