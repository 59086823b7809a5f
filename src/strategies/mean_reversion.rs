//! Bollinger band / RSI mean reversion.

use crate::models::{Direction, FeatureBar, Signal};

use super::{proposal, Strategy, MIN_RISK_REWARD};

#[derive(Debug, Clone)]
pub struct MeanReversionStrategy {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub stop_atr_multiplier: f64,

    /// Volume ratio counted as high volume
    pub high_volume_ratio: f64,
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            stop_atr_multiplier: 1.5,
            high_volume_ratio: 1.5,
        }
    }
}

impl MeanReversionStrategy {
    fn high_volume(&self, bar: &FeatureBar) -> bool {
        bar.volume_ratio.is_some_and(|r| r >= self.high_volume_ratio)
    }

    fn confidence(&self, bar: &FeatureBar, direction: Direction, lower: f64, middle: f64, upper: f64, rsi: f64) -> f64 {
        let mut confidence: f64 = 0.5;

        match direction {
            Direction::Long => {
                if middle != lower {
                    let distance = (middle - bar.close) / (middle - lower);
                    confidence += (distance * 0.1).min(0.2);
                }
                if rsi < 25.0 {
                    confidence += 0.15;
                } else if rsi < self.rsi_oversold {
                    confidence += 0.1;
                }
            }
            Direction::Short => {
                if upper != middle {
                    let distance = (bar.close - middle) / (upper - middle);
                    confidence += (distance * 0.1).min(0.2);
                }
                if rsi > 75.0 {
                    confidence += 0.15;
                } else if rsi > self.rsi_overbought {
                    confidence += 0.1;
                }
            }
        }

        if self.high_volume(bar) {
            confidence += 0.1;
        }

        confidence.clamp(0.0, 1.0)
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn min_bars(&self) -> usize {
        20
    }

    fn analyze(&self, symbol: &str, bars: &[FeatureBar]) -> Vec<Signal> {
        let Some(bar) = bars.last() else {
            return Vec::new();
        };
        let (Some(lower), Some(middle), Some(upper), Some(rsi)) =
            (bar.bb_lower, bar.bb_middle, bar.bb_upper, bar.rsi)
        else {
            return Vec::new();
        };

        let close = bar.close;
        let mut reasons = Vec::new();
        let direction = if close < lower && rsi < self.rsi_oversold {
            reasons.push(format!("Close below lower band ({:.2} < {:.2})", close, lower));
            reasons.push(format!("RSI oversold ({:.1} < {})", rsi, self.rsi_oversold));
            Direction::Long
        } else if close > upper && rsi > self.rsi_overbought {
            reasons.push(format!("Close above upper band ({:.2} > {:.2})", close, upper));
            reasons.push(format!("RSI overbought ({:.1} > {})", rsi, self.rsi_overbought));
            Direction::Short
        } else {
            return Vec::new();
        };
        if self.high_volume(bar) {
            reasons.push("High volume confirms".to_string());
        }

        let atr = bar.atr_or_fallback();
        let sign = match direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        };
        let stop = close - sign * atr * self.stop_atr_multiplier;
        let risk = (close - stop).abs();

        // Target the middle band unless it is closer than the minimum R:R
        let reward = (middle - close) * sign;
        let target = if risk > 0.0 && reward / risk < MIN_RISK_REWARD {
            close + sign * risk * MIN_RISK_REWARD
        } else {
            middle
        };

        let confidence = self.confidence(bar, direction, lower, middle, upper, rsi);

        proposal(self.name(), symbol, direction, bar, stop, target, confidence, reasons)
            .into_iter()
            .collect()
    }
}
