//! ATR-based stop/target placement, trailing stops and scale-out ladders.

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{Direction, Position};
use super::{RiskConfig, TradingStyle};

/// Stop and target placed around an entry.
#[derive(Debug, Clone, Serialize)]
pub struct StopLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub stop_distance: Decimal,
    pub target_distance: Decimal,
    pub risk_reward: Decimal,

    /// ATR × trailing multiplier, when trailing is configured
    pub trailing_distance: Option<Decimal>,
}

/// What to do when a scale-out level is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    MoveStopToBreakeven,
    EnableTrailing,
    CloseRemainder,
}

impl ScaleAction {
    pub fn note(&self) -> &'static str {
        match self {
            ScaleAction::MoveStopToBreakeven => "Move stop to breakeven",
            ScaleAction::EnableTrailing => "Enable trailing stop",
            ScaleAction::CloseRemainder => "Close remainder or let it trail",
        }
    }
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.note())
    }
}

/// One rung of the scale-out ladder.
#[derive(Debug, Clone, Serialize)]
pub struct ScaleOutLevel {
    pub r_multiple: u32,
    pub price: Decimal,

    /// Fraction of the original size to exit here
    pub fraction: Decimal,

    pub action: ScaleAction,
}

/// Stop, target and exit-management calculations for a trading style.
#[derive(Debug, Clone)]
pub struct LevelCalculator {
    style: TradingStyle,
    min_risk_reward: Decimal,
    trailing_atr_multiplier: Decimal,
    trail_distance_atr: Decimal,
    trail_activation_r: Decimal,
    scale_out: [Decimal; 3],
}

impl LevelCalculator {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            style: config.trading_style,
            min_risk_reward: config.min_risk_reward,
            trailing_atr_multiplier: config.trailing_atr_multiplier,
            trail_distance_atr: config.trail_distance_atr,
            trail_activation_r: config.trail_activation_r,
            scale_out: config.scale_out,
        }
    }

    /// Same calculator with a different trading style.
    pub fn with_style(mut self, style: TradingStyle) -> Self {
        self.style = style;
        self
    }

    pub fn style(&self) -> TradingStyle {
        self.style
    }

    /// Place stop and target `ATR × style multiplier` and `stop × min R:R` from entry.
    pub fn stop_and_target(&self, entry: Decimal, direction: Direction, atr: Decimal) -> StopLevels {
        let stop_distance = atr.abs() * self.style.atr_multiplier();
        let target_distance = stop_distance * self.min_risk_reward;
        let sign = direction.sign();

        let trailing_distance = (self.trailing_atr_multiplier > Decimal::ZERO)
            .then(|| atr.abs() * self.trailing_atr_multiplier);

        StopLevels {
            stop_loss: entry - stop_distance * sign,
            take_profit: entry + target_distance * sign,
            stop_distance,
            target_distance,
            risk_reward: self.min_risk_reward,
            trailing_distance,
        }
    }

    /// New stop for `position` at `price`, or `None` when it should not move.
    ///
    /// Trailing activates once the position is at least `trail_activation_r`
    /// in profit and only ever tightens the stop.
    pub fn trailing_stop(&self, position: &Position, price: Decimal, atr: Decimal) -> Option<Decimal> {
        let one_r = position.risk_per_unit();
        if one_r.is_zero() || position.favorable_move(price) < one_r * self.trail_activation_r {
            return None;
        }

        let trail = atr.abs() * self.trail_distance_atr;
        let candidate = match position.direction {
            Direction::Long => (price - trail).max(position.stop_loss),
            Direction::Short => (price + trail).min(position.stop_loss),
        };

        (candidate != position.stop_loss).then_some(candidate)
    }

    /// Partial exits at 1R, 2R and 3R from entry and the initial stop.
    pub fn scale_out_ladder(&self, entry: Decimal, stop: Decimal, direction: Direction) -> Vec<ScaleOutLevel> {
        let one_r = (entry - stop).abs();
        let actions = [
            ScaleAction::MoveStopToBreakeven,
            ScaleAction::EnableTrailing,
            ScaleAction::CloseRemainder,
        ];

        actions
            .into_iter()
            .zip(self.scale_out)
            .enumerate()
            .map(|(i, (action, fraction))| {
                let r_multiple = i as u32 + 1;
                ScaleOutLevel {
                    r_multiple,
                    price: entry + one_r * Decimal::from(r_multiple) * direction.sign(),
                    fraction,
                    action,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn calculator() -> LevelCalculator {
        LevelCalculator::new(&RiskConfig::default())
    }

    fn long_position() -> Position {
        Position::new(
            "p1".to_string(),
            "BTC/USDT".to_string(),
            Direction::Long,
            dec!(100),
            dec!(1),
            dec!(98),
            dec!(106),
            "test".to_string(),
            Decimal::ZERO,
            Utc::now(),
        )
    }

    #[test]
    fn test_swing_levels() {
        let levels = calculator().stop_and_target(dec!(100), Direction::Long, dec!(2));
        assert_eq!(levels.stop_loss, dec!(96));
        assert_eq!(levels.take_profit, dec!(108));
        assert_eq!(levels.trailing_distance, Some(dec!(2)));

        let short = calculator().stop_and_target(dec!(100), Direction::Short, dec!(2));
        assert_eq!(short.stop_loss, dec!(104));
        assert_eq!(short.take_profit, dec!(92));
    }

    #[test]
    fn test_style_changes_distance() {
        let calc = calculator().with_style(TradingStyle::Volatile);
        let levels = calc.stop_and_target(dec!(50), Direction::Long, dec!(1));
        assert_eq!(levels.stop_distance, dec!(3));
        assert_eq!(levels.target_distance, dec!(6));
    }

    #[test]
    fn test_trailing_waits_for_one_r() {
        let pos = long_position();
        assert_eq!(calculator().trailing_stop(&pos, dec!(101.5), dec!(1)), None);
    }

    #[test]
    fn test_trailing_tightens_only() {
        let calc = calculator();
        let mut pos = long_position();

        // +3 move, ATR 1: 103 - 1.5 = 101.5
        let stop = calc.trailing_stop(&pos, dec!(103), dec!(1));
        assert_eq!(stop, Some(dec!(101.5)));
        pos.stop_loss = dec!(101.5);

        // Pullback would loosen the stop: no change
        assert_eq!(calc.trailing_stop(&pos, dec!(102.2), dec!(1)), None);
    }

    #[test]
    fn test_trailing_short() {
        let calc = calculator();
        let pos = Position::new(
            "p2".to_string(),
            "ETH/USDT".to_string(),
            Direction::Short,
            dec!(100),
            dec!(1),
            dec!(102),
            dec!(94),
            "test".to_string(),
            Decimal::ZERO,
            Utc::now(),
        );
        assert_eq!(calc.trailing_stop(&pos, dec!(97), dec!(1)), Some(dec!(98.5)));
    }

    #[test]
    fn test_scale_out_ladder() {
        let ladder = calculator().scale_out_ladder(dec!(100), dec!(98), Direction::Long);
        let prices: Vec<Decimal> = ladder.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![dec!(102), dec!(104), dec!(106)]);

        let fractions: Decimal = ladder.iter().map(|l| l.fraction).sum();
        assert_eq!(fractions, Decimal::ONE);
        assert_eq!(ladder[0].action, ScaleAction::MoveStopToBreakeven);
        assert_eq!(ladder[1].action, ScaleAction::EnableTrailing);

        let short = calculator().scale_out_ladder(dec!(100), dec!(102), Direction::Short);
        assert_eq!(short[2].price, dec!(94));
    }
}
