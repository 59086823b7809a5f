//! Signal engine and multi-timeframe configuration.

use serde::{Deserialize, Serialize};

use crate::trading::TradingStyle;

/// Condition that moves an armed signal into a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationRule {
    /// First new bar that opens or closes beyond the entry in the signal direction
    PriceBreak,

    /// A fixed number of new bars after arming
    Bars(u32),
}

impl Default for ConfirmationRule {
    fn default() -> Self {
        Self::PriceBreak
    }
}

/// Scoring thresholds and state-machine timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Minimum score (0 to 100) for a direction to qualify
    pub min_score: f64,

    /// Bars required before a symbol is evaluated
    pub min_bars: usize,

    /// Cycles spent in cooldown after an exit
    pub cooldown_cycles: u32,

    pub confirmation: ConfirmationRule,

    /// New bars an armed signal may wait before it is cancelled
    pub max_armed_bars: u32,

    /// Style used for signal stop/target placement
    pub trading_style: TradingStyle,

    pub rsi_neutral_low: f64,
    pub rsi_neutral_high: f64,

    /// Volume ratio above which volume counts as confirming
    pub volume_ratio_threshold: f64,

    /// ADX at which the trend-strength bonus starts
    pub adx_floor: f64,

    /// ADX at which the trend-strength bonus is full
    pub adx_ceiling: f64,

    /// Points per matching pattern, divergence or structure flag
    pub pattern_bonus: f64,
    pub pattern_bonus_cap: f64,
    pub min_pattern_confidence: f64,

    /// Registered strategy names to run each cycle
    pub strategies: Vec<String>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_score: 50.0,
            min_bars: 50,
            cooldown_cycles: 5,
            confirmation: ConfirmationRule::PriceBreak,
            max_armed_bars: 3,
            trading_style: TradingStyle::Swing,
            rsi_neutral_low: 40.0,
            rsi_neutral_high: 60.0,
            volume_ratio_threshold: 1.0,
            adx_floor: 20.0,
            adx_ceiling: 40.0,
            pattern_bonus: 5.0,
            pattern_bonus_cap: 15.0,
            min_pattern_confidence: 0.5,
            strategies: vec!["confluence".to_string()],
        }
    }
}

/// Higher/confirmation timeframe trend filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtfConfig {
    pub enabled: bool,

    /// Moving-average length used for the trend test
    pub ma_period: usize,

    /// Bars back used to measure the moving-average slope
    pub slope_lookback: usize,

    /// Bonus when both timeframes agree
    pub aligned_bonus: f64,

    /// Bonus when one agrees and the other is flat
    pub partial_bonus: f64,
}

impl Default for MtfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ma_period: 20,
            slope_lookback: 5,
            aligned_bonus: 20.0,
            partial_bonus: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SignalConfig::default();
        assert_eq!(config.min_score, 50.0);
        assert_eq!(config.cooldown_cycles, 5);
        assert_eq!(config.confirmation, ConfirmationRule::PriceBreak);
        assert_eq!(config.strategies, vec!["confluence".to_string()]);
    }

    #[test]
    fn test_confirmation_rule_serde() {
        let rule: ConfirmationRule = serde_json::from_str(r#"{"bars":2}"#).unwrap();
        assert_eq!(rule, ConfirmationRule::Bars(2));

        let config: SignalConfig =
            serde_json::from_str(r#"{"min_score": 60, "confirmation": "price_break"}"#).unwrap();
        assert_eq!(config.min_score, 60.0);
        assert_eq!(config.max_armed_bars, 3);
    }
}
