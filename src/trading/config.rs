//! Risk, gate and execution configuration.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Trading style; selects the ATR multiple used for stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingStyle {
    Day,
    #[default]
    Swing,
    Position,
    Volatile,
}

impl TradingStyle {
    /// Stop distance in ATRs.
    pub fn atr_multiplier(&self) -> Decimal {
        match self {
            TradingStyle::Day => dec!(1.5),
            TradingStyle::Swing => dec!(2.0),
            TradingStyle::Position => dec!(2.5),
            TradingStyle::Volatile => dec!(3.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingStyle::Day => "day",
            TradingStyle::Swing => "swing",
            TradingStyle::Position => "position",
            TradingStyle::Volatile => "volatile",
        }
    }
}

impl fmt::Display for TradingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "day_trading" => Ok(Self::Day),
            "swing" | "swing_trading" => Ok(Self::Swing),
            "position" | "position_trading" => Ok(Self::Position),
            "volatile" => Ok(Self::Volatile),
            other => Err(format!("unknown trading style: {}", other)),
        }
    }
}

/// Configuration for position sizing, stops and adaptive trade statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum fraction of capital risked on one trade
    pub max_risk_per_trade: Decimal,

    /// Maximum open notional as a fraction of capital
    pub max_total_exposure: Decimal,

    /// Fraction of full Kelly to use (0.25 = quarter Kelly)
    pub kelly_fraction: f64,

    /// Which position sizing method to use (combined, fixed, kelly, var)
    pub sizing_method: String,

    /// Loss tolerated at the VaR confidence level, as a fraction of capital
    pub var_loss_tolerance: Decimal,

    /// VaR horizon in days
    pub var_horizon_days: f64,

    /// Daily volatility assumed while return history is short
    pub default_volatility: f64,

    /// Returns needed before realized volatility replaces the default
    pub min_var_samples: usize,

    /// Size of the rolling return window
    pub return_window: usize,

    /// Win rate assumed while trade history is short
    pub default_win_rate: f64,

    /// Average win / average loss assumed while trade history is short
    pub default_win_loss_ratio: f64,

    /// Closed trades needed before realized win statistics drive Kelly
    pub min_kelly_trades: u32,

    /// Trading style used for ATR stop distances
    pub trading_style: TradingStyle,

    /// Target distance as a multiple of stop distance
    pub min_risk_reward: Decimal,

    /// Optional trailing distance returned with stop levels, in ATRs
    pub trailing_atr_multiplier: Decimal,

    /// Trailing stop distance from price once active, in ATRs
    pub trail_distance_atr: Decimal,

    /// Profit (in R) required before the trailing stop activates
    pub trail_activation_r: Decimal,

    /// Partial exit fractions at 1R, 2R and 3R
    pub scale_out: [Decimal; 3],

    /// Consecutive losses that trigger a trading pause
    pub consecutive_loss_pause: u32,

    /// Length of the trading pause in minutes
    pub pause_minutes: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: dec!(0.01),        // 1% per trade
            max_total_exposure: dec!(0.06),        // 6% total
            kelly_fraction: 0.25,                  // Quarter Kelly
            sizing_method: "combined".to_string(),
            var_loss_tolerance: dec!(0.02),        // 2% of capital at VaR 95
            var_horizon_days: 1.0,
            default_volatility: 0.03,              // 3% per day
            min_var_samples: 5,
            return_window: 252,                    // One trading year
            default_win_rate: 0.5,
            default_win_loss_ratio: 2.0,
            min_kelly_trades: 10,
            trading_style: TradingStyle::Swing,
            min_risk_reward: dec!(2.0),
            trailing_atr_multiplier: dec!(1.0),
            trail_distance_atr: dec!(1.5),
            trail_activation_r: dec!(1.0),
            scale_out: [dec!(0.33), dec!(0.33), dec!(0.34)],
            consecutive_loss_pause: 3,
            pause_minutes: 15,
        }
    }
}

/// Thresholds for the pre-trade gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Daily realized loss limit as a fraction of capital
    pub daily_loss_limit: Decimal,

    /// Consecutive losses after which new entries are refused
    pub max_consecutive_losses: u32,

    /// Maximum simultaneously open positions
    pub max_open_positions: usize,

    /// Maximum open notional as a fraction of capital
    pub max_total_exposure: Decimal,

    /// Maximum bid/ask spread as a fraction of price
    pub max_spread: f64,

    /// Minimum volume relative to its average (advisory)
    pub min_volume_ratio: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit: dec!(0.03),    // 3% daily loss
            max_consecutive_losses: 3,
            max_open_positions: 3,
            max_total_exposure: dec!(0.06),
            max_spread: 0.002,               // 0.2%
            min_volume_ratio: 0.5,
        }
    }
}

/// Simulated fill costs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Adverse price shift applied to fills (fraction of price)
    pub slippage: Decimal,

    /// Commission as a fraction of notional, charged on entry and exit
    pub commission: Decimal,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage: dec!(0.0001),   // 0.01%
            commission: dec!(0.001),  // 0.1%
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_multipliers() {
        assert_eq!(TradingStyle::Day.atr_multiplier(), dec!(1.5));
        assert_eq!(TradingStyle::Swing.atr_multiplier(), dec!(2.0));
        assert_eq!(TradingStyle::Position.atr_multiplier(), dec!(2.5));
        assert_eq!(TradingStyle::Volatile.atr_multiplier(), dec!(3.0));
        assert_eq!("swing_trading".parse::<TradingStyle>().unwrap(), TradingStyle::Swing);
        assert!("scalp".parse::<TradingStyle>().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RiskConfig = serde_json::from_str(r#"{"max_risk_per_trade": "0.02"}"#).unwrap();
        assert_eq!(config.max_risk_per_trade, dec!(0.02));
        assert_eq!(config.max_total_exposure, dec!(0.06));
        assert_eq!(config.return_window, 252);
    }
}
