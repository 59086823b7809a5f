//! Trade direction and the scored signal emitted by the signal engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" | "buy" => Ok(Direction::Long),
            "short" | "sell" => Ok(Direction::Short),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// A named confirmation flag attached to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Confirmation {
    Flag(bool),
    Value(f64),
}

/// Agreement of the higher and confirmation timeframes with the primary signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeframeAlignment {
    /// Both timeframes agree
    Aligned,
    /// One agrees, the other has no trend
    Partial,
    /// Inconclusive; passed through unchanged
    Neutral,
}

/// A scored trade signal.
///
/// Built by a strategy, optionally adjusted by the multi-timeframe filter, then
/// handed to the execution simulator exactly once or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,

    /// Confidence score (0 to 100)
    pub score: f64,

    /// score / 100
    pub strength: f64,

    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward: f64,

    /// Human-readable reasons in the order they were found
    pub reasons: Vec<String>,

    pub confirmations: BTreeMap<String, Confirmation>,

    /// Strategy that produced the signal
    pub strategy: String,

    #[serde(default)]
    pub timeframe_alignment: Option<TimeframeAlignment>,

    /// Timestamp of the bar the signal was computed on
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        score: f64,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        strategy: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let score = clamp_score(score);
        let risk = (entry_price - stop_loss).abs();
        let reward = (take_profit - entry_price).abs();
        let risk_reward = if risk.is_zero() {
            0.0
        } else {
            (reward / risk).to_f64().unwrap_or(0.0)
        };

        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            direction,
            score,
            strength: score / 100.0,
            entry_price,
            stop_loss,
            take_profit,
            risk_reward,
            reasons: Vec::new(),
            confirmations: BTreeMap::new(),
            strategy: strategy.into(),
            timeframe_alignment: None,
            timestamp,
        }
    }

    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }

    pub fn with_confirmations(mut self, confirmations: BTreeMap<String, Confirmation>) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Add points to the score, keeping it in [0, 100].
    pub fn add_score(&mut self, points: f64, reason: impl Into<String>) {
        self.score = clamp_score(self.score + points);
        self.strength = self.score / 100.0;
        self.reasons.push(reason.into());
    }

    /// Per-unit distance between entry and stop.
    pub fn stop_distance(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Check that all levels are present and on the correct side of entry.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("Signal has no symbol".to_string());
        }
        if self.entry_price <= Decimal::ZERO {
            return Err(format!("Invalid entry price: {}", self.entry_price));
        }
        if !self.score.is_finite() {
            return Err("Signal score is not finite".to_string());
        }
        let ordered = match self.direction {
            Direction::Long => {
                self.stop_loss < self.entry_price && self.entry_price < self.take_profit
            }
            Direction::Short => {
                self.take_profit < self.entry_price && self.entry_price < self.stop_loss
            }
        };
        if !ordered {
            return Err(format!(
                "Levels out of order for {}: stop {} / entry {} / target {}",
                self.direction, self.stop_loss, self.entry_price, self.take_profit
            ));
        }
        Ok(())
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_signal(score: f64) -> Signal {
        Signal::new(
            "BTC/USDT",
            Direction::Long,
            score,
            dec!(100),
            dec!(96),
            dec!(108),
            "test",
            Utc::now(),
        )
    }

    #[test]
    fn test_score_clamped_and_strength() {
        let signal = long_signal(130.0);
        assert_eq!(signal.score, 100.0);
        assert_eq!(signal.strength, 1.0);

        let mut signal = long_signal(90.0);
        signal.add_score(20.0, "bonus");
        assert_eq!(signal.score, 100.0);
        assert_eq!(signal.reasons, vec!["bonus".to_string()]);

        let signal = long_signal(-5.0);
        assert_eq!(signal.score, 0.0);
    }

    #[test]
    fn test_risk_reward() {
        let signal = long_signal(60.0);
        assert!((signal.risk_reward - 2.0).abs() < 1e-9);
        assert_eq!(signal.stop_distance(), dec!(4));
    }

    #[test]
    fn test_validate_levels() {
        assert!(long_signal(60.0).validate().is_ok());

        let mut bad = long_signal(60.0);
        bad.stop_loss = dec!(101);
        assert!(bad.validate().is_err());

        let short = Signal::new(
            "ETH/USDT",
            Direction::Short,
            70.0,
            dec!(100),
            dec!(104),
            dec!(92),
            "test",
            Utc::now(),
        );
        assert!(short.validate().is_ok());
    }

    #[test]
    fn test_serialize_contract() {
        let mut signal = long_signal(65.0);
        signal.confirmations.insert("trend".to_string(), Confirmation::Flag(true));
        signal.confirmations.insert("adx".to_string(), Confirmation::Value(31.5));

        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["direction"], "LONG");
        assert_eq!(json["confirmations"]["trend"], true);
        assert_eq!(json["confirmations"]["adx"], 31.5);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("long".parse::<Direction>().unwrap(), Direction::Long);
        assert_eq!("SELL".parse::<Direction>().unwrap(), Direction::Short);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
