//! Per-bar feature records produced by the upstream feature provider.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// A detected chart pattern, divergence or market-structure flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternFlag {
    /// Detector name (e.g. "bullish_engulfing", "rsi_divergence", "order_block")
    pub name: String,

    /// Direction the pattern favours
    pub bias: Direction,

    /// Whether the detector fired on this bar
    #[serde(default = "default_true")]
    pub detected: bool,

    /// Detector confidence (0.0 to 1.0)
    #[serde(default)]
    pub confidence: f64,
}

fn default_true() -> bool {
    true
}

impl PatternFlag {
    pub fn new(name: impl Into<String>, bias: Direction, confidence: f64) -> Self {
        Self {
            name: name.into(),
            bias,
            detected: true,
            confidence,
        }
    }

    /// True when the flag fired in `direction` with at least `min_confidence`.
    pub fn supports(&self, direction: Direction, min_confidence: f64) -> bool {
        self.detected && self.bias == direction && self.confidence >= min_confidence
    }
}

/// One bar of OHLCV data plus the already-computed indicator values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBar {
    /// Bar open time
    pub timestamp: DateTime<Utc>,

    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,

    /// Average true range
    #[serde(default)]
    pub atr: Option<f64>,

    /// Long-term trend bias (close vs. SMA 200); `None` when flat
    #[serde(default)]
    pub trend_bias: Option<Direction>,

    /// RSI oscillator (0 to 100)
    #[serde(default)]
    pub rsi: Option<f64>,

    #[serde(default)]
    pub macd: Option<f64>,

    #[serde(default)]
    pub macd_signal: Option<f64>,

    /// Volume divided by its moving average
    #[serde(default)]
    pub volume_ratio: Option<f64>,

    /// Trend strength (ADX)
    #[serde(default)]
    pub adx: Option<f64>,

    #[serde(default)]
    pub ema_fast: Option<f64>,

    #[serde(default)]
    pub ema_slow: Option<f64>,

    #[serde(default)]
    pub sma_200: Option<f64>,

    #[serde(default)]
    pub bb_upper: Option<f64>,

    #[serde(default)]
    pub bb_middle: Option<f64>,

    #[serde(default)]
    pub bb_lower: Option<f64>,

    /// Bid/ask spread as a fraction of price
    #[serde(default)]
    pub spread: Option<f64>,

    #[serde(default)]
    pub patterns: Vec<PatternFlag>,

    #[serde(default)]
    pub divergences: Vec<PatternFlag>,

    /// Order blocks, fair value gaps and similar structure flags
    #[serde(default)]
    pub structures: Vec<PatternFlag>,
}

impl FeatureBar {
    /// Create a bar with OHLCV data only; all indicators absent.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            atr: None,
            trend_bias: None,
            rsi: None,
            macd: None,
            macd_signal: None,
            volume_ratio: None,
            adx: None,
            ema_fast: None,
            ema_slow: None,
            sma_200: None,
            bb_upper: None,
            bb_middle: None,
            bb_lower: None,
            spread: None,
            patterns: Vec::new(),
            divergences: Vec::new(),
            structures: Vec::new(),
        }
    }

    /// ATR, or 2% of the close when the provider did not supply a usable value.
    pub fn atr_or_fallback(&self) -> f64 {
        match self.atr {
            Some(atr) if atr.is_finite() && atr > 0.0 => atr,
            _ => self.close * 0.02,
        }
    }

    /// Whether the price fields are usable at all.
    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
            && self.volume.is_finite()
    }

    pub fn close_decimal(&self) -> Decimal {
        to_decimal(self.close)
    }
}

/// Bar series for one symbol across the primary, higher and confirmation timeframes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSet {
    pub primary: Vec<FeatureBar>,

    #[serde(default)]
    pub higher: Vec<FeatureBar>,

    #[serde(default)]
    pub confirmation: Vec<FeatureBar>,
}

impl FeatureSet {
    pub fn new(primary: Vec<FeatureBar>) -> Self {
        Self {
            primary,
            higher: Vec::new(),
            confirmation: Vec::new(),
        }
    }

    /// Latest primary-timeframe bar.
    pub fn latest(&self) -> Option<&FeatureBar> {
        self.primary.last()
    }
}

/// Convert a provider float into a price, rounded to 8 decimal places.
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value)
        .map(|d| d.round_dp(8))
        .unwrap_or(Decimal::ZERO)
}
