//! Application configuration: JSON file, then environment, then CLI flags.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::feed::FeedConfig;
use crate::signals::{MtfConfig, SignalConfig};
use crate::strategies::KNOWN_STRATEGIES;
use crate::trading::{ExecutionConfig, GateConfig, RiskConfig, SizingMethod, TradingStyle};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,

    /// Decision cycle interval (seconds)
    pub interval_secs: u64,

    pub initial_capital: Decimal,

    pub signals: SignalConfig,
    pub mtf: MtfConfig,
    pub risk: RiskConfig,
    pub gate: GateConfig,
    pub execution: ExecutionConfig,
    pub feed: FeedConfig,

    /// Journal location; no journal when unset
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC/USDT".to_string()],
            interval_secs: 60,
            initial_capital: dec!(10000),
            signals: SignalConfig::default(),
            mtf: MtfConfig::default(),
            risk: RiskConfig::default(),
            gate: GateConfig::default(),
            execution: ExecutionConfig::default(),
            feed: FeedConfig::default(),
            database_url: None,
        }
    }
}

impl AppConfig {
    /// Read the optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                let config: AppConfig = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?;
                info!(path = %path.display(), "Loaded config file");
                config
            }
            None => AppConfig::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `INITIAL_CAPITAL`, `SYMBOLS`, `DATABASE_URL` and `TRADING_STYLE`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("INITIAL_CAPITAL") {
            self.initial_capital =
                Decimal::from_str(raw.trim()).map_err(|e| invalid("INITIAL_CAPITAL", e.to_string()))?;
        }

        if let Some(raw) = lookup("SYMBOLS") {
            self.symbols = raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
        }

        if let Some(raw) = lookup("TRADING_STYLE") {
            let style = TradingStyle::from_str(&raw).map_err(|e| invalid("TRADING_STYLE", e))?;
            self.risk.trading_style = style;
            self.signals.trading_style = style;
        }

        Ok(())
    }

    /// Reject missing or out-of-range thresholds before anything starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(invalid("symbols", "at least one symbol is required"));
        }
        if self.interval_secs == 0 {
            return Err(invalid("interval_secs", "must be positive"));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(invalid("initial_capital", "must be positive"));
        }

        // Signals
        if !(0.0..=100.0).contains(&self.signals.min_score) {
            return Err(invalid("signals.min_score", "must be within [0, 100]"));
        }
        if self.signals.min_bars == 0 {
            return Err(invalid("signals.min_bars", "must be positive"));
        }
        if self.signals.max_armed_bars == 0 {
            return Err(invalid("signals.max_armed_bars", "must be positive"));
        }
        if self.signals.adx_ceiling <= self.signals.adx_floor {
            return Err(invalid("signals.adx_ceiling", "must exceed adx_floor"));
        }
        if self.signals.strategies.is_empty() {
            return Err(invalid("signals.strategies", "at least one strategy is required"));
        }
        if let Some(unknown) = self
            .signals
            .strategies
            .iter()
            .find(|name| !KNOWN_STRATEGIES.contains(&name.as_str()))
        {
            return Err(invalid("signals.strategies", format!("unknown strategy {}", unknown)));
        }
        if self.mtf.enabled && (self.mtf.ma_period == 0 || self.mtf.slope_lookback == 0) {
            return Err(invalid("mtf", "ma_period and slope_lookback must be positive"));
        }

        // Risk
        check_fraction("risk.max_risk_per_trade", self.risk.max_risk_per_trade)?;
        check_fraction("risk.max_total_exposure", self.risk.max_total_exposure)?;
        check_fraction("risk.var_loss_tolerance", self.risk.var_loss_tolerance)?;
        if !(self.risk.kelly_fraction > 0.0 && self.risk.kelly_fraction <= 1.0) {
            return Err(invalid("risk.kelly_fraction", "must be within (0, 1]"));
        }
        if SizingMethod::parse(&self.risk.sizing_method).is_none() {
            return Err(invalid(
                "risk.sizing_method",
                format!("unknown method {}", self.risk.sizing_method),
            ));
        }
        if self.risk.var_horizon_days <= 0.0 || self.risk.default_volatility <= 0.0 {
            return Err(invalid("risk", "VaR horizon and default volatility must be positive"));
        }
        if self.risk.min_risk_reward <= Decimal::ZERO {
            return Err(invalid("risk.min_risk_reward", "must be positive"));
        }
        if self.risk.scale_out.iter().sum::<Decimal>() > Decimal::ONE {
            return Err(invalid("risk.scale_out", "fractions must not exceed 1 in total"));
        }

        // Gate
        check_fraction("gate.daily_loss_limit", self.gate.daily_loss_limit)?;
        check_fraction("gate.max_total_exposure", self.gate.max_total_exposure)?;
        if self.gate.max_open_positions == 0 {
            return Err(invalid("gate.max_open_positions", "must be positive"));
        }
        if !(self.gate.max_spread > 0.0 && self.gate.max_spread <= 1.0) {
            return Err(invalid("gate.max_spread", "must be within (0, 1]"));
        }

        // Execution
        if self.execution.slippage < Decimal::ZERO || self.execution.slippage >= Decimal::ONE {
            return Err(invalid("execution.slippage", "must be within [0, 1)"));
        }
        if self.execution.commission < Decimal::ZERO || self.execution.commission >= Decimal::ONE {
            return Err(invalid("execution.commission", "must be within [0, 1)"));
        }

        // Feed
        if self.feed.timeout_secs == 0 {
            return Err(invalid("feed.timeout_secs", "must be positive"));
        }
        if self.feed.max_attempts == 0 {
            return Err(invalid("feed.max_attempts", "must be positive"));
        }

        Ok(())
    }
}

fn check_fraction(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value > Decimal::ZERO && value <= Decimal::ONE {
        Ok(())
    } else {
        Err(invalid(field, format!("{} is outside (0, 1]", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_capital, dec!(10000));
        assert_eq!(config.feed.timeout_secs, 5);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[
                ("INITIAL_CAPITAL", "2500.50"),
                ("SYMBOLS", "btc/usdt, eth/usdt,,"),
                ("TRADING_STYLE", "day"),
                ("DATABASE_URL", "sqlite::memory:"),
            ]))
            .unwrap();

        assert_eq!(config.initial_capital, dec!(2500.50));
        assert_eq!(config.symbols, vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);
        assert_eq!(config.risk.trading_style, TradingStyle::Day);
        assert_eq!(config.signals.trading_style, TradingStyle::Day);
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = AppConfig::default();
        let err = config.apply_overrides(env(&[("INITIAL_CAPITAL", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "INITIAL_CAPITAL", .. }));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.initial_capital = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.risk.max_risk_per_trade = dec!(1.5);
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "invalid risk.max_risk_per_trade: 1.5 is outside (0, 1]"
        );

        let mut config = AppConfig::default();
        config.signals.min_score = 120.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.risk.sizing_method = "martingale".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.signals.strategies = vec!["astrology".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.feed.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"symbols": ["SOL/USDT"], "signals": {"min_score": 60}, "risk": {"sizing_method": "kelly"}}"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.signals.min_score, 60.0);
        assert_eq!(config.signals.cooldown_cycles, 5);
        assert_eq!(config.risk.sizing_method, "kelly");
    }
}
