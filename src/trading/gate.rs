//! Pre-trade gate: independent safety checks evaluated before every entry.
//!
//! Each check reports pass/fail with a severity. An entry is allowed only when
//! every critical check passes; warnings are logged but never block.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, warn};

use super::GateConfig;

/// How much a failing check matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Outcome of a single check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            severity: Severity::Info,
            message: message.into(),
        }
    }

    fn fail(name: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            severity,
            message: message.into(),
        }
    }

    /// A failed critical check.
    pub fn is_blocking(&self) -> bool {
        !self.passed && self.severity == Severity::Critical
    }
}

/// Portfolio and market state the checks are evaluated against.
#[derive(Debug, Clone)]
pub struct GateContext {
    pub now: DateTime<Utc>,
    pub capital: Decimal,

    /// Realized P&L today
    pub daily_pnl: Decimal,

    pub consecutive_losses: u32,
    pub paused_until: Option<DateTime<Utc>>,
    pub open_positions: usize,

    /// Open notional / capital
    pub exposure: Decimal,

    /// Spread as a fraction of price, if known
    pub spread: Option<f64>,

    /// Volume / average volume, if known
    pub volume_ratio: Option<f64>,
}

/// A single pre-trade predicate.
pub trait PreTradeCheck: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &GateContext) -> CheckResult;
}

// ==================== Checks ====================

/// Refuses entries while a loss-streak pause is active.
pub struct PauseCheck;

impl PreTradeCheck for PauseCheck {
    fn name(&self) -> &'static str {
        "pause"
    }

    fn evaluate(&self, ctx: &GateContext) -> CheckResult {
        match ctx.paused_until {
            Some(until) if until > ctx.now => {
                let remaining = (until - ctx.now).num_seconds().max(0);
                CheckResult::fail(
                    self.name(),
                    Severity::Critical,
                    format!("Trading paused for {}m{}s after loss streak", remaining / 60, remaining % 60),
                )
            }
            _ => CheckResult::pass(self.name(), "No active pause"),
        }
    }
}

pub struct DailyLossCheck {
    pub limit: Decimal,
}

impl PreTradeCheck for DailyLossCheck {
    fn name(&self) -> &'static str {
        "daily_loss"
    }

    fn evaluate(&self, ctx: &GateContext) -> CheckResult {
        let max_loss = ctx.capital * self.limit;
        if ctx.daily_pnl <= -max_loss {
            CheckResult::fail(
                self.name(),
                Severity::Critical,
                format!(
                    "Daily loss limit reached: {:.2} <= -{:.2} ({}%)",
                    ctx.daily_pnl,
                    max_loss,
                    self.limit * dec!(100)
                ),
            )
        } else {
            CheckResult::pass(self.name(), format!("Daily P&L {:.2}", ctx.daily_pnl))
        }
    }
}

pub struct ConsecutiveLossCheck {
    pub max: u32,
}

impl PreTradeCheck for ConsecutiveLossCheck {
    fn name(&self) -> &'static str {
        "consecutive_losses"
    }

    fn evaluate(&self, ctx: &GateContext) -> CheckResult {
        if ctx.consecutive_losses >= self.max {
            CheckResult::fail(
                self.name(),
                Severity::Critical,
                format!("Consecutive losses: {} >= {}", ctx.consecutive_losses, self.max),
            )
        } else {
            CheckResult::pass(self.name(), format!("{} consecutive losses", ctx.consecutive_losses))
        }
    }
}

pub struct PositionCountCheck {
    pub max: usize,
}

impl PreTradeCheck for PositionCountCheck {
    fn name(&self) -> &'static str {
        "open_positions"
    }

    fn evaluate(&self, ctx: &GateContext) -> CheckResult {
        if ctx.open_positions >= self.max {
            CheckResult::fail(
                self.name(),
                Severity::Critical,
                format!("Max open positions: {} >= {}", ctx.open_positions, self.max),
            )
        } else {
            CheckResult::pass(self.name(), format!("{}/{} positions open", ctx.open_positions, self.max))
        }
    }
}

pub struct ExposureCheck {
    pub max: Decimal,
}

impl PreTradeCheck for ExposureCheck {
    fn name(&self) -> &'static str {
        "exposure"
    }

    fn evaluate(&self, ctx: &GateContext) -> CheckResult {
        if ctx.exposure >= self.max {
            CheckResult::fail(
                self.name(),
                Severity::Critical,
                format!(
                    "Exposure limit: {:.2}% >= {:.2}%",
                    ctx.exposure * dec!(100),
                    self.max * dec!(100)
                ),
            )
        } else {
            CheckResult::pass(self.name(), format!("Exposure {:.2}%", ctx.exposure * dec!(100)))
        }
    }
}

pub struct SpreadCheck {
    pub max: f64,
}

impl PreTradeCheck for SpreadCheck {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn evaluate(&self, ctx: &GateContext) -> CheckResult {
        match ctx.spread {
            Some(spread) if !spread.is_finite() || spread > self.max => CheckResult::fail(
                self.name(),
                Severity::Critical,
                format!("Spread too wide: {:.3}% > {:.3}%", spread * 100.0, self.max * 100.0),
            ),
            Some(spread) => CheckResult::pass(self.name(), format!("Spread {:.3}%", spread * 100.0)),
            None => CheckResult::pass(self.name(), "No spread data"),
        }
    }
}

/// Advisory only: thin volume produces a warning, never a block.
pub struct LiquidityCheck {
    pub min_volume_ratio: f64,
}

impl PreTradeCheck for LiquidityCheck {
    fn name(&self) -> &'static str {
        "liquidity"
    }

    fn evaluate(&self, ctx: &GateContext) -> CheckResult {
        match ctx.volume_ratio {
            Some(ratio) if ratio.is_finite() && ratio > 0.0 => {
                if ratio < self.min_volume_ratio {
                    CheckResult::fail(
                        self.name(),
                        Severity::Warning,
                        format!("Low volume: {:.2}x average < {:.2}x", ratio, self.min_volume_ratio),
                    )
                } else {
                    CheckResult::pass(self.name(), format!("Volume {:.2}x average", ratio))
                }
            }
            _ => CheckResult::fail(self.name(), Severity::Warning, "Average volume unavailable"),
        }
    }
}

// ==================== Gate ====================

/// Result of running the gate.
#[derive(Debug, Clone, Serialize)]
pub struct EntryValidation {
    pub allowed: bool,
    pub reason: String,
    pub checks: Vec<CheckResult>,
}

impl EntryValidation {
    pub fn allow(checks: Vec<CheckResult>) -> Self {
        Self {
            allowed: true,
            reason: "Entry conditions met".to_string(),
            checks,
        }
    }

    pub fn deny(reason: impl Into<String>, checks: Vec<CheckResult>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            checks,
        }
    }

    /// Messages of failed non-blocking checks.
    pub fn warnings(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == Severity::Warning)
            .map(|c| c.message.as_str())
            .collect()
    }
}

/// Ordered list of pre-trade checks.
pub struct PreTradeGate {
    checks: Vec<Box<dyn PreTradeCheck>>,
}

impl PreTradeGate {
    /// An empty gate that allows everything.
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// The standard check set.
    pub fn standard(config: &GateConfig) -> Self {
        Self::new()
            .with_check(PauseCheck)
            .with_check(DailyLossCheck { limit: config.daily_loss_limit })
            .with_check(ConsecutiveLossCheck { max: config.max_consecutive_losses })
            .with_check(PositionCountCheck { max: config.max_open_positions })
            .with_check(ExposureCheck { max: config.max_total_exposure })
            .with_check(SpreadCheck { max: config.max_spread })
            .with_check(LiquidityCheck { min_volume_ratio: config.min_volume_ratio })
    }

    pub fn with_check(mut self, check: impl PreTradeCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check; deny with the first blocking failure's message.
    pub fn validate_entry(&self, ctx: &GateContext) -> EntryValidation {
        let results: Vec<CheckResult> = self.checks.iter().map(|c| c.evaluate(ctx)).collect();

        for result in results.iter().filter(|r| !r.passed && r.severity == Severity::Warning) {
            warn!(check = result.name, message = %result.message, "Pre-trade warning");
        }

        match results.iter().find(|r| r.is_blocking()) {
            Some(blocking) => {
                debug!(check = blocking.name, "Entry blocked");
                let reason = blocking.message.clone();
                EntryValidation::deny(reason, results)
            }
            None => EntryValidation::allow(results),
        }
    }
}

impl Default for PreTradeGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn context() -> GateContext {
        GateContext {
            now: Utc::now(),
            capital: dec!(10000),
            daily_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            paused_until: None,
            open_positions: 0,
            exposure: Decimal::ZERO,
            spread: Some(0.0001),
            volume_ratio: Some(1.2),
        }
    }

    fn gate() -> PreTradeGate {
        PreTradeGate::standard(&GateConfig::default())
    }

    #[test]
    fn test_clean_context_allowed() {
        let validation = gate().validate_entry(&context());
        assert!(validation.allowed);
        assert_eq!(validation.checks.len(), 7);
        assert!(validation.warnings().is_empty());
    }

    #[test]
    fn test_pause_blocks() {
        let mut ctx = context();
        ctx.paused_until = Some(ctx.now + Duration::minutes(10));
        let validation = gate().validate_entry(&ctx);
        assert!(!validation.allowed);
        assert!(validation.reason.contains("paused"));

        ctx.paused_until = Some(ctx.now - Duration::minutes(1));
        assert!(gate().validate_entry(&ctx).allowed);
    }

    #[test]
    fn test_daily_loss_blocks() {
        let mut ctx = context();
        ctx.daily_pnl = dec!(-299);
        assert!(gate().validate_entry(&ctx).allowed);

        ctx.daily_pnl = dec!(-300);
        let validation = gate().validate_entry(&ctx);
        assert!(!validation.allowed);
        assert!(validation.reason.starts_with("Daily loss limit"));
    }

    #[test]
    fn test_position_and_exposure_limits() {
        let mut ctx = context();
        ctx.open_positions = 3;
        assert!(!gate().validate_entry(&ctx).allowed);

        let mut ctx = context();
        ctx.exposure = dec!(0.06);
        let validation = gate().validate_entry(&ctx);
        assert!(!validation.allowed);
        assert!(validation.reason.starts_with("Exposure limit"));
    }

    #[test]
    fn test_first_blocking_reason_wins() {
        let mut ctx = context();
        ctx.consecutive_losses = 5;
        ctx.spread = Some(0.01);
        let validation = gate().validate_entry(&ctx);
        assert!(validation.reason.starts_with("Consecutive losses"));
    }

    #[test]
    fn test_spread_blocks() {
        let mut ctx = context();
        ctx.spread = Some(0.003);
        let validation = gate().validate_entry(&ctx);
        assert!(!validation.allowed);
        assert!(validation.reason.starts_with("Spread too wide"));
    }

    #[test]
    fn test_liquidity_only_warns() {
        let mut ctx = context();
        ctx.volume_ratio = Some(0.2);
        let validation = gate().validate_entry(&ctx);
        assert!(validation.allowed);
        assert_eq!(validation.warnings().len(), 1);

        ctx.volume_ratio = None;
        let validation = gate().validate_entry(&ctx);
        assert!(validation.allowed);
        assert_eq!(validation.warnings(), vec!["Average volume unavailable"]);
    }

    #[test]
    fn test_custom_gate_composition() {
        let gate = PreTradeGate::new().with_check(SpreadCheck { max: 0.001 });
        assert_eq!(gate.check_names(), vec!["spread"]);

        let mut ctx = context();
        ctx.open_positions = 50;
        assert!(gate.validate_entry(&ctx).allowed);
    }
}
