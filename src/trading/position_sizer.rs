//! Position sizing: fixed fraction, Kelly criterion and Value-at-Risk, plus the
//! rolling trade statistics that feed them.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use statrs::distribution::{Continuous, Normal};
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

use crate::models::to_decimal;
use super::RiskConfig;

/// z-score of the one-sided 95% normal quantile.
pub const Z_95: f64 = 1.645;

/// z-score of the one-sided 99% normal quantile.
pub const Z_99: f64 = 2.326;

/// Position sizing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    /// Smallest of fixed fraction, Kelly and VaR
    Combined,
    /// Fixed percentage of capital at risk
    FixedFraction,
    /// Kelly criterion (fraction based on edge and odds)
    Kelly,
    /// Largest position whose VaR stays within the loss tolerance
    Var,
}

impl SizingMethod {
    /// Parse a method name; `None` when unknown.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "combined" => Some(Self::Combined),
            "fixed" | "fixed_fraction" => Some(Self::FixedFraction),
            "kelly" => Some(Self::Kelly),
            "var" | "value_at_risk" => Some(Self::Var),
            _ => None,
        }
    }

    /// Parse a method name, falling back to `Combined`.
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::Combined)
    }
}

/// Which rule produced the final size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeConstraint {
    FixedFraction,
    Kelly,
    Var,
    ExposureCap,
}

/// Result of a sizing computation.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSizeResult {
    /// Size in base units
    pub size: Decimal,

    /// Notional in quote currency
    pub size_quote: Decimal,

    /// Loss if the stop is hit
    pub risk_amount: Decimal,

    /// risk_amount as a percentage of capital
    pub risk_percent: Decimal,

    pub kelly_full: f64,
    pub kelly_used: f64,

    pub limited_by: SizeConstraint,
}

/// Kelly criterion breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct KellyResult {
    pub full_kelly: f64,
    pub half_kelly: f64,
    pub quarter_kelly: f64,

    /// Configured fraction of full Kelly, capped at max risk per trade
    pub recommended: f64,

    pub win_rate: f64,
    pub avg_win_loss_ratio: f64,
}

/// Parametric Value-at-Risk for the current capital.
#[derive(Debug, Clone, Serialize)]
pub struct VaRResult {
    pub var_95: f64,
    pub var_99: f64,
    pub cvar_95: f64,

    /// Largest position value whose VaR 95 stays within the loss tolerance
    pub max_position_95: f64,

    /// Same at 99%
    pub max_position_99: f64,

    /// Per-period volatility used
    pub volatility: f64,

    /// Horizon in days
    pub time_horizon: f64,
}

/// Rolling trade statistics fed by closed trades.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeStats {
    pub wins: u32,
    pub losses: u32,
    pub total_win_amount: Decimal,

    /// Absolute value of summed losses
    pub total_loss_amount: Decimal,

    /// Per-trade returns as fractions, newest last
    pub returns: VecDeque<f64>,

    pub consecutive_losses: u32,

    /// Realized P&L for `day`
    pub daily_pnl: Decimal,

    pub day: Option<NaiveDate>,

    /// New entries are refused until this time
    pub pause_until: Option<DateTime<Utc>>,
}

impl TradeStats {
    pub fn total_trades(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn win_rate(&self) -> Option<f64> {
        let total = self.total_trades();
        (total > 0).then(|| self.wins as f64 / total as f64)
    }

    /// Average win over average loss, once both exist.
    pub fn win_loss_ratio(&self) -> Option<f64> {
        if self.wins == 0 || self.losses == 0 || self.total_loss_amount.is_zero() {
            return None;
        }
        let avg_win = self.total_win_amount / Decimal::from(self.wins);
        let avg_loss = self.total_loss_amount / Decimal::from(self.losses);
        (avg_win / avg_loss).to_f64()
    }
}

/// Calculator for position sizes, risk statistics and the loss-streak pause.
pub struct PositionSizer {
    config: RiskConfig,
    method: SizingMethod,
    stats: TradeStats,
}

impl PositionSizer {
    /// Create a new position sizer with given config.
    pub fn new(config: RiskConfig) -> Self {
        let method = SizingMethod::parse_or_default(&config.sizing_method);
        Self {
            config,
            method,
            stats: TradeStats::default(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn method(&self) -> SizingMethod {
        self.method
    }

    pub fn stats(&self) -> &TradeStats {
        &self.stats
    }

    // ==================== Sizing ====================

    /// Calculate the position size for a trade.
    ///
    /// # Arguments
    /// * `capital` - Current capital
    /// * `entry` - Intended entry price
    /// * `stop` - Stop-loss price
    /// * `open_notional` - Notional of positions already open
    pub fn calculate_size(
        &self,
        capital: Decimal,
        entry: Decimal,
        stop: Decimal,
        open_notional: Decimal,
    ) -> PositionSizeResult {
        let kelly = self.kelly();

        if capital <= Decimal::ZERO || entry <= Decimal::ZERO {
            let distance = (entry - stop).abs();
            return self.result(Decimal::ZERO, entry, distance, capital, &kelly, SizeConstraint::FixedFraction);
        }

        let mut distance = (entry - stop).abs();
        if distance.is_zero() {
            warn!(entry = %entry, "Stop equals entry, assuming 2% stop distance");
            distance = entry * dec!(0.02);
        }

        let fixed = self.fixed_fraction_size(capital, distance);
        let kelly_size = capital * to_decimal(kelly.recommended) / distance;
        let var_size = to_decimal(self.var(capital).max_position_95) / entry;

        let (mut size, mut limited_by) = match self.method {
            SizingMethod::FixedFraction => (fixed, SizeConstraint::FixedFraction),
            SizingMethod::Kelly => (kelly_size, SizeConstraint::Kelly),
            SizingMethod::Var => (var_size, SizeConstraint::Var),
            SizingMethod::Combined => [
                (fixed, SizeConstraint::FixedFraction),
                (kelly_size, SizeConstraint::Kelly),
                (var_size, SizeConstraint::Var),
            ]
            .into_iter()
            .fold((fixed, SizeConstraint::FixedFraction), |best, candidate| {
                if candidate.0 < best.0 { candidate } else { best }
            }),
        };

        // Cap total exposure at the remaining capacity
        let remaining_capacity = capital * self.config.max_total_exposure - open_notional;
        if remaining_capacity <= Decimal::ZERO {
            debug!(open_notional = %open_notional, "No exposure capacity left");
            size = Decimal::ZERO;
            limited_by = SizeConstraint::ExposureCap;
        } else if size * entry > remaining_capacity {
            size = remaining_capacity / entry;
            limited_by = SizeConstraint::ExposureCap;
        }

        let size = size
            .max(Decimal::ZERO)
            .round_dp_with_strategy(8, RoundingStrategy::ToZero);

        self.result(size, entry, distance, capital, &kelly, limited_by)
    }

    fn result(
        &self,
        size: Decimal,
        entry: Decimal,
        stop_distance: Decimal,
        capital: Decimal,
        kelly: &KellyResult,
        limited_by: SizeConstraint,
    ) -> PositionSizeResult {
        let risk_amount = size * stop_distance;
        let risk_percent = if capital > Decimal::ZERO {
            risk_amount / capital * dec!(100)
        } else {
            Decimal::ZERO
        };

        PositionSizeResult {
            size,
            size_quote: size * entry,
            risk_amount,
            risk_percent,
            kelly_full: kelly.full_kelly,
            kelly_used: kelly.recommended,
            limited_by,
        }
    }

    /// Fixed fraction position sizing.
    fn fixed_fraction_size(&self, capital: Decimal, stop_distance: Decimal) -> Decimal {
        capital * self.config.max_risk_per_trade / stop_distance
    }

    // ==================== Kelly ====================

    /// Kelly fractions from rolling statistics, or the configured defaults
    /// while the history is shorter than `min_kelly_trades`.
    pub fn kelly(&self) -> KellyResult {
        let enough_history = self.stats.total_trades() >= self.config.min_kelly_trades;
        let win_rate = self
            .stats
            .win_rate()
            .filter(|_| enough_history)
            .unwrap_or(self.config.default_win_rate);
        let ratio = self
            .stats
            .win_loss_ratio()
            .filter(|_| enough_history)
            .unwrap_or(self.config.default_win_loss_ratio);

        self.kelly_from(win_rate, ratio)
    }

    /// Kelly criterion.
    ///
    /// f* = (p * b - q) / b
    /// where:
    ///   p = probability of winning (win rate)
    ///   q = probability of losing (1 - p)
    ///   b = ratio of average win to average loss
    pub fn kelly_from(&self, win_rate: f64, avg_win_loss_ratio: f64) -> KellyResult {
        let p = win_rate.clamp(0.0, 1.0);
        let q = 1.0 - p;
        let b = avg_win_loss_ratio;

        let full_kelly = if b > 0.0 && b.is_finite() {
            ((p * b - q) / b).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let max_risk = self.config.max_risk_per_trade.to_f64().unwrap_or(0.01);
        let recommended = (full_kelly * self.config.kelly_fraction).min(max_risk);

        KellyResult {
            full_kelly,
            half_kelly: full_kelly * 0.5,
            quarter_kelly: full_kelly * 0.25,
            recommended,
            win_rate: p,
            avg_win_loss_ratio: b,
        }
    }

    // ==================== Value at Risk ====================

    /// Volatility of recent trade returns, or the default while history is short.
    pub fn volatility(&self) -> f64 {
        if self.stats.returns.len() < self.config.min_var_samples {
            return self.config.default_volatility;
        }
        let returns: Vec<f64> = self.stats.returns.iter().copied().collect();
        let sigma = returns.std_dev();
        if sigma.is_finite() && sigma > 0.0 {
            sigma
        } else {
            self.config.default_volatility
        }
    }

    /// VaR for `capital` using the current volatility estimate.
    pub fn var(&self, capital: Decimal) -> VaRResult {
        self.var_with(capital, self.volatility())
    }

    /// Parametric VaR for `capital` at volatility `sigma`.
    pub fn var_with(&self, capital: Decimal, sigma: f64) -> VaRResult {
        let capital = capital.to_f64().unwrap_or(0.0);
        let horizon = self.config.var_horizon_days.max(0.0);
        let scaled_sigma = sigma * horizon.sqrt();
        let tolerance = capital * self.config.var_loss_tolerance.to_f64().unwrap_or(0.02);

        // Expected shortfall beyond the 95% quantile of a normal distribution
        let tail_density = Normal::new(0.0, 1.0)
            .map(|n| n.pdf(Z_95))
            .unwrap_or(0.103_136);

        let max_position = |z: f64| {
            if scaled_sigma > 0.0 {
                tolerance / (z * scaled_sigma)
            } else {
                0.0
            }
        };

        VaRResult {
            var_95: capital * Z_95 * scaled_sigma,
            var_99: capital * Z_99 * scaled_sigma,
            cvar_95: capital * scaled_sigma * tail_density / 0.05,
            max_position_95: max_position(Z_95),
            max_position_99: max_position(Z_99),
            volatility: sigma,
            time_horizon: horizon,
        }
    }

    // ==================== Trade Feedback ====================

    /// Fold a closed trade into the rolling statistics.
    ///
    /// `return_fraction` is net P&L over entry notional.
    pub fn record_trade(&mut self, net_pnl: Decimal, return_fraction: f64, now: DateTime<Utc>) {
        self.refresh(now);

        if net_pnl > Decimal::ZERO {
            self.stats.wins += 1;
            self.stats.total_win_amount += net_pnl;
            self.stats.consecutive_losses = 0;
        } else {
            self.stats.losses += 1;
            self.stats.total_loss_amount += net_pnl.abs();
            self.stats.consecutive_losses += 1;
        }

        self.stats.daily_pnl += net_pnl;

        if return_fraction.is_finite() {
            self.stats.returns.push_back(return_fraction);
            while self.stats.returns.len() > self.config.return_window {
                self.stats.returns.pop_front();
            }
        }

        let limit = self.config.consecutive_loss_pause;
        if limit > 0 && self.stats.consecutive_losses >= limit && self.stats.pause_until.is_none() {
            let until = now + Duration::minutes(self.config.pause_minutes);
            warn!(
                consecutive_losses = self.stats.consecutive_losses,
                until = %until,
                "Loss streak, pausing new entries"
            );
            self.stats.pause_until = Some(until);
        }
    }

    /// Roll the daily P&L at the UTC date change and lift an elapsed pause.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.stats.day != Some(today) {
            if self.stats.day.is_some() {
                debug!(previous = %self.stats.daily_pnl, "Resetting daily P&L");
            }
            self.stats.day = Some(today);
            self.stats.daily_pnl = Decimal::ZERO;
        }

        if let Some(until) = self.stats.pause_until {
            if now >= until {
                info!("Trading pause lifted");
                self.stats.pause_until = None;
                self.stats.consecutive_losses = 0;
            }
        }
    }

    /// Active pause end, if any.
    pub fn pause_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.stats.pause_until.filter(|until| *until > now)
    }

    /// Realized P&L for the UTC day of `now`.
    pub fn daily_pnl(&self, now: DateTime<Utc>) -> Decimal {
        if self.stats.day == Some(now.date_naive()) {
            self.stats.daily_pnl
        } else {
            Decimal::ZERO
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.stats.consecutive_losses
    }

    /// Snapshot of sizing inputs for display.
    pub fn risk_summary(&self, capital: Decimal, now: DateTime<Utc>) -> RiskSummary {
        RiskSummary {
            capital,
            method: self.method,
            max_risk_per_trade: self.config.max_risk_per_trade,
            max_total_exposure: self.config.max_total_exposure,
            kelly: self.kelly(),
            var: self.var(capital),
            total_trades: self.stats.total_trades(),
            consecutive_losses: self.stats.consecutive_losses,
            daily_pnl: self.daily_pnl(now),
            paused_until: self.pause_until(now),
        }
    }
}

/// Human-readable summary of the risk state.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub capital: Decimal,
    pub method: SizingMethod,
    pub max_risk_per_trade: Decimal,
    pub max_total_exposure: Decimal,
    pub kelly: KellyResult,
    pub var: VaRResult,
    pub total_trades: u32,
    pub consecutive_losses: u32,
    pub daily_pnl: Decimal,
    pub paused_until: Option<DateTime<Utc>>,
}

impl std::fmt::Display for RiskSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^50}", " RISK ")?;
        writeln!(f, "Capital:          ${:.2}", self.capital)?;
        writeln!(f, "Sizing Method:    {:?}", self.method)?;
        writeln!(f, "Max Risk/Trade:   {}%", self.max_risk_per_trade * dec!(100))?;
        writeln!(f, "Max Exposure:     {}%", self.max_total_exposure * dec!(100))?;
        writeln!(f)?;
        writeln!(f, "--- Kelly ---")?;
        writeln!(f, "Win Rate:         {:.1}%", self.kelly.win_rate * 100.0)?;
        writeln!(f, "Win/Loss Ratio:   {:.2}", self.kelly.avg_win_loss_ratio)?;
        writeln!(f, "Full Kelly:       {:.2}%", self.kelly.full_kelly * 100.0)?;
        writeln!(f, "Recommended:      {:.2}%", self.kelly.recommended * 100.0)?;
        writeln!(f)?;
        writeln!(f, "--- Value at Risk ({}d) ---", self.var.time_horizon)?;
        writeln!(f, "Volatility:       {:.2}%", self.var.volatility * 100.0)?;
        writeln!(f, "VaR 95:           ${:.2}", self.var.var_95)?;
        writeln!(f, "VaR 99:           ${:.2}", self.var.var_99)?;
        writeln!(f, "CVaR 95:          ${:.2}", self.var.cvar_95)?;
        writeln!(f, "Max Position 95:  ${:.2}", self.var.max_position_95)?;
        writeln!(f)?;
        writeln!(f, "--- Streaks ---")?;
        writeln!(f, "Closed Trades:    {}", self.total_trades)?;
        writeln!(f, "Loss Streak:      {}", self.consecutive_losses)?;
        writeln!(f, "Daily P&L:        ${:.2}", self.daily_pnl)?;
        match self.paused_until {
            Some(until) => writeln!(f, "Paused Until:     {}", until.format("%H:%M:%S"))?,
            None => writeln!(f, "Paused:           no")?,
        }
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}
