//! Simulated execution: sizing, gating, fills with slippage and fees.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{ClosedTrade, Direction, ExitReason, PortfolioSnapshot, Signal};
use crate::portfolio::{LedgerError, OpenRequest, PortfolioLedger};

use super::{
    EntryValidation, ExecutionConfig, GateConfig, GateContext, LevelCalculator, PositionSizer,
    PreTradeGate, RiskConfig, RiskSummary, ScaleOutLevel,
};

/// Outcome of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Executed,
    Rejected,
}

/// Why a signal was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    #[error("invalid signal")]
    InvalidSignal,

    #[error("position size is zero")]
    ZeroSize,

    #[error("rejected by pre-trade gate")]
    GateRejection,

    #[error("insufficient capital")]
    CapitalInsufficient,
}

/// Market conditions at the moment of execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketContext {
    /// Spread as a fraction of price
    pub spread: Option<f64>,

    /// Volume / average volume
    pub volume_ratio: Option<f64>,
}

/// Result handed back for every signal submitted.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub position_id: Option<String>,
    pub reason: Option<String>,
    pub rejection: Option<RejectionKind>,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub fees: Decimal,
    pub risk_amount: Decimal,
    pub risk_percent: Decimal,
}

impl ExecutionResult {
    fn rejected(signal: &Signal, kind: RejectionKind, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        info!(
            symbol = %signal.symbol,
            direction = %signal.direction,
            kind = %kind,
            reason = %reason,
            "Signal rejected"
        );

        Self {
            status: ExecutionStatus::Rejected,
            position_id: None,
            reason: Some(reason),
            rejection: Some(kind),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: signal.entry_price,
            size: Decimal::ZERO,
            fees: Decimal::ZERO,
            risk_amount: Decimal::ZERO,
            risk_percent: Decimal::ZERO,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.status == ExecutionStatus::Executed
    }
}

/// Turns signals into positions and manages their exits.
///
/// Owns the ledger and the sizer so realized P&L flows back into the sizing
/// statistics on every close.
pub struct ExecutionSimulator {
    config: ExecutionConfig,
    ledger: PortfolioLedger,
    sizer: PositionSizer,
    gate: PreTradeGate,
    levels: LevelCalculator,
}

impl ExecutionSimulator {
    pub fn new(
        initial_capital: Decimal,
        risk: RiskConfig,
        gate: &GateConfig,
        config: ExecutionConfig,
    ) -> Self {
        let levels = LevelCalculator::new(&risk);
        Self {
            config,
            ledger: PortfolioLedger::new(initial_capital),
            sizer: PositionSizer::new(risk),
            gate: PreTradeGate::standard(gate),
            levels,
        }
    }

    /// Replace the pre-trade gate.
    pub fn with_gate(mut self, gate: PreTradeGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    pub fn sizer(&self) -> &PositionSizer {
        &self.sizer
    }

    pub fn levels(&self) -> &LevelCalculator {
        &self.levels
    }

    // ==================== Entry ====================

    /// Gate, size and fill a signal.
    ///
    /// Rejections never mutate the ledger.
    pub fn execute(&mut self, signal: &Signal, market: &MarketContext, now: DateTime<Utc>) -> ExecutionResult {
        if let Err(reason) = signal.validate() {
            return ExecutionResult::rejected(signal, RejectionKind::InvalidSignal, reason);
        }

        self.sizer.refresh(now);

        let validation = self.validate_entry(market, now);
        if !validation.allowed {
            return ExecutionResult::rejected(signal, RejectionKind::GateRejection, validation.reason);
        }

        let capital = self.ledger.capital();
        let sizing = self.sizer.calculate_size(
            capital,
            signal.entry_price,
            signal.stop_loss,
            self.ledger.open_notional(),
        );
        debug!(
            symbol = %signal.symbol,
            size = %sizing.size,
            limited_by = ?sizing.limited_by,
            "Sized signal"
        );

        if sizing.size <= Decimal::ZERO {
            return ExecutionResult::rejected(
                signal,
                RejectionKind::ZeroSize,
                format!("Position size is zero (limited by {:?})", sizing.limited_by),
            );
        }

        let fill_price = self.entry_fill(signal.entry_price, signal.direction);
        let notional = fill_price * sizing.size;
        let fees = notional * self.config.commission;

        if capital < notional + fees {
            return ExecutionResult::rejected(
                signal,
                RejectionKind::CapitalInsufficient,
                format!(
                    "Insufficient capital: need {:.2}, have {:.2}",
                    notional + fees,
                    capital
                ),
            );
        }

        let request = OpenRequest {
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: fill_price,
            size: sizing.size,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            strategy_tag: signal.strategy.clone(),
            entry_fees: fees,
        };

        let position = match self.ledger.open(request, now) {
            Ok(position) => position,
            Err(e) => {
                return ExecutionResult::rejected(signal, RejectionKind::InvalidSignal, e.to_string())
            }
        };

        let risk_amount = position.risk_per_unit() * position.size;
        let risk_percent = if capital > Decimal::ZERO {
            risk_amount / capital * dec!(100)
        } else {
            Decimal::ZERO
        };

        ExecutionResult {
            status: ExecutionStatus::Executed,
            position_id: Some(position.id),
            reason: None,
            rejection: None,
            symbol: position.symbol,
            direction: position.direction,
            entry_price: fill_price,
            size: position.size,
            fees,
            risk_amount,
            risk_percent,
        }
    }

    /// Run the pre-trade gate against the current ledger and risk state.
    pub fn validate_entry(&self, market: &MarketContext, now: DateTime<Utc>) -> EntryValidation {
        let ctx = GateContext {
            now,
            capital: self.ledger.capital(),
            daily_pnl: self.sizer.daily_pnl(now),
            consecutive_losses: self.sizer.consecutive_losses(),
            paused_until: self.sizer.pause_until(now),
            open_positions: self.ledger.position_count(),
            exposure: self.ledger.exposure(),
            spread: market.spread,
            volume_ratio: market.volume_ratio,
        };
        self.gate.validate_entry(&ctx)
    }

    fn entry_fill(&self, price: Decimal, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => price * (Decimal::ONE + self.config.slippage),
            Direction::Short => price * (Decimal::ONE - self.config.slippage),
        }
    }

    fn exit_fill(&self, price: Decimal, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => price * (Decimal::ONE - self.config.slippage),
            Direction::Short => price * (Decimal::ONE + self.config.slippage),
        }
    }

    // ==================== Exits ====================

    /// Close one position and feed the result back into the sizer.
    pub fn close_position(
        &mut self,
        id: &str,
        price: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<ClosedTrade, LedgerError> {
        let position = self
            .ledger
            .position(id)
            .ok_or_else(|| LedgerError::PositionNotFound(id.to_string()))?;

        let exit_price = if reason.takes_slippage() {
            self.exit_fill(price, position.direction)
        } else {
            price
        };
        let exit_fees = exit_price * position.size * self.config.commission;

        let trade = self.ledger.close(id, exit_price, exit_fees, reason, now)?;

        let return_fraction = (trade.pnl_percent / dec!(100)).to_f64().unwrap_or(0.0);
        self.sizer.record_trade(trade.net_pnl, return_fraction, now);

        Ok(trade)
    }

    /// Close every open position at the given prices, or at its last mark.
    pub fn close_all(&mut self, prices: &HashMap<String, Decimal>, now: DateTime<Utc>) -> Vec<ClosedTrade> {
        let targets: Vec<(String, Decimal)> = self
            .ledger
            .positions()
            .into_iter()
            .map(|p| {
                let price = prices.get(&p.symbol).copied().unwrap_or(p.current_price);
                (p.id.clone(), price)
            })
            .collect();

        let mut closed = Vec::with_capacity(targets.len());
        for (id, price) in targets {
            match self.close_position(&id, price, ExitReason::CloseAll, now) {
                Ok(trade) => closed.push(trade),
                Err(e) => warn!(id = %id, error = %e, "Close-all skipped position"),
            }
        }
        closed
    }

    /// Process a price tick: mark, trail stops, then close anything hit.
    pub fn on_price(
        &mut self,
        symbol: &str,
        price: Decimal,
        atr: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Vec<ClosedTrade> {
        if self.ledger.mark_symbol(symbol, price) == 0 {
            return Vec::new();
        }

        if let Some(atr) = atr {
            let moves: Vec<(String, Decimal)> = self
                .ledger
                .positions_for(symbol)
                .into_iter()
                .filter_map(|p| {
                    self.levels
                        .trailing_stop(p, price, atr)
                        .map(|stop| (p.id.clone(), stop))
                })
                .collect();

            for (id, stop) in moves {
                if let Err(e) = self.ledger.tighten_stop(&id, stop) {
                    warn!(id = %id, error = %e, "Trailing update failed");
                }
            }
        }

        let mut closed = Vec::new();
        for (id, reason) in self.ledger.check_stops(symbol, price) {
            match self.close_position(&id, price, reason, now) {
                Ok(trade) => closed.push(trade),
                Err(e) => warn!(id = %id, error = %e, "Exit failed"),
            }
        }
        closed
    }

    // ==================== Reporting ====================

    /// Scale-out ladder for an open position, from its entry and initial stop.
    pub fn scale_out_plan(&self, id: &str) -> Option<Vec<ScaleOutLevel>> {
        self.ledger.position(id).map(|p| {
            self.levels
                .scale_out_ladder(p.entry_price, p.initial_stop, p.direction)
        })
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> PortfolioSnapshot {
        self.ledger.snapshot(now)
    }

    pub fn risk_summary(&self, now: DateTime<Utc>) -> RiskSummary {
        self.sizer.risk_summary(self.ledger.capital(), now)
    }
}
