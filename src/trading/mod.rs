//! Trading logic: risk sizing, stop levels, pre-trade gate and execution.

mod config;
mod executor;
mod gate;
mod levels;
mod position_sizer;
mod trader;

pub use config::{ExecutionConfig, GateConfig, RiskConfig, TradingStyle};
pub use executor::{
    ExecutionResult, ExecutionSimulator, ExecutionStatus, MarketContext, RejectionKind,
};
pub use gate::{
    CheckResult, ConsecutiveLossCheck, DailyLossCheck, EntryValidation, ExposureCheck,
    GateContext, LiquidityCheck, PauseCheck, PositionCountCheck, PreTradeCheck, PreTradeGate,
    Severity, SpreadCheck,
};
pub use levels::{LevelCalculator, ScaleAction, ScaleOutLevel, StopLevels};
pub use position_sizer::{
    KellyResult, PositionSizeResult, PositionSizer, RiskSummary, SizeConstraint, SizingMethod,
    TradeStats, VaRResult,
};
pub use trader::{CycleReport, Trader};
