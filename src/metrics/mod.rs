//! Performance statistics.

mod calculator;

pub use calculator::{MetricsCalculator, PerformanceMetrics};
