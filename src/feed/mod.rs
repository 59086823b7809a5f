//! Feature providers: where the decision loop gets its bars from.

mod replay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::FeatureSet;

pub use replay::{load_series, series_path, ReplayProvider, ReplaySeries};

/// Source of the latest feature series for a symbol.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    async fn fetch(&self, symbol: &str) -> anyhow::Result<FeatureSet>;
}

/// Fetch timeouts and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Directory of recorded `<SYMBOL>.json` series for replay
    pub replay_dir: String,

    /// Bars handed out on the first fetch
    pub warmup_bars: usize,

    /// Per-attempt fetch timeout in seconds
    pub timeout_secs: u64,

    /// Attempts per symbol per cycle
    pub max_attempts: u32,

    /// First retry delay in milliseconds, doubled on each retry
    pub initial_backoff_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            replay_dir: "./data".to_string(),
            warmup_bars: 50,
            timeout_secs: 5,
            max_attempts: 3,
            initial_backoff_ms: 200,
        }
    }
}
