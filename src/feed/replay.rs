//! Replay of recorded feature series, one bar per fetch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{FeatureBar, FeatureSet};

use super::FeatureProvider;

/// Recorded files hold either a full multi-timeframe set or a bare bar list.
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordedFile {
    Set(FeatureSet),
    Bars(Vec<FeatureBar>),
}

/// `<dir>/<SYMBOL>.json`, with slashes in the symbol replaced by underscores.
pub fn series_path(dir: impl AsRef<Path>, symbol: &str) -> PathBuf {
    dir.as_ref().join(format!("{}.json", symbol.replace('/', "_")))
}

pub async fn load_series(path: impl AsRef<Path>) -> Result<FeatureSet> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let recorded: RecordedFile =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;

    let mut set = match recorded {
        RecordedFile::Set(set) => set,
        RecordedFile::Bars(bars) => FeatureSet::new(bars),
    };
    set.primary.sort_by_key(|b| b.timestamp);
    set.higher.sort_by_key(|b| b.timestamp);
    set.confirmation.sort_by_key(|b| b.timestamp);
    Ok(set)
}

/// A full recorded series that can be cut into point-in-time windows.
#[derive(Debug, Clone)]
pub struct ReplaySeries {
    full: FeatureSet,
}

impl ReplaySeries {
    pub fn new(full: FeatureSet) -> Self {
        Self { full }
    }

    pub fn len(&self) -> usize {
        self.full.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.primary.is_empty()
    }

    /// The first `end` primary bars plus the higher and confirmation bars
    /// that had already closed by then.
    pub fn window(&self, end: usize) -> FeatureSet {
        let end = end.min(self.len());
        let primary = self.full.primary[..end].to_vec();
        let cutoff = primary.last().map(|b| b.timestamp);

        let upto = |bars: &[FeatureBar]| -> Vec<FeatureBar> {
            match cutoff {
                Some(t) => bars.iter().take_while(|b| b.timestamp <= t).cloned().collect(),
                None => Vec::new(),
            }
        };

        FeatureSet {
            higher: upto(&self.full.higher),
            confirmation: upto(&self.full.confirmation),
            primary,
        }
    }
}

struct Cursor {
    series: ReplaySeries,
    next_end: usize,
}

/// Serves recorded series from a directory, advancing one bar per fetch.
pub struct ReplayProvider {
    dir: PathBuf,
    warmup_bars: usize,
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl ReplayProvider {
    pub fn new(dir: impl Into<PathBuf>, warmup_bars: usize) -> Self {
        Self {
            dir: dir.into(),
            warmup_bars: warmup_bars.max(1),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    async fn load_cursor(&self, symbol: &str) -> Result<Cursor> {
        let path = series_path(&self.dir, symbol);
        let series = ReplaySeries::new(load_series(&path).await?);
        info!(symbol, bars = series.len(), path = %path.display(), "Loaded replay series");
        Ok(Cursor {
            next_end: self.warmup_bars.min(series.len()),
            series,
        })
    }

    /// Whether every loaded symbol has been fully replayed.
    pub async fn exhausted(&self) -> bool {
        let cursors = self.cursors.lock().await;
        !cursors.is_empty() && cursors.values().all(|c| c.next_end > c.series.len())
    }
}

#[async_trait]
impl FeatureProvider for ReplayProvider {
    async fn fetch(&self, symbol: &str) -> Result<FeatureSet> {
        // Never hold the cursor lock across a file read
        let loaded = self.cursors.lock().await.contains_key(symbol);
        let fresh = if loaded {
            None
        } else {
            Some(self.load_cursor(symbol).await?)
        };

        let mut cursors = self.cursors.lock().await;
        if let Some(cursor) = fresh {
            cursors.entry(symbol.to_string()).or_insert(cursor);
        }

        let Some(cursor) = cursors.get_mut(symbol) else {
            bail!("No replay series for {}", symbol);
        };
        if cursor.series.is_empty() || cursor.next_end > cursor.series.len() {
            bail!("Replay for {} exhausted", symbol);
        }

        let window = cursor.series.window(cursor.next_end);
        debug!(symbol, bars = cursor.next_end, "Replay fetch");
        cursor.next_end += 1;
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::flat_bars;
    use chrono::Duration;

    fn write_series(dir: &Path, symbol: &str, set: &FeatureSet) {
        let json = serde_json::to_string(set).unwrap();
        std::fs::write(series_path(dir, symbol), json).unwrap();
    }

    #[test]
    fn test_series_path() {
        let path = series_path("/data", "BTC/USDT");
        assert_eq!(path, PathBuf::from("/data/BTC_USDT.json"));
    }

    #[test]
    fn test_window_cuts_higher_timeframe() {
        let primary = flat_bars(10, 100.0);
        let mut higher = flat_bars(10, 100.0);
        for (i, bar) in higher.iter_mut().enumerate() {
            bar.timestamp = primary[0].timestamp + Duration::hours(4 * i as i64);
        }
        let series = ReplaySeries::new(FeatureSet {
            primary,
            higher,
            confirmation: Vec::new(),
        });

        // Primary bars 0..=4 end at hour 4: higher bars at hour 0 and 4
        let window = series.window(5);
        assert_eq!(window.primary.len(), 5);
        assert_eq!(window.higher.len(), 2);
        assert_eq!(series.window(100).primary.len(), 10);
    }

    #[tokio::test]
    async fn test_replay_advances_one_bar_per_fetch() {
        let dir = tempfile::tempdir().unwrap();
        write_series(dir.path(), "ETH/USDT", &FeatureSet::new(flat_bars(4, 50.0)));

        let provider = ReplayProvider::new(dir.path(), 2);
        assert_eq!(provider.fetch("ETH/USDT").await.unwrap().primary.len(), 2);
        assert_eq!(provider.fetch("ETH/USDT").await.unwrap().primary.len(), 3);
        assert_eq!(provider.fetch("ETH/USDT").await.unwrap().primary.len(), 4);
        assert!(provider.exhausted().await);
        assert!(provider.fetch("ETH/USDT").await.is_err());
    }

    #[tokio::test]
    async fn test_loading_does_not_hold_cursor_lock() {
        let dir = tempfile::tempdir().unwrap();
        write_series(dir.path(), "BTC/USDT", &FeatureSet::new(flat_bars(5, 100.0)));
        let provider = ReplayProvider::new(dir.path(), 2);

        let _guard = provider.cursors.lock().await;
        let cursor = tokio::time::timeout(std::time::Duration::from_secs(1), provider.load_cursor("BTC/USDT"))
            .await
            .expect("load blocked on cursor lock")
            .unwrap();
        assert_eq!(cursor.next_end, 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_fetches_share_one_cursor() {
        let dir = tempfile::tempdir().unwrap();
        write_series(dir.path(), "BTC/USDT", &FeatureSet::new(flat_bars(5, 100.0)));
        write_series(dir.path(), "ETH/USDT", &FeatureSet::new(flat_bars(5, 50.0)));
        let provider = ReplayProvider::new(dir.path(), 2);

        let (a, b, c) = tokio::join!(
            provider.fetch("BTC/USDT"),
            provider.fetch("BTC/USDT"),
            provider.fetch("ETH/USDT")
        );
        let mut lens = vec![a.unwrap().primary.len(), b.unwrap().primary.len()];
        lens.sort();
        assert_eq!(lens, vec![2, 3]);
        assert_eq!(c.unwrap().primary.len(), 2);
    }

    #[tokio::test]
    async fn test_bare_bar_list_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let bars = flat_bars(3, 10.0);
        std::fs::write(series_path(dir.path(), "SOL/USDT"), serde_json::to_string(&bars).unwrap()).unwrap();

        let set = load_series(series_path(dir.path(), "SOL/USDT")).await.unwrap();
        assert_eq!(set.primary.len(), 3);
        assert!(set.higher.is_empty());

        let provider = ReplayProvider::new(dir.path(), 1);
        let err = provider.fetch("DOGE/USDT").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
