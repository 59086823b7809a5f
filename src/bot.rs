//! Bot runner: the periodic decision loop.
//!
//! Each cycle:
//! - Fetches features for every symbol concurrently (timeout + retry)
//! - Runs one `Trader` cycle per fetched symbol, in symbol order
//! - Journals signals, closed trades and a portfolio snapshot
//! - Publishes the same records as events for subscribers

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::db::Journal;
use crate::feed::{FeatureProvider, FeedConfig};
use crate::models::{ClosedTrade, FeatureSet, PortfolioSnapshot, Signal};
use crate::trading::{CycleReport, ExecutionResult, Trader};

const EVENT_CAPACITY: usize = 256;

/// Records published to subscribers.
#[derive(Debug, Clone)]
pub enum BotEvent {
    SignalArmed(Signal),
    Executed(ExecutionResult),
    Rejected(ExecutionResult),
    PositionClosed(ClosedTrade),
    Snapshot(Arc<PortfolioSnapshot>),
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub cycle: u64,
    pub fetched: usize,
    pub failed: Vec<String>,
    pub reports: Vec<CycleReport>,
}

/// Main bot runner.
pub struct Bot {
    config: AppConfig,
    provider: Arc<dyn FeatureProvider>,
    trader: Trader,
    journal: Option<Arc<dyn Journal>>,
    events: broadcast::Sender<BotEvent>,

    /// Latest close seen per symbol; used to flatten on shutdown
    last_prices: HashMap<String, Decimal>,
    cycles: u64,
    max_cycles: Option<u64>,

    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(config: AppConfig, provider: Arc<dyn FeatureProvider>) -> Self {
        let trader = Trader::from_config(&config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            provider,
            trader,
            journal: None,
            events,
            last_prices: HashMap::new(),
            cycles: 0,
            max_cycles: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Stop after this many cycles (replays).
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn trader(&self) -> &Trader {
        &self.trader
    }

    /// Run until ctrl-c, the shutdown flag, or the cycle limit.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            symbols = ?self.config.symbols,
            interval = self.config.interval_secs,
            capital = %self.config.initial_capital,
            "Starting decision loop"
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;

            if let Err(e) = self.run_cycle(Utc::now()).await {
                error!(error = %e, "Error in decision cycle");
            }

            if self.max_cycles.is_some_and(|max| self.cycles >= max) {
                info!(cycles = self.cycles, "Cycle limit reached");
                break;
            }
        }

        self.shutdown(Utc::now()).await;
        Ok(())
    }

    /// One full cycle: fetch everything, then decide symbol by symbol.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleSummary> {
        self.cycles += 1;
        debug!(cycle = self.cycles, "Decision cycle");

        let fetched = self.fetch_all().await;
        let mut summary = CycleSummary {
            cycle: self.cycles,
            fetched: 0,
            failed: Vec::new(),
            reports: Vec::new(),
        };

        for (symbol, result) in fetched {
            let features = match result {
                Ok(features) => features,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Feature fetch failed, skipping symbol");
                    summary.failed.push(symbol);
                    continue;
                }
            };
            summary.fetched += 1;

            if let Some(bar) = features.latest().filter(|b| b.is_valid()) {
                self.last_prices.insert(symbol.clone(), bar.close_decimal());
            }

            let report = self.trader.process_symbol(&symbol, &features, now);
            self.publish_report(&report).await;
            summary.reports.push(report);
        }

        let snapshot = Arc::new(self.trader.snapshot(now));
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_snapshot(&snapshot).await {
                warn!(error = %e, "Failed to journal snapshot");
            }
        }
        let _ = self.events.send(BotEvent::Snapshot(snapshot));

        if summary.fetched == 0 && !summary.failed.is_empty() {
            return Err(anyhow!("No symbol could be fetched this cycle"));
        }
        Ok(summary)
    }

    async fn fetch_all(&self) -> Vec<(String, Result<FeatureSet>)> {
        let fetches = self.config.symbols.iter().map(|symbol| {
            let provider = self.provider.clone();
            let feed = self.config.feed.clone();
            async move {
                let result = fetch_with_retry(provider.as_ref(), symbol, &feed).await;
                (symbol.clone(), result)
            }
        });

        let mut results = join_all(fetches).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    async fn publish_report(&self, report: &CycleReport) {
        if let Some(signal) = &report.armed {
            if let Some(journal) = &self.journal {
                if let Err(e) = journal.record_signal(signal).await {
                    warn!(error = %e, "Failed to journal signal");
                }
            }
            let _ = self.events.send(BotEvent::SignalArmed(signal.clone()));
        }

        if let Some(result) = &report.execution {
            let event = if result.is_executed() {
                BotEvent::Executed(result.clone())
            } else {
                BotEvent::Rejected(result.clone())
            };
            let _ = self.events.send(event);
        }

        for trade in &report.closed {
            self.publish_trade(trade).await;
        }
    }

    async fn publish_trade(&self, trade: &ClosedTrade) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_trade(trade).await {
                warn!(id = %trade.id, error = %e, "Failed to journal trade");
            }
        }
        let _ = self.events.send(BotEvent::PositionClosed(trade.clone()));
    }

    /// Close whatever is still open at the last seen prices.
    async fn shutdown(&mut self, now: DateTime<Utc>) {
        info!("Shutting down decision loop...");

        let closed = self.trader.close_all(&self.last_prices, now);
        for trade in &closed {
            self.publish_trade(trade).await;
        }

        let snapshot = self.trader.snapshot(now);
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_snapshot(&snapshot).await {
                warn!(error = %e, "Failed to journal final snapshot");
            }
        }

        info!(
            closed = closed.len(),
            equity = %snapshot.equity,
            trades = snapshot.stats.total_trades,
            "Shutdown complete"
        );
    }

    pub fn stats(&self) -> BotStats {
        let snapshot = self.trader.snapshot(Utc::now());
        BotStats {
            cycles: self.cycles,
            symbols: self.config.symbols.len(),
            capital: snapshot.capital,
            equity: snapshot.equity,
            open_positions: snapshot.open_positions.len(),
            total_trades: snapshot.stats.total_trades,
            win_rate: snapshot.stats.win_rate,
            is_running: !self.shutdown.load(Ordering::SeqCst),
        }
    }
}

/// Fetch one symbol, bounding each attempt by the feed timeout and retrying
/// with exponential backoff until `max_attempts` is used up.
pub async fn fetch_with_retry(provider: &dyn FeatureProvider, symbol: &str, feed: &FeedConfig) -> Result<FeatureSet> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(feed.initial_backoff_ms))
        .with_multiplier(2.0)
        .with_max_elapsed_time(None)
        .build();
    let timeout = Duration::from_secs(feed.timeout_secs);
    let attempts = AtomicU32::new(0);
    let attempts = &attempts;

    backoff::future::retry(policy, move || async move {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let err = match tokio::time::timeout(timeout, provider.fetch(symbol)).await {
            Ok(Ok(features)) => return Ok(features),
            Ok(Err(e)) => e,
            Err(_) => anyhow!("fetch timed out after {}s", feed.timeout_secs),
        };

        if attempt >= feed.max_attempts {
            Err(backoff::Error::permanent(err))
        } else {
            debug!(symbol, attempt, error = %err, "Retrying fetch");
            Err(backoff::Error::transient(err))
        }
    })
    .await
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub cycles: u64,
    pub symbols: usize,
    pub capital: Decimal,
    pub equity: Decimal,
    pub open_positions: usize,
    pub total_trades: u32,
    pub win_rate: f64,
    pub is_running: bool,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Cycles:          {}", self.cycles)?;
        writeln!(f, "Symbols:         {}", self.symbols)?;
        writeln!(f, "Capital:         ${:.2}", self.capital)?;
        writeln!(f, "Equity:          ${:.2}", self.equity)?;
        writeln!(f, "Open Positions:  {}", self.open_positions)?;
        writeln!(f, "Closed Trades:   {} ({:.1}% won)", self.total_trades, self.win_rate * 100.0)?;
        writeln!(f, "Status:          {}", if self.is_running { "Running" } else { "Stopped" })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::models::Direction;
    use crate::strategies::test_support::flat_bars;

    /// Serves a fixed series, failing the first `failures` fetches.
    struct StubProvider {
        series: FeatureSet,
        failures: AtomicU32,
        calls: AtomicU32,
        delay: Option<Duration>,
    }

    impl StubProvider {
        fn new(series: FeatureSet, failures: u32) -> Self {
            Self {
                series,
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl FeatureProvider for StubProvider {
        async fn fetch(&self, symbol: &str) -> Result<FeatureSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if symbol == "BAD/USDT" {
                return Err(anyhow!("unknown symbol"));
            }
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow!("temporary outage"));
            }
            Ok(self.series.clone())
        }
    }

    /// Journal that only counts what it receives.
    #[derive(Default)]
    struct CountingJournal {
        signals: Mutex<usize>,
        snapshots: Mutex<usize>,
    }

    #[async_trait]
    impl Journal for CountingJournal {
        async fn record_signal(&self, _signal: &Signal) -> Result<()> {
            *self.signals.lock().unwrap() += 1;
            Ok(())
        }

        async fn record_trade(&self, _trade: &ClosedTrade) -> Result<()> {
            Ok(())
        }

        async fn record_snapshot(&self, _snapshot: &PortfolioSnapshot) -> Result<()> {
            *self.snapshots.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn fast_feed() -> FeedConfig {
        FeedConfig {
            timeout_secs: 1,
            max_attempts: 3,
            initial_backoff_ms: 1,
            ..FeedConfig::default()
        }
    }

    fn qualifying() -> FeatureSet {
        let mut bars = flat_bars(50, 100.0);
        let last = bars.last_mut().unwrap();
        last.trend_bias = Some(Direction::Long);
        last.volume_ratio = Some(1.4);
        last.ema_fast = Some(99.8);
        last.ema_slow = Some(99.5);
        FeatureSet::new(bars)
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let provider = StubProvider::new(qualifying(), 2);
        let features = fetch_with_retry(&provider, "BTC/USDT", &fast_feed()).await.unwrap();
        assert_eq!(features.primary.len(), 50);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let provider = StubProvider::new(qualifying(), 10);
        let err = fetch_with_retry(&provider, "BTC/USDT", &fast_feed()).await.unwrap_err();
        assert!(err.to_string().contains("temporary outage"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mut provider = StubProvider::new(qualifying(), 0);
        provider.delay = Some(Duration::from_secs(3));
        let feed = FeedConfig {
            max_attempts: 1,
            ..fast_feed()
        };
        let err = fetch_with_retry(&provider, "BTC/USDT", &feed).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cycle_skips_failed_symbols_and_publishes() {
        let config = AppConfig {
            symbols: vec!["BTC/USDT".to_string(), "BAD/USDT".to_string()],
            feed: fast_feed(),
            ..AppConfig::default()
        };
        let journal = Arc::new(CountingJournal::default());
        let mut bot = Bot::new(config, Arc::new(StubProvider::new(qualifying(), 0)))
            .with_journal(journal.clone());
        let mut events = bot.subscribe();

        let summary = bot.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.failed, vec!["BAD/USDT".to_string()]);
        assert!(summary.reports[0].armed.is_some());

        assert!(matches!(events.recv().await.unwrap(), BotEvent::SignalArmed(_)));
        assert!(matches!(events.recv().await.unwrap(), BotEvent::Snapshot(_)));
        assert_eq!(*journal.signals.lock().unwrap(), 1);
        assert_eq!(*journal.snapshots.lock().unwrap(), 1);
        assert_eq!(bot.stats().cycles, 1);
    }

    #[tokio::test]
    async fn test_run_stops_at_cycle_limit() {
        let config = AppConfig {
            interval_secs: 1,
            feed: fast_feed(),
            ..AppConfig::default()
        };
        let mut bot = Bot::new(config, Arc::new(StubProvider::new(qualifying(), 0))).with_max_cycles(1);
        bot.run().await.unwrap();
        assert_eq!(bot.stats().cycles, 1);
    }
}
