//! Append-only journal of signals, closed trades and portfolio snapshots.
//!
//! The decision core never reads it back; it exists for audit and for
//! post-run analysis (`equity_curve`, `calculate_max_drawdown`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{ClosedTrade, PortfolioSnapshot, Signal};

/// Sink for decision-loop records.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn record_signal(&self, signal: &Signal) -> Result<()>;
    async fn record_trade(&self, trade: &ClosedTrade) -> Result<()>;
    async fn record_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()>;
}

/// SQLite-backed journal.
pub struct Database {
    pool: SqlitePool,
}

/// Stored signal record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSignal {
    pub id: String,
    pub symbol: String,
    pub direction: String,
    pub score: f64,
    pub entry_price: String,
    pub stop_loss: String,
    pub take_profit: String,
    pub risk_reward: f64,
    pub strategy: String,
    pub reasons: String,
    pub confirmations: String,
    pub timeframe_alignment: Option<String>,
    pub timestamp: String,
}

/// Stored closed trade.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: String,
    pub symbol: String,
    pub direction: String,
    pub entry_price: String,
    pub exit_price: String,
    pub size: String,
    pub gross_pnl: String,
    pub fees: String,
    pub net_pnl: String,
    pub pnl_percent: f64,
    pub exit_reason: String,
    pub strategy_tag: String,
    pub entry_time: String,
    pub exit_time: String,
}

/// Equity curve point.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSnapshot {
    pub id: i64,
    pub timestamp: String,
    pub capital: f64,
    pub equity: f64,
    pub open_pnl: f64,
    pub open_positions: i64,
    pub exposure_percent: f64,
    pub drawdown_percent: f64,
    pub total_trades: i64,
}

impl Database {
    /// Connect and create tables.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Each in-memory connection is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                score REAL NOT NULL,
                entry_price TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                risk_reward REAL NOT NULL,
                strategy TEXT NOT NULL,
                reasons TEXT NOT NULL,
                confirmations TEXT NOT NULL,
                timeframe_alignment TEXT,
                timestamp TEXT NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                size TEXT NOT NULL,
                gross_pnl TEXT NOT NULL,
                fees TEXT NOT NULL,
                net_pnl TEXT NOT NULL,
                pnl_percent REAL NOT NULL,
                exit_reason TEXT NOT NULL,
                strategy_tag TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                capital REAL NOT NULL,
                equity REAL NOT NULL,
                open_pnl REAL NOT NULL,
                open_positions INTEGER NOT NULL,
                exposure_percent REAL NOT NULL,
                drawdown_percent REAL NOT NULL,
                total_trades INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Queries ====================

    /// Most recent closed trades, newest first.
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<StoredTrade>> {
        sqlx::query_as::<_, StoredTrade>("SELECT * FROM trades ORDER BY exit_time DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch trades")
    }

    pub async fn signals_for(&self, symbol: &str) -> Result<Vec<StoredSignal>> {
        sqlx::query_as::<_, StoredSignal>(
            r#"
            SELECT id, symbol, direction, score, entry_price, stop_loss, take_profit,
                   risk_reward, strategy, reasons, confirmations, timeframe_alignment, timestamp
            FROM signals WHERE symbol = ? ORDER BY timestamp
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch signals")
    }

    /// Equity curve, newest first.
    pub async fn equity_curve(&self, limit: i64) -> Result<Vec<StoredSnapshot>> {
        sqlx::query_as::<_, StoredSnapshot>("SELECT * FROM portfolio_snapshots ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch equity curve")
    }

    /// Max drawdown of the recorded equity curve (fraction).
    pub async fn calculate_max_drawdown(&self) -> Result<f64> {
        let points = self.equity_curve(1000).await?;

        let mut peak = 0.0f64;
        let mut max_dd = 0.0f64;

        for point in points.into_iter().rev() {
            if point.equity > peak {
                peak = point.equity;
            }
            if peak > 0.0 {
                max_dd = max_dd.max((peak - point.equity) / peak);
            }
        }

        Ok(max_dd)
    }
}

#[async_trait]
impl Journal for Database {
    async fn record_signal(&self, signal: &Signal) -> Result<()> {
        let reasons = serde_json::to_string(&signal.reasons)?;
        let confirmations = serde_json::to_string(&signal.confirmations)?;
        let alignment = signal
            .timeframe_alignment
            .map(|a| serde_json::to_value(a).map(|v| v.as_str().unwrap_or_default().to_string()))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO signals
                (id, symbol, direction, score, entry_price, stop_loss, take_profit,
                 risk_reward, strategy, reasons, confirmations, timeframe_alignment, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.id)
        .bind(&signal.symbol)
        .bind(signal.direction.as_str())
        .bind(signal.score)
        .bind(signal.entry_price.to_string())
        .bind(signal.stop_loss.to_string())
        .bind(signal.take_profit.to_string())
        .bind(signal.risk_reward)
        .bind(&signal.strategy)
        .bind(reasons)
        .bind(confirmations)
        .bind(alignment)
        .bind(signal.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record signal")?;

        Ok(())
    }

    async fn record_trade(&self, trade: &ClosedTrade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO trades
                (id, symbol, direction, entry_price, exit_price, size, gross_pnl, fees,
                 net_pnl, pnl_percent, exit_reason, strategy_tag, entry_time, exit_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.symbol)
        .bind(trade.direction.as_str())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.to_string())
        .bind(trade.size.to_string())
        .bind(trade.gross_pnl.to_string())
        .bind(trade.fees.to_string())
        .bind(trade.net_pnl.to_string())
        .bind(trade.pnl_percent.to_f64().unwrap_or(0.0))
        .bind(trade.exit_reason.as_str())
        .bind(&trade.strategy_tag)
        .bind(trade.entry_time.to_rfc3339())
        .bind(trade.exit_time.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record trade")?;

        Ok(())
    }

    async fn record_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots
                (timestamp, capital, equity, open_pnl, open_positions,
                 exposure_percent, drawdown_percent, total_trades)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.timestamp.to_rfc3339())
        .bind(snapshot.capital.to_f64().unwrap_or(0.0))
        .bind(snapshot.equity.to_f64().unwrap_or(0.0))
        .bind(snapshot.open_pnl.to_f64().unwrap_or(0.0))
        .bind(snapshot.open_positions.len() as i64)
        .bind(snapshot.exposure_percent.to_f64().unwrap_or(0.0))
        .bind(snapshot.drawdown_percent.to_f64().unwrap_or(0.0))
        .bind(snapshot.stats.total_trades as i64)
        .execute(&self.pool)
        .await
        .context("Failed to record snapshot")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::models::{Direction, ExitReason, PortfolioStats};

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn snapshot(equity: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp: Utc::now(),
            capital: equity,
            equity,
            open_pnl: Decimal::ZERO,
            open_positions: Vec::new(),
            exposure_percent: Decimal::ZERO,
            drawdown_percent: Decimal::ZERO,
            stats: PortfolioStats::default(),
        }
    }

    #[tokio::test]
    async fn test_record_and_read_trades() {
        let db = memory_db().await;
        let now = Utc::now();
        let trade = ClosedTrade {
            id: "p-1".to_string(),
            symbol: "BTC/USDT".to_string(),
            direction: Direction::Long,
            entry_price: dec!(100.01),
            exit_price: dec!(97.89021),
            size: dec!(6),
            gross_pnl: dec!(-12.71874),
            fees: dec!(1.18740126),
            net_pnl: dec!(-13.90614126),
            pnl_percent: dec!(-2.3175),
            entry_time: now - Duration::hours(2),
            exit_time: now,
            exit_reason: ExitReason::StopLoss,
            strategy_tag: "confluence".to_string(),
        };

        db.record_trade(&trade).await.unwrap();
        // Append-only: the same id is not written twice
        db.record_trade(&trade).await.unwrap();

        let stored = db.recent_trades(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].exit_reason, "stop_loss");
        assert_eq!(stored[0].net_pnl, "-13.90614126");
    }

    #[tokio::test]
    async fn test_record_signal() {
        let db = memory_db().await;
        let signal = Signal::new(
            "ETH/USDT",
            Direction::Short,
            72.0,
            dec!(2000),
            dec!(2040),
            dec!(1920),
            "confluence",
            Utc::now(),
        )
        .with_reasons(vec!["Trend alignment".to_string()]);

        db.record_signal(&signal).await.unwrap();

        let stored = db.signals_for("ETH/USDT").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].direction, "SHORT");
        assert!(stored[0].reasons.contains("Trend alignment"));
    }

    #[tokio::test]
    async fn test_snapshot_drawdown() {
        let db = memory_db().await;
        for equity in [dec!(10000), dec!(11000), dec!(9900), dec!(10500)] {
            db.record_snapshot(&snapshot(equity)).await.unwrap();
        }

        assert_eq!(db.equity_curve(10).await.unwrap().len(), 4);
        let dd = db.calculate_max_drawdown().await.unwrap();
        assert!((dd - 0.1).abs() < 1e-9);
    }
}
