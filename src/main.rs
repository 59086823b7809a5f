//! Signal Trader
//!
//! Scores trade signals from pre-computed market features, sizes positions
//! with Kelly/VaR/fixed-fraction risk rules, gates entries on portfolio
//! limits, and simulates execution against a portfolio ledger.

mod backtest;
mod bot;
mod config;
mod db;
mod feed;
mod metrics;
mod models;
mod portfolio;
mod signals;
mod strategies;
mod trading;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::backtest::Backtester;
use crate::bot::{Bot, BotEvent};
use crate::config::AppConfig;
use crate::db::Database;
use crate::feed::{series_path, ReplayProvider};
use crate::models::Direction;
use crate::strategies::{DcaAction, DcaConfig, GridConfig, GridPlanner, GridSpacing, SmartDca};
use crate::trading::{LevelCalculator, PositionSizer, TradingStyle};

/// Signal scoring and simulated execution CLI.
#[derive(Parser)]
#[command(name = "sigtrader")]
#[command(about = "Score signals, size risk and simulate execution", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Journal database (e.g. sqlite:./trader.db?mode=rwc)
    #[arg(short, long)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the paper decision loop over recorded feature files
    Run {
        /// Directory of <SYMBOL>.json feature files
        #[arg(long)]
        data: Option<PathBuf>,

        /// Comma-separated symbols
        #[arg(short, long)]
        symbols: Option<String>,

        /// Initial capital
        #[arg(long)]
        capital: Option<Decimal>,

        /// Cycle interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Replay one recorded feature file and report performance
    Backtest {
        /// Symbol being replayed
        #[arg(short, long)]
        symbol: String,

        /// Feature file; defaults to <data dir>/<SYMBOL>.json
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Initial capital
        #[arg(long)]
        capital: Option<Decimal>,
    },

    /// Print the effective configuration as JSON
    Config,

    /// Position size, Kelly and VaR for a trade
    Size {
        #[arg(long)]
        capital: Decimal,

        #[arg(long)]
        entry: Decimal,

        #[arg(long)]
        stop: Decimal,

        /// Notional of positions already open
        #[arg(long, default_value = "0")]
        open_notional: Decimal,
    },

    /// Stop, target, trailing distance and scale-out ladder
    Levels {
        #[arg(long)]
        entry: Decimal,

        #[arg(long)]
        atr: Decimal,

        /// long or short
        #[arg(long, default_value = "long")]
        direction: Direction,

        /// day, swing, position or volatile
        #[arg(long)]
        style: Option<TradingStyle>,
    },

    /// Lay out a grid and estimate its profit per cycle
    Grid {
        #[arg(long)]
        lower: Decimal,

        #[arg(long)]
        upper: Decimal,

        /// Current price
        #[arg(long)]
        price: Decimal,

        /// Total quote investment
        #[arg(long, default_value = "1000")]
        investment: Decimal,

        #[arg(long, default_value = "20")]
        grids: usize,

        /// Use arithmetic instead of geometric spacing
        #[arg(long)]
        arithmetic: bool,
    },

    /// Plan a smart DCA ladder and evaluate the current price
    Dca {
        /// Base entry price
        #[arg(long)]
        entry: Decimal,

        /// Current price
        #[arg(long)]
        price: Option<Decimal>,

        /// Current RSI
        #[arg(long, default_value = "50")]
        rsi: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database {
        config.database_url = Some(url);
    }

    match cli.command {
        Commands::Run {
            data,
            symbols,
            capital,
            interval,
            cycles,
        } => {
            if let Some(dir) = data {
                config.feed.replay_dir = dir.to_string_lossy().into_owned();
            }
            if let Some(symbols) = symbols {
                config.symbols = symbols
                    .split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            if let Some(capital) = capital {
                config.initial_capital = capital;
            }
            if let Some(interval) = interval {
                config.interval_secs = interval;
            }
            config.validate()?;

            let provider = Arc::new(ReplayProvider::new(
                &config.feed.replay_dir,
                config.signals.min_bars,
            ));
            let mut bot = Bot::new(config.clone(), provider.clone());

            // Stop once every replay file has been consumed
            let shutdown = bot.shutdown_signal();
            let poll = std::time::Duration::from_secs(config.interval_secs.max(1));
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(poll).await;
                    if provider.exhausted().await {
                        info!("Replay data exhausted");
                        shutdown.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            });

            let mut journal = None;
            if let Some(url) = &config.database_url {
                let db = Arc::new(Database::new(url).await?);
                bot = bot.with_journal(db.clone());
                journal = Some(db);
            }
            if let Some(cycles) = cycles {
                bot = bot.with_max_cycles(cycles);
            }

            let mut events = bot.subscribe();
            let printer = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(BotEvent::SignalArmed(s)) => {
                            println!("ARMED    {} {} score {:.0} @ {}", s.symbol, s.direction, s.score, s.entry_price);
                        }
                        Ok(BotEvent::Executed(r)) => {
                            println!("ENTRY    {} {} {} @ {:.4} (risk ${:.2})", r.symbol, r.direction, r.size, r.entry_price, r.risk_amount);
                        }
                        Ok(BotEvent::Rejected(r)) => {
                            println!("REJECTED {} {}", r.symbol, r.reason.unwrap_or_default());
                        }
                        Ok(BotEvent::PositionClosed(t)) => {
                            println!("EXIT     {} {} @ {:.4} net ${:.2}", t.symbol, t.exit_reason, t.exit_price, t.net_pnl);
                        }
                        Ok(BotEvent::Snapshot(_)) => {}
                        Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event printer lagged"),
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            println!("\n=== Signal Trader (paper) ===");
            println!("Symbols:  {}", config.symbols.join(", "));
            println!("Capital:  ${}", config.initial_capital);
            println!("Interval: {}s", config.interval_secs);
            println!("Data:     {}", config.feed.replay_dir);
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }

            println!("\n{}", bot.stats());
            println!("{}", bot.trader().snapshot(chrono::Utc::now()));

            if let Some(db) = &journal {
                let trades = db.recent_trades(1000).await?;
                let drawdown = db.calculate_max_drawdown().await?;
                for symbol in &config.symbols {
                    let signals = db.signals_for(symbol).await?;
                    println!("Journal: {} signals recorded for {}", signals.len(), symbol);
                }
                println!(
                    "Journal: {} trades recorded, max drawdown {:.2}%",
                    trades.len(),
                    drawdown * 100.0
                );
            }

            drop(bot);
            printer.await.ok();
        }

        Commands::Backtest { symbol, file, capital } => {
            if let Some(capital) = capital {
                config.initial_capital = capital;
            }
            config.validate()?;

            let path = file.unwrap_or_else(|| series_path(&config.feed.replay_dir, &symbol));
            info!(symbol = %symbol, path = %path.display(), "Running backtest");

            let results = Backtester::new(config)
                .run_file(&symbol, &path)
                .await
                .with_context(|| format!("Backtest of {} failed", symbol))?;
            println!("{}", results);
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if let Err(e) = config.validate() {
                println!("\nWARNING: {}", e);
            }
        }

        Commands::Size {
            capital,
            entry,
            stop,
            open_notional,
        } => {
            let sizer = PositionSizer::new(config.risk.clone());
            let result = sizer.calculate_size(capital, entry, stop, open_notional);
            let kelly = sizer.kelly();
            let var = sizer.var(capital);

            println!("\n=== Position Size ({:?}) ===\n", sizer.method());
            println!("  Size:            {}", result.size);
            println!("  Notional:        ${:.2}", result.size_quote);
            println!("  Risk:            ${:.2} ({:.2}%)", result.risk_amount, result.risk_percent);
            println!("  Limited By:      {:?}", result.limited_by);

            println!("\nKelly:");
            println!("  Win Rate:        {:.1}%", kelly.win_rate * 100.0);
            println!("  Win/Loss Ratio:  {:.2}", kelly.avg_win_loss_ratio);
            println!("  Full Kelly:      {:.2}%", kelly.full_kelly * 100.0);
            println!("  Recommended:     {:.2}%", kelly.recommended * 100.0);

            println!("\nValue at Risk ({}d, vol {:.1}%):", var.time_horizon, var.volatility * 100.0);
            println!("  VaR 95:          ${:.2}", var.var_95);
            println!("  VaR 99:          ${:.2}", var.var_99);
            println!("  CVaR 95:         ${:.2}", var.cvar_95);
            println!("  Max Position 95: ${:.2}", var.max_position_95);
        }

        Commands::Levels {
            entry,
            atr,
            direction,
            style,
        } => {
            let style = style.unwrap_or(config.risk.trading_style);
            let calculator = LevelCalculator::new(&config.risk).with_style(style);
            let levels = calculator.stop_and_target(entry, direction, atr);

            println!("\n=== Levels ({} {}, {} style) ===\n", direction, entry, style);
            println!("  Stop Loss:       {} ({} away)", levels.stop_loss, levels.stop_distance);
            println!("  Take Profit:     {} ({} away)", levels.take_profit, levels.target_distance);
            println!("  Risk/Reward:     {}", levels.risk_reward);
            println!(
                "  Trailing:        {} once {}R in profit",
                atr * config.risk.trail_distance_atr,
                config.risk.trail_activation_r
            );

            println!("\nScale-out:");
            for level in calculator.scale_out_ladder(entry, levels.stop_loss, direction) {
                println!(
                    "  {}R @ {:<12} exit {:>3}%  {}",
                    level.r_multiple,
                    level.price,
                    level.fraction * dec!(100),
                    level.action
                );
            }
        }

        Commands::Grid {
            lower,
            upper,
            price,
            investment,
            grids,
            arithmetic,
        } => {
            let spacing = if arithmetic {
                GridSpacing::Arithmetic
            } else {
                GridSpacing::Geometric
            };
            let mut planner = GridPlanner::new(GridConfig {
                num_grids: grids,
                spacing,
            });
            let orders = planner.setup(lower, upper, investment, price)?;

            println!("\n{:<6} {:<6} {:>14} {:>14}", "LEVEL", "SIDE", "PRICE", "SIZE");
            println!("{}", "-".repeat(44));
            for order in &orders {
                println!(
                    "{:<6} {:<6} {:>14.4} {:>14.6}",
                    order.level_index,
                    format!("{:?}", order.side),
                    order.price,
                    order.size
                );
            }

            if let Some(status) = planner.status() {
                print!("{}", status);
            }
            if let Some(estimate) = planner.profit_estimate(price) {
                println!(
                    "Per cycle: ${} ({}% grid), daily ${} - ${}",
                    estimate.profit_per_cycle, estimate.avg_grid_percent, estimate.daily_low, estimate.daily_high
                );
            }
            println!("{}", planner.check_exit(price));
        }

        Commands::Dca { entry, price, rsi } => {
            let mut dca = SmartDca::new(DcaConfig::default());
            let orders = dca.start(entry, "DCA").to_vec();

            println!("\n{:<6} {:>12} {:>14} {:>8} {:>8}", "ORDER", "SIZE", "TRIGGER", "DROP", "RSI");
            println!("{}", "-".repeat(52));
            for order in &orders {
                println!(
                    "{:<6} {:>12.2} {:>14.4} {:>7.1}% {:>8.1}",
                    order.order_number,
                    order.size,
                    order.trigger_price,
                    order.price_drop * dec!(100),
                    order.rsi_trigger
                );
            }

            if let Some(price) = price {
                match dca.check_trigger(price, rsi) {
                    Some(order) => println!("\nSafety order {} triggers at {} (RSI {})", order.order_number, price, rsi),
                    None => println!("\nNo safety order triggers at {} (RSI {})", price, rsi),
                }

                match dca.should_close(price) {
                    DcaAction::TakeProfit { pnl_percent } => println!("Close: take profit ({}%)", pnl_percent),
                    DcaAction::StopLoss { pnl_percent } => println!("Close: stop loss ({}%)", pnl_percent),
                    DcaAction::Hold { pnl_percent } => println!("Hold ({}%)", pnl_percent),
                    DcaAction::NoPosition => println!("No position"),
                }

                if let Some(status) = dca.status(price) {
                    print!("{}", status);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_size() {
        let cli = Cli::try_parse_from([
            "sigtrader", "size", "--capital", "10000", "--entry", "100", "--stop", "98",
        ])
        .unwrap();
        match cli.command {
            Commands::Size { capital, entry, stop, open_notional } => {
                assert_eq!(capital, dec!(10000));
                assert_eq!(entry, dec!(100));
                assert_eq!(stop, dec!(98));
                assert_eq!(open_notional, Decimal::ZERO);
            }
            _ => panic!("expected size command"),
        }
    }

    #[test]
    fn test_cli_parses_levels_direction_and_style() {
        let cli = Cli::try_parse_from([
            "sigtrader", "--log-level", "debug", "levels", "--entry", "100", "--atr", "2", "--direction", "short", "--style", "day",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Levels { direction, style, .. } => {
                assert_eq!(direction, Direction::Short);
                assert_eq!(style, Some(TradingStyle::Day));
            }
            _ => panic!("expected levels command"),
        }
    }
}
