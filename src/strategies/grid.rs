//! Grid planner for ranging markets.
//!
//! Buy orders sit below the current price and sell orders above; each fill
//! produces the opposite order one level away.

use std::fmt;

use anyhow::{bail, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::to_decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridSpacing {
    /// Constant ratio between levels
    #[default]
    Geometric,
    /// Constant price step between levels
    Arithmetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub num_grids: usize,
    pub spacing: GridSpacing,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            num_grids: 20,
            spacing: GridSpacing::Geometric,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GridLevel {
    pub index: usize,
    pub price: Decimal,
    pub side: GridSide,
    pub filled: bool,
}

/// An order to place on the grid.
#[derive(Debug, Clone, Serialize)]
pub struct GridOrder {
    pub level_index: usize,
    pub price: Decimal,
    pub side: GridSide,

    /// Base units; zero for the initial sell levels
    pub size: Decimal,
}

/// Whether the price is still inside the grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GridExit {
    Hold,
    ExitBelow { price: Decimal, lower: Decimal },
    ExitAbove { price: Decimal, upper: Decimal },
}

impl GridExit {
    pub fn should_exit(&self) -> bool {
        !matches!(self, GridExit::Hold)
    }
}

impl fmt::Display for GridExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridExit::Hold => write!(f, "Price inside grid"),
            GridExit::ExitBelow { price, lower } => write!(
                f,
                "Price {} below grid floor {}; close and rebuild the grid lower",
                price, lower
            ),
            GridExit::ExitAbove { price, upper } => write!(
                f,
                "Price {} above grid ceiling {}; close and rebuild the grid higher",
                price, upper
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GridStatus {
    pub lower: Decimal,
    pub upper: Decimal,
    pub num_grids: usize,
    pub spacing: GridSpacing,
    pub total_levels: usize,
    pub filled_buys: usize,
    pub filled_sells: usize,
    pub investment_per_grid: Decimal,
}

impl fmt::Display for GridStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^50}", " GRID ")?;
        writeln!(f, "Range:        {} - {}", self.lower, self.upper)?;
        writeln!(f, "Grids:        {} ({:?})", self.num_grids, self.spacing)?;
        writeln!(f, "Levels:       {}", self.total_levels)?;
        writeln!(f, "Filled:       {} buys / {} sells", self.filled_buys, self.filled_sells)?;
        writeln!(f, "Per Grid:     ${:.2}", self.investment_per_grid)?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}

/// Rough profit figures for one full buy/sell cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ProfitEstimate {
    pub avg_grid_size: Decimal,
    pub avg_grid_percent: Decimal,
    pub profit_per_cycle: Decimal,
    pub daily_low: Decimal,
    pub daily_high: Decimal,
}

#[derive(Debug, Clone)]
pub struct GridPlanner {
    config: GridConfig,
    lower: Decimal,
    upper: Decimal,
    investment_per_grid: Decimal,
    levels: Vec<GridLevel>,
}

impl GridPlanner {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            lower: Decimal::ZERO,
            upper: Decimal::ZERO,
            investment_per_grid: Decimal::ZERO,
            levels: Vec::new(),
        }
    }

    /// Lay out the grid and return the initial orders.
    pub fn setup(
        &mut self,
        lower: Decimal,
        upper: Decimal,
        total_investment: Decimal,
        current_price: Decimal,
    ) -> Result<Vec<GridOrder>> {
        if lower <= Decimal::ZERO || upper <= lower {
            bail!("Invalid grid range: {} - {}", lower, upper);
        }
        if self.config.num_grids == 0 {
            bail!("Grid needs at least one interval");
        }

        self.lower = lower;
        self.upper = upper;
        self.investment_per_grid = total_investment / Decimal::from(self.config.num_grids);

        let prices = match self.config.spacing {
            GridSpacing::Geometric => self.geometric_prices(),
            GridSpacing::Arithmetic => self.arithmetic_prices(),
        };

        self.levels = prices
            .into_iter()
            .enumerate()
            .map(|(index, price)| GridLevel {
                index,
                price,
                side: if price < current_price { GridSide::Buy } else { GridSide::Sell },
                filled: false,
            })
            .collect();

        info!(
            levels = self.levels.len(),
            lower = %lower,
            upper = %upper,
            "Grid configured"
        );

        Ok(self
            .levels
            .iter()
            .map(|level| GridOrder {
                level_index: level.index,
                price: level.price,
                side: level.side,
                size: match level.side {
                    GridSide::Buy => self.investment_per_grid / level.price,
                    GridSide::Sell => Decimal::ZERO,
                },
            })
            .collect())
    }

    fn geometric_prices(&self) -> Vec<Decimal> {
        let lower = self.lower.to_f64().unwrap_or(0.0);
        let upper = self.upper.to_f64().unwrap_or(0.0);
        let n = self.config.num_grids;
        let ratio = (upper / lower).powf(1.0 / n as f64);
        (0..=n)
            .map(|i| to_decimal(lower * ratio.powi(i as i32)))
            .collect()
    }

    fn arithmetic_prices(&self) -> Vec<Decimal> {
        let step = (self.upper - self.lower) / Decimal::from(self.config.num_grids);
        (0..=self.config.num_grids)
            .map(|i| self.lower + step * Decimal::from(i))
            .collect()
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    /// Mark a level filled and return the opposite order one level away.
    pub fn process_fill(&mut self, index: usize, fill_price: Decimal) -> Option<GridOrder> {
        let last = self.levels.len().checked_sub(1)?;
        let level = self.levels.get_mut(index)?;
        level.filled = true;
        let side = level.side;

        match side {
            GridSide::Buy if index < last => {
                let next = &self.levels[index + 1];
                Some(GridOrder {
                    level_index: index + 1,
                    price: next.price,
                    side: GridSide::Sell,
                    size: self.investment_per_grid / fill_price,
                })
            }
            GridSide::Sell if index > 0 => {
                let below = &self.levels[index - 1];
                Some(GridOrder {
                    level_index: index - 1,
                    price: below.price,
                    side: GridSide::Buy,
                    size: self.investment_per_grid / below.price,
                })
            }
            _ => None,
        }
    }

    pub fn check_exit(&self, price: Decimal) -> GridExit {
        if price < self.lower {
            GridExit::ExitBelow { price, lower: self.lower }
        } else if price > self.upper {
            GridExit::ExitAbove { price, upper: self.upper }
        } else {
            GridExit::Hold
        }
    }

    /// `None` until the grid is set up.
    pub fn status(&self) -> Option<GridStatus> {
        if self.levels.is_empty() {
            return None;
        }
        let filled = |side: GridSide| self.levels.iter().filter(|l| l.filled && l.side == side).count();

        Some(GridStatus {
            lower: self.lower,
            upper: self.upper,
            num_grids: self.config.num_grids,
            spacing: self.config.spacing,
            total_levels: self.levels.len(),
            filled_buys: filled(GridSide::Buy),
            filled_sells: filled(GridSide::Sell),
            investment_per_grid: self.investment_per_grid,
        })
    }

    pub fn profit_estimate(&self, current_price: Decimal) -> Option<ProfitEstimate> {
        if self.levels.len() < 2 || current_price <= Decimal::ZERO {
            return None;
        }

        let avg_grid_size = (self.upper - self.lower) / Decimal::from(self.config.num_grids);
        let fraction = avg_grid_size / current_price;
        let profit_per_cycle = fraction * self.investment_per_grid;

        Some(ProfitEstimate {
            avg_grid_size: avg_grid_size.round_dp(2),
            avg_grid_percent: (fraction * dec!(100)).round_dp(2),
            profit_per_cycle: profit_per_cycle.round_dp(2),
            daily_low: profit_per_cycle.round_dp(2),
            daily_high: (profit_per_cycle * dec!(3)).round_dp(2),
        })
    }
}
