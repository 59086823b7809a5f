//! Smart dollar-cost averaging: a base order plus safety orders that fire only
//! when both a price drop and an RSI level are reached.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DcaConfig {
    /// Base order in quote currency
    pub base_order: Decimal,

    pub safety_orders: usize,

    /// Each safety order is this many times the previous one
    pub scale_multiplier: Decimal,

    /// RSI at or below which each safety order may fire
    pub rsi_levels: Vec<f64>,

    /// Drop from the base entry for each safety order (fractions)
    pub price_drops: Vec<Decimal>,

    /// Close when price is this fraction above the average
    pub take_profit: Decimal,

    /// Close when price is this fraction below the average
    pub stop_loss: Decimal,
}

impl Default for DcaConfig {
    fn default() -> Self {
        Self {
            base_order: dec!(100),
            safety_orders: 5,
            scale_multiplier: dec!(1.5),
            rsi_levels: vec![29.0, 27.5, 26.0, 24.0, 22.0],
            price_drops: vec![dec!(0.015), dec!(0.025), dec!(0.04), dec!(0.06), dec!(0.10)],
            take_profit: dec!(0.03),
            stop_loss: dec!(0.15),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DcaOrder {
    /// 0 is the base order
    pub order_number: usize,

    /// Quote currency
    pub size: Decimal,

    pub trigger_price: Decimal,
    pub rsi_trigger: f64,
    pub price_drop: Decimal,
    pub filled: bool,
    pub fill_price: Option<Decimal>,
}

/// Position state after a fill.
#[derive(Debug, Clone, Serialize)]
pub struct DcaFill {
    pub order_number: usize,
    pub fill_price: Decimal,
    pub order_size: Decimal,
    pub total_invested: Decimal,
    pub average_price: Decimal,
    pub position_size: Decimal,
    pub orders_filled: usize,
    pub orders_remaining: usize,
}

/// Close decision for the accumulated position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DcaAction {
    NoPosition,
    Hold { pnl_percent: Decimal },
    TakeProfit { pnl_percent: Decimal },
    StopLoss { pnl_percent: Decimal },
}

#[derive(Debug, Clone, Serialize)]
pub struct DcaStatus {
    pub base_entry_price: Decimal,
    pub average_price: Decimal,
    pub current_price: Decimal,
    pub position_size: Decimal,
    pub total_invested: Decimal,
    pub current_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: Decimal,
    pub distance_to_breakeven: Decimal,
    pub orders_filled: usize,
    pub orders_remaining: usize,
    pub take_profit_price: Decimal,
}

impl fmt::Display for DcaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^50}", " DCA ")?;
        writeln!(f, "Base Entry:    ${:.2}", self.base_entry_price)?;
        writeln!(f, "Average Price: ${:.2}", self.average_price)?;
        writeln!(f, "Current Price: ${:.2}", self.current_price)?;
        writeln!(f, "Invested:      ${:.2}", self.total_invested)?;
        writeln!(f, "Value:         ${:.2}", self.current_value)?;
        writeln!(f, "Unrealized:    ${:.2} ({:.2}%)", self.unrealized_pnl, self.unrealized_pnl_percent)?;
        writeln!(f, "Take Profit:   ${:.2}", self.take_profit_price)?;
        writeln!(f, "Orders:        {} filled / {} pending", self.orders_filled, self.orders_remaining)?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmartDca {
    config: DcaConfig,
    orders: Vec<DcaOrder>,
    base_entry_price: Option<Decimal>,
    total_invested: Decimal,
    position_size: Decimal,
}

impl SmartDca {
    pub fn new(config: DcaConfig) -> Self {
        Self {
            config,
            orders: Vec::new(),
            base_entry_price: None,
            total_invested: Decimal::ZERO,
            position_size: Decimal::ZERO,
        }
    }

    /// Fill the base order at `entry_price` and plan the safety orders.
    pub fn start(&mut self, entry_price: Decimal, symbol: &str) -> &[DcaOrder] {
        self.orders.clear();
        self.total_invested = Decimal::ZERO;
        self.position_size = Decimal::ZERO;
        self.base_entry_price = Some(entry_price);

        self.orders.push(DcaOrder {
            order_number: 0,
            size: self.config.base_order,
            trigger_price: entry_price,
            rsi_trigger: 30.0,
            price_drop: Decimal::ZERO,
            filled: true,
            fill_price: Some(entry_price),
        });
        self.add_to_position(entry_price, self.config.base_order);

        let mut size = self.config.base_order;
        for i in 0..self.config.safety_orders {
            size *= self.config.scale_multiplier;
            let drop = self
                .config
                .price_drops
                .get(i)
                .or(self.config.price_drops.last())
                .copied()
                .unwrap_or(Decimal::ZERO);

            self.orders.push(DcaOrder {
                order_number: i + 1,
                size,
                trigger_price: entry_price * (Decimal::ONE - drop),
                rsi_trigger: self.config.rsi_levels.get(i).copied().unwrap_or(20.0),
                price_drop: drop,
                filled: false,
                fill_price: None,
            });
        }

        info!(symbol, safety_orders = self.config.safety_orders, entry = %entry_price, "DCA started");
        &self.orders
    }

    fn add_to_position(&mut self, price: Decimal, amount: Decimal) {
        if price <= Decimal::ZERO {
            return;
        }
        self.total_invested += amount;
        self.position_size += amount / price;
    }

    pub fn orders(&self) -> &[DcaOrder] {
        &self.orders
    }

    pub fn average_price(&self) -> Decimal {
        if self.position_size.is_zero() {
            Decimal::ZERO
        } else {
            self.total_invested / self.position_size
        }
    }

    /// First pending safety order whose price and RSI conditions both hold.
    pub fn check_trigger(&self, price: Decimal, rsi: f64) -> Option<&DcaOrder> {
        self.orders
            .iter()
            .filter(|o| !o.filled)
            .find(|o| price <= o.trigger_price && rsi <= o.rsi_trigger)
    }

    pub fn next_safety_order(&self) -> Option<&DcaOrder> {
        self.orders.iter().find(|o| !o.filled)
    }

    /// Fill a pending order; `None` if it does not exist or is already filled.
    pub fn fill(&mut self, order_number: usize, fill_price: Decimal) -> Option<DcaFill> {
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.order_number == order_number && !o.filled)?;
        order.filled = true;
        order.fill_price = Some(fill_price);
        let size = order.size;

        self.add_to_position(fill_price, size);

        let orders_filled = self.orders.iter().filter(|o| o.filled).count();
        Some(DcaFill {
            order_number,
            fill_price,
            order_size: size,
            total_invested: self.total_invested,
            average_price: self.average_price(),
            position_size: self.position_size,
            orders_filled,
            orders_remaining: self.orders.len() - orders_filled,
        })
    }

    pub fn take_profit_price(&self, target: Decimal) -> Decimal {
        self.average_price() * (Decimal::ONE + target)
    }

    pub fn status(&self, current_price: Decimal) -> Option<DcaStatus> {
        if self.position_size.is_zero() {
            return None;
        }

        let average = self.average_price();
        let current_value = self.position_size * current_price;
        let unrealized_pnl = current_value - self.total_invested;
        let orders_filled = self.orders.iter().filter(|o| o.filled).count();

        Some(DcaStatus {
            base_entry_price: self.base_entry_price.unwrap_or(Decimal::ZERO),
            average_price: average,
            current_price,
            position_size: self.position_size,
            total_invested: self.total_invested,
            current_value,
            unrealized_pnl,
            unrealized_pnl_percent: unrealized_pnl / self.total_invested * dec!(100),
            distance_to_breakeven: (current_price / average - Decimal::ONE) * dec!(100),
            orders_filled,
            orders_remaining: self.orders.len() - orders_filled,
            take_profit_price: self.take_profit_price(self.config.take_profit),
        })
    }

    pub fn should_close(&self, current_price: Decimal) -> DcaAction {
        let average = self.average_price();
        if average.is_zero() {
            return DcaAction::NoPosition;
        }

        let pnl = current_price / average - Decimal::ONE;
        let pnl_percent = (pnl * dec!(100)).round_dp(2);

        if pnl >= self.config.take_profit {
            DcaAction::TakeProfit { pnl_percent }
        } else if pnl <= -self.config.stop_loss {
            DcaAction::StopLoss { pnl_percent }
        } else {
            DcaAction::Hold { pnl_percent }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> SmartDca {
        let mut dca = SmartDca::new(DcaConfig::default());
        dca.start(dec!(100), "BTC/USDT");
        dca
    }

    #[test]
    fn test_plan() {
        let dca = started();
        let orders = dca.orders();
        assert_eq!(orders.len(), 6);
        assert!(orders[0].filled);
        assert_eq!(orders[1].size, dec!(150));
        assert_eq!(orders[1].trigger_price, dec!(98.5));
        assert_eq!(orders[1].rsi_trigger, 29.0);
        assert_eq!(orders[5].size, dec!(759.375));
        assert_eq!(orders[5].trigger_price, dec!(90));
        assert_eq!(dca.average_price(), dec!(100));
    }

    #[test]
    fn test_trigger_needs_price_and_rsi() {
        let dca = started();
        assert!(dca.check_trigger(dec!(98), 30.0).is_none());
        assert!(dca.check_trigger(dec!(99), 20.0).is_none());
        assert_eq!(dca.check_trigger(dec!(98), 28.0).unwrap().order_number, 1);
    }

    #[test]
    fn test_fill_lowers_average() {
        let mut dca = started();
        let fill = dca.fill(1, dec!(98)).unwrap();
        assert_eq!(fill.total_invested, dec!(250));
        assert_eq!(fill.orders_filled, 2);
        assert_eq!(fill.orders_remaining, 4);
        assert!(fill.average_price < dec!(100) && fill.average_price > dec!(98));

        assert!(dca.fill(1, dec!(98)).is_none());
        assert_eq!(dca.next_safety_order().unwrap().order_number, 2);
    }

    #[test]
    fn test_close_decisions() {
        let dca = started();
        assert!(matches!(dca.should_close(dec!(103)), DcaAction::TakeProfit { .. }));
        assert_eq!(
            dca.should_close(dec!(80)),
            DcaAction::StopLoss { pnl_percent: dec!(-20) }
        );
        assert!(matches!(dca.should_close(dec!(99)), DcaAction::Hold { .. }));

        let empty = SmartDca::new(DcaConfig::default());
        assert_eq!(empty.should_close(dec!(100)), DcaAction::NoPosition);
        assert!(empty.status(dec!(100)).is_none());
    }

    #[test]
    fn test_status() {
        let dca = started();
        let status = dca.status(dec!(110)).unwrap();
        assert_eq!(status.unrealized_pnl, dec!(10));
        assert_eq!(status.unrealized_pnl_percent, dec!(10));
        assert_eq!(status.take_profit_price, dec!(103));
    }
}
