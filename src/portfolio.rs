//! Portfolio ledger - authoritative balance, positions, and history.
//!
//! Mutated only by the engine's event-consumption loop; every other reader
//! goes through [`Portfolio::snapshot`].

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::core::{Error, Fill, Result, Side, Symbol, Trade, ValuePoint};

/// Value snapshots kept in memory; the oldest half is dropped when the
/// cap is reached. All-time peaks are tracked separately and survive trims.
const MAX_VALUE_POINTS: usize = 10_000;

/// Derived performance metrics
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PortfolioMetrics {
    pub total_value: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

impl PortfolioMetrics {
    fn zero(total_value: f64) -> Self {
        Self {
            total_value,
            total_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
        }
    }
}

/// Read-only view for cross-loop consumers (risk gate, reporting)
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub balance: Decimal,
    pub positions: HashMap<Symbol, Decimal>,
    pub total_value: Decimal,
    pub realized_value: Decimal,
    pub peak_total: Decimal,
    pub peak_realized: Decimal,
}

impl PortfolioSnapshot {
    pub fn position(&self, symbol: &Symbol) -> Decimal {
        self.positions.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    /// Decline from the all-time value peak, as a fraction.
    /// `include_unrealized` selects between the mark-to-market and
    /// cost-basis value series.
    pub fn max_drawdown(&self, include_unrealized: bool) -> f64 {
        let (peak, value) = if include_unrealized {
            (self.peak_total, self.total_value)
        } else {
            (self.peak_realized, self.realized_value)
        };
        if peak <= Decimal::ZERO || value >= peak {
            return 0.0;
        }
        ((peak - value) / peak).to_f64().unwrap_or(0.0)
    }
}

/// Balance/position/trade-history ledger. Pure state and accounting math.
pub struct Portfolio {
    balance: Decimal,
    positions: HashMap<Symbol, Decimal>,
    avg_costs: HashMap<Symbol, Decimal>,
    marks: HashMap<Symbol, Decimal>,
    trade_history: Vec<Trade>,
    value_history: Vec<ValuePoint>,
    initial_value: Decimal,
    peak_total: Decimal,
    peak_realized: Decimal,
}

impl Portfolio {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            balance: initial_balance,
            positions: HashMap::new(),
            avg_costs: HashMap::new(),
            marks: HashMap::new(),
            trade_history: vec![],
            value_history: vec![ValuePoint {
                timestamp: Utc::now(),
                total_value: initial_balance,
                realized_value: initial_balance,
            }],
            initial_value: initial_balance,
            peak_total: initial_balance,
            peak_realized: initial_balance,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn position(&self, symbol: &Symbol) -> Decimal {
        self.positions.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn trade_history(&self) -> &[Trade] {
        &self.trade_history
    }

    pub fn value_history(&self) -> &[ValuePoint] {
        &self.value_history
    }

    /// Apply a filled order to the ledger.
    ///
    /// All-or-nothing: validation runs before any mutation, so a rejected
    /// trade leaves balance and positions untouched.
    pub fn apply_trade(&mut self, fill: &Fill) -> Result<Trade> {
        if fill.amount <= Decimal::ZERO || fill.price <= Decimal::ZERO {
            return Err(Error::InvalidSignal(format!(
                "non-positive fill for {}: amount {} price {}",
                fill.symbol, fill.amount, fill.price
            )));
        }

        let held = self.position(&fill.symbol);
        let cost = fill.amount * fill.price;

        // Validate before touching anything
        match fill.side {
            Side::Buy => {
                if cost > self.balance {
                    return Err(Error::InsufficientFunds {
                        available: self.balance,
                        required: cost,
                    });
                }
            }
            Side::Sell => {
                if fill.amount > held {
                    return Err(Error::InsufficientPosition {
                        symbol: fill.symbol.to_string(),
                        held,
                        required: fill.amount,
                    });
                }
            }
        }

        let avg_cost = self.avg_costs.get(&fill.symbol).copied().unwrap_or(fill.price);
        let realized_profit = match fill.side {
            Side::Buy => {
                self.balance -= cost;
                let new_held = held + fill.amount;
                let new_avg = (held * avg_cost + cost) / new_held;
                self.positions.insert(fill.symbol.clone(), new_held);
                self.avg_costs.insert(fill.symbol.clone(), new_avg);
                Decimal::ZERO
            }
            Side::Sell => {
                self.balance += cost;
                let new_held = held - fill.amount;
                if new_held.is_zero() {
                    self.positions.remove(&fill.symbol);
                    self.avg_costs.remove(&fill.symbol);
                } else {
                    self.positions.insert(fill.symbol.clone(), new_held);
                }
                (fill.price - avg_cost) * fill.amount
            }
        };

        if self.balance < Decimal::ZERO {
            return Err(Error::Fatal(format!(
                "negative balance {} after trade on {}",
                self.balance, fill.symbol
            )));
        }

        self.marks.insert(fill.symbol.clone(), fill.price);

        let trade = Trade {
            timestamp: fill.timestamp,
            symbol: fill.symbol.clone(),
            side: fill.side,
            amount: fill.amount,
            price: fill.price,
            realized_profit,
        };
        self.trade_history.push(trade.clone());
        self.record_value();
        Ok(trade)
    }

    /// Update the mark used to value an open position
    pub fn mark_price(&mut self, symbol: &Symbol, price: Decimal) {
        if price > Decimal::ZERO {
            self.marks.insert(symbol.clone(), price);
        }
    }

    /// Append a value snapshot at current marks
    pub fn record_value(&mut self) {
        let mut total = self.balance;
        let mut realized = self.balance;
        for (symbol, amount) in &self.positions {
            let cost = self.avg_costs.get(symbol).copied().unwrap_or(Decimal::ZERO);
            let mark = self.marks.get(symbol).copied().unwrap_or(cost);
            total += *amount * mark;
            realized += *amount * cost;
        }
        self.peak_total = self.peak_total.max(total);
        self.peak_realized = self.peak_realized.max(realized);
        self.value_history.push(ValuePoint {
            timestamp: Utc::now(),
            total_value: total,
            realized_value: realized,
        });
        if self.value_history.len() > MAX_VALUE_POINTS {
            self.value_history.drain(..MAX_VALUE_POINTS / 2);
        }
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        let latest = self.value_history.last().copied().unwrap_or(ValuePoint {
            timestamp: Utc::now(),
            total_value: self.balance,
            realized_value: self.balance,
        });
        PortfolioSnapshot {
            balance: self.balance,
            positions: self.positions.clone(),
            total_value: latest.total_value,
            realized_value: latest.realized_value,
            peak_total: self.peak_total,
            peak_realized: self.peak_realized,
        }
    }

    /// Total return, Sharpe-like ratio, and max drawdown from the value
    /// history. Zero-valued when fewer than two points exist.
    pub fn metrics(&self) -> PortfolioMetrics {
        let values: Vec<f64> = self
            .value_history
            .iter()
            .map(|p| p.total_value.to_f64().unwrap_or(0.0))
            .collect();

        let current = values.last().copied().unwrap_or(0.0);
        if values.len() < 2 {
            return PortfolioMetrics::zero(current);
        }

        let initial = self.initial_value.to_f64().unwrap_or(0.0);
        let total_return = if initial > 0.0 { current / initial - 1.0 } else { 0.0 };

        let returns: Vec<f64> = values
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        let sharpe_ratio = if returns.len() >= 2 {
            let n = returns.len() as f64;
            let mean = returns.iter().sum::<f64>() / n;
            let std = (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
            if std > 0.0 {
                mean / std
            } else {
                0.0
            }
        } else {
            0.0
        };

        let peak = self.peak_total.to_f64().unwrap_or(0.0);
        let max_drawdown = if peak > 0.0 { (1.0 - current / peak).max(0.0) } else { 0.0 };

        PortfolioMetrics {
            total_value: current,
            total_return,
            sharpe_ratio,
            max_drawdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn fill(symbol: &str, side: Side, amount: i64, price: i64) -> Fill {
        Fill {
            order_id: Uuid::new_v4(),
            symbol: Symbol::new(symbol),
            side,
            amount: Decimal::from(amount),
            price: Decimal::from(price),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn buy_decreases_balance_and_increases_position() {
        let mut portfolio = Portfolio::new(Decimal::from(10_000));
        portfolio
            .apply_trade(&fill("BTC/USDT", Side::Buy, 10, 100))
            .unwrap();

        assert_eq!(portfolio.balance(), Decimal::from(9_000));
        assert_eq!(portfolio.position(&Symbol::new("BTC/USDT")), Decimal::from(10));
        assert_eq!(portfolio.trade_history().len(), 1);
    }

    #[test]
    fn sell_increases_balance_and_decreases_position() {
        let mut portfolio = Portfolio::new(Decimal::from(10_000));
        portfolio
            .apply_trade(&fill("BTC/USDT", Side::Buy, 10, 100))
            .unwrap();
        portfolio
            .apply_trade(&fill("BTC/USDT", Side::Sell, 4, 110))
            .unwrap();

        assert_eq!(portfolio.balance(), Decimal::from(9_000 + 440));
        assert_eq!(portfolio.position(&Symbol::new("BTC/USDT")), Decimal::from(6));
    }

    #[test]
    fn sell_records_realized_profit_against_average_cost() {
        let mut portfolio = Portfolio::new(Decimal::from(10_000));
        portfolio
            .apply_trade(&fill("ETH/USDT", Side::Buy, 10, 100))
            .unwrap();
        let trade = portfolio
            .apply_trade(&fill("ETH/USDT", Side::Sell, 10, 120))
            .unwrap();

        assert_eq!(trade.realized_profit, Decimal::from(200));
        assert_eq!(portfolio.position(&Symbol::new("ETH/USDT")), Decimal::ZERO);
    }

    #[test]
    fn insufficient_funds_leaves_state_untouched() {
        let mut portfolio = Portfolio::new(Decimal::from(500));
        let err = portfolio
            .apply_trade(&fill("BTC/USDT", Side::Buy, 10, 100))
            .unwrap_err();

        assert!(matches!(err, Error::InsufficientFunds { .. }));
        assert_eq!(portfolio.balance(), Decimal::from(500));
        assert!(portfolio.snapshot().positions.is_empty());
        assert!(portfolio.trade_history().is_empty());
        assert_eq!(portfolio.value_history().len(), 1);
    }

    #[test]
    fn insufficient_position_leaves_state_untouched() {
        let mut portfolio = Portfolio::new(Decimal::from(10_000));
        portfolio
            .apply_trade(&fill("BTC/USDT", Side::Buy, 2, 100))
            .unwrap();
        let balance_before = portfolio.balance();

        let err = portfolio
            .apply_trade(&fill("BTC/USDT", Side::Sell, 5, 100))
            .unwrap_err();

        assert!(matches!(err, Error::InsufficientPosition { .. }));
        assert_eq!(portfolio.balance(), balance_before);
        assert_eq!(portfolio.position(&Symbol::new("BTC/USDT")), Decimal::from(2));
    }

    #[test]
    fn metrics_are_zero_on_fresh_portfolio() {
        let portfolio = Portfolio::new(Decimal::from(10_000));
        let metrics = portfolio.metrics();
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.total_value, 10_000.0);
    }

    #[test]
    fn value_history_is_bounded_and_keeps_the_peak() {
        let mut portfolio = Portfolio::new(Decimal::from(10_000));
        portfolio
            .apply_trade(&fill("BTC/USDT", Side::Buy, 10, 100))
            .unwrap();
        portfolio.mark_price(&Symbol::new("BTC/USDT"), Decimal::from(200));
        portfolio.record_value(); // peak: 9000 cash + 10 * 200

        for _ in 0..(MAX_VALUE_POINTS + 50) {
            portfolio.record_value();
        }
        assert!(portfolio.value_history().len() <= MAX_VALUE_POINTS);

        // The peak survives trimming even though its point was dropped
        portfolio.mark_price(&Symbol::new("BTC/USDT"), Decimal::from(100));
        portfolio.record_value();
        let snapshot = portfolio.snapshot();
        assert_eq!(snapshot.peak_total, Decimal::from(11_000));
        let drawdown = snapshot.max_drawdown(true);
        assert!((drawdown - 1_000.0 / 11_000.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_reflects_marked_losses() {
        let mut portfolio = Portfolio::new(Decimal::from(10_000));
        portfolio
            .apply_trade(&fill("BTC/USDT", Side::Buy, 10, 100))
            .unwrap();
        portfolio.mark_price(&Symbol::new("BTC/USDT"), Decimal::from(50));
        portfolio.record_value();

        let metrics = portfolio.metrics();
        assert!(metrics.max_drawdown > 0.0);

        let snapshot = portfolio.snapshot();
        assert!(snapshot.max_drawdown(true) > 0.0);
        // Cost-basis series never saw the markdown
        assert_eq!(snapshot.max_drawdown(false), 0.0);
    }
}
