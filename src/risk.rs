//! Risk management - signal gating and adaptive parameter control.
//!
//! The gate is a pure function of the current parameters plus the inputs
//! given on each call; there are no hidden mode transitions. Parameters are
//! mutated in place by volatility adjustment and by configuration updates,
//! always within configured clamp bounds.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::config::RiskConfig;
use crate::core::{Side, Signal};
use crate::portfolio::PortfolioSnapshot;

/// Reason a signal failed the gate. Ordered by check sequence.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("position {held} + {requested} exceeds max {max} for {symbol}")]
    PositionLimit {
        symbol: String,
        held: Decimal,
        requested: Decimal,
        max: Decimal,
    },

    #[error("risk/reward {ratio:.2} below minimum {min:.2}")]
    RewardTooLow { ratio: f64, min: f64 },

    #[error("max drawdown breached: {drawdown:.4} > {max:.4}")]
    DrawdownBreached { drawdown: f64, max: f64 },

    #[error("per-trade risk {risk:.4} exceeds limit {max:.4}")]
    TradeRiskTooHigh { risk: f64, max: f64 },

    #[error("invalid signal: {0}")]
    InvalidSignal(String),
}

/// The mutable parameter set read by the gating function
#[derive(Debug, Clone, serde::Serialize)]
pub struct RiskParameters {
    pub max_position_size: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_risk_per_trade: f64,
}

fn dec(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

/// Stateful rule evaluator and adaptive parameter controller.
/// Reads portfolio snapshots, never mutates the portfolio.
pub struct RiskManager {
    params: RiskParameters,
    /// Baseline the volatility adjustment is anchored to; re-anchored on
    /// explicit parameter updates so adjustment converges instead of drifting
    base: RiskParameters,
    min_risk_reward: f64,
    base_volatility: f64,
    drawdown_includes_unrealized: bool,
    position_size_bounds: (Decimal, Decimal),
    pct_bounds: (f64, f64),
}

impl RiskManager {
    pub fn new(config: &RiskConfig) -> Self {
        let params = RiskParameters {
            max_position_size: dec(config.max_position_size),
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
            max_drawdown_pct: config.max_drawdown_pct,
            max_risk_per_trade: config.max_risk_per_trade,
        };
        let position_size_bounds = (
            dec(config.position_size_bounds[0]),
            Decimal::try_from(config.position_size_bounds[1]).unwrap_or(Decimal::MAX),
        );
        Self {
            base: params.clone(),
            params,
            min_risk_reward: config.min_risk_reward,
            base_volatility: config.base_volatility,
            drawdown_includes_unrealized: config.drawdown_includes_unrealized,
            position_size_bounds,
            pct_bounds: (config.pct_bounds[0], config.pct_bounds[1]),
        }
    }

    pub fn parameters(&self) -> RiskParameters {
        self.params.clone()
    }

    /// Composite gate. Short-circuits on the first failing check; the
    /// failing reason is logged and returned.
    pub fn check_risk(
        &self,
        signal: &Signal,
        portfolio: &PortfolioSnapshot,
    ) -> Result<(), RiskError> {
        self.check_position_limit(signal, portfolio)
            .and_then(|_| self.check_risk_reward(signal))
            .and_then(|_| self.check_drawdown(portfolio))
            .and_then(|_| self.check_trade_risk(signal, portfolio))
            .map_err(|e| {
                warn!(symbol = %signal.symbol, side = %signal.side, "risk check failed: {e}");
                e
            })
    }

    fn check_position_limit(
        &self,
        signal: &Signal,
        portfolio: &PortfolioSnapshot,
    ) -> Result<(), RiskError> {
        let held = portfolio.position(&signal.symbol);
        if held + signal.amount > self.params.max_position_size {
            return Err(RiskError::PositionLimit {
                symbol: signal.symbol.to_string(),
                held,
                requested: signal.amount,
                max: self.params.max_position_size,
            });
        }
        Ok(())
    }

    fn check_risk_reward(&self, signal: &Signal) -> Result<(), RiskError> {
        if signal.price <= Decimal::ZERO {
            return Err(RiskError::InvalidSignal(format!(
                "non-positive entry price {}",
                signal.price
            )));
        }
        let entry = signal.price.to_f64().unwrap_or(0.0);
        let stop = self.stop_loss_for(signal.price, signal.side).to_f64().unwrap_or(0.0);
        let target = self
            .take_profit_for(signal.price, signal.side)
            .to_f64()
            .unwrap_or(0.0);

        let risk = (entry - stop).abs();
        let reward = (target - entry).abs();
        if risk <= 0.0 {
            return Err(RiskError::InvalidSignal("zero stop distance".into()));
        }
        let ratio = reward / risk;
        if ratio < self.min_risk_reward {
            return Err(RiskError::RewardTooLow {
                ratio,
                min: self.min_risk_reward,
            });
        }
        Ok(())
    }

    fn check_drawdown(&self, portfolio: &PortfolioSnapshot) -> Result<(), RiskError> {
        let drawdown = portfolio.max_drawdown(self.drawdown_includes_unrealized);
        if drawdown > self.params.max_drawdown_pct {
            return Err(RiskError::DrawdownBreached {
                drawdown,
                max: self.params.max_drawdown_pct,
            });
        }
        Ok(())
    }

    fn check_trade_risk(
        &self,
        signal: &Signal,
        portfolio: &PortfolioSnapshot,
    ) -> Result<(), RiskError> {
        let balance = portfolio.balance.to_f64().unwrap_or(0.0);
        if balance <= 0.0 {
            return Err(RiskError::InvalidSignal("zero balance".into()));
        }
        let entry = signal.price.to_f64().unwrap_or(0.0);
        let stop = self.stop_loss_for(signal.price, signal.side).to_f64().unwrap_or(0.0);
        let amount = signal.amount.to_f64().unwrap_or(0.0);
        let risk = (entry - stop).abs() * amount / balance;
        if risk > self.params.max_risk_per_trade {
            return Err(RiskError::TradeRiskTooHigh {
                risk,
                max: self.params.max_risk_per_trade,
            });
        }
        Ok(())
    }

    /// Stop-loss level for an entry at `price`
    pub fn stop_loss_for(&self, price: Decimal, side: Side) -> Decimal {
        match side {
            Side::Buy => price * dec(1.0 - self.params.stop_loss_pct),
            Side::Sell => price * dec(1.0 + self.params.stop_loss_pct),
        }
    }

    /// Take-profit level for an entry at `price`
    pub fn take_profit_for(&self, price: Decimal, side: Side) -> Decimal {
        match side {
            Side::Buy => price * dec(1.0 + self.params.take_profit_pct),
            Side::Sell => price * dec(1.0 - self.params.take_profit_pct),
        }
    }

    /// Size a position so that the stop distance risks `risk_per_trade` of
    /// the balance, clamped to `max_position_size`. Returns zero (an invalid
    /// size, rejected upstream) for degenerate inputs.
    pub fn calculate_position_size(
        &self,
        balance: Decimal,
        risk_per_trade: f64,
        entry: Decimal,
        stop: Decimal,
    ) -> Decimal {
        let distance = (entry - stop).abs();
        if entry <= Decimal::ZERO || distance.is_zero() || balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let size = balance * dec(risk_per_trade) / distance;
        size.min(self.params.max_position_size).max(Decimal::ZERO)
    }

    /// Recompute risk parameters from current volatility.
    ///
    /// The targets derive from the baseline parameters, so repeated calls at
    /// steady volatility converge to a fixed point. The per-call change of
    /// `max_position_size` is limited to ±20%, and every parameter stays
    /// inside its configured bounds.
    pub fn adjust_for_volatility(&mut self, volatility: f64) {
        if volatility <= 0.0 {
            return;
        }
        let factor = (self.base_volatility / volatility).clamp(0.5, 2.0);

        let target = self.base.max_position_size * dec(factor);
        let step_lo = self.params.max_position_size * dec(0.8);
        let step_hi = self.params.max_position_size * dec(1.2);
        let (bound_lo, bound_hi) = self.position_size_bounds;
        self.params.max_position_size = target.clamp(step_lo, step_hi).clamp(bound_lo, bound_hi);

        let (pct_lo, pct_hi) = self.pct_bounds;
        self.params.stop_loss_pct = (self.base.stop_loss_pct * factor).clamp(pct_lo, pct_hi);
        self.params.take_profit_pct = (self.base.take_profit_pct * factor).clamp(pct_lo, pct_hi);

        info!(
            volatility,
            factor,
            max_position_size = %self.params.max_position_size,
            stop_loss_pct = self.params.stop_loss_pct,
            "adjusted risk parameters for volatility"
        );
    }

    /// Bulk parameter update. Unknown names are logged and ignored.
    /// Updated values become the new baseline for volatility adjustment.
    pub fn update_parameters(&mut self, new_params: &HashMap<String, f64>) {
        for (name, value) in new_params {
            match name.as_str() {
                "max_position_size" => {
                    self.params.max_position_size = dec(*value);
                    self.base.max_position_size = dec(*value);
                }
                "stop_loss_pct" => {
                    self.params.stop_loss_pct = *value;
                    self.base.stop_loss_pct = *value;
                }
                "take_profit_pct" => {
                    self.params.take_profit_pct = *value;
                    self.base.take_profit_pct = *value;
                }
                "max_drawdown_pct" => {
                    self.params.max_drawdown_pct = *value;
                    self.base.max_drawdown_pct = *value;
                }
                "max_risk_per_trade" => {
                    self.params.max_risk_per_trade = *value;
                    self.base.max_risk_per_trade = *value;
                }
                other => warn!("unknown risk parameter '{other}' ignored"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;
    use crate::portfolio::Portfolio;
    use chrono::Utc;

    fn config() -> RiskConfig {
        RiskConfig {
            max_position_size: 100.0,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
            max_drawdown_pct: 0.2,
            max_risk_per_trade: 0.02,
            min_risk_reward: 2.0,
            base_volatility: 0.02,
            volatility_adjustment: true,
            drawdown_includes_unrealized: true,
            position_size_bounds: [1.0, 500.0],
            pct_bounds: [0.001, 0.5],
        }
    }

    fn signal(price: i64, amount: &str) -> Signal {
        Signal {
            symbol: Symbol::new("BTC/USDT"),
            side: Side::Buy,
            price: Decimal::from(price),
            amount: amount.parse().unwrap(),
            metadata: Default::default(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn accepts_signal_within_all_limits() {
        let manager = RiskManager::new(&config());
        let portfolio = Portfolio::new(Decimal::from(10_000));
        assert!(manager.check_risk(&signal(100, "2"), &portfolio.snapshot()).is_ok());
    }

    #[test]
    fn rejects_when_risk_reward_below_minimum() {
        // 5% stop, 5% take-profit -> reward/risk = 1
        let mut cfg = config();
        cfg.take_profit_pct = 0.05;
        let manager = RiskManager::new(&cfg);
        let portfolio = Portfolio::new(Decimal::from(10_000));

        let err = manager
            .check_risk(&signal(100, "2"), &portfolio.snapshot())
            .unwrap_err();
        assert!(matches!(err, RiskError::RewardTooLow { .. }));
    }

    #[test]
    fn rejects_when_position_limit_exceeded() {
        let manager = RiskManager::new(&config());
        let portfolio = Portfolio::new(Decimal::from(1_000_000));

        let err = manager
            .check_risk(&signal(100, "150"), &portfolio.snapshot())
            .unwrap_err();
        assert!(matches!(err, RiskError::PositionLimit { .. }));
    }

    #[test]
    fn rejects_when_per_trade_risk_too_high() {
        let manager = RiskManager::new(&config());
        let portfolio = Portfolio::new(Decimal::from(10_000));

        // 5% stop on 100 -> risk 5/unit; 80 units risks 400 = 4% of balance
        let err = manager
            .check_risk(&signal(100, "80"), &portfolio.snapshot())
            .unwrap_err();
        assert!(matches!(err, RiskError::TradeRiskTooHigh { .. }));
    }

    #[test]
    fn position_size_formula_and_clamp() {
        let manager = RiskManager::new(&config());

        // 10000 * 0.02 / |100 - 95| = 40
        let size = manager.calculate_position_size(
            Decimal::from(10_000),
            0.02,
            Decimal::from(100),
            Decimal::from(95),
        );
        assert_eq!(size, Decimal::from(40));

        // Clamped to max_position_size
        let size = manager.calculate_position_size(
            Decimal::from(1_000_000),
            0.02,
            Decimal::from(100),
            Decimal::from(95),
        );
        assert_eq!(size, Decimal::from(100));
    }

    #[test]
    fn degenerate_stop_yields_zero_size() {
        let manager = RiskManager::new(&config());
        let size = manager.calculate_position_size(
            Decimal::from(10_000),
            0.02,
            Decimal::from(100),
            Decimal::from(100),
        );
        assert_eq!(size, Decimal::ZERO);
    }

    #[test]
    fn volatility_adjustment_is_step_limited() {
        let mut manager = RiskManager::new(&config());
        let before = manager.parameters().max_position_size;

        // Very calm market -> factor clamps at 2.0, but one step moves <= 20%
        manager.adjust_for_volatility(0.001);
        let after = manager.parameters().max_position_size;
        assert!(after <= before * dec(1.2));
        assert!(after >= before * dec(0.8));
    }

    #[test]
    fn volatility_adjustment_reaches_fixed_point() {
        let mut manager = RiskManager::new(&config());
        for _ in 0..50 {
            manager.adjust_for_volatility(0.04); // factor 0.5
        }
        let settled = manager.parameters().max_position_size;
        manager.adjust_for_volatility(0.04);
        assert_eq!(manager.parameters().max_position_size, settled);
        assert_eq!(settled, Decimal::from(50));
    }

    #[test]
    fn adjusted_percentages_stay_in_bounds() {
        let mut cfg = config();
        cfg.pct_bounds = [0.01, 0.08];
        let mut manager = RiskManager::new(&cfg);
        manager.adjust_for_volatility(0.001); // factor 2.0
        let params = manager.parameters();
        assert!(params.stop_loss_pct <= 0.08);
        assert!(params.take_profit_pct <= 0.08);
    }

    #[test]
    fn unknown_parameters_are_ignored() {
        let mut manager = RiskManager::new(&config());
        let mut update = HashMap::new();
        update.insert("max_position_size".to_string(), 50.0);
        update.insert("no_such_param".to_string(), 1.0);
        manager.update_parameters(&update);
        assert_eq!(manager.parameters().max_position_size, Decimal::from(50));
    }
}
