//! Momentum strategy - EMA crossover signal producer.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

use crate::core::config::StrategyConfig;
use crate::core::{
    Analysis, Candle, Error, Result, Side, Signal, Strategy, Symbol, VolatilityAware,
};

const MAX_OUTCOMES: usize = 256;

/// Fast/slow EMA crossover. Goes long on an upward cross, flat/short on a
/// downward cross. Tracks the outcomes of its own virtual round-trips to
/// answer performance queries.
pub struct MomentumStrategy {
    symbols: Vec<Symbol>,
    timeframe: Option<String>,
    ema_fast: usize,
    ema_slow: usize,
    order_amount: f64,
    volatility: f64,
    /// Last (fast, slow) EMA pair per symbol, for crossover detection
    prev_emas: HashMap<Symbol, (f64, f64)>,
    /// Virtual open position per symbol: (side, entry price)
    virtual_entries: HashMap<Symbol, (Side, f64)>,
    /// Fractional returns of closed virtual round-trips, newest last
    outcomes: VecDeque<f64>,
}

impl MomentumStrategy {
    pub fn from_config(config: &StrategyConfig) -> Result<Box<dyn Strategy>> {
        let mut strategy = Self {
            symbols: config.symbols.iter().map(Symbol::new).collect(),
            timeframe: config.timeframe.clone(),
            ema_fast: 0,
            ema_slow: 0,
            order_amount: 1.0,
            volatility: 0.0,
            prev_emas: HashMap::new(),
            virtual_entries: HashMap::new(),
            outcomes: VecDeque::new(),
        };
        strategy.set_parameters(&config.params)?;
        Ok(Box::new(strategy))
    }

    fn require(params: &toml::Value, key: &str) -> Result<i64> {
        params
            .get(key)
            .and_then(|v| v.as_integer())
            .ok_or_else(|| Error::Config(format!("momentum: missing required parameter '{key}'")))
    }

    fn crossover(&self, analysis: &Analysis) -> Option<Side> {
        let fast = *analysis.values.get("ema_fast")?;
        let slow = *analysis.values.get("ema_slow")?;
        let prev_fast = *analysis.values.get("prev_ema_fast")?;
        let prev_slow = *analysis.values.get("prev_ema_slow")?;

        if prev_fast <= prev_slow && fast > slow {
            Some(Side::Buy)
        } else if prev_fast >= prev_slow && fast < slow {
            Some(Side::Sell)
        } else {
            None
        }
    }

    fn record_virtual(&mut self, symbol: &Symbol, side: Side, price: f64) {
        if price <= 0.0 {
            return;
        }
        if let Some((open_side, entry)) = self.virtual_entries.remove(symbol) {
            if open_side != side {
                let ret = match open_side {
                    Side::Buy => price / entry - 1.0,
                    Side::Sell => entry / price - 1.0,
                };
                self.outcomes.push_back(ret);
                if self.outcomes.len() > MAX_OUTCOMES {
                    self.outcomes.pop_front();
                }
            }
        }
        self.virtual_entries.insert(symbol.clone(), (side, price));
    }
}

/// Exponential moving average over the whole series; last value is current.
fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return vec![];
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut acc = values[0];
    for v in values {
        acc = v * k + acc * (1.0 - k);
        out.push(acc);
    }
    out
}

#[async_trait]
impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    fn timeframe(&self) -> Option<&str> {
        self.timeframe.as_deref()
    }

    fn set_parameters(&mut self, params: &toml::Value) -> Result<()> {
        self.ema_fast = Self::require(params, "ema_fast")? as usize;
        self.ema_slow = Self::require(params, "ema_slow")? as usize;
        if self.ema_fast == 0 || self.ema_fast >= self.ema_slow {
            return Err(Error::Config(format!(
                "momentum: ema_fast ({}) must be positive and below ema_slow ({})",
                self.ema_fast, self.ema_slow
            )));
        }
        if let Some(amount) = params.get("order_amount").and_then(|v| v.as_float()) {
            self.order_amount = amount;
        }
        Ok(())
    }

    fn parameters(&self) -> toml::Value {
        let mut table = toml::map::Map::new();
        table.insert("ema_fast".into(), (self.ema_fast as i64).into());
        table.insert("ema_slow".into(), (self.ema_slow as i64).into());
        table.insert("order_amount".into(), self.order_amount.into());
        toml::Value::Table(table)
    }

    fn parameter_ranges(&self) -> toml::Value {
        let mut table = toml::map::Map::new();
        table.insert(
            "ema_fast".into(),
            toml::Value::Array(vec![toml::Value::Integer(3), toml::Value::Integer(20)]),
        );
        table.insert(
            "ema_slow".into(),
            toml::Value::Array(vec![toml::Value::Integer(10), toml::Value::Integer(60)]),
        );
        toml::Value::Table(table)
    }

    async fn analyze(
        &mut self,
        symbol: &Symbol,
        _timeframe: &str,
        bars: &[Candle],
        _aux_score: f64,
    ) -> Result<Analysis> {
        let closes: Vec<f64> = bars
            .iter()
            .filter_map(|b| b.close.to_f64())
            .collect();
        if closes.len() < self.ema_slow {
            return Err(Error::Strategy(
                self.name().to_string(),
                format!("need {} bars for {symbol}, got {}", self.ema_slow, closes.len()),
            ));
        }

        let fast = ema(&closes, self.ema_fast);
        let slow = ema(&closes, self.ema_slow);
        let (prev_fast, prev_slow) = self
            .prev_emas
            .get(symbol)
            .copied()
            .unwrap_or((fast[fast.len() - 2], slow[slow.len() - 2]));

        let mut values = HashMap::new();
        values.insert("ema_fast".to_string(), *fast.last().unwrap());
        values.insert("ema_slow".to_string(), *slow.last().unwrap());
        values.insert("prev_ema_fast".to_string(), prev_fast);
        values.insert("prev_ema_slow".to_string(), prev_slow);
        self.prev_emas
            .insert(symbol.clone(), (*fast.last().unwrap(), *slow.last().unwrap()));

        let analysis = Analysis {
            symbol: symbol.clone(),
            timestamp: bars.last().map(|b| b.timestamp).unwrap_or_else(Utc::now),
            last_close: bars.last().map(|b| b.close).unwrap_or_default(),
            values,
        };

        // Keep the virtual book in sync with the decisions we would emit
        if let Some(side) = self.crossover(&analysis) {
            let price = analysis.last_close.to_f64().unwrap_or(0.0);
            self.record_virtual(symbol, side, price);
        }

        Ok(analysis)
    }

    fn generate_signal(&self, analysis: &Analysis) -> Option<Signal> {
        let side = self.crossover(analysis)?;
        let amount = self.order_amount / (1.0 + self.volatility);
        Some(Signal {
            symbol: analysis.symbol.clone(),
            side,
            price: analysis.last_close,
            amount: Decimal::try_from(amount).ok()?,
            metadata: analysis.values.clone(),
            timestamp: analysis.timestamp,
        })
    }

    fn recent_performance(&self, window: usize) -> f64 {
        if self.outcomes.is_empty() || window == 0 {
            return 0.0;
        }
        let taken: Vec<f64> = self.outcomes.iter().rev().take(window).copied().collect();
        taken.iter().sum::<f64>() / taken.len() as f64
    }

    fn volatility_aware(&mut self) -> Option<&mut dyn VolatilityAware> {
        Some(self)
    }
}

impl VolatilityAware for MomentumStrategy {
    fn adjust_for_volatility(&mut self, volatility: f64) {
        self.volatility = volatility.max(0.0);
    }
}
