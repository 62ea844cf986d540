//! Mean-reversion strategy - z-score against a rolling mean.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::core::config::StrategyConfig;
use crate::core::{Analysis, Candle, Error, Result, Side, Signal, Strategy, Symbol};

/// Fades moves that stretch beyond `zscore_threshold` standard deviations
/// from the rolling mean. Sits out bars with rapid intrabar moves.
pub struct MeanReversionStrategy {
    symbols: Vec<Symbol>,
    timeframe: Option<String>,
    window: usize,
    zscore_threshold: f64,
    rapid_change_threshold: f64,
    order_amount: f64,
}

impl MeanReversionStrategy {
    pub fn from_config(config: &StrategyConfig) -> Result<Box<dyn Strategy>> {
        let mut strategy = Self {
            symbols: config.symbols.iter().map(Symbol::new).collect(),
            timeframe: config.timeframe.clone(),
            window: 0,
            zscore_threshold: 0.0,
            rapid_change_threshold: 0.08,
            order_amount: 1.0,
        };
        strategy.set_parameters(&config.params)?;
        Ok(Box::new(strategy))
    }
}

#[async_trait]
impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    fn timeframe(&self) -> Option<&str> {
        self.timeframe.as_deref()
    }

    fn set_parameters(&mut self, params: &toml::Value) -> Result<()> {
        self.window = params
            .get("window")
            .and_then(|v| v.as_integer())
            .ok_or_else(|| Error::Config("mean_reversion: missing required parameter 'window'".into()))?
            as usize;
        self.zscore_threshold = params
            .get("zscore_threshold")
            .and_then(|v| v.as_float())
            .ok_or_else(|| {
                Error::Config("mean_reversion: missing required parameter 'zscore_threshold'".into())
            })?;
        if self.window < 2 || self.zscore_threshold <= 0.0 {
            return Err(Error::Config(
                "mean_reversion: window must be >= 2 and zscore_threshold positive".into(),
            ));
        }
        if let Some(v) = params.get("rapid_change_threshold").and_then(|v| v.as_float()) {
            self.rapid_change_threshold = v;
        }
        if let Some(v) = params.get("order_amount").and_then(|v| v.as_float()) {
            self.order_amount = v;
        }
        Ok(())
    }

    fn parameters(&self) -> toml::Value {
        let mut table = toml::map::Map::new();
        table.insert("window".into(), (self.window as i64).into());
        table.insert("zscore_threshold".into(), self.zscore_threshold.into());
        table.insert("rapid_change_threshold".into(), self.rapid_change_threshold.into());
        table.insert("order_amount".into(), self.order_amount.into());
        toml::Value::Table(table)
    }

    fn parameter_ranges(&self) -> toml::Value {
        let mut table = toml::map::Map::new();
        table.insert(
            "window".into(),
            toml::Value::Array(vec![toml::Value::Integer(10), toml::Value::Integer(120)]),
        );
        table.insert(
            "zscore_threshold".into(),
            toml::Value::Array(vec![toml::Value::Float(1.0), toml::Value::Float(4.0)]),
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
        let closes: Vec<f64> = bars.iter().filter_map(|b| b.close.to_f64()).collect();
        if closes.len() < self.window {
            return Err(Error::Strategy(
                self.name().to_string(),
                format!("need {} bars for {symbol}, got {}", self.window, closes.len()),
            ));
        }

        let tail = &closes[closes.len() - self.window..];
        let n = tail.len() as f64;
        let mean = tail.iter().sum::<f64>() / n;
        let std = (tail.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n).sqrt();
        let last = *tail.last().unwrap();
        let zscore = if std > 0.0 { (last - mean) / std } else { 0.0 };

        let rapid = closes
            .len()
            .checked_sub(2)
            .map(|i| {
                let prev = closes[i];
                prev > 0.0 && ((last - prev) / prev).abs() > self.rapid_change_threshold
            })
            .unwrap_or(false);

        let mut values = HashMap::new();
        values.insert("zscore".to_string(), zscore);
        values.insert("mean".to_string(), mean);
        values.insert("std".to_string(), std);
        values.insert("rapid_move".to_string(), f64::from(u8::from(rapid)));

        Ok(Analysis {
            symbol: symbol.clone(),
            timestamp: bars.last().map(|b| b.timestamp).unwrap_or_else(Utc::now),
            last_close: bars.last().map(|b| b.close).unwrap_or_default(),
            values,
        })
    }

    fn generate_signal(&self, analysis: &Analysis) -> Option<Signal> {
        if analysis.values.get("rapid_move").copied().unwrap_or(0.0) > 0.0 {
            return None;
        }
        let zscore = analysis.values.get("zscore").copied()?;
        let side = if zscore > self.zscore_threshold {
            Side::Sell
        } else if zscore < -self.zscore_threshold {
            Side::Buy
        } else {
            return None;
        };

        Some(Signal {
            symbol: analysis.symbol.clone(),
            side,
            price: analysis.last_close,
            amount: Decimal::try_from(self.order_amount).ok()?,
            metadata: analysis.values.clone(),
            timestamp: analysis.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .map(|c| Candle {
                open: Decimal::try_from(*c).unwrap(),
                high: Decimal::try_from(*c).unwrap(),
                low: Decimal::try_from(*c).unwrap(),
                close: Decimal::try_from(*c).unwrap(),
                volume: Decimal::ONE,
                timestamp: Utc::now(),
            })
            .collect()
    }

    fn strategy() -> Box<dyn Strategy> {
        let mut config = StrategyConfig::new("mean_reversion");
        config.symbols = vec!["ETH/USDT".to_string()];
        config.params = toml::toml! {
            window = 10
            zscore_threshold = 2.0
            rapid_change_threshold = 0.5
        }
        .into();
        MeanReversionStrategy::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn stretched_price_fades_back() {
        let mut s = strategy();
        let symbol = Symbol::new("ETH/USDT");

        // Nine flat-ish closes then a spike well above the band
        let mut closes = vec![100.0, 101.0, 99.0, 100.0, 101.0, 99.0, 100.0, 101.0, 99.0];
        closes.push(104.0);

        let analysis = s.analyze(&symbol, "1h", &bars(&closes), 0.0).await.unwrap();
        let signal = s.generate_signal(&analysis).expect("sell signal");
        assert_eq!(signal.side, Side::Sell);
    }

    #[tokio::test]
    async fn rapid_move_is_skipped() {
        let mut config = StrategyConfig::new("mean_reversion");
        config.symbols = vec!["ETH/USDT".to_string()];
        config.params = toml::toml! {
            window = 10
            zscore_threshold = 2.0
            rapid_change_threshold = 0.05
        }
        .into();
        let mut s = MeanReversionStrategy::from_config(&config).unwrap();

        let mut closes = vec![100.0; 9];
        closes.push(130.0); // +30% in one bar
        let analysis = s
            .analyze(&Symbol::new("ETH/USDT"), "1h", &bars(&closes), 0.0)
            .await
            .unwrap();
        assert!(s.generate_signal(&analysis).is_none());
    }

    #[test]
    fn missing_required_parameter_is_config_error() {
        let mut config = StrategyConfig::new("mean_reversion");
        config.params = toml::toml! { window = 10 }.into();
        let err = MeanReversionStrategy::from_config(&config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
