//! Core module - types, errors, config, traits

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{Config, RiskConfig, StrategyConfig, TradingConfig};
pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
