//! Quantra - Concurrent trading orchestration engine
//! Ties market data, strategy evaluation, risk gating, and execution
//! together around a single serialized event queue.

// Public modules
pub mod core;
pub mod data;
pub mod engine;
pub mod paper;
pub mod portfolio;
pub mod risk;
pub mod strategies;
pub mod volatility;

// Re-exports
pub use crate::core::{Config, Error, Result};
pub use crate::engine::Engine;
