//! Rolling-window volatility statistic feeding adaptive risk adjustment.

use std::collections::VecDeque;

/// Tracks realized volatility over a rolling window of closes.
///
/// Volatility is the standard deviation of log returns over the window,
/// scaled by sqrt(n).
pub struct VolatilityTracker {
    window: usize,
    closes: VecDeque<f64>,
    current: f64,
}

impl VolatilityTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            closes: VecDeque::new(),
            current: 0.0,
        }
    }

    /// Push a new close and recompute the statistic
    pub fn update(&mut self, close: f64) {
        if close <= 0.0 {
            return;
        }
        self.closes.push_back(close);
        if self.closes.len() > self.window {
            self.closes.pop_front();
        }
        if self.closes.len() < 2 {
            return;
        }

        let returns: Vec<f64> = self
            .closes
            .iter()
            .zip(self.closes.iter().skip(1))
            .map(|(a, b)| (b / a).ln())
            .collect();
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        self.current = var.sqrt() * n.sqrt();
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn is_high(&self, threshold: f64) -> bool {
        self.current > threshold
    }
}
