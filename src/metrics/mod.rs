//! Trader performance metrics.

mod calculator;

pub use calculator::{PerformanceCalculator, TraderPerformance};
