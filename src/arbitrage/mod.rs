//! Arbitrage module for detecting cross-exchange opportunities.
//!
//! This module handles:
//! - Profit, capital, gas and confidence calculations
//! - Pairwise opportunity detection over a quote snapshot

pub mod calculator;
pub mod detector;

pub use calculator::{
    calculate_opportunity, confidence_tier, profit_percentage, required_capital,
    ArbitrageOpportunity, ConfidenceTier, DetectionParams, GasModel, GasSpeed,
};
pub use detector::{best_spread, detect_opportunities, SpreadDiagnosis};
