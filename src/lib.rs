//! Cross-exchange arbitrage scanner and conditional order engine for Base DEXs.
//!
//! A scan pass pulls bid/ask quotes from every configured exchange, ranks
//! buy-low/sell-high opportunities net of gas, and evaluates resting limit
//! and stop-loss orders against the same snapshot:
//!
//! ```text
//! WETH on uniswap-v3  ask: $2456.78
//! WETH on aerodrome   bid: $2478.92
//! ──────────────────────────────────
//! Spread:  0.90%  → opportunity (medium confidence)
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`token`]: Token metadata and registry
//! - [`feed`]: Exchange quote feeds and the concurrent adapter
//! - [`arbitrage`]: Opportunity calculation and detection
//! - [`orders`]: Limit/stop-loss order book
//! - [`execution`]: Executors and the de-duplicating dispatcher
//! - [`scanner`]: Periodic and on-demand scan scheduling
//! - [`service`]: Engine facade
//! - [`api`]: HTTP API
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod arbitrage;
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod metrics;
pub mod orders;
pub mod scanner;
pub mod service;
pub mod token;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
pub use service::ArbService;
