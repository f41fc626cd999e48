//! Application configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

use crate::arbitrage::GasSpeed;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Detection Parameters ===
    /// Minimum profit percentage for an opportunity to be emitted (e.g., 0.5).
    #[serde(default = "default_min_profit_pct")]
    pub min_profit_pct: Decimal,

    /// Maximum capital committed to a single opportunity (USD).
    #[serde(default = "default_max_capital")]
    pub max_capital: Decimal,

    // === Scan Loop ===
    /// Seconds between scheduled scans. Also the quote freshness window.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Per-exchange quote fetch timeout in milliseconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    /// Per-execution timeout in milliseconds.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_ms: u64,

    // === Slippage ===
    /// Slippage tolerance applied when an order does not specify one.
    #[serde(default = "default_slippage")]
    pub default_slippage_pct: Decimal,

    /// Smallest accepted slippage tolerance.
    #[serde(default = "default_min_slippage")]
    pub min_slippage_pct: Decimal,

    /// Largest accepted slippage tolerance.
    #[serde(default = "default_max_slippage")]
    pub max_slippage_pct: Decimal,

    // === Gas ===
    /// Gas units consumed by a two-leg arbitrage.
    #[serde(default = "default_gas_units")]
    pub gas_units_per_arbitrage: u64,

    /// Base gas price in gwei.
    #[serde(default = "default_gas_price")]
    pub gas_price_gwei: Decimal,

    /// Gas speed tier: standard, fast or instant.
    #[serde(default)]
    pub gas_speed: GasSpeed,

    /// ETH/USD used for gas conversion when no WETH quote is available.
    #[serde(default = "default_native_usd")]
    pub native_usd_fallback: Decimal,

    // === Feeds & Execution ===
    /// Comma-separated `exchange=url` quote endpoints. Empty means simulated feeds.
    #[serde(default)]
    pub feed_endpoints: String,

    /// HTTP endpoint that performs executions.
    #[serde(default)]
    pub execution_url: Option<String>,

    /// Simulation mode (no external executions).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Dispatch triggered orders to the executor automatically.
    #[serde(default = "default_true")]
    pub auto_execute_orders: bool,

    // === Server Configuration ===
    /// HTTP server port for the API.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_min_profit_pct() -> Decimal {
    Decimal::new(5, 1) // 0.5%
}

fn default_max_capital() -> Decimal {
    Decimal::new(10_000, 0) // $10k
}

fn default_scan_interval() -> u64 {
    15
}

fn default_fetch_timeout() -> u64 {
    3_000
}

fn default_execution_timeout() -> u64 {
    10_000
}

fn default_slippage() -> Decimal {
    Decimal::new(5, 1) // 0.5%
}

fn default_min_slippage() -> Decimal {
    Decimal::new(1, 1) // 0.1%
}

fn default_max_slippage() -> Decimal {
    Decimal::new(5, 0) // 5%
}

fn default_gas_units() -> u64 {
    300_000
}

fn default_gas_price() -> Decimal {
    Decimal::new(5, 2) // 0.05 gwei
}

fn default_native_usd() -> Decimal {
    Decimal::new(2_500, 0)
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_profit_pct: default_min_profit_pct(),
            max_capital: default_max_capital(),
            scan_interval_secs: default_scan_interval(),
            fetch_timeout_ms: default_fetch_timeout(),
            execution_timeout_ms: default_execution_timeout(),
            default_slippage_pct: default_slippage(),
            min_slippage_pct: default_min_slippage(),
            max_slippage_pct: default_max_slippage(),
            gas_units_per_arbitrage: default_gas_units(),
            gas_price_gwei: default_gas_price(),
            gas_speed: GasSpeed::default(),
            native_usd_fallback: default_native_usd(),
            feed_endpoints: String::new(),
            execution_url: None,
            dry_run: true,
            auto_execute_orders: true,
            port: default_port(),
            rust_log: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_profit_pct <= Decimal::ZERO {
            return Err("MIN_PROFIT_PCT must be positive".to_string());
        }

        if self.max_capital <= Decimal::ZERO {
            return Err("MAX_CAPITAL must be positive".to_string());
        }

        if self.scan_interval_secs == 0 {
            return Err("SCAN_INTERVAL_SECS must be at least 1".to_string());
        }

        if self.fetch_timeout_ms == 0 || self.execution_timeout_ms == 0 {
            return Err("timeouts must be non-zero".to_string());
        }

        if self.min_slippage_pct <= Decimal::ZERO || self.min_slippage_pct > self.max_slippage_pct {
            return Err("slippage bounds must satisfy 0 < MIN_SLIPPAGE_PCT <= MAX_SLIPPAGE_PCT".to_string());
        }

        if self.default_slippage_pct < self.min_slippage_pct
            || self.default_slippage_pct > self.max_slippage_pct
        {
            return Err("DEFAULT_SLIPPAGE_PCT must lie within the slippage bounds".to_string());
        }

        if self.gas_price_gwei < Decimal::ZERO || self.native_usd_fallback <= Decimal::ZERO {
            return Err("gas settings must be non-negative".to_string());
        }

        self.feed_endpoints()?;

        Ok(())
    }

    /// Parse `FEED_ENDPOINTS` into `(exchange id, url)` pairs.
    pub fn feed_endpoints(&self) -> Result<Vec<(String, Url)>, String> {
        self.feed_endpoints
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (id, raw_url) = entry
                    .split_once('=')
                    .ok_or_else(|| format!("FEED_ENDPOINTS entry '{}' is not id=url", entry))?;
                let id = id.trim();
                if id.is_empty() {
                    return Err(format!("FEED_ENDPOINTS entry '{}' has an empty id", entry));
                }
                let url = Url::parse(raw_url.trim())
                    .map_err(|e| format!("FEED_ENDPOINTS url for {}: {}", id, e))?;
                Ok((id.to_string(), url))
            })
            .collect()
    }

    /// Scan interval as a duration.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Per-exchange fetch timeout as a duration.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Per-execution timeout as a duration.
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Whether executions go to a live endpoint.
    pub fn is_live(&self) -> bool {
        !self.dry_run && self.execution_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_values_are_sensible() {
        let config = Config::default();
        assert_eq!(config.min_profit_pct, dec!(0.5));
        assert_eq!(config.max_capital, dec!(10000));
        assert_eq!(config.default_slippage_pct, dec!(0.5));
        assert_eq!(config.min_slippage_pct, dec!(0.1));
        assert_eq!(config.max_slippage_pct, dec!(5.0));
        assert!(config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_threshold() {
        let config = Config {
            min_profit_pct: dec!(0),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_default_slippage_outside_bounds() {
        let config = Config {
            default_slippage_pct: dec!(7),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn feed_endpoints_are_parsed() {
        let config = Config {
            feed_endpoints: "uniswap-v3=https://quotes.example/uni, aerodrome=https://quotes.example/aero"
                .to_string(),
            ..Config::default()
        };

        let endpoints = config.feed_endpoints().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].0, "uniswap-v3");
        assert_eq!(endpoints[1].1.as_str(), "https://quotes.example/aero");
    }

    #[test]
    fn malformed_feed_endpoints_fail_validation() {
        let config = Config {
            feed_endpoints: "uniswap-v3".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn live_mode_requires_endpoint() {
        let config = Config {
            dry_run: false,
            ..Config::default()
        };
        assert!(!config.is_live());

        let config = Config {
            dry_run: false,
            execution_url: Some("https://exec.example".to_string()),
            ..Config::default()
        };
        assert!(config.is_live());
    }
}
