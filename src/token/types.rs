//! Token types.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// An ERC-20 token tracked by the engine.
///
/// Everything except `price` is fixed once the token is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Lowercase `0x` address; the unique key.
    pub address: String,
    /// Ticker symbol (e.g., "WETH").
    pub symbol: String,
    /// Human-readable name.
    pub name: String,
    /// Token decimals.
    pub decimals: u8,
    /// Last-known USD price, refreshed after every scan.
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl Token {
    /// Create a token after validating its address.
    pub fn new(
        address: &str,
        symbol: impl Into<String>,
        name: impl Into<String>,
        decimals: u8,
    ) -> Result<Self, TokenError> {
        Ok(Self {
            address: normalize_address(address)?,
            symbol: symbol.into(),
            name: name.into(),
            decimals,
            price: None,
        })
    }
}

/// Validate an address and return its lowercase form.
pub fn normalize_address(address: &str) -> Result<String, TokenError> {
    let trimmed = address.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| TokenError::InvalidAddress(address.to_string()))?;

    if digits.len() != 40 || hex::decode(digits).is_err() {
        return Err(TokenError::InvalidAddress(address.to_string()));
    }

    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

/// Base chain tokens loaded into every new registry.
pub static BASE_TOKENS: Lazy<Vec<Token>> = Lazy::new(|| {
    [
        ("0x4200000000000000000000000000000000000006", "WETH", "Wrapped Ether", 18),
        ("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", "USDC", "USD Coin", 6),
        ("0x50c5725949A6F0c72E6C4a641F24049A917DB0Cb", "DAI", "Dai Stablecoin", 18),
        ("0xd9aAEc86B65D86f6A7B5B1b0c42FFA531710b6CA", "USDbC", "USD Base Coin", 6),
    ]
    .into_iter()
    .filter_map(|(address, symbol, name, decimals)| Token::new(address, symbol, name, decimals).ok())
    .collect()
});
