//! Registry of known tokens.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use super::types::{normalize_address, Token, BASE_TOKENS};
use crate::error::TokenError;

/// Known tokens keyed by lowercase address.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: DashMap<String, Token>,
}

impl TokenRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry preloaded with the Base chain tokens.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for token in BASE_TOKENS.iter() {
            // Defaults are distinct by construction.
            let _ = registry.register(token.clone());
        }
        registry
    }

    /// Register a new token.
    pub fn register(&self, token: Token) -> Result<(), TokenError> {
        let address = normalize_address(&token.address)?;
        match self.tokens.entry(address.clone()) {
            Entry::Occupied(_) => Err(TokenError::Duplicate(address)),
            Entry::Vacant(slot) => {
                slot.insert(Token { address, ..token });
                Ok(())
            }
        }
    }

    /// Look up a token by address (case-insensitive).
    pub fn get(&self, address: &str) -> Option<Token> {
        let address = normalize_address(address).ok()?;
        self.tokens.get(&address).map(|t| t.value().clone())
    }

    /// Look up a token by symbol (case-insensitive).
    ///
    /// If several tokens share a symbol the lowest address wins.
    pub fn by_symbol(&self, symbol: &str) -> Option<Token> {
        self.tokens
            .iter()
            .filter(|t| t.value().symbol.eq_ignore_ascii_case(symbol))
            .map(|t| t.value().clone())
            .min_by(|a, b| a.address.cmp(&b.address))
    }

    /// All tokens, ordered by symbol.
    pub fn all(&self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self.tokens.iter().map(|t| t.value().clone()).collect();
        tokens.sort_by(|a, b| a.symbol.cmp(&b.symbol).then_with(|| a.address.cmp(&b.address)));
        tokens
    }

    /// Number of registered tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Refresh last-known USD prices. Unknown addresses are ignored.
    ///
    /// Returns the number of tokens updated.
    pub fn apply_prices<'a, I>(&self, prices: I) -> usize
    where
        I: IntoIterator<Item = (&'a String, Decimal)>,
    {
        let mut updated = 0;
        for (address, price) in prices {
            if let Some(mut token) = self.tokens.get_mut(address) {
                token.price = Some(price);
                updated += 1;
            }
        }
        debug!(updated, "Token prices refreshed");
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const WETH: &str = "0x4200000000000000000000000000000000000006";

    #[test]
    fn defaults_are_loaded() {
        let registry = TokenRegistry::with_defaults();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.by_symbol("weth").unwrap().address, WETH);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = TokenRegistry::with_defaults();
        let usdc = registry
            .get("0x833589FCD6EDB6E08F4C7C32D4F71B54BDA02913")
            .unwrap();
        assert_eq!(usdc.symbol, "USDC");
        assert_eq!(usdc.decimals, 6);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = TokenRegistry::with_defaults();
        let dup = Token::new(WETH, "WETH2", "Duplicate", 18).unwrap();
        assert_eq!(
            registry.register(dup),
            Err(TokenError::Duplicate(WETH.to_string()))
        );
    }

    #[test]
    fn apply_prices_updates_known_tokens_only() {
        let registry = TokenRegistry::with_defaults();
        let weth = WETH.to_string();
        let unknown = "0x0000000000000000000000000000000000000001".to_string();

        let updated = registry.apply_prices(vec![(&weth, dec!(2467.85)), (&unknown, dec!(1))]);

        assert_eq!(updated, 1);
        assert_eq!(registry.get(WETH).unwrap().price, Some(dec!(2467.85)));
    }

    #[test]
    fn all_is_sorted_by_symbol() {
        let registry = TokenRegistry::with_defaults();
        let symbols: Vec<String> = registry.all().into_iter().map(|t| t.symbol).collect();
        assert_eq!(symbols, vec!["DAI", "USDC", "USDbC", "WETH"]);
    }

    #[test]
    fn concurrent_registration_admits_one_winner() {
        let registry = std::sync::Arc::new(TokenRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || {
                    let token = Token::new(WETH, "WETH", format!("Wrapped Ether {}", i), 18).unwrap();
                    registry.register(token).is_ok()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(registry.len(), 1);
    }
}
