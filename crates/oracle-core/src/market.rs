//! Instrument identification.
//!
//! Feeds track prices per currency pair. The pair is the default key type
//! handed to query handlers; handlers never look inside it.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A base/quote currency pair (e.g., "BTC/USD").
///
/// Both legs are normalized to upper case on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    /// Create a new pair, normalizing both legs to upper case.
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Validate that both legs are non-empty and alphanumeric.
    pub fn validate(&self) -> Result<()> {
        for leg in [&self.base, &self.quote] {
            if leg.is_empty() {
                return Err(CoreError::InvalidCurrencyPair(format!(
                    "empty leg in {self}"
                )));
            }
            if !leg.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(CoreError::InvalidCurrencyPair(format!(
                    "non-alphanumeric leg {leg:?} in {self}"
                )));
            }
        }
        Ok(())
    }

    /// Returns the pair joined with a custom delimiter (e.g., "BTC-USD").
    pub fn join(&self, delimiter: &str) -> String {
        format!("{}{}{}", self.base, delimiter, self.quote)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = CoreError;

    /// Parse "BASE/QUOTE". A dash is accepted as the delimiter as well.
    fn from_str(s: &str) -> Result<Self> {
        let (base, quote) = s
            .split_once('/')
            .or_else(|| s.split_once('-'))
            .ok_or_else(|| CoreError::InvalidCurrencyPair(s.to_string()))?;

        let pair = Self::new(base.trim(), quote.trim());
        pair.validate()?;
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_pair_display() {
        let pair = CurrencyPair::new("btc", "usd");
        assert_eq!(pair.to_string(), "BTC/USD");
        assert_eq!(pair.join("-"), "BTC-USD");
    }

    #[test]
    fn test_currency_pair_from_str() {
        let pair: CurrencyPair = "eth/usdt".parse().unwrap();
        assert_eq!(pair, CurrencyPair::new("ETH", "USDT"));

        let dashed: CurrencyPair = "BTC-USD".parse().unwrap();
        assert_eq!(dashed, CurrencyPair::new("BTC", "USD"));
    }

    #[test]
    fn test_currency_pair_rejects_malformed() {
        assert!("BTCUSD".parse::<CurrencyPair>().is_err());
        assert!("/USD".parse::<CurrencyPair>().is_err());
        assert!("BTC/U$D".parse::<CurrencyPair>().is_err());
    }

    #[test]
    fn test_currency_pair_serde() {
        let pair = CurrencyPair::new("ATOM", "USD");
        let json = serde_json::to_string(&pair).unwrap();
        assert_eq!(json, r#"{"base":"ATOM","quote":"USD"}"#);
    }
}
