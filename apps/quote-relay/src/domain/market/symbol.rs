//! Ticker Symbols
//!
//! Normalized, validated ticker symbols. A `Symbol` is the identity key
//! shared by the subscription registry, the latest-quote cache, positions,
//! and orders, so normalization happens exactly once at the boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum accepted symbol length (OCC option symbols are 21 characters).
pub const MAX_SYMBOL_LEN: usize = 21;

/// Normalized uppercase ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a raw ticker.
    ///
    /// Surrounding whitespace is trimmed and ASCII letters are uppercased.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` if the ticker is empty, too long, or contains
    /// characters outside `[A-Za-z0-9.-/:]`.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        if trimmed.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong(trimmed.len()));
        }
        if let Some(c) = trimmed.chars().find(|c| !is_symbol_char(*c)) {
            return Err(SymbolError::InvalidCharacter(c));
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

const fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '/' | ':')
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = SymbolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Symbol validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol was empty after trimming.
    #[error("symbol cannot be empty")]
    Empty,

    /// Symbol exceeds the maximum length.
    #[error("symbol is {0} characters, maximum is {MAX_SYMBOL_LEN}")]
    TooLong(usize),

    /// Symbol contains a character outside the accepted set.
    #[error("symbol contains invalid character {0:?}")]
    InvalidCharacter(char),
}
