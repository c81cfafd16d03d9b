//! Price Source Adapters
//!
//! Resolves ledger prices from the last relayed quote. Symbols nobody is
//! streaming are asked of the provider's REST API, then looked up in a
//! static table.

pub mod rest;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::warn;

use crate::application::ports::{PriceError, PriceSource};
use crate::domain::market::{LatestQuotes, Symbol};

pub use rest::RestPrices;

// =============================================================================
// Static Prices
// =============================================================================

/// Fixed price table.
#[derive(Debug, Default)]
pub struct StaticPrices {
    prices: RwLock<HashMap<Symbol, Decimal>>,
}

impl StaticPrices {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the price for a symbol.
    pub fn set_price(&self, symbol: Symbol, price: Decimal) {
        self.prices.write().insert(symbol, price);
    }

    /// Price for a symbol, if known.
    #[must_use]
    pub fn price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }
}

impl From<HashMap<Symbol, Decimal>> for StaticPrices {
    fn from(prices: HashMap<Symbol, Decimal>) -> Self {
        Self {
            prices: RwLock::new(prices),
        }
    }
}

#[async_trait]
impl PriceSource for StaticPrices {
    async fn latest_price(&self, symbol: &Symbol) -> Result<Decimal, PriceError> {
        self.price(symbol)
            .ok_or_else(|| PriceError::Unavailable(symbol.clone()))
    }
}

// =============================================================================
// Relay Price Source
// =============================================================================

/// Latest relayed quote first, then the remote lookup, then the static
/// table.
pub struct RelayPriceSource {
    latest: Arc<LatestQuotes>,
    remote: Option<Arc<dyn PriceSource>>,
    fallback: Arc<StaticPrices>,
}

impl std::fmt::Debug for RelayPriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPriceSource")
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl RelayPriceSource {
    /// Create a price source over the relay's quote cache.
    #[must_use]
    pub const fn new(latest: Arc<LatestQuotes>, fallback: Arc<StaticPrices>) -> Self {
        Self {
            latest,
            remote: None,
            fallback,
        }
    }

    /// Consult `remote` for symbols without a relayed quote.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn PriceSource>) -> Self {
        self.remote = Some(remote);
        self
    }
}

#[async_trait]
impl PriceSource for RelayPriceSource {
    async fn latest_price(&self, symbol: &Symbol) -> Result<Decimal, PriceError> {
        if let Some(price) = self.latest.price(symbol) {
            return Ok(price);
        }

        let mut remote_failure = None;
        if let Some(remote) = &self.remote {
            match remote.latest_price(symbol).await {
                Ok(price) if price > Decimal::ZERO => return Ok(price),
                Ok(_) | Err(PriceError::Unavailable(_)) => {}
                Err(e) => {
                    warn!(%symbol, error = %e, "remote price lookup failed");
                    remote_failure = Some(e);
                }
            }
        }

        match self.fallback.price(symbol) {
            Some(price) => Ok(price),
            None => Err(remote_failure.unwrap_or_else(|| PriceError::Unavailable(symbol.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::application::ports::MockPriceSource;
    use crate::domain::market::Quote;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[tokio::test]
    async fn relayed_quote_wins_over_static() {
        let latest = Arc::new(LatestQuotes::new());
        let fallback = Arc::new(StaticPrices::from(HashMap::from([(
            sym("AAPL"),
            Decimal::from(150),
        )])));
        let source = RelayPriceSource::new(Arc::clone(&latest), fallback);

        assert_eq!(assert_ok!(source.latest_price(&sym("AAPL")).await), Decimal::from(150));

        latest.record(&Quote::new(
            sym("AAPL"),
            Decimal::from(160),
            1,
            Decimal::from(162),
            1,
            1,
        ));
        assert_eq!(assert_ok!(source.latest_price(&sym("AAPL")).await), Decimal::from(161));
    }

    #[tokio::test]
    async fn unknown_symbol_is_unavailable() {
        let source = RelayPriceSource::new(Arc::new(LatestQuotes::new()), Arc::new(StaticPrices::new()));

        let err = assert_err!(source.latest_price(&sym("ZZZZ")).await);
        assert_eq!(err, PriceError::Unavailable(sym("ZZZZ")));
    }

    fn remote_returning(result: Result<Decimal, PriceError>) -> Arc<dyn PriceSource> {
        let mut remote = MockPriceSource::new();
        remote
            .expect_latest_price()
            .returning(move |_| result.clone());
        Arc::new(remote)
    }

    #[tokio::test]
    async fn remote_is_asked_before_static_table() {
        let fallback = Arc::new(StaticPrices::from(HashMap::from([(
            sym("AAPL"),
            Decimal::from(150),
        )])));
        let source = RelayPriceSource::new(Arc::new(LatestQuotes::new()), fallback)
            .with_remote(remote_returning(Ok(Decimal::from(155))));

        assert_eq!(assert_ok!(source.latest_price(&sym("AAPL")).await), Decimal::from(155));
    }

    #[tokio::test]
    async fn relayed_quote_skips_the_remote() {
        let latest = Arc::new(LatestQuotes::new());
        latest.record(&Quote::new(sym("AAPL"), Decimal::from(160), 1, Decimal::from(162), 1, 1));

        let mut remote = MockPriceSource::new();
        remote.expect_latest_price().never();
        let source = RelayPriceSource::new(latest, Arc::new(StaticPrices::new()))
            .with_remote(Arc::new(remote));

        assert_eq!(assert_ok!(source.latest_price(&sym("AAPL")).await), Decimal::from(161));
    }

    #[tokio::test]
    async fn remote_miss_or_failure_falls_back_to_static() {
        let fallback = Arc::new(StaticPrices::from(HashMap::from([(
            sym("AAPL"),
            Decimal::from(150),
        )])));

        for remote in [
            remote_returning(Err(PriceError::Unavailable(sym("AAPL")))),
            remote_returning(Err(PriceError::Source("timed out".into()))),
            remote_returning(Ok(Decimal::ZERO)),
        ] {
            let source = RelayPriceSource::new(Arc::new(LatestQuotes::new()), Arc::clone(&fallback))
                .with_remote(remote);
            assert_eq!(assert_ok!(source.latest_price(&sym("AAPL")).await), Decimal::from(150));
        }
    }

    #[tokio::test]
    async fn remote_failure_surfaces_when_nothing_else_prices() {
        let source = RelayPriceSource::new(Arc::new(LatestQuotes::new()), Arc::new(StaticPrices::new()))
            .with_remote(remote_returning(Err(PriceError::Source("HTTP 500".into()))));

        let err = assert_err!(source.latest_price(&sym("ZZZZ")).await);
        assert_eq!(err, PriceError::Source("HTTP 500".into()));

        let source = RelayPriceSource::new(Arc::new(LatestQuotes::new()), Arc::new(StaticPrices::new()))
            .with_remote(remote_returning(Err(PriceError::Unavailable(sym("ZZZZ")))));
        let err = assert_err!(source.latest_price(&sym("ZZZZ")).await);
        assert_eq!(err, PriceError::Unavailable(sym("ZZZZ")));
    }

    #[tokio::test]
    async fn static_prices_can_be_updated() {
        let prices = StaticPrices::new();
        prices.set_price(sym("MSFT"), Decimal::from(300));
        prices.set_price(sym("MSFT"), Decimal::from(310));

        assert_eq!(assert_ok!(prices.latest_price(&sym("MSFT")).await), Decimal::from(310));
    }
}
