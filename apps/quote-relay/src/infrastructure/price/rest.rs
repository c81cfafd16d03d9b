//! Provider REST Price Lookup
//!
//! Asks the configured market-data provider for a symbol's current price
//! over HTTP, for symbols the relay is not streaming.
//!
//! # Endpoints
//!
//! - **Polygon**: `GET /v2/last/nbbo/{symbol}`, priced at the bid/ask midpoint
//! - **Finnhub**: `GET /quote?symbol={symbol}`, priced at the current price `c`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::application::ports::{PriceError, PriceSource};
use crate::domain::market::Symbol;
use crate::infrastructure::upstream::{ApiKey, ProviderKind};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Price lookup against the provider's REST API.
#[derive(Debug)]
pub struct RestPrices {
    client: reqwest::Client,
    provider: ProviderKind,
    api_key: ApiKey,
    base_url: String,
}

impl RestPrices {
    /// Create a lookup for `provider` at its public endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(provider: ProviderKind, api_key: ApiKey, timeout: Duration) -> Result<Self, PriceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PriceError::Source(e.to_string()))?;

        Ok(Self {
            client,
            provider,
            api_key,
            base_url: default_base_url(provider).to_string(),
        })
    }

    /// Point the lookup at another host.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Provider being queried.
    #[must_use]
    pub const fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        symbol: &Symbol,
    ) -> Result<T, PriceError> {
        let response = request
            .send()
            .await
            .map_err(|e| PriceError::Source(e.without_url().to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PriceError::Unavailable(symbol.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PriceError::Source(format!(
                "{} returned {}: {}",
                self.provider,
                status.as_u16(),
                body.trim()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PriceError::Source(e.without_url().to_string()))
    }

    async fn polygon_price(&self, symbol: &Symbol) -> Result<Option<Decimal>, PriceError> {
        let url = format!("{}/v2/last/nbbo/{}", self.base_url, symbol.as_str());
        let request = self
            .client
            .get(url)
            .query(&[("apiKey", self.api_key.expose())]);
        let body: PolygonLastQuote = self.fetch(request, symbol).await?;

        Ok(body.results.and_then(|quote| {
            match (quote.bid > Decimal::ZERO, quote.ask > Decimal::ZERO) {
                (true, true) => Some((quote.bid + quote.ask) / Decimal::TWO),
                (true, false) => Some(quote.bid),
                (false, true) => Some(quote.ask),
                (false, false) => None,
            }
        }))
    }

    async fn finnhub_price(&self, symbol: &Symbol) -> Result<Option<Decimal>, PriceError> {
        let url = format!("{}/quote", self.base_url);
        let request = self
            .client
            .get(url)
            .query(&[("symbol", symbol.as_str())])
            .header("X-Finnhub-Token", self.api_key.expose());
        let body: FinnhubQuote = self.fetch(request, symbol).await?;

        Ok(Some(body.current))
    }
}

#[async_trait]
impl PriceSource for RestPrices {
    async fn latest_price(&self, symbol: &Symbol) -> Result<Decimal, PriceError> {
        let price = match self.provider {
            ProviderKind::Polygon => self.polygon_price(symbol).await?,
            ProviderKind::Finnhub => self.finnhub_price(symbol).await?,
        };

        // Finnhub answers unknown symbols with zeros.
        match price.filter(|p| *p > Decimal::ZERO) {
            Some(price) => {
                debug!(provider = %self.provider, %symbol, %price, "price fetched over REST");
                Ok(price)
            }
            None => Err(PriceError::Unavailable(symbol.clone())),
        }
    }
}

const fn default_base_url(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Polygon => "https://api.polygon.io",
        ProviderKind::Finnhub => "https://finnhub.io/api/v1",
    }
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct PolygonLastQuote {
    #[serde(default)]
    results: Option<PolygonNbbo>,
}

#[derive(Debug, Deserialize)]
struct PolygonNbbo {
    #[serde(rename = "p", default)]
    bid: Decimal,
    #[serde(rename = "P", default)]
    ask: Decimal,
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    #[serde(rename = "c", default)]
    current: Decimal,
}
