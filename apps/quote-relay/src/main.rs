//! Quote Relay Binary
//!
//! Starts the quote relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `POLYGON_API_KEY` or `FINNHUB_API_KEY`: Key for the selected provider
//!
//! ## Optional
//! - `QUOTE_PROVIDER`: "polygon" | "finnhub" (default: polygon)
//! - `POLYGON_REALTIME`: Use the real-time Polygon feed (default: false)
//! - `QUOTE_RELAY_UPSTREAM_URL`: Override the provider endpoint
//! - `QUOTE_RELAY_STREAM_PORT`: Client WebSocket port (default: 8080)
//! - `QUOTE_RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `QUOTE_RELAY_SINK_CAPACITY`: Per-client queue length (default: 256)
//! - `QUOTE_RELAY_SINK_SEND_TIMEOUT_MS`: Slow-client eviction bound (default: 250)
//! - `LEDGER_SEED_CASH`: Simulated starting cash (default: 100000)
//! - `LEDGER_STATIC_PRICES`: Fallback prices, e.g. "AAPL=150,MSFT=300"
//! - `LEDGER_REST_PRICES`: Ask the provider's REST API for unrelayed symbols (default: true)
//! - `LEDGER_REST_PRICE_URL`: Override the REST endpoint
//! - `LEDGER_REST_PRICE_TIMEOUT_MS`: REST price request bound (default: 2000)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_relay::infrastructure::health::{HealthServer, HealthServerState};
use quote_relay::infrastructure::stream::{StreamServer, StreamState};
use quote_relay::infrastructure::telemetry;
use quote_relay::{
    ExecutionLedger, FanoutDispatcher, LatestQuotes, Quote, QuoteRelay, ReconnectConfig,
    RelayConfig, RelayPriceSource, RestPrices, StaticPrices, UpstreamConnector, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Quote Relay");

    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env().context("failed to load configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    // Upstream connection and relay
    let (quotes_tx, quotes_rx) = mpsc::channel::<Quote>(config.fanout.inbound_capacity);
    let connector = Arc::new(UpstreamConnector::new(
        config.upstream.provider_config(),
        ReconnectConfig::from_settings(&config.upstream),
        quotes_tx,
        shutdown_token.child_token(),
    ));
    let relay = Arc::new(QuoteRelay::new(connector.clone()));
    let latest = Arc::new(LatestQuotes::new());

    tasks.spawn(
        Arc::clone(&relay).supervise(connector.subscribe_state(), shutdown_token.clone()),
    );

    let dispatcher = Arc::new(FanoutDispatcher::new(
        Arc::clone(&relay),
        Arc::clone(&latest),
        config.fanout.send_timeout,
    ));
    tasks.spawn(dispatcher.run(quotes_rx, shutdown_token.clone()));

    // Simulated ledger
    let prices = ledger_prices(&config, Arc::clone(&latest))?;
    let ledger = Arc::new(ExecutionLedger::new(config.ledger.seed_cash, Arc::new(prices)));
    tasks.spawn(revalue_positions(
        Arc::clone(&ledger),
        config.ledger.revalue_interval,
        shutdown_token.clone(),
    ));

    // Servers
    let stream_server = StreamServer::new(
        config.server.stream_port,
        Arc::new(StreamState::new(
            Arc::clone(&relay),
            config.fanout.sink_capacity,
            shutdown_token.clone(),
        )),
        shutdown_token.clone(),
    );
    tasks.spawn(async move {
        if let Err(e) = stream_server.run().await {
            tracing::error!(error = %e, "Stream server error");
        }
    });

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.upstream.provider.as_str(),
        Arc::clone(&connector),
        Arc::clone(&relay),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tasks.spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Quote relay ready");

    await_shutdown(shutdown_token).await;

    connector.disconnect().await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out, aborting remaining tasks");
        tasks.abort_all();
    }

    let account = ledger.account().await;
    tracing::info!(
        cash = %account.cash,
        portfolio_value = %account.portfolio_value,
        positions = account.positions.len(),
        "Quote relay stopped"
    );
    Ok(())
}

/// Periodically re-mark simulated positions at the latest relayed prices.
async fn revalue_positions(
    ledger: Arc<ExecutionLedger>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = ledger.revalue().await;
                tracing::trace!(
                    portfolio_value = %snapshot.portfolio_value,
                    positions = snapshot.positions.len(),
                    "ledger revalued"
                );
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Price source for the ledger: relayed quotes, then REST, then the static table.
fn ledger_prices(config: &RelayConfig, latest: Arc<LatestQuotes>) -> anyhow::Result<RelayPriceSource> {
    let prices = RelayPriceSource::new(
        latest,
        Arc::new(StaticPrices::from(config.ledger.static_prices.clone())),
    );
    if !config.ledger.rest_prices {
        return Ok(prices);
    }

    let rest = RestPrices::new(
        config.upstream.provider,
        config.upstream.api_key.clone(),
        config.ledger.rest_price_timeout,
    )
    .context("failed to build REST price client")?;
    let rest = match &config.ledger.rest_price_url {
        Some(url) => rest.with_base_url(url.clone()),
        None => rest,
    };
    Ok(prices.with_remote(Arc::new(rest)))
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    let provider = config.upstream.provider_config();

    tracing::info!(
        provider = config.upstream.provider.as_str(),
        stream_port = config.server.stream_port,
        health_port = config.server.health_port,
        sink_capacity = config.fanout.sink_capacity,
        send_timeout_ms = config.fanout.send_timeout.as_millis(),
        seed_cash = %config.ledger.seed_cash,
        static_prices = config.ledger.static_prices.len(),
        rest_prices = config.ledger.rest_prices,
        "Configuration loaded"
    );
    tracing::debug!(
        upstream_url = provider.redacted_url(),
        max_reconnect_attempts = config.upstream.max_reconnect_attempts,
        "Upstream endpoint"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
