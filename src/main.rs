// =============================================================================
// crypto-scanner: Main Entry Point
// =============================================================================
//
// Loads configuration, builds one market-data service per exchange, warms
// the exchange metadata and 24h ticker caches, then serves until Ctrl+C.
// =============================================================================

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crypto_scanner::{MarketDataService, RuntimeConfig, ScannerState};

const CONFIG_PATH: &str = "scanner_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("crypto-scanner starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    if config.exchanges.is_empty() {
        anyhow::bail!("no exchanges configured");
    }
    if config.market_cap.enabled && config.market_cap.api_key.is_none() {
        warn!("CMC_API_KEY not set, market-cap requests will be rejected upstream");
    }

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(ScannerState::new(config)?);

    // ── 3. Warm caches ───────────────────────────────────────────────────
    join_all(state.services().iter().map(|service| warm(service))).await;

    match serde_json::to_string(&state.status()) {
        Ok(status) => info!(%status, "scanner ready"),
        Err(e) => error!(error = %e, "failed to serialise status"),
    }

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping gracefully");
    state.shutdown();

    info!("crypto-scanner stopped");
    Ok(())
}

/// Populate exchange metadata and the 24h list for one exchange. Failures are
/// logged; the service keeps serving whatever it can.
async fn warm(service: &MarketDataService) {
    let exchange = service.name();

    match service.trading_pairs().await {
        Ok(pairs) => info!(exchange, trading_pairs = pairs.len(), "exchange info warmed"),
        Err(e) => error!(exchange, error = %e, "failed to load exchange info"),
    }

    match service.all_snapshots_24h().await {
        Ok(snapshots) => {
            let with_cap = snapshots.iter().filter(|s| s.market_cap_usd.is_some()).count();
            let with_volume = snapshots
                .iter()
                .filter(|s| s.volume_change_percent.is_some())
                .count();
            info!(
                exchange,
                snapshots = snapshots.len(),
                with_market_cap = with_cap,
                with_volume_change = with_volume,
                refreshing = service.is_refreshing(),
                "24h tickers warmed"
            );
        }
        Err(e) => error!(exchange, error = %e, "failed to load 24h tickers"),
    }
}
