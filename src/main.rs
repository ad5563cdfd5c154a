//! Live feed service, binary entrypoint.
//! Boots the Axum HTTP server with the aggregator, `/feed`, `/health` and `/metrics`.

use std::sync::Arc;

use live_feed_aggregator::ingest::relay::ReqwestTransport;
use live_feed_aggregator::{load_config_default, service};
use shuttle_axum::ShuttleAxum;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON when FEED_LOG_JSON=1.
/// Filter from RUST_LOG, falling back to `live_feed_aggregator=info,warn`.
fn init_tracing() {
    let json = std::env::var("FEED_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("live_feed_aggregator=info,warn"));

    // The runtime may already have installed a subscriber; keep it in that case.
    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = load_config_default()?;
    let transport = Arc::new(ReqwestTransport::new()?);
    let app = service(&cfg, transport)?;

    info!(
        primary = %cfg.primary.listing_url,
        supplement = %cfg.supplement.listing_url,
        "live feed service starting"
    );

    Ok(app.into())
}
