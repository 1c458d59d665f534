// =============================================================================
// INVENTORY FLOW SERVICE - Main Entry Point
// =============================================================================
// Drives the warehouse inbound/outbound operation flows for the UI.
//
// WHAT THIS SERVICE DOES:
// - Hosts one flow session per operator (scan intake → plan → verify → commit)
// - Calls the warehouse backend for item lookup, planning, FIFO check and
//   execution
// - Caches item lookups in Redis (optional)
// - Exposes Prometheus metrics for observability
// =============================================================================

mod api; // Warehouse backend client (api.rs)
mod cache; // Item lookup cache (cache.rs)
mod config; // Configuration loading (config.rs)
mod error; // Error types (error.rs)
mod flow; // Flow state machine (flow.rs)
mod handlers; // HTTP request handlers (handlers.rs)
mod intake; // Scanned code normalization (intake.rs)
mod metrics; // Prometheus metrics setup (metrics.rs)
mod models; // Data structures (models.rs)
mod placement; // Editable inbound placements (placement.rs)
mod scanner; // Camera read debouncing (scanner.rs)
mod session; // Session store and request runner (session.rs)
mod verification; // Outbound pick verification (verification.rs)

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::HttpWarehouseApi;
use crate::cache::ItemCache;
use crate::config::Config;
use crate::metrics::setup_metrics;
use crate::session::{spawn_sweeper, FlowRunner, SessionStore};

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
#[derive(Clone)]
pub struct AppState {
    /// Session store, backend client and cache behind one handle
    pub runner: FlowRunner,

    /// Renders the Prometheus exposition format
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

// -----------------------------------------------------------------------------
// ROUTES
// -----------------------------------------------------------------------------
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ----- Health & Readiness -----
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        // ----- Flow sessions -----
        .route("/api/v1/flows", post(handlers::create_flow))
        .route(
            "/api/v1/flows/:id",
            get(handlers::get_flow).delete(handlers::delete_flow),
        )
        .route("/api/v1/flows/:id/events", post(handlers::post_event))
        // ----- Item identification -----
        .route("/api/v1/identify", post(handlers::identify))
        .route("/api/v1/identify/mismatch", post(handlers::report_mismatch))
        // ----- Middleware -----
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Load environment variables
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok();

    // -------------------------------------------------------------------------
    // STEP 2: Initialize logging/tracing
    // -------------------------------------------------------------------------
    // RUST_LOG overrides, e.g. RUST_LOG=info,inventory_flow_service=trace
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,inventory_flow_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Inventory Flow Service...");

    // -------------------------------------------------------------------------
    // STEP 3: Load configuration
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        port = config.port,
        warehouse_api = %config.warehouse_api_url,
        scan_delay_ms = config.scan_delay_ms,
        stop_on_scan = config.stop_on_scan,
        "Configuration loaded"
    );

    // -------------------------------------------------------------------------
    // STEP 4: Set up Prometheus metrics
    // -------------------------------------------------------------------------
    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 5: Warehouse backend client
    // -------------------------------------------------------------------------
    let api = HttpWarehouseApi::new(
        config.warehouse_api_url.clone(),
        config.warehouse_api_token.clone(),
    )
    .context("Failed to build warehouse API client")?;

    // -------------------------------------------------------------------------
    // STEP 6: Connect to Redis (optional)
    // -------------------------------------------------------------------------
    let cache = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Invalid REDIS_URL")?;
            let conn = redis::aio::ConnectionManager::new(client)
                .await
                .context("Failed to connect to Redis")?;
            info!(ttl_secs = config.item_cache_ttl_secs, "Connected to Redis");
            ItemCache::new(conn, config.item_cache_ttl_secs)
        }
        None => {
            warn!("REDIS_URL not set, item lookups are not cached");
            ItemCache::disabled()
        }
    };

    // -------------------------------------------------------------------------
    // STEP 7: Session store and application state
    // -------------------------------------------------------------------------
    let store = SessionStore::new();
    spawn_sweeper(store.clone(), config.session_idle_timeout());
    info!(
        item_cache = cache.is_enabled(),
        idle_timeout_secs = config.session_idle_timeout_secs,
        "Session store ready"
    );

    let runner = FlowRunner::new(
        Arc::new(api),
        cache,
        store,
        config.scan_delay(),
        config.stop_on_scan,
    );
    let state = Arc::new(AppState {
        runner,
        metrics_handle,
    });

    // -------------------------------------------------------------------------
    // STEP 8: Start the HTTP server
    // -------------------------------------------------------------------------
    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Inventory Flow Service is listening");
    axum::serve(listener, app).await?;

    Ok(())
}
