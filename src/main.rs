//! Memory Fabric server
//!
//! Control-plane memory service for conversational agents: event-sourced
//! ingest, capability-routed recall, nightly consolidation and GDPR
//! deletion over an embedded ledger.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::info;

use memfabric::config::FabricConfig;
use memfabric::fabric::MemoryFabric;
use memfabric::handlers::{build_api_routes, build_public_routes};
use memfabric::{metrics, middleware};

/// Max time to drain in-flight requests on shutdown
const GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
/// Max time to flush the ledger on shutdown
const LEDGER_FLUSH_TIMEOUT_SECS: u64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memfabric=info,tower_http=warn".into()),
        )
        .init();

    metrics::register_metrics().expect("Failed to register metrics");
    info!("Metrics registered at /metrics");

    info!("Starting Memory Fabric server...");

    let config = FabricConfig::from_env();
    config.log();

    let fabric = MemoryFabric::bootstrap(config.clone())?;
    info!(
        ports = fabric.registry().health_snapshot().len(),
        "Backend adapters registered"
    );

    // Keep references for shutdown cleanup and the nightly loop before
    // the router takes ownership
    let fabric_for_shutdown = Arc::clone(&fabric);
    let fabric_for_nightly = Arc::clone(&fabric);

    // Nightly consolidation runs independently of request traffic
    let consolidation_interval = config.consolidation_interval_secs;
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(consolidation_interval);
        loop {
            tokio::time::sleep(interval).await;
            match fabric_for_nightly.consolidate(None, false).await {
                Ok(_) => info!("Nightly consolidation cycle finished"),
                Err(e) => tracing::error!("Nightly consolidation cycle failed: {e}"),
            }
        }
    });

    let governor_conf = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_second)
        .burst_size(config.rate_limit_burst)
        .finish()
        .expect("Failed to build governor rate limiter configuration");
    let governor_layer = GovernorLayer::new(governor_conf);
    info!(
        "Rate limiting enabled: {} req/sec, burst of {}",
        config.rate_limit_per_second, config.rate_limit_burst
    );

    let cors = config.cors.to_layer();

    // API routes are rate limited; health and metrics are not, so probes
    // and scrapers always get through
    let api_routes = build_api_routes(fabric.clone()).layer(governor_layer);
    let public_routes = build_public_routes(fabric.clone());

    let app = axum::Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests))
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid host/port configuration");
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutdown signal received, flushing ledger...");

    let cleanup_future = async {
        let flush_future = async { fabric_for_shutdown.flush() };
        match tokio::time::timeout(
            std::time::Duration::from_secs(LEDGER_FLUSH_TIMEOUT_SECS),
            flush_future,
        )
        .await
        {
            Ok(Ok(())) => info!("Ledger flushed successfully"),
            Ok(Err(e)) => tracing::error!("Failed to flush ledger: {e}"),
            Err(_) => tracing::error!(
                "Ledger flush timed out after {}s",
                LEDGER_FLUSH_TIMEOUT_SECS
            ),
        }
    };

    match tokio::time::timeout(
        std::time::Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT_SECS),
        cleanup_future,
    )
    .await
    {
        Ok(()) => info!("Server shutdown complete"),
        Err(_) => {
            tracing::error!(
                "Graceful shutdown timed out after {}s, forcing exit",
                GRACEFUL_SHUTDOWN_TIMEOUT_SECS
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Wait for SIGTERM (Kubernetes) or ctrl-c
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
