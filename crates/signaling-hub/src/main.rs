//! Room Signaling Hub binary.
//!
//! Runs two HTTP servers: the signaling surface (WebSocket upgrades and
//! the room API) on `HUB_BIND_ADDRESS`, and the operational surface
//! (health probes and Prometheus metrics) on `HUB_HEALTH_BIND_ADDRESS`.

use signaling_hub::actors::{HubMetrics, RoomRegistryActorHandle, RoomSettings};
use signaling_hub::config::Config;
use signaling_hub::observability::{health_router, HealthState};
use signaling_hub::transport::{self, AppState};

use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signaling_hub=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        hub_id = %config.hub_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        "Starting room signaling hub"
    );

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    let health = HealthState::new();
    let metrics = HubMetrics::new();
    let (registry, _registry_task) = RoomRegistryActorHandle::spawn(
        config.hub_id.clone(),
        RoomSettings::from_config(&config),
        Arc::clone(&metrics),
    );

    let signaling = transport::router(AppState {
        registry: registry.clone(),
        outbound_queue_size: config.outbound_queue_size,
    });
    let ops = health_router(Arc::clone(&health)).route(
        "/metrics",
        get(move || {
            let prometheus = prometheus.clone();
            async move { prometheus.render() }
        }),
    );

    // Bind before reporting ready, so probes never race the listeners.
    let signaling_listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let ops_listener = tokio::net::TcpListener::bind(&config.health_bind_address).await?;
    info!(
        signaling = %signaling_listener.local_addr()?,
        ops = %ops_listener.local_addr()?,
        "Listeners bound"
    );

    let server_cancel = CancellationToken::new();
    let signaling_server = tokio::spawn({
        let cancel = server_cancel.clone();
        async move {
            let result = axum::serve(signaling_listener, signaling)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Signaling server exited with error");
            }
        }
    });
    let ops_server = tokio::spawn({
        let cancel = server_cancel.clone();
        async move {
            let result = axum::serve(ops_listener, ops)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Ops server exited with error");
            }
        }
    });

    health.set_ready(true);
    info!("Hub ready");

    shutdown_signal().await;
    info!("Shutdown signal received, draining");

    // Stop taking new work, close every room, then stop the servers.
    health.set_ready(false);
    registry.shutdown().await;
    server_cancel.cancel();
    let _ = signaling_server.await;
    let _ = ops_server.await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
