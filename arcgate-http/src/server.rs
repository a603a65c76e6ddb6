use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arcgate::config::GatewayConfig;
use axum::{extract::DefaultBodyLimit, extract::Request, Router, ServiceExt};
use tower::Layer;
use tower_http::cors::CorsLayer;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::capabilities;
use crate::state::AppState;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Router with every capability mounted and the outer HTTP layers applied.
/// Background tasks are not started; see [`capabilities::init_all`].
pub fn build_app(state: &Arc<AppState>) -> Router {
    capabilities::router(state)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(CorsLayer::very_permissive().max_age(Duration::from_secs(86400)))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    if config.tls_requested() {
        tracing::warn!(
            "HTTPS_CERT/HTTPS_KEY are set but TLS is terminated in front of the gateway; serving plain HTTP"
        );
    }

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config)?);
    capabilities::init_all(&state);

    // Trailing slashes are trimmed before routing, so this wraps the router
    // instead of being one of its layers.
    let app = NormalizePathLayer::trim_trailing_slash().layer(build_app(&state));

    tracing::info!(
        "Starting arcgate on {} in front of {}",
        bind_addr,
        state.engine.base_url()
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(
        listener,
        ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
    )
    .with_graceful_shutdown(shutdown_signal(state.clone()))
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining background writers");
    state.shutdown.notify_waiters();
    state.logs.close();
    state.analytics.shutdown();
}
