use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::health::health_check;
use crate::state::AppState;
use dcb_core::{Error, Result};

/// Bind and serve the health listener. The caller owns the `AppState`'s underlying
/// connections; this future runs until the listener is dropped or the process exits.
pub async fn run(host: &str, port: u16, state: AppState) -> Result<()> {
    let addr = SocketAddr::from((
        host.parse::<std::net::IpAddr>().map_err(|e| Error::config(format!("invalid host: {e}")))?,
        port,
    ));

    let app = build_router(state);

    info!(%addr, "health listener starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    axum::serve(listener, app).await.map_err(|e| Error::Network(e.to_string()))?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
