// Relay server - Router assembly and serving
use crate::application::relay_hub::RelayHub;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{health_check, relay_socket};
use axum::{Router, routing::get};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Every path other than `/healthz` is a WebSocket relay endpoint.
pub fn router(relay: RelayHub) -> Router {
    let state = Arc::new(AppState { relay });

    Router::new()
        .route("/healthz", get(health_check))
        .fallback(relay_socket)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(
    listener: TcpListener,
    relay: RelayHub,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(relay))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
