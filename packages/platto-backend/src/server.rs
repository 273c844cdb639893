/// HTTP server: axum on a background tokio task.
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api::api_router;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api_router().layer(cors).with_state(state)
}

/// Bind and serve. Returns the bound port and the server task; the server
/// stops when `shutdown` flips to true.
pub async fn spawn_server(
    state: AppState,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(u16, tokio::task::JoinHandle<()>), Box<dyn std::error::Error>> {
    let bind_addr = state.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind_addr, state.port)).await?;
    let actual_port = listener.local_addr()?.port();
    *state.live_port.lock().unwrap_or_else(|e| e.into_inner()) = actual_port;

    log::info!("HTTP server listening on http://{}:{}", bind_addr, actual_port);

    let app = app(state);
    let task = tokio::spawn(async move {
        let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        });
        if let Err(e) = graceful.await {
            log::error!("HTTP server exited with error: {}", e);
        }
    });

    Ok((actual_port, task))
}
