//! HTTP gateway.
//!
//! Serves:
//! - `POST   /api/chat`             — run a turn (`X-Session-ID` header)
//! - `GET    /api/chat/:session_id` — history snapshot
//! - `DELETE /api/chat/:session_id` — clear a session
//! - `GET    /api/health`           — version, uptime, live sessions
//! - `GET    /api/status`           — returns `{ "status": "ok" }`

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::runtime::Runtime;

pub use handlers::chat::SESSION_HEADER;

/// Handle returned by [`start_gateway`].
pub struct Gateway {
    /// Server task handle.
    pub handle: JoinHandle<()>,
    /// The address the server is actually listening on.
    pub addr: SocketAddr,
}

// ---------------------------------------------------------------------------
// Shared state injected into axum handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) runtime: Arc<Runtime>,
}

/// Build the application router.
pub fn router(runtime: Arc<Runtime>) -> Router {
    let state = AppState { runtime };

    let api_router = Router::new()
        .route("/status", get(handlers::health::status_handler))
        .route("/health", get(handlers::health::api_health))
        .route("/chat", post(handlers::chat::api_chat))
        .route(
            "/chat/:session_id",
            get(handlers::chat::api_chat_history).delete(handlers::chat::api_chat_delete),
        );

    Router::new()
        .nest("/api", api_router)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Start the gateway on `addr`.  The server drains and stops when
/// `shutdown` is cancelled.
pub async fn start_gateway(
    addr: SocketAddr,
    runtime: Arc<Runtime>,
    shutdown: CancellationToken,
) -> std::io::Result<Gateway> {
    let app = router(runtime);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            error!("gateway server error: {e}");
        }
    });

    info!(%bound_addr, "gateway started");

    Ok(Gateway {
        handle,
        addr: bound_addr,
    })
}
