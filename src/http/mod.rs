//! HTTP transport: axum router over the [`Orchestrator`].
//!
//! ```text
//! POST /chat-llm           one turn, JSON reply
//! POST /chat-llm/stream    one turn, SSE deltas
//! POST /generate-mermaid   render the conversation
//! POST /get-user-history   turns of the active conversation
//! POST /flush-chat         archive the active conversation
//! GET  /health
//! ```
//!
//! Every path also matches with a trailing slash. The cancellation token
//! passed to [`serve`] drives axum's graceful shutdown.

mod api;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::chat::Orchestrator;
use crate::error::AppError;

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<Orchestrator>,
    pub request_timeout: Duration,
    pub cors_allow_origins: Arc<[String]>,
}

impl AppState {
    pub fn new(chat: Arc<Orchestrator>, request_timeout: Duration, cors_allow_origins: &[String]) -> Self {
        Self { chat, request_timeout, cors_allow_origins: cors_allow_origins.into() }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_allow_origins);
    Router::new()
        .route("/chat-llm",           post(api::chat))
        .route("/chat-llm/",          post(api::chat))
        .route("/chat-llm/stream",    post(api::chat_stream))
        .route("/chat-llm/stream/",   post(api::chat_stream))
        .route("/generate-mermaid",   post(api::generate_mermaid))
        .route("/generate-mermaid/",  post(api::generate_mermaid))
        .route("/get-user-history",   post(api::user_history))
        .route("/get-user-history/",  post(api::user_history))
        .route("/flush-chat",         post(api::flush_chat))
        .route("/flush-chat/",        post(api::flush_chat))
        .route("/health",             get(api::health))
        .route("/health/",            get(api::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

/// Bind `bind_addr` and serve until `shutdown` is cancelled.
pub async fn serve(state: AppState, bind_addr: &str, shutdown: CancellationToken) -> Result<(), AppError> {
    let router = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind_addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| bind_addr.to_string());

    info!(bind_addr = %local, "http server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("http server error: {e}")))?;

    info!("http server shut down");
    Ok(())
}
