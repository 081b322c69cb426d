//! Axum handlers.
//!
//! Field names follow the wire format the web client already speaks
//! (`userID`, `requestID`, `modelParameter`). Every error body is
//! `{"detail": "..."}`.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::chat::{TurnDeltas, TurnOutcome, TurnRequest, TurnStream};
use crate::error::AppError;
use crate::llm::ModelParams;

use super::AppState;

const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(6);

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct ChatRequest {
    #[serde(rename = "userID")]
    user_id: String,
    #[serde(rename = "requestID")]
    request_id: String,
    user_input: String,
    #[serde(rename = "modelParameter", default)]
    model_parameter: Option<ModelParams>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UserRequest {
    #[serde(rename = "userID")]
    user_id: String,
    #[serde(rename = "requestID", default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FlushRequest {
    #[serde(rename = "userID")]
    user_id: String,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(super) struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self { status, detail: detail.into() }
    }

    fn timeout() -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "request timed out")
    }

    /// Not-found passes through unchanged; anything else is a 500 whose
    /// detail starts with `context`.
    fn from_app(err: AppError, context: &str) -> Self {
        match err {
            AppError::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, msg),
            other => {
                warn!(error = %other, "{context}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{context}: {other}"))
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_user(user_id: &str) -> ApiResult<&str> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "userID must not be blank"));
    }
    Ok(trimmed)
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = ApiResult<T>>) -> ApiResult<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        warn!(timeout_secs = limit.as_secs(), "request timed out");
        ApiError::timeout()
    })?
}

fn turn_request(state: &AppState, req: ChatRequest) -> ApiResult<TurnRequest> {
    let user_id = require_user(&req.user_id)?.to_string();
    Ok(TurnRequest {
        user_id,
        request_id: req.request_id,
        user_input: req.user_input,
        params: req.model_parameter.unwrap_or(state.chat.default_params()),
    })
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// POST /chat-llm
pub(super) async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(req) = body?;
    let turn = turn_request(&state, req)?;

    let outcome = with_timeout(state.request_timeout, async {
        state
            .chat
            .chat_turn(&turn)
            .await
            .map_err(|e| ApiError::from_app(e, "Error generating detailed solution"))
    })
    .await?;

    let body = match outcome {
        TurnOutcome::WantsToDraw => json!({ "user_input": turn.user_input, "wantsToDraw": true }),
        TurnOutcome::Reply { model_output } => json!({
            "user_input": turn.user_input,
            "model_output": model_output,
            "wantsToDraw": false,
        }),
    };
    Ok(Json(body))
}

/// POST /chat-llm/stream
///
/// Emits `token` events carrying `{"text"}` deltas, then one `done` event.
/// When the user asked for the diagram a single `draw` event is sent
/// instead. A failure mid-stream ends it with an `error` event.
pub(super) async fn chat_stream(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(req) = body?;
    let turn = turn_request(&state, req)?;
    let user_input = turn.user_input.clone();

    let started = with_timeout(state.request_timeout, async {
        state
            .chat
            .stream_turn(turn)
            .await
            .map_err(|e| ApiError::from_app(e, "Error generating detailed solution"))
    })
    .await?;

    let events: BoxStream<'static, Result<Event, Infallible>> = match started {
        TurnStream::WantsToDraw => {
            let draw = Event::default()
                .event("draw")
                .data(json!({ "user_input": user_input, "wantsToDraw": true }).to_string());
            stream::iter([Ok::<_, Infallible>(draw)]).boxed()
        }
        TurnStream::Deltas(rx) => delta_events(rx, user_input).boxed(),
    };
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn delta_events(
    rx: TurnDeltas,
    user_input: String,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream::unfold(Some((rx, user_input)), |open| async move {
        let (mut rx, user_input) = open?;
        let event = match rx.recv().await {
            Some(Ok(delta)) => {
                let ev = Event::default().event("token").data(json!({ "text": delta }).to_string());
                return Some((Ok(ev), Some((rx, user_input))));
            }
            Some(Err(e)) => {
                warn!(error = %e, "stream failed");
                Event::default()
                    .event("error")
                    .data(json!({ "detail": format!("Error generating detailed solution: {e}") }).to_string())
            }
            None => Event::default()
                .event("done")
                .data(json!({ "user_input": user_input, "wantsToDraw": false }).to_string()),
        };
        Some((Ok(event), None))
    })
}

/// POST /generate-mermaid
pub(super) async fn generate_mermaid(
    State(state): State<AppState>,
    body: Result<Json<UserRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(req) = body?;
    let user_id = require_user(&req.user_id)?;

    let diagram = with_timeout(state.request_timeout, async {
        state
            .chat
            .generate_diagram(user_id, req.request_id.as_deref())
            .await
            .map_err(|e| ApiError::from_app(e, "Error generating mermaid code"))
    })
    .await?;

    Ok(Json(json!({ "mermaid_code": diagram.mermaid_code, "userID": diagram.user_id })))
}

/// POST /get-user-history
pub(super) async fn user_history(
    State(state): State<AppState>,
    body: Result<Json<UserRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(req) = body?;
    let user_id = require_user(&req.user_id)?;

    let turns = with_timeout(state.request_timeout, async {
        state
            .chat
            .history(user_id, req.request_id.as_deref())
            .await
            .map_err(|e| ApiError::from_app(e, "Error loading chat history"))
    })
    .await?;

    Ok(Json(json!({ "userID": user_id, "chat_history": turns })))
}

/// POST /flush-chat
pub(super) async fn flush_chat(
    State(state): State<AppState>,
    body: Result<Json<FlushRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(req) = body?;
    let user_id = require_user(&req.user_id)?;
    let flushed = state.chat.flush(user_id).await;
    Ok(Json(json!({ "message": "Chat flushed", "flushed": flushed })))
}

/// GET /health
///
/// Always 200; `status` is `"degraded"` when the LLM backend does not answer.
pub(super) async fn health(State(state): State<AppState>) -> Response {
    let provider = state.chat.provider();
    let llm = match tokio::time::timeout(HEALTH_PING_TIMEOUT, provider.ping()).await {
        Ok(Ok(())) => "ok".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(_) => "timeout".to_string(),
    };
    let status = if llm == "ok" { "ok" } else { "degraded" };
    if status != "ok" {
        info!(provider = provider.name(), %llm, "health check degraded");
    }

    Json(json!({
        "status": status,
        "provider": provider.name(),
        "model": state.chat.model_id(),
        "sessions": state.chat.sessions().len().await,
        "llm": llm,
    }))
    .into_response()
}
