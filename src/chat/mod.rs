//! Turn-taking logic.
//!
//! For every user message the [`Orchestrator`] decides between:
//!
//! ```text
//! session empty?  ── yes ──► seed prompt ─────────────► Reply
//!       │ no
//!       ▼
//! intent prompt ── "Yes" ──► record (input, verdict) ──► WantsToDraw
//!       │ otherwise
//!       ▼
//! follow-up prompt (full transcript + input) ──────────► Reply
//! ```
//!
//! and, on request, renders the accumulated conversation as Mermaid.

pub mod intent;
pub mod mermaid;
pub mod prompt;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::llm::{LlmProvider, LlmResponse, ModelParams, ProviderError, STREAM_BUFFER};
use crate::session::manager::SessionManager;
use crate::session::{ChatSession, ChatTurn};

use prompt::Prompts;

/// Message returned when a diagram is requested before any turn exists.
pub const NO_REQUIREMENTS: &str = "Please provide user requirements.";

/// One user message.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub request_id: String,
    pub user_input: String,
    pub params: ModelParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The user asked to finish; the client should call diagram generation.
    WantsToDraw,
    Reply { model_output: String },
}

/// Streamed reply deltas. Closes after the turn has been recorded.
pub type TurnDeltas = mpsc::Receiver<Result<String, AppError>>;

pub enum TurnStream {
    WantsToDraw,
    Deltas(TurnDeltas),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagram {
    pub mermaid_code: String,
    pub user_id: String,
}

pub struct Orchestrator {
    llm: LlmProvider,
    sessions: Arc<SessionManager>,
    prompts: Prompts,
    model_id: String,
    default_params: ModelParams,
}

impl Orchestrator {
    pub fn new(
        llm: LlmProvider,
        sessions: Arc<SessionManager>,
        prompts: Prompts,
        model_id: impl Into<String>,
        default_params: ModelParams,
    ) -> Self {
        Self { llm, sessions, prompts, model_id: model_id.into(), default_params }
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.llm
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn default_params(&self) -> ModelParams {
        self.default_params
    }

    /// Handle one user message and return the assistant's move.
    pub async fn chat_turn(&self, req: &TurnRequest) -> Result<TurnOutcome, AppError> {
        let session = self.sessions.get_session(&req.user_id, Some(&req.request_id)).await?;
        if self.wants_to_draw(&session, req).await? {
            return Ok(TurnOutcome::WantsToDraw);
        }

        let prompt = self.turn_prompt(&session, &req.user_input);
        let reply = self.llm.complete(&prompt, &req.params).await?;
        log_usage(&req.user_id, "turn", &reply);

        self.sessions
            .record_turn(&req.user_id, &req.request_id, &req.user_input, &reply.text)
            .await?;
        self.sessions.set_model(&req.user_id, &self.model_id, req.params).await;

        info!(user_id = %req.user_id, request_id = %req.request_id, turn = session.chats.len() + 1, "reply generated");
        Ok(TurnOutcome::Reply { model_output: reply.text })
    }

    /// Like [`chat_turn`](Self::chat_turn) but the reply is relayed as it is
    /// generated. One spawned task forwards the deltas and records the full
    /// turn once the provider finishes; a client that disconnects early
    /// leaves no turn behind.
    pub async fn stream_turn(&self, req: TurnRequest) -> Result<TurnStream, AppError> {
        let session = self.sessions.get_session(&req.user_id, Some(&req.request_id)).await?;
        if self.wants_to_draw(&session, &req).await? {
            return Ok(TurnStream::WantsToDraw);
        }

        let prompt = self.turn_prompt(&session, &req.user_input);
        let mut upstream = self.llm.complete_stream(&prompt, &req.params).await?;

        let (tx, rx) = mpsc::channel::<Result<String, AppError>>(STREAM_BUFFER);
        let sessions = self.sessions.clone();
        let model_id = self.model_id.clone();
        tokio::spawn(async move {
            let mut full = String::new();
            while let Some(item) = upstream.recv().await {
                match item {
                    Ok(delta) => {
                        full.push_str(&delta);
                        if tx.send(Ok(delta)).await.is_err() {
                            warn!(user_id = %req.user_id, "stream client went away; turn not recorded");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(user_id = %req.user_id, error = %e, "stream aborted by provider");
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }

            let reply = full.trim();
            if reply.is_empty() {
                let _ = tx
                    .send(Err(ProviderError::Request("empty streamed reply".into()).into()))
                    .await;
                return;
            }
            match sessions.record_turn(&req.user_id, &req.request_id, &req.user_input, reply).await {
                Ok(()) => {
                    sessions.set_model(&req.user_id, &model_id, req.params).await;
                    info!(user_id = %req.user_id, request_id = %req.request_id, "streamed reply recorded");
                }
                Err(e) => {
                    error!(user_id = %req.user_id, error = %e, "streamed turn not saved");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(TurnStream::Deltas(rx))
    }

    /// Render the user's conversation as Mermaid.
    ///
    /// The cached session is dropped and rebuilt from the store first, so
    /// the diagram reflects exactly what was persisted. Without a
    /// `request_id` the evicted session's request is used.
    pub async fn generate_diagram(&self, user_id: &str, request_id: Option<&str>) -> Result<Diagram, AppError> {
        let previous = self.sessions.remove_session(user_id).await;
        let request_id = request_id
            .map(str::to_string)
            .or_else(|| previous.as_ref().and_then(|s| s.request_id.clone()));
        let params = previous
            .and_then(|s| s.model_params)
            .unwrap_or(self.default_params);

        let session = self.sessions.get_session(user_id, request_id.as_deref()).await?;
        if session.is_empty() {
            return Err(AppError::NotFound(NO_REQUIREMENTS.into()));
        }

        let reply = self.llm.complete(&self.prompts.diagram(&session.transcript()), &params).await?;
        log_usage(user_id, "diagram", &reply);

        let mermaid_code = mermaid::extract(&reply.text);
        if mermaid_code.is_empty() {
            return Err(ProviderError::Request("model returned no diagram code".into()).into());
        }
        info!(%user_id, turns = session.chats.len(), code_len = mermaid_code.len(), "diagram generated");
        Ok(Diagram { mermaid_code, user_id: user_id.to_string() })
    }

    pub async fn history(&self, user_id: &str, request_id: Option<&str>) -> Result<Vec<ChatTurn>, AppError> {
        Ok(self.sessions.get_session(user_id, request_id).await?.chats)
    }

    pub async fn flush(&self, user_id: &str) -> usize {
        let flushed = self.sessions.flush(user_id).await;
        info!(%user_id, flushed, "chat flushed");
        flushed
    }

    /// Ask the model whether the new message means "I'm done, draw it".
    /// Never asked on the first message. A yes is recorded as a turn.
    async fn wants_to_draw(&self, session: &ChatSession, req: &TurnRequest) -> Result<bool, AppError> {
        if session.is_empty() {
            return Ok(false);
        }
        let last_turn = serde_json::to_string(session.last_turns(1))
            .map_err(|e| AppError::Server(format!("serialize last turn: {e}")))?;
        let verdict = self
            .llm
            .complete(&self.prompts.intent(&last_turn, &req.user_input), &req.params)
            .await?;

        if !intent::is_affirmative(&verdict.text) {
            debug!(user_id = %req.user_id, verdict = %verdict.text, "user is still describing");
            return Ok(false);
        }

        self.sessions
            .record_turn(&req.user_id, &req.request_id, &req.user_input, verdict.text.trim())
            .await?;
        info!(user_id = %req.user_id, request_id = %req.request_id, "user asked for the diagram");
        Ok(true)
    }

    fn turn_prompt(&self, session: &ChatSession, user_input: &str) -> String {
        if session.is_empty() {
            self.prompts.seed(user_input)
        } else {
            self.prompts.follow_up(&session.transcript(), user_input)
        }
    }
}

fn log_usage(user_id: &str, purpose: &str, reply: &LlmResponse) {
    if let Some(u) = reply.usage {
        debug!(%user_id, purpose, input_tokens = u.input_tokens, output_tokens = u.output_tokens, "llm usage");
    }
}
