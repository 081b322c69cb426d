//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities, so clone them freely.

pub mod providers;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Request / response types ──────────────────────────────────────────────────

/// Sampling parameters forwarded with every completion.
///
/// Deserializes from a partial object (`{"temperature": 0.2}`); missing
/// fields keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self { temperature: 0.75, max_tokens: 2000, top_p: 0.9 }
    }
}

/// Token counts reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

/// Receiving half of a streamed completion. Each item is one text delta;
/// the channel closes when the provider is done.
pub type DeltaReceiver = mpsc::Receiver<Result<String, ProviderError>>;

/// Buffer between a provider's streaming task and its consumer.
pub(crate) const STREAM_BUFFER: usize = 64;

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Scripted(providers::scripted::ScriptedProvider),
}

impl LlmProvider {
    /// Send `prompt` to the provider and return its text reply.
    pub async fn complete(&self, prompt: &str, params: &ModelParams) -> Result<LlmResponse, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete(prompt, params).await,
            LlmProvider::OpenAiCompatible(p) => p.complete(prompt, params).await,
            LlmProvider::Scripted(p) => p.complete(prompt, params).await,
        }
    }

    /// Stream the reply to `prompt` as text deltas.
    pub async fn complete_stream(&self, prompt: &str, params: &ModelParams) -> Result<DeltaReceiver, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete_stream(prompt, params).await,
            LlmProvider::OpenAiCompatible(p) => p.complete_stream(prompt, params).await,
            LlmProvider::Scripted(p) => p.complete_stream(prompt, params).await,
        }
    }

    /// Reachability check. Local providers are always reachable.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.ping().await,
            LlmProvider::Dummy(_) | LlmProvider::Scripted(_) => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::OpenAiCompatible(_) => "openai",
            LlmProvider::Scripted(_) => "scripted",
        }
    }
}

/// Split `text` into word-sized deltas (whitespace stays attached to the
/// preceding word) and feed them through a fresh channel.
pub(crate) fn stream_words(text: String) -> DeltaReceiver {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(async move {
        for piece in text.split_inclusive(char::is_whitespace) {
            if tx.send(Ok(piece.to_string())).await.is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_default_matches_service_defaults() {
        let p = ModelParams::default();
        assert_eq!(p.temperature, 0.75);
        assert_eq!(p.max_tokens, 2000);
        assert_eq!(p.top_p, 0.9);
    }

    #[test]
    fn params_accept_partial_object() {
        let p: ModelParams = serde_json::from_str(r#"{"max_tokens": 512}"#).unwrap();
        assert_eq!(p.max_tokens, 512);
        assert_eq!(p.temperature, 0.75);
    }

    #[tokio::test]
    async fn stream_words_reassembles_text() {
        let mut rx = stream_words("flow chart  please".to_string());
        let mut out = String::new();
        while let Some(delta) = rx.recv().await {
            out.push_str(&delta.unwrap());
        }
        assert_eq!(out, "flow chart  please");
    }
}
