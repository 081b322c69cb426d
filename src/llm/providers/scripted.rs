//! Scripted provider: replays canned replies in order and records every
//! prompt and parameter set it was given. Built programmatically, never
//! from config.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::llm::{DeltaReceiver, LlmResponse, ModelParams, ProviderError, STREAM_BUFFER, stream_words};

#[derive(Debug, Clone)]
enum Step {
    Reply(String),
    /// Streams `partial`, then fails with `error`. Buffered calls just fail.
    Break { partial: String, error: String },
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<Vec<(String, ModelParams)>>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: Arc::new(Mutex::new(replies.into_iter().map(|r| Step::Reply(r.into())).collect())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append a step that streams `partial` and then errors.
    pub fn then_break(self, partial: impl Into<String>, error: impl Into<String>) -> Self {
        lock(&self.steps).push_back(Step::Break { partial: partial.into(), error: error.into() });
        self
    }

    /// Every prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|(p, _)| p.clone()).collect()
    }

    /// Sampling parameters of every call, oldest first.
    pub fn params(&self) -> Vec<ModelParams> {
        lock(&self.calls).iter().map(|(_, p)| *p).collect()
    }

    fn next_step(&self, prompt: &str, params: &ModelParams) -> Result<Step, ProviderError> {
        lock(&self.calls).push((prompt.to_string(), *params));
        lock(&self.steps)
            .pop_front()
            .ok_or_else(|| ProviderError::Request("scripted provider has no replies left".into()))
    }

    pub async fn complete(&self, prompt: &str, params: &ModelParams) -> Result<LlmResponse, ProviderError> {
        match self.next_step(prompt, params)? {
            Step::Reply(text) => Ok(LlmResponse { text, usage: None }),
            Step::Break { error, .. } => Err(ProviderError::Request(error)),
        }
    }

    pub async fn complete_stream(&self, prompt: &str, params: &ModelParams) -> Result<DeltaReceiver, ProviderError> {
        match self.next_step(prompt, params)? {
            Step::Reply(text) => Ok(stream_words(text)),
            Step::Break { partial, error } => {
                let (tx, rx) = mpsc::channel(STREAM_BUFFER);
                tokio::spawn(async move {
                    if tx.send(Ok(partial)).await.is_ok() {
                        let _ = tx.send(Err(ProviderError::Request(error))).await;
                    }
                });
                Ok(rx)
            }
        }
    }
}

// A poisoned lock only means another test thread panicked mid-push; the data is still usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
