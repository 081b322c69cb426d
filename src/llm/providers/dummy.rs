//! Dummy LLM provider: echoes the prompt back prefixed with `[echo]`.
//! Lets the whole service run offline without an API key.

use crate::llm::{DeltaReceiver, LlmResponse, ModelParams, ProviderError, stream_words};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(&self, prompt: &str, _params: &ModelParams) -> Result<LlmResponse, ProviderError> {
        Ok(LlmResponse { text: format!("[echo] {prompt}"), usage: None })
    }

    pub async fn complete_stream(&self, prompt: &str, _params: &ModelParams) -> Result<DeltaReceiver, ProviderError> {
        Ok(stream_words(format!("[echo] {prompt}")))
    }
}
