//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! All OpenAI wire types are private to this module. The provider is
//! stateless: conversation history is folded into the prompt by the caller.

use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::llm::{DeltaReceiver, LlmResponse, LlmUsage, ModelParams, ProviderError, STREAM_BUFFER};

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Covers OpenAI, local servers (Ollama, LM Studio, vLLM) and hosted
/// alternatives. Cheap to clone: `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// `api_key`, when present, is sent as `Authorization: Bearer <key>`.
    pub fn new(
        api_base_url: String,
        model: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, api_key })
    }

    /// Lightweight reachability check.
    ///
    /// Any HTTP response (4xx included) means the server is reachable; only
    /// transport failures count. Hard 5-second timeout.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        let mut req = self
            .client
            .head(&self.api_base_url)
            .timeout(std::time::Duration::from_secs(5));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::Request(format!("unreachable: {e}")))
    }

    /// One round-trip: `prompt` goes out as the single user message.
    pub async fn complete(&self, prompt: &str, params: &ModelParams) -> Result<LlmResponse, ProviderError> {
        let payload = self.payload(prompt, params, false);
        let response = self.send(&payload).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize LLM response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = parsed.choices.len(), "received LLM response");

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Request("empty or missing content in response".into()))?;

        let usage = parsed.usage.map(|u| LlmUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(LlmResponse { text, usage })
    }

    /// Same request with `"stream": true`; deltas are relayed from a spawned
    /// reader task until the server sends `[DONE]` or closes the body.
    pub async fn complete_stream(&self, prompt: &str, params: &ModelParams) -> Result<DeltaReceiver, ProviderError> {
        let payload = self.payload(prompt, params, true);
        let response = self.send(&payload).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut lines = LineBuffer::default();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "LLM stream read failed");
                        let _ = tx.send(Err(ProviderError::Request(format!("stream read failed: {e}")))).await;
                        return;
                    }
                };
                for line in lines.feed(&chunk) {
                    match parse_stream_line(&line) {
                        Ok(StreamLine::Delta(text)) => {
                            if tx.send(Ok(text)).await.is_err() {
                                debug!("stream consumer went away");
                                return;
                            }
                        }
                        Ok(StreamLine::Done) => return,
                        Ok(StreamLine::Skip) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
            if let Some(line) = lines.finish() {
                if let Ok(StreamLine::Delta(text)) = parse_stream_line(&line) {
                    let _ = tx.send(Ok(text)).await;
                }
            }
        });
        Ok(rx)
    }

    fn payload(&self, prompt: &str, params: &ModelParams, stream: bool) -> ChatCompletionRequest {
        // gpt-5 family models reject sampling overrides.
        let sampling = !self.model.starts_with("gpt-5");
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![Message { role: "user".to_string(), content: prompt.to_string() }],
            temperature: sampling.then_some(params.temperature),
            top_p: sampling.then_some(params.top_p),
            max_tokens: Some(params.max_tokens),
            stream,
        }
    }

    async fn send(&self, payload: &ChatCompletionRequest) -> Result<reqwest::Response, ProviderError> {
        debug!(
            model = %payload.model,
            temperature = ?payload.temperature,
            max_tokens = ?payload.max_tokens,
            stream = payload.stream,
            prompt_len = payload.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "sending LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        check_status(response).await
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageData>,
}

#[derive(Debug, Deserialize)]
struct UsageData {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

// ── Stream parsing ────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum StreamLine {
    Delta(String),
    Done,
    Skip,
}

/// Classify one line of an SSE body.
fn parse_stream_line(line: &str) -> Result<StreamLine, ProviderError> {
    let Some(data) = line.strip_prefix("data:") else {
        // Comments (`:`), `event:` lines and blank separators.
        return Ok(StreamLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }
    if data.is_empty() {
        return Ok(StreamLine::Skip);
    }
    if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(data) {
        return Err(ProviderError::Request(format!("stream error: {}", env.error.message)));
    }
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::Request(format!("malformed stream chunk: {e}")))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map(StreamLine::Delta)
        .unwrap_or(StreamLine::Skip))
}

/// Reassembles newline-terminated lines from arbitrary byte chunks.
/// Bytes are only decoded once a full line is present, so multi-byte
/// characters split across chunks survive.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).trim_end_matches('\r').to_string())
        }
    }
}

/// Return the response if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(server: &mockito::Server, model: &str) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            format!("{}/v1/chat/completions", server.url()),
            model.to_string(),
            5,
            Some("sk-test".to_string()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn complete_returns_trimmed_text_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 2000,
                "messages": [{ "role": "user", "content": "hi" }],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"content":"  What cloud?  "}}],
                    "usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
            )
            .create_async()
            .await;

        let reply = provider(&server, "gpt-4o-mini")
            .complete("hi", &ModelParams::default())
            .await
            .unwrap();
        assert_eq!(reply.text, "What cloud?");
        assert_eq!(reply.usage, Some(LlmUsage { input_tokens: 12, output_tokens: 3 }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_envelope_becomes_request_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"slow down","code":"rate_limit"}}"#)
            .create_async()
            .await;

        let err = provider(&server, "gpt-4o-mini")
            .complete("hi", &ModelParams::default())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("429"), "{msg}");
        assert!(msg.contains("rate_limit"), "{msg}");
        assert!(msg.contains("slow down"), "{msg}");
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"   "}}]}"#)
            .create_async()
            .await;

        assert!(provider(&server, "m").complete("hi", &ModelParams::default()).await.is_err());
    }

    #[tokio::test]
    async fn stream_relays_deltas_until_done() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Which \"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"database?\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({ "stream": true })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let mut rx = provider(&server, "m")
            .complete_stream("hi", &ModelParams::default())
            .await
            .unwrap();
        let mut out = Vec::new();
        while let Some(d) = rx.recv().await {
            out.push(d.unwrap());
        }
        assert_eq!(out, vec!["Which ", "database?"]);
        mock.assert_async().await;
    }

    #[test]
    fn gpt5_payload_omits_sampling() {
        let p = OpenAiCompatibleProvider::new("http://localhost:0".into(), "gpt-5-mini".into(), 1, None).unwrap();
        let json = serde_json::to_value(p.payload("x", &ModelParams::default(), false)).unwrap();
        assert!(json.get("temperature").is_none());
        assert!(json.get("top_p").is_none());
        assert!(json.get("stream").is_none());
        assert_eq!(json["max_tokens"], 2000);
    }

    #[test]
    fn stream_line_classification() {
        assert_eq!(parse_stream_line("").unwrap(), StreamLine::Skip);
        assert_eq!(parse_stream_line("event: message").unwrap(), StreamLine::Skip);
        assert_eq!(parse_stream_line("data: [DONE]").unwrap(), StreamLine::Done);
        assert_eq!(
            parse_stream_line(r#"data: {"choices":[{"delta":{"content":"x"}}]}"#).unwrap(),
            StreamLine::Delta("x".into())
        );
        assert!(parse_stream_line(r#"data: {"error":{"message":"boom"}}"#).is_err());
        assert!(parse_stream_line("data: {not json").is_err());
    }

    #[test]
    fn line_buffer_handles_split_chunks() {
        let mut buf = LineBuffer::default();
        assert!(buf.feed(b"data: a").is_empty());
        assert_eq!(buf.feed(b"bc\r\ndata: "), vec!["data: abc"]);
        let snow = "❄".as_bytes();
        assert!(buf.feed(&snow[..1]).is_empty());
        assert_eq!(buf.feed(&[&snow[1..], b"\n"].concat()), vec!["data: ❄"]);
        assert!(buf.feed(b"tail").is_empty());
        assert_eq!(buf.finish().as_deref(), Some("tail"));
    }
}
