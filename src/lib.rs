//! diagram-chat: a conversational service that gathers diagram
//! requirements from a user, one question at a time, and renders the
//! result as Mermaid.
//!
//! ```text
//! http ──► chat::Orchestrator ──► llm::LlmProvider
//!                │
//!                └──► session::manager ──► session::store (memory | sqlite)
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod http;
pub mod llm;
pub mod logger;
pub mod session;
