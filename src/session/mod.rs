//! Conversation state.
//!
//! A [`ChatSession`] is the ordered list of turns one user has exchanged
//! with the model for one request, plus the model settings in effect.
//! [`SessionManager`](manager::SessionManager) owns the live sessions and
//! mirrors every turn into a [`ChatStore`](store::ChatStore).

pub mod manager;
pub mod store;
pub mod stores;

use serde::{Deserialize, Serialize};

use crate::llm::ModelParams;

/// One exchange: what the user said and what the model answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user: String,
    pub model: String,
}

impl ChatTurn {
    pub fn new(user: impl Into<String>, model: impl Into<String>) -> Self {
        Self { user: user.into(), model: model.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub model_id: Option<String>,
    pub model_params: Option<ModelParams>,
    /// Turns of the active conversation, oldest first.
    pub chats: Vec<ChatTurn>,
    /// Turns moved aside by the last [`flush`](Self::flush).
    pub history: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new(user_id: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            request_id,
            ..Self::default()
        }
    }

    /// Rebuild a session from persisted turns.
    pub fn restore(user_id: impl Into<String>, request_id: Option<String>, chats: Vec<ChatTurn>) -> Self {
        Self { chats, ..Self::new(user_id, request_id) }
    }

    pub fn add_chat(&mut self, user_input: impl Into<String>, model_output: impl Into<String>) {
        self.chats.push(ChatTurn::new(user_input, model_output));
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Move the active turns into `history` and drop the model settings.
    /// The session keeps its user and request, so the next turn on the same
    /// request starts a fresh conversation. Returns the number of turns moved.
    pub fn flush(&mut self) -> usize {
        self.history = std::mem::take(&mut self.chats);
        self.model_id = None;
        self.model_params = None;
        self.history.len()
    }

    /// The trailing `n` turns (fewer when the session is shorter).
    pub fn last_turns(&self, n: usize) -> &[ChatTurn] {
        let start = self.chats.len().saturating_sub(n);
        &self.chats[start..]
    }

    /// Render the conversation as alternating `User:` / `Model:` lines.
    pub fn transcript(&self) -> String {
        self.chats
            .iter()
            .map(|t| format!("User: {}\nModel: {}", t.user, t.model))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(turns: &[(&str, &str)]) -> ChatSession {
        let mut s = ChatSession::new("u1", Some("r1".into()));
        for (u, m) in turns {
            s.add_chat(*u, *m);
        }
        s
    }

    #[test]
    fn add_chat_appends_in_order() {
        let s = session_with(&[("a", "1"), ("b", "2")]);
        assert_eq!(s.chats, vec![ChatTurn::new("a", "1"), ChatTurn::new("b", "2")]);
        assert!(!s.is_empty());
    }

    #[test]
    fn transcript_alternates_roles() {
        let s = session_with(&[("draw a pipeline", "Which cloud?"), ("AWS", "Which region?")]);
        assert_eq!(
            s.transcript(),
            "User: draw a pipeline\nModel: Which cloud?\nUser: AWS\nModel: Which region?"
        );
        assert_eq!(ChatSession::default().transcript(), "");
    }

    #[test]
    fn flush_moves_turns_to_history() {
        let mut s = session_with(&[("a", "1"), ("b", "2")]);
        s.model_id = Some("m".into());
        s.model_params = Some(ModelParams::default());

        assert_eq!(s.flush(), 2);
        assert!(s.chats.is_empty());
        assert_eq!(s.history.len(), 2);
        assert_eq!(s.user_id.as_deref(), Some("u1"));
        assert_eq!(s.request_id.as_deref(), Some("r1"));
        assert!(s.model_id.is_none());
        assert!(s.model_params.is_none());
    }

    #[test]
    fn last_turns_clamps() {
        let s = session_with(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(s.last_turns(1), &[ChatTurn::new("c", "3")]);
        assert_eq!(s.last_turns(10).len(), 3);
        assert!(ChatSession::default().last_turns(1).is_empty());
    }

    #[test]
    fn turn_wire_shape() {
        let json = serde_json::to_value(ChatTurn::new("hi", "hello")).unwrap();
        assert_eq!(json, serde_json::json!({ "user": "hi", "model": "hello" }));
    }
}
