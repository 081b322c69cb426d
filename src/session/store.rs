//! Store trait: where conversation turns are persisted.
//!
//! Stores are `Send + Sync` and blocking. The
//! [`SessionManager`](super::manager::SessionManager) calls them from
//! `spawn_blocking`.

use crate::error::AppError;

use super::ChatTurn;

pub trait ChatStore: Send + Sync {
    /// Short type name for logs (e.g. `"sqlite"`).
    fn store_type(&self) -> &str;

    /// Persist one turn. A single write: it either lands or errors.
    fn push(&self, user_id: &str, request_id: &str, turn: &ChatTurn) -> Result<(), AppError>;

    /// All turns for `user_id`, oldest first. With `request_id` only that
    /// request's turns are returned.
    fn fetch(&self, user_id: &str, request_id: Option<&str>) -> Result<Vec<ChatTurn>, AppError>;

    /// Request id of the most recently persisted turn for `user_id`.
    fn latest_request(&self, user_id: &str) -> Result<Option<String>, AppError>;
}
