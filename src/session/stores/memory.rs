//! `memory` store: turns live in process memory and vanish on exit.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AppError;
use crate::session::ChatTurn;
use crate::session::store::ChatStore;

/// user_id -> [(request_id, turn)] in insertion order.
#[derive(Default)]
pub struct MemoryChatStore {
    data: Mutex<HashMap<String, Vec<(String, ChatTurn)>>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatStore for MemoryChatStore {
    fn store_type(&self) -> &str {
        "memory"
    }

    fn push(&self, user_id: &str, request_id: &str, turn: &ChatTurn) -> Result<(), AppError> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| AppError::Store("memory store lock poisoned".into()))?;
        data.entry(user_id.to_string())
            .or_default()
            .push((request_id.to_string(), turn.clone()));
        Ok(())
    }

    fn fetch(&self, user_id: &str, request_id: Option<&str>) -> Result<Vec<ChatTurn>, AppError> {
        let data = self
            .data
            .lock()
            .map_err(|_| AppError::Store("memory store lock poisoned".into()))?;
        Ok(data
            .get(user_id)
            .map(|rows| {
                rows.iter()
                    .filter(|(req, _)| request_id.is_none_or(|r| r == req))
                    .map(|(_, turn)| turn.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn latest_request(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let data = self
            .data
            .lock()
            .map_err(|_| AppError::Store("memory store lock poisoned".into()))?;
        Ok(data.get(user_id).and_then(|rows| rows.last()).map(|(req, _)| req.clone()))
    }
}
