//! `sqlite` store: one row per turn in a configurable table.
//!
//! ```text
//! <table>(id INTEGER PK, user_id TEXT, request_id TEXT, chat TEXT, created_at TEXT)
//! ```
//!
//! `chat` holds the turn as JSON (`{"user": ..., "model": ...}`). Every write is
//! a single auto-committed statement. Values are always bound parameters; the
//! table name is checked to be a plain identifier before it is interpolated.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::config::is_sql_identifier;
use crate::error::AppError;
use crate::session::ChatTurn;
use crate::session::store::ChatStore;

#[derive(Debug, Clone)]
pub struct SqliteChatStore {
    db_path: PathBuf,
    table: String,
}

impl SqliteChatStore {
    /// Open (creating when needed) the database at `db_path` and make sure
    /// `table` exists.
    pub fn open(db_path: &Path, table: &str) -> Result<Self, AppError> {
        if !is_sql_identifier(table) {
            return Err(AppError::Store(format!("invalid table name '{table}'")));
        }
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Store(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let store = Self { db_path: db_path.to_path_buf(), table: table.to_string() };
        store.init_db()?;
        info!(db = %store.db_path.display(), table = %store.table, "chat store ready");
        Ok(store)
    }

    fn init_db(&self) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        let t = &self.table;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    TEXT NOT NULL,
                request_id TEXT NOT NULL,
                chat       TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{t}_user_request ON {t} (user_id, request_id);"
        ))
        .map_err(|e| AppError::Store(format!("create table {t}: {e}")))
    }

    fn open_conn(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| AppError::Store(format!("open {}: {e}", self.db_path.display())))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AppError::Store(format!("set journal_mode WAL: {e}")))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| AppError::Store(format!("set busy_timeout: {e}")))?;

        Ok(conn)
    }
}

impl ChatStore for SqliteChatStore {
    fn store_type(&self) -> &str {
        "sqlite"
    }

    fn push(&self, user_id: &str, request_id: &str, turn: &ChatTurn) -> Result<(), AppError> {
        let chat = serde_json::to_string(turn)
            .map_err(|e| AppError::Store(format!("serialize turn: {e}")))?;
        let conn = self.open_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (user_id, request_id, chat, created_at) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![user_id, request_id, chat, Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)],
        )
        .map_err(|e| AppError::Store(format!("insert turn for {user_id}: {e}")))?;
        debug!(%user_id, %request_id, "turn persisted");
        Ok(())
    }

    fn fetch(&self, user_id: &str, request_id: Option<&str>) -> Result<Vec<ChatTurn>, AppError> {
        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT chat FROM {} WHERE user_id = ?1 AND (?2 IS NULL OR request_id = ?2) ORDER BY id",
                self.table
            ))
            .map_err(|e| AppError::Store(format!("prepare fetch: {e}")))?;

        let rows = stmt
            .query_map(params![user_id, request_id], |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Store(format!("query turns for {user_id}: {e}")))?;

        let mut turns = Vec::new();
        for row in rows {
            let json = row.map_err(|e| AppError::Store(format!("read turn row: {e}")))?;
            let turn = serde_json::from_str(&json)
                .map_err(|e| AppError::Store(format!("malformed turn row: {e}")))?;
            turns.push(turn);
        }
        debug!(%user_id, count = turns.len(), "turns fetched");
        Ok(turns)
    }

    fn latest_request(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let conn = self.open_conn()?;
        conn.query_row(
            &format!(
                "SELECT request_id FROM {} WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
                self.table
            ),
            params![user_id],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| AppError::Store(format!("latest request for {user_id}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_store() -> (TempDir, SqliteChatStore) {
        let temp = TempDir::new().expect("tempdir");
        let store = SqliteChatStore::open(&temp.path().join("db/chat.db"), "chat_history").expect("open");
        (temp, store)
    }

    #[test]
    fn push_and_fetch_preserve_order() {
        let (_temp, store) = make_store();
        store.push("u1", "r1", &ChatTurn::new("draw my stack", "Which cloud?")).unwrap();
        store.push("u1", "r1", &ChatTurn::new("AWS", "Which database?")).unwrap();
        store.push("u1", "r2", &ChatTurn::new("other", "thread")).unwrap();

        let turns = store.fetch("u1", Some("r1")).unwrap();
        assert_eq!(
            turns,
            vec![ChatTurn::new("draw my stack", "Which cloud?"), ChatTurn::new("AWS", "Which database?")]
        );
        assert_eq!(store.fetch("u1", None).unwrap().len(), 3);
    }

    #[test]
    fn latest_request_is_newest_row() {
        let (_temp, store) = make_store();
        assert_eq!(store.latest_request("u1").unwrap(), None);
        store.push("u1", "r1", &ChatTurn::new("a", "1")).unwrap();
        store.push("u1", "r2", &ChatTurn::new("b", "2")).unwrap();
        store.push("u2", "r9", &ChatTurn::new("x", "9")).unwrap();
        assert_eq!(store.latest_request("u1").unwrap().as_deref(), Some("r2"));
    }

    #[test]
    fn quotes_in_values_are_stored_verbatim() {
        let (_temp, store) = make_store();
        let tricky = ChatTurn::new("it's a '); DROP TABLE chat_history; --", "ok");
        store.push("o'brien", "r'1", &tricky).unwrap();
        assert_eq!(store.fetch("o'brien", Some("r'1")).unwrap(), vec![tricky]);
    }

    #[test]
    fn data_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chat.db");
        SqliteChatStore::open(&path, "turns")
            .unwrap()
            .push("u", "r", &ChatTurn::new("a", "b"))
            .unwrap();
        let reopened = SqliteChatStore::open(&path, "turns").unwrap();
        assert_eq!(reopened.fetch("u", Some("r")).unwrap().len(), 1);
    }

    #[test]
    fn rejects_bad_table_name() {
        let temp = TempDir::new().unwrap();
        let err = SqliteChatStore::open(&temp.path().join("x.db"), "t; DROP").unwrap_err();
        assert!(err.to_string().contains("invalid table name"));
    }
}
