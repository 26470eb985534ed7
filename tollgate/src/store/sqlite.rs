//! SQLite-backed message store.
//!
//! [`SqliteStore`] persists a session's log so that a restarted process can
//! reconcile whatever the previous run left behind. Uses [`rusqlite`] for
//! synchronous access, bridged to async via [`tokio::task::spawn_blocking`].
//!
//! # Storage Model
//!
//! Each message is one JSON row in the `messages` table, ordered by an
//! auto-incrementing `seq`. `(session_id, message_id)` is unique, so a
//! [`MessageStore::replace`] rewrites a row without moving it.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, params};

use super::MessageStore;
use crate::error::{Result, StoreError};
use crate::message::Message;

/// SQLite-backed message store.
///
/// Clones share one connection; stores for different sessions may share a
/// database file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    id: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path` and initializes the schema.
    pub fn open(path: impl AsRef<Path>, session_id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(StoreError::from)?;
        Self::from_connection(conn, session_id)
    }

    /// Opens an ephemeral in-memory database.
    pub fn in_memory(session_id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::from_connection(conn, session_id)
    }

    /// Wraps an existing [`Connection`], applying pragmas and schema setup.
    pub fn from_connection(conn: Connection, session_id: impl Into<String>) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(StoreError::from)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id   TEXT    NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                message_id   TEXT    NOT NULL,
                message_data TEXT    NOT NULL,
                updated_at   TEXT    NOT NULL DEFAULT (datetime('now')),
                UNIQUE (session_id, message_id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages (session_id, seq);",
        )
        .map_err(StoreError::from)?;

        Ok(Self {
            id: session_id.into(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the locked connection on the blocking thread pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        Ok(tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl MessageStore for SqliteStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn messages(&self, limit: Option<usize>) -> Result<Vec<Message>> {
        let session_id = self.id.clone();
        self.blocking(move |conn| {
            let mut messages = if let Some(n) = limit {
                let mut stmt = conn.prepare(
                    "SELECT message_data FROM messages \
                     WHERE session_id = ?1 \
                     ORDER BY seq DESC LIMIT ?2",
                )?;
                stmt.query_map(params![session_id, n], |row| row.get::<_, String>(0))?
                    .map(|r| Ok(serde_json::from_str::<Message>(&r?)?))
                    .collect::<std::result::Result<Vec<_>, StoreError>>()?
            } else {
                let mut stmt = conn.prepare(
                    "SELECT message_data FROM messages \
                     WHERE session_id = ?1 \
                     ORDER BY seq ASC",
                )?;
                stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?
                    .map(|r| Ok(serde_json::from_str::<Message>(&r?)?))
                    .collect::<std::result::Result<Vec<_>, StoreError>>()?
            };

            if limit.is_some() {
                messages.reverse();
            }
            Ok(messages)
        })
        .await
    }

    async fn append(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let session_id = self.id.clone();
        let rows = messages
            .iter()
            .map(|m| Ok((m.id.clone(), serde_json::to_string(m)?)))
            .collect::<std::result::Result<Vec<(String, String)>, StoreError>>()?;

        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO sessions (session_id) VALUES (?1)",
                params![session_id],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages (session_id, message_id, message_data) \
                     VALUES (?1, ?2, ?3)",
                )?;
                for (message_id, json) in &rows {
                    match stmt.execute(params![session_id, message_id, json]) {
                        Ok(_) => {}
                        Err(err) if is_unique_violation(&err) => {
                            return Err(StoreError::DuplicateMessage(message_id.clone()));
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
            tx.execute(
                "UPDATE sessions SET updated_at = CURRENT_TIMESTAMP \
                 WHERE session_id = ?1",
                params![session_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn replace(&self, message: &Message) -> Result<()> {
        let session_id = self.id.clone();
        let message_id = message.id.clone();
        let json = serde_json::to_string(message).map_err(StoreError::from)?;

        self.blocking(move |conn| {
            let updated = conn.execute(
                "UPDATE messages SET message_data = ?3, updated_at = CURRENT_TIMESTAMP \
                 WHERE session_id = ?1 AND message_id = ?2",
                params![session_id, message_id, json],
            )?;
            if updated == 0 {
                return Err(StoreError::MessageNotFound(message_id));
            }
            Ok(())
        })
        .await
    }

    async fn len(&self) -> Result<usize> {
        let session_id = self.id.clone();
        self.blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;

            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            Ok(count as usize)
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use assert_fs::TempDir;
    use serde_json::json;

    use super::*;
    use crate::error::Error;
    use crate::message::{ToolInvocation, ToolState};

    fn new_store(id: &str) -> SqliteStore {
        SqliteStore::in_memory(id).unwrap()
    }

    mod construction {
        use super::*;

        #[test]
        fn schema_is_created() {
            let store = new_store("s");
            let guard = store.conn.lock().unwrap();
            let tables: Vec<String> = guard
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap()
                .query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(std::result::Result::ok)
                .collect();
            assert!(tables.contains(&"sessions".to_owned()));
            assert!(tables.contains(&"messages".to_owned()));
        }

        #[tokio::test]
        async fn survives_reopen() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("log.db");
            let msgs = vec![Message::user("a"), Message::assistant("b")];
            {
                let store = SqliteStore::open(&path, "s").unwrap();
                store.append(&msgs).await.unwrap();
            }
            let reopened = SqliteStore::open(&path, "s").unwrap();
            assert_eq!(reopened.messages(None).await.unwrap(), msgs);
        }

        #[tokio::test]
        async fn sessions_are_isolated() {
            let a = new_store("a");
            let b = SqliteStore {
                id: "b".into(),
                conn: Arc::clone(&a.conn),
            };
            a.append(&[Message::user("for a")]).await.unwrap();
            assert!(b.is_empty().await.unwrap());
            assert_eq!(a.len().await.unwrap(), 1);
        }
    }

    mod append {
        use super::*;

        #[tokio::test]
        async fn limit_returns_latest_in_order() {
            let store = new_store("s");
            let msgs: Vec<_> = (0..4).map(|i| Message::user(format!("m{i}"))).collect();
            store.append(&msgs).await.unwrap();
            assert_eq!(store.messages(Some(2)).await.unwrap(), msgs[2..]);
        }

        #[tokio::test]
        async fn duplicate_rolls_back_batch() {
            let store = new_store("s");
            store.append(&[Message::user("a").with_id("m1")]).await.unwrap();
            let err = store
                .append(&[Message::user("b").with_id("m2"), Message::user("c").with_id("m1")])
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Store(StoreError::DuplicateMessage(id)) if id == "m1"));
            assert_eq!(store.len().await.unwrap(), 1);
        }
    }

    mod replace {
        use super::*;

        #[tokio::test]
        async fn rewrites_in_place() {
            let store = new_store("s");
            let inv = ToolInvocation::new("c1", "t", json!({}))
                .with_state(ToolState::ConfirmationPending);
            let mut assistant = Message::assistant_with_invocations(vec![inv]);
            let msgs = vec![Message::user("q"), assistant.clone(), Message::user("later")];
            store.append(&msgs).await.unwrap();

            if let Some(inv) = assistant.parts[0].as_tool_invocation_mut() {
                inv.finish(ToolState::OutputAvailable, json!("done"));
            }
            store.replace(&assistant).await.unwrap();

            let stored = store.messages(None).await.unwrap();
            assert_eq!(stored.len(), 3);
            assert_eq!(stored[1], assistant);
            assert_eq!(stored[2].text_content(), "later");
        }

        #[tokio::test]
        async fn unknown_id_fails() {
            let store = new_store("s");
            let err = store.replace(&Message::user("x")).await.unwrap_err();
            assert!(matches!(err, Error::Store(StoreError::MessageNotFound(_))));
        }
    }
}
