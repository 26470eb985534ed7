//! Message stores.
//!
//! A [`MessageStore`] holds one session's ordered, append-only message log.
//! Messages are only ever added at the end; the single in-place write is
//! [`MessageStore::replace`], which the resolver uses to attach tool results
//! to the message that carries the invocation.
//!
//! # Backends
//!
//! | Backend | Persistence | Feature |
//! |---------|-------------|---------|
//! | [`InMemoryStore`] | process lifetime | always |
//! | [`SqliteStore`] | on disk | `sqlite` |

mod in_memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use in_memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// A shared, thread-safe [`MessageStore`] trait object.
pub type SharedStore = Arc<dyn MessageStore>;

/// Ordered message log for one session.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Identifier of the session this store belongs to.
    fn id(&self) -> &str;

    /// Messages in insertion order.
    ///
    /// With `Some(n)`, only the latest `n` messages, still oldest first.
    async fn messages(&self, limit: Option<usize>) -> Result<Vec<Message>>;

    /// Append messages at the end of the log.
    ///
    /// Fails with [`StoreError::DuplicateMessage`] and stores nothing if any
    /// message id is already present.
    ///
    /// [`StoreError::DuplicateMessage`]: crate::error::StoreError::DuplicateMessage
    async fn append(&self, messages: &[Message]) -> Result<()>;

    /// Overwrite the stored message with the same id, keeping its position.
    ///
    /// Fails with [`StoreError::MessageNotFound`] if the id is unknown.
    ///
    /// [`StoreError::MessageNotFound`]: crate::error::StoreError::MessageNotFound
    async fn replace(&self, message: &Message) -> Result<()>;

    /// Number of stored messages.
    async fn len(&self) -> Result<usize>;

    /// Whether the log is empty.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
