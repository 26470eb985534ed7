//! In-memory message store.
//!
//! Backed by a `Vec<Message>` behind a `tokio::sync::RwLock`; data is lost
//! when the store is dropped. Suited to tests and short-lived sessions.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::MessageStore;
use crate::error::{Result, StoreError};
use crate::message::Message;

/// In-memory message store.
#[derive(Debug)]
pub struct InMemoryStore {
    id: String,
    messages: RwLock<Vec<Message>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Creates a store pre-populated with `messages`.
    ///
    /// The caller is responsible for id uniqueness.
    #[must_use]
    pub fn with_messages(id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            messages: RwLock::new(messages),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn messages(&self, limit: Option<usize>) -> Result<Vec<Message>> {
        let guard = self.messages.read().await;
        match limit {
            Some(n) if n < guard.len() => Ok(guard[guard.len() - n..].to_vec()),
            _ => Ok(guard.clone()),
        }
    }

    async fn append(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut guard = self.messages.write().await;
        let mut seen: HashSet<&str> = guard.iter().map(|m| m.id.as_str()).collect();
        for message in messages {
            if !seen.insert(message.id.as_str()) {
                return Err(StoreError::DuplicateMessage(message.id.clone()).into());
            }
        }
        drop(seen);
        guard.extend(messages.iter().cloned());
        Ok(())
    }

    async fn replace(&self, message: &Message) -> Result<()> {
        let mut guard = self.messages.write().await;
        let slot = guard
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| StoreError::MessageNotFound(message.id.clone()))?;
        slot.clone_from(message);
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.messages.read().await.len())
    }
}
