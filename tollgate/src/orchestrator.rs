//! Model-call boundary.
//!
//! The [`Orchestrator`] is whatever drives the language model: it receives a
//! log that is safe to submit and answers with a stream of [`ModelDelta`]s.
//! Auto-executing tools are its business; it reports them as already
//! terminal invocation snapshots. Confirmation-gated tools it must only
//! declare, leaving them in `input-available` for the resolver.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_stream::stream;
use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::message::{Message, Part, Role};
use crate::stream::ModelDelta;

/// A boxed stream of model output.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelDelta>> + Send>>;

/// The model-driving collaborator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Issue the next model request for `log`.
    async fn submit(&self, log: Vec<Message>) -> Result<ModelStream>;
}

/// Builds the assistant message out of a turn's deltas.
///
/// Consecutive text deltas extend the current text part. An invocation
/// snapshot replaces the earlier snapshot with the same call id, or is
/// appended as a new part.
#[derive(Debug, Clone, Default)]
pub struct ResponseAssembler {
    parts: Vec<Part>,
}

impl ResponseAssembler {
    /// Start an empty response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta into the response.
    pub fn push(&mut self, delta: ModelDelta) {
        match delta {
            ModelDelta::Text { delta } => {
                if let Some(Part::Text { text }) = self.parts.last_mut() {
                    text.push_str(&delta);
                } else {
                    self.parts.push(Part::Text { text: delta });
                }
            }
            ModelDelta::ToolInvocation(snapshot) => {
                let existing = self.parts.iter_mut().find(|part| {
                    part.as_tool_invocation()
                        .is_some_and(|inv| inv.call_id == snapshot.call_id)
                });
                match existing {
                    Some(part) => *part = Part::ToolInvocation(snapshot),
                    None => self.parts.push(Part::ToolInvocation(snapshot)),
                }
            }
        }
    }

    /// Whether nothing has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The assistant message, or `None` if nothing was received.
    #[must_use]
    pub fn finish(self) -> Option<Message> {
        if self.parts.is_empty() {
            return None;
        }
        Some(Message::new(Role::Assistant, self.parts))
    }
}

/// Orchestrator replaying scripted turns, for tests and demos.
///
/// Each [`Orchestrator::submit`] streams the next script, cycling back to
/// the first once all have been used, and records the log it was given.
#[derive(Debug)]
pub struct MockOrchestrator {
    turns: Vec<Vec<ModelDelta>>,
    turn_index: AtomicUsize,
    submissions: Mutex<Vec<Vec<Message>>>,
}

impl MockOrchestrator {
    /// Create a mock with scripted turns.
    #[must_use]
    pub fn new(turns: Vec<Vec<ModelDelta>>) -> Self {
        Self {
            turns,
            turn_index: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Mock that answers every turn with one text reply.
    #[must_use]
    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(vec![vec![ModelDelta::text(text)]])
    }

    /// Logs received so far, oldest first.
    #[must_use]
    pub fn submissions(&self) -> Vec<Vec<Message>> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn submit(&self, log: Vec<Message>) -> Result<ModelStream> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(log);

        let index = self.turn_index.fetch_add(1, Ordering::SeqCst);
        let deltas = if self.turns.is_empty() {
            Vec::new()
        } else {
            self.turns[index % self.turns.len()].clone()
        };

        Ok(Box::pin(stream! {
            for delta in deltas {
                yield Ok(delta);
            }
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::message::{ToolInvocation, ToolState};

    mod assembler {
        use super::*;

        #[test]
        fn text_deltas_merge() {
            let mut assembler = ResponseAssembler::new();
            assembler.push(ModelDelta::text("The weather "));
            assembler.push(ModelDelta::text("is sunny."));
            let message = assembler.finish().unwrap();
            assert_eq!(message.role, Role::Assistant);
            assert_eq!(message.parts, vec![Part::text("The weather is sunny.")]);
        }

        #[test]
        fn snapshots_replace_by_call_id() {
            let mut assembler = ResponseAssembler::new();
            let streaming = ToolInvocation::new("c1", "t", json!({})).with_state(ToolState::InputStreaming);
            let complete = ToolInvocation::new("c1", "t", json!({"city": "Paris"}));
            assembler.push(ModelDelta::text("Checking."));
            assembler.push(ModelDelta::ToolInvocation(streaming));
            assembler.push(ModelDelta::ToolInvocation(complete.clone()));
            assembler.push(ModelDelta::text("Done?"));

            let message = assembler.finish().unwrap();
            assert_eq!(
                message.parts,
                vec![
                    Part::text("Checking."),
                    Part::ToolInvocation(complete),
                    Part::text("Done?"),
                ]
            );
        }

        #[test]
        fn empty_turn_produces_nothing() {
            assert!(ResponseAssembler::new().is_empty());
            assert!(ResponseAssembler::new().finish().is_none());
        }
    }

    mod mock {
        use super::*;

        #[tokio::test]
        async fn cycles_turns_and_records_logs() {
            let mock = MockOrchestrator::new(vec![
                vec![ModelDelta::text("first")],
                vec![ModelDelta::text("second")],
            ]);
            for expected in ["first", "second", "first"] {
                let mut stream = mock.submit(vec![Message::user("hi")]).await.unwrap();
                let delta = stream.next().await.unwrap().unwrap();
                assert_eq!(delta, ModelDelta::text(expected));
                assert!(stream.next().await.is_none());
            }
            assert_eq!(mock.submissions().len(), 3);
        }
    }
}
