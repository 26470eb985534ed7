//! Streaming updates for a live client connection.
//!
//! Reconciliation passes and model calls produce [`StreamEvent`]s in commit
//! order. A [`StreamWriter`] forwards them to an [`EventSink`]; delivery is
//! best-effort, so a vanished client never rolls back a committed
//! transition. The message store stays the source of truth and the stream
//! only mirrors it.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::TransportError;
use crate::message::{ToolInvocation, ToolState};

/// One tool invocation state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUpdate {
    /// Call identifier of the invocation.
    pub call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// State after the transition.
    pub new_state: ToolState,
    /// Result, for terminal states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolUpdate {
    /// Snapshot the current state of an invocation.
    #[must_use]
    pub fn from_invocation(inv: &ToolInvocation) -> Self {
        Self {
            call_id: inv.call_id.clone(),
            tool_name: inv.tool_name.clone(),
            new_state: inv.state,
            result: inv.result.clone(),
        }
    }
}

/// Incremental output from the model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModelDelta {
    /// Incremental text content.
    Text {
        /// The text fragment.
        delta: String,
    },
    /// Latest snapshot of a tool invocation emitted by the model.
    ToolInvocation(ToolInvocation),
}

impl ModelDelta {
    /// Create a text delta.
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self::Text {
            delta: delta.into(),
        }
    }
}

/// Event delivered to a live client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum StreamEvent {
    /// A tool invocation changed state during reconciliation.
    ToolUpdate(ToolUpdate),
    /// Pass-through of model output.
    Model(ModelDelta),
}

/// Destination for stream events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event, preserving call order.
    async fn send(&self, event: StreamEvent) -> Result<(), TransportError>;
}

/// A shared, thread-safe [`EventSink`] trait object.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Sink backed by a bounded channel.
///
/// A full buffer waits at most `emit_timeout` before giving up.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
    emit_timeout: Duration,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: StreamEvent) -> Result<(), TransportError> {
        match tokio::time::timeout(self.emit_timeout, self.tx.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

/// Receiving half of a channel-backed stream.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    /// Receive the next event, or `None` once every writer is gone.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drain the events that are already buffered.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Sink that records every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<StreamEvent>>,
}

impl CollectingSink {
    /// Create an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn send(&self, event: StreamEvent) -> Result<(), TransportError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Best-effort, ordering-preserving writer in front of an [`EventSink`].
///
/// A detached writer has no sink at all; its events are discarded without
/// counting as drops.
pub struct StreamWriter {
    sink: Option<SharedEventSink>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl StreamWriter {
    /// Wrap an existing sink.
    #[must_use]
    pub fn new(sink: SharedEventSink) -> Self {
        Self {
            sink: Some(sink),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Writer backed by a bounded channel of `buffer` events.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is zero.
    #[must_use]
    pub fn channel(buffer: usize, emit_timeout: Duration) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(buffer);
        let sink = ChannelSink { tx, emit_timeout };
        (Self::new(Arc::new(sink)), EventStream { rx })
    }

    /// Writer with no live client attached.
    #[must_use]
    pub const fn detached() -> Self {
        Self {
            sink: None,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Whether a client sink is attached.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Emit one event. Transport failures are logged and counted, never returned.
    pub async fn emit(&self, event: StreamEvent) {
        let Some(sink) = &self.sink else {
            trace!("No client attached, stream event discarded");
            return;
        };
        match sink.send(event).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                trace!("Stream event delivered");
            }
            Err(err) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %err, dropped, "Stream event dropped");
            }
        }
    }

    /// Number of events delivered.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of events dropped because the transport failed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}
