//! A conversation session: one store, one resolver, one live stream.
//!
//! [`Session`] threads its store and registry explicitly through every
//! pass and runs at most one reconciliation pass at a time. Concurrent
//! triggers either queue ([`Session::reconcile`]) or are refused
//! ([`Session::try_reconcile`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tollgate::prelude::*;
//!
//! let registry = Arc::new(ToolRegistry::new().with(GetWeather)?);
//! let store = Arc::new(InMemoryStore::new("chat-1"));
//! let (session, mut events) = Session::new(store, registry).with_stream();
//!
//! session.append(&[Message::user("What's the weather in Paris?")]).await?;
//! session.run_turn(&orchestrator).await?;          // model asks for the tool
//! session.attach_decision("call_1", APPROVAL_YES.into()).await?;
//! session.reconcile().await?;                      // executor runs, result streamed
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info_span, warn};

use crate::config::ReconcileConfig;
use crate::error::{Error, Result};
use crate::message::{Message, Part};
use crate::orchestrator::{Orchestrator, ResponseAssembler};
use crate::reconcile::{
    DecisionSource, EmbeddedDecisions, ExecutionLedger, Resolution, Resolver, TransitionHooks,
    sanitize_with,
};
use crate::store::{MessageStore, SharedStore};
use crate::stream::{EventStream, StreamEvent, StreamWriter, ToolUpdate};
use crate::tool::ToolRegistry;

/// Outcome of [`Session::run_turn`].
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// The reconciliation pass that preceded the model call.
    pub resolution: Resolution,
    /// The assistant message appended to the store, if the model said anything.
    pub reply: Option<Message>,
}

/// One conversation and everything needed to reconcile it.
pub struct Session {
    store: SharedStore,
    resolver: Resolver,
    decisions: Arc<dyn DecisionSource>,
    writer: Arc<StreamWriter>,
    config: ReconcileConfig,
    pass: Mutex<()>,
}

impl Session {
    /// Session with default settings, embedded decisions and no live client.
    #[must_use]
    pub fn new(store: SharedStore, registry: Arc<ToolRegistry>) -> Self {
        Self {
            store,
            resolver: Resolver::new(registry),
            decisions: Arc::new(EmbeddedDecisions),
            writer: Arc::new(StreamWriter::detached()),
            config: ReconcileConfig::default(),
            pass: Mutex::new(()),
        }
    }

    /// Apply settings.
    #[must_use]
    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.resolver = self
            .resolver
            .with_rejection_message(config.rejection_message.clone());
        self.config = config;
        self
    }

    /// Look decisions up somewhere other than the invocations themselves.
    #[must_use]
    pub fn with_decisions(mut self, decisions: Arc<dyn DecisionSource>) -> Self {
        self.decisions = decisions;
        self
    }

    /// Share an execution ledger with other sessions over the same store.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<ExecutionLedger>) -> Self {
        self.resolver = self.resolver.with_ledger(ledger);
        self
    }

    /// Send stream events to an existing writer.
    #[must_use]
    pub fn with_writer(mut self, writer: Arc<StreamWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Attach a channel-backed live stream sized by the current settings.
    #[must_use]
    pub fn with_stream(self) -> (Self, EventStream) {
        let buffer = self.config.stream_buffer.max(1);
        let (writer, events) = StreamWriter::channel(buffer, self.config.emit_timeout());
        (self.with_writer(Arc::new(writer)), events)
    }

    /// Session identifier, taken from the store.
    #[must_use]
    pub fn id(&self) -> &str {
        self.store.id()
    }

    /// The message store.
    #[must_use]
    pub const fn store(&self) -> &SharedStore {
        &self.store
    }

    /// The resolver.
    #[must_use]
    pub const fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// The stream writer.
    #[must_use]
    pub const fn writer(&self) -> &Arc<StreamWriter> {
        &self.writer
    }

    /// The settings in effect.
    #[must_use]
    pub const fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// The stored log, unsanitized.
    pub async fn messages(&self) -> Result<Vec<Message>> {
        self.store.messages(None).await
    }

    /// Append incoming messages to the log.
    pub async fn append(&self, messages: &[Message]) -> Result<()> {
        self.store.append(messages).await
    }

    /// Record a human decision on the latest occurrence of `call_id`.
    ///
    /// Returns `false` without touching the store when the invocation is
    /// already terminal.
    pub async fn attach_decision(&self, call_id: &str, payload: Value) -> Result<bool> {
        let _pass = self.pass.lock().await;

        let messages = self.store.messages(None).await?;
        let Some(mut message) = messages
            .into_iter()
            .rev()
            .find(|m| m.tool_invocation(call_id).is_some())
        else {
            return Err(Error::UnknownInvocation(call_id.to_owned()));
        };
        let Some(invocation) = message
            .parts
            .iter_mut()
            .rev()
            .filter_map(Part::as_tool_invocation_mut)
            .find(|inv| inv.call_id == call_id)
        else {
            return Err(Error::UnknownInvocation(call_id.to_owned()));
        };

        if invocation.is_terminal() {
            debug!(call_id, state = %invocation.state, "Decision on terminal invocation ignored");
            return Ok(false);
        }
        invocation.decision = Some(payload);
        self.store.replace(&message).await?;
        debug!(call_id, "Decision attached");
        Ok(true)
    }

    /// Run a reconciliation pass, waiting for any pass already running.
    pub async fn reconcile(&self) -> Result<Resolution> {
        let _pass = self.pass.lock().await;
        self.run_pass().await
    }

    /// Run a reconciliation pass unless one is already running.
    pub async fn try_reconcile(&self) -> Result<Resolution> {
        let _pass = self
            .pass
            .try_lock()
            .map_err(|_| Error::pass_in_progress(self.id()))?;
        self.run_pass().await
    }

    /// Reconcile, then call the model with the resulting log.
    ///
    /// Refuses with [`Error::Blocked`] while any invocation awaits a decision
    /// or an executor. Model deltas are forwarded to the stream as they
    /// arrive; whatever was received is appended to the store even if the
    /// model stream fails part way.
    pub async fn run_turn(&self, orchestrator: &dyn Orchestrator) -> Result<Turn> {
        let _pass = self.pass.lock().await;
        let resolution = self.run_pass().await?;
        if resolution.is_blocked() {
            return Err(Error::Blocked {
                pending: resolution.blocking_call_ids(),
            });
        }

        let span = info_span!("model_call", session = %self.id());
        async {
            let mut deltas = orchestrator.submit(resolution.model_log()).await?;
            let mut assembler = ResponseAssembler::new();
            let mut failure = None;
            while let Some(item) = deltas.next().await {
                match item {
                    Ok(delta) => {
                        self.writer.emit(StreamEvent::Model(delta.clone())).await;
                        assembler.push(delta);
                    }
                    Err(err) => {
                        warn!(error = %err, "Model stream failed");
                        failure = Some(err);
                        break;
                    }
                }
            }

            let reply = assembler.finish();
            if let Some(message) = &reply {
                self.store.append(std::slice::from_ref(message)).await?;
            }
            match failure {
                Some(err) => Err(err),
                None => Ok(Turn { resolution, reply }),
            }
        }
        .instrument(span)
        .await
    }

    async fn run_pass(&self) -> Result<Resolution> {
        let raw = self.store.messages(None).await?;
        let log = sanitize_with(&raw, &self.config.sanitize_options());
        let hooks = SessionHooks {
            store: self.store.as_ref(),
            writer: &self.writer,
        };
        let resolution = self
            .resolver
            .resolve_with(log, self.decisions.as_ref(), &hooks)
            .instrument(info_span!("session", session = %self.id()))
            .await;
        Ok(resolution)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("resolver", &self.resolver)
            .field("writer", &self.writer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Writes the resolver's commits through to the store and the stream.
struct SessionHooks<'a> {
    store: &'a dyn MessageStore,
    writer: &'a StreamWriter,
}

#[async_trait]
impl TransitionHooks for SessionHooks<'_> {
    async fn on_commit(&self, message: &Message) -> Result<()> {
        self.store.replace(message).await
    }

    async fn on_transition(&self, update: &ToolUpdate) {
        self.writer
            .emit(StreamEvent::ToolUpdate(update.clone()))
            .await;
    }
}
