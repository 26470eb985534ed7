//! Callbacks invoked by the resolver as it commits transitions.
//!
//! A pass calls, for each state change, in order:
//!
//! 1. **`on_commit`** with the rewritten message. An error here means the
//!    store did not take the change; the resolver then leaves the
//!    invocation where it was and moves on.
//! 2. **`on_transition`** with the resulting [`ToolUpdate`], only for
//!    terminal states and only after a successful commit.
//!
//! and **`on_pass_end`** once every invocation has been visited.
//!
//! All methods default to no-ops, so implementations override only what
//! they need. [`NoopHooks`] is what [`Resolver::resolve`] uses;
//! a [`Session`] supplies hooks that write through to its store and stream.
//!
//! [`Resolver::resolve`]: super::Resolver::resolve
//! [`Session`]: crate::session::Session

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;
use crate::stream::ToolUpdate;

use super::resolver::Resolution;

/// A shared, thread-safe [`TransitionHooks`] trait object.
pub type SharedTransitionHooks = std::sync::Arc<dyn TransitionHooks>;

/// Observer of the resolver's commits.
#[async_trait]
pub trait TransitionHooks: Send + Sync {
    /// Persist a rewritten message.
    async fn on_commit(&self, _message: &Message) -> Result<()> {
        Ok(())
    }

    /// Called once per committed terminal transition, in commit order.
    async fn on_transition(&self, _update: &ToolUpdate) {}

    /// Called after the last invocation of the pass.
    async fn on_pass_end(&self, _resolution: &Resolution) {}
}

/// Hooks that accept every commit and observe nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl TransitionHooks for NoopHooks {}

/// Log verbosity level for hook events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Trace-level logging.
    Trace,
    /// Debug-level logging.
    Debug,
    /// Info-level logging (default).
    #[default]
    Info,
    /// Warn-level logging.
    Warn,
}

macro_rules! log_at_level {
    ($level:expr, $($arg:tt)*) => {
        match $level {
            LogLevel::Trace => tracing::trace!($($arg)*),
            LogLevel::Debug => tracing::debug!($($arg)*),
            LogLevel::Info  => tracing::info!($($arg)*),
            LogLevel::Warn  => tracing::warn!($($arg)*),
        }
    };
}

/// [`TransitionHooks`] that log every transition via `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks {
    level: LogLevel,
}

impl LoggingHooks {
    /// Log at INFO.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log at a custom level.
    #[must_use]
    pub const fn with_level(level: LogLevel) -> Self {
        Self { level }
    }

    /// The configured level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }
}

#[async_trait]
impl TransitionHooks for LoggingHooks {
    async fn on_commit(&self, message: &Message) -> Result<()> {
        log_at_level!(
            self.level,
            message_id = %message.id,
            parts = message.parts.len(),
            "Message rewritten"
        );
        Ok(())
    }

    async fn on_transition(&self, update: &ToolUpdate) {
        log_at_level!(
            self.level,
            call_id = %update.call_id,
            tool = %update.tool_name,
            state = %update.new_state,
            "Tool invocation transitioned"
        );
    }

    async fn on_pass_end(&self, resolution: &Resolution) {
        log_at_level!(
            self.level,
            transitions = resolution.events.len(),
            pending = resolution.pending.len(),
            in_flight = resolution.in_flight.len(),
            "Reconciliation pass finished"
        );
    }
}
