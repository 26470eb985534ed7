//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types and traits for easy access.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tollgate::prelude::*;
//! ```

pub use crate::config::{ConfigIssue, IssueLevel, ReconcileConfig};
pub use crate::error::{
    ConfigError, Error, RegistryError, Result, StoreError, ToolError, TransportError,
};
pub use crate::message::{Message, Part, Role, ToolInvocation, ToolState};
pub use crate::orchestrator::{MockOrchestrator, ModelStream, Orchestrator, ResponseAssembler};
pub use crate::reconcile::{
    APPROVAL_NO, APPROVAL_YES, ApproveAll, Decision, DecisionMap, DecisionSource,
    EmbeddedDecisions, ExecutionLedger, LogLevel, LoggingHooks, NoopHooks, RejectAll, Resolution,
    Resolver, SanitizeOptions, TransitionHooks, sanitize, sanitize_with,
};
pub use crate::session::{Session, Turn};
#[cfg(feature = "sqlite")]
pub use crate::store::SqliteStore;
pub use crate::store::{InMemoryStore, MessageStore, SharedStore};
pub use crate::stream::{
    CollectingSink, EventSink, EventStream, ModelDelta, SharedEventSink, StreamEvent,
    StreamWriter, ToolUpdate,
};
pub use crate::tool::{
    DynTool, SharedTool, Tool, ToolDeclaration, ToolDefinition, ToolExecutionPolicy, ToolRegistry,
    ToolResult,
};
