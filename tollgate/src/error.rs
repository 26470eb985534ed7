//! Unified error types for the tollgate crate.
//!
//! This module provides the error hierarchy covering:
//! - Tool resolution and execution errors (surfaced to the model as
//!   `output-error` results, never as pass failures)
//! - Tool registration errors
//! - Message store errors
//! - Stream transport errors (logged and absorbed by the writer)

/// Result type alias for tollgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the tollgate crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Tool execution error.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Tool registration error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Message store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Stream transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Another reconciliation pass is already running for the session.
    #[error("Reconciliation pass already in progress for session '{session_id}'")]
    PassInProgress {
        /// The session whose pass is running.
        session_id: String,
    },

    /// A model call was requested while invocations are still unresolved.
    #[error("{} tool invocation(s) awaiting confirmation or execution", .pending.len())]
    Blocked {
        /// Call ids awaiting a human decision or an executor result.
        pending: Vec<String>,
    },

    /// A decision was attached to a call id the session does not hold.
    #[error("No tool invocation with call id '{0}'")]
    UnknownInvocation(String),

    /// The orchestrator failed to produce a model response.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an orchestrator error with a message.
    #[must_use]
    pub fn orchestrator(msg: impl Into<String>) -> Self {
        Self::Orchestrator(msg.into())
    }

    /// Create a pass-in-progress error.
    #[must_use]
    pub fn pass_in_progress(session_id: impl Into<String>) -> Self {
        Self::PassInProgress {
            session_id: session_id.into(),
        }
    }
}

/// Error type for tool resolution and execution failures.
///
/// Every variant is absorbed by the resolver into an `output-error`
/// terminal state whose result is the error's display string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// Error raised by the executor itself.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Arguments failed the tool's input schema.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Tool is absent from the registry.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// An auto execution was attempted on a confirmation-gated tool.
    #[error("Tool '{0}' requires human confirmation")]
    ConfirmationRequired(String),

    /// The executor task panicked or was aborted.
    #[error("Executor for tool '{0}' terminated abnormally")]
    Panicked(String),

    /// The executor's output could not be serialized.
    #[error("Output serialization failed: {0}")]
    Output(String),

    /// Generic error.
    #[error("Tool error: {0}")]
    Other(String),
}

impl ToolError {
    /// Create an execution error.
    #[must_use]
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create an invalid arguments error.
    #[must_use]
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }
}

impl From<String> for ToolError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for ToolError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_owned())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

/// Error type for tool registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A tool with the same name is already registered.
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),

    /// Declared with both an auto executor and a confirmation executor.
    #[error("Tool '{0}' declares both an auto executor and a confirmation executor")]
    AmbiguousMode(String),

    /// Declared with neither executor.
    #[error("Tool '{0}' declares no executor")]
    MissingExecutor(String),

    /// `requires_confirmation` disagrees with the executor that was supplied.
    #[error("Tool '{0}' confirmation flag does not match its executor")]
    ModeMismatch(String),
}

/// Error type for message store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No message with the given id exists in the store.
    #[error("Message '{0}' not found")]
    MessageNotFound(String),

    /// A message with the given id already exists in the store.
    #[error("Message '{0}' already exists")]
    DuplicateMessage(String),

    /// Message (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying `SQLite` error.
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Mutex guarding the connection was poisoned.
    #[error("Lock poisoned: {0}")]
    Lock(String),

    /// Blocking task failed to join.
    #[error("Blocking task failed: {0}")]
    Task(String),
}

/// Error type for stream delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The receiving side of the stream has gone away.
    #[error("stream connection closed")]
    Closed,

    /// The buffer stayed full for longer than the emit timeout.
    #[error("stream buffer full, emit timed out")]
    Timeout,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Invalid value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}
