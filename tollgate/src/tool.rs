//! Tool trait and utilities for defining tools the model can invoke.
//!
//! Every tool carries its argument type (validated through `serde` and
//! described through `schemars`), its output type, its error type and its
//! [`ToolExecutionPolicy`] as compile-time facts of its [`Tool`] impl.
//!
//! Tools are collected in a [`ToolRegistry`], which exposes each one either as
//! an auto executor (run by the orchestrator during the model call) or as a
//! confirmation executor (run only by the resolver after a human approves).

mod registry;

pub use registry::{Executor, RegisteredTool, ToolDeclaration, ToolRegistry};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

/// A type alias for `Result<T, ToolError>`.
pub type ToolResult<T> = Result<T, ToolError>;

/// Definition of a tool for LLM function calling.
///
/// Serializes to the function calling format:
/// ```json
/// {
///     "type": "function",
///     "function": {
///         "name": "tool_name",
///         "description": "Tool description",
///         "parameters": { ... }
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[non_exhaustive]
pub struct ToolDefinition {
    /// Name of the tool (e.g., `getWeatherInformation`).
    pub name: String,

    /// Description of what the tool does.
    pub description: String,

    /// JSON schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Returns the tool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Serialize for ToolDefinition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut function = serde_json::Map::new();
        function.insert("name".to_owned(), Value::String(self.name.clone()));
        function.insert(
            "description".to_owned(),
            Value::String(self.description.clone()),
        );
        function.insert("parameters".to_owned(), self.parameters.clone());

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry("function", &function)?;
        map.end()
    }
}

/// Execution policy for a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionPolicy {
    /// Executed by the orchestrator without confirmation.
    #[default]
    Auto,
    /// Executed by the resolver only after a human approves.
    RequireConfirmation,
}

impl ToolExecutionPolicy {
    /// Check if the policy allows autonomous execution.
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }

    /// Check if the policy requires confirmation.
    #[must_use]
    pub const fn requires_confirmation(&self) -> bool {
        matches!(self, Self::RequireConfirmation)
    }
}

impl fmt::Display for ToolExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::RequireConfirmation => write!(f, "require_confirmation"),
        }
    }
}

/// The core trait for all tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool.
    const NAME: &'static str;

    /// Whether the tool runs automatically or behind a human confirmation.
    const POLICY: ToolExecutionPolicy = ToolExecutionPolicy::Auto;

    /// Arguments type for the tool.
    type Args: DeserializeOwned + JsonSchema + Send;

    /// Output type of the tool.
    type Output: Serialize + Send;

    /// Error type for tool execution.
    type Error: Into<ToolError> + Send;

    /// Get the name of the tool.
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// Get the JSON schema for the tool's parameters.
    ///
    /// Derived from [`Tool::Args`] by default.
    fn parameters_schema(&self) -> Value {
        let mut schema = serde_json::to_value(schemars::schema_for!(Self::Args))
            .unwrap_or_default();
        if let Value::Object(ref mut map) = schema {
            map.remove("$schema");
        }
        schema
    }

    /// Execute the tool with the given arguments.
    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error>;

    /// Get the tool definition for LLM function calling.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters_schema())
    }

    /// Validate raw JSON arguments against [`Tool::Args`].
    fn parse_args(&self, args: &Value) -> ToolResult<Self::Args> {
        // Handle both string-encoded and object arguments
        match args {
            Value::String(s) => serde_json::from_str(s).map_err(ToolError::from),
            other => Self::Args::deserialize(other).map_err(ToolError::from),
        }
    }

    /// Call the tool with JSON arguments and return JSON output.
    async fn call_json(&self, args: Value) -> ToolResult<Value>
    where
        Self::Output: 'static,
    {
        let typed_args = self.parse_args(&args)?;
        let output = self.call(typed_args).await.map_err(Into::into)?;
        serde_json::to_value(output).map_err(|e| ToolError::Output(e.to_string()))
    }
}

/// A shared dynamic tool, cheap to clone into executor tasks.
pub type SharedTool = Arc<dyn DynTool>;

/// Object-safe version of the Tool trait for dynamic dispatch.
#[async_trait]
pub trait DynTool: Send + Sync {
    /// Get the name of the tool.
    fn name(&self) -> &str;

    /// Get the tool's declared execution policy.
    fn policy(&self) -> ToolExecutionPolicy;

    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Validate JSON arguments without executing.
    fn validate(&self, args: &Value) -> ToolResult<()>;

    /// Call the tool with JSON arguments.
    async fn call_json(&self, args: Value) -> ToolResult<Value>;
}

#[async_trait]
impl<T: Tool + 'static> DynTool for T
where
    T::Output: 'static,
{
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn policy(&self) -> ToolExecutionPolicy {
        T::POLICY
    }

    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    fn validate(&self, args: &Value) -> ToolResult<()> {
        self.parse_args(args).map(drop)
    }

    async fn call_json(&self, args: Value) -> ToolResult<Value> {
        Tool::call_json(self, args).await
    }
}
