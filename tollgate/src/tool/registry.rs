//! Static tool registry.
//!
//! Each registered tool is exactly one of auto-executing or
//! confirmation-gated; [`Executor`] makes the other combinations
//! unrepresentable once registration succeeds.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{SharedTool, Tool, ToolDefinition, ToolExecutionPolicy, ToolResult};
use crate::error::{RegistryError, ToolError};

/// The single executor a registered tool carries.
#[derive(Clone)]
pub enum Executor {
    /// Invoked directly by the orchestrator.
    Auto(SharedTool),
    /// Invoked only by the resolver, after approval.
    Confirmation(SharedTool),
}

impl Executor {
    /// The underlying tool, whichever mode it runs in.
    #[must_use]
    pub fn tool(&self) -> &SharedTool {
        match self {
            Self::Auto(tool) | Self::Confirmation(tool) => tool,
        }
    }

    /// The execution policy this executor implies.
    #[must_use]
    pub const fn policy(&self) -> ToolExecutionPolicy {
        match self {
            Self::Auto(_) => ToolExecutionPolicy::Auto,
            Self::Confirmation(_) => ToolExecutionPolicy::RequireConfirmation,
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto(tool) => f.debug_tuple("Auto").field(&tool.name()).finish(),
            Self::Confirmation(tool) => f.debug_tuple("Confirmation").field(&tool.name()).finish(),
        }
    }
}

/// A tool as stored in the registry.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    definition: ToolDefinition,
    executor: Executor,
}

impl RegisteredTool {
    /// Tool definition exposed to the model.
    #[must_use]
    pub const fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Whether the tool is confirmation-gated.
    #[must_use]
    pub const fn requires_confirmation(&self) -> bool {
        matches!(self.executor, Executor::Confirmation(_))
    }

    /// The executor for confirmation-gated tools.
    #[must_use]
    pub const fn confirmation_executor(&self) -> Option<&SharedTool> {
        match &self.executor {
            Executor::Confirmation(tool) => Some(tool),
            Executor::Auto(_) => None,
        }
    }

    /// The executor for auto tools.
    #[must_use]
    pub const fn auto_executor(&self) -> Option<&SharedTool> {
        match &self.executor {
            Executor::Auto(tool) => Some(tool),
            Executor::Confirmation(_) => None,
        }
    }

    /// Validate arguments against the tool's input schema.
    pub fn validate(&self, args: &Value) -> ToolResult<()> {
        self.executor.tool().validate(args)
    }
}

/// Dynamic tool declaration, checked when registered.
///
/// Used where tools are assembled at runtime (plugins, config) and the
/// compile-time [`Tool::POLICY`] is not available.
#[derive(Default)]
pub struct ToolDeclaration {
    name: String,
    requires_confirmation: bool,
    auto_executor: Option<SharedTool>,
    confirmation_executor: Option<SharedTool>,
}

impl ToolDeclaration {
    /// Start a declaration for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the confirmation flag.
    #[must_use]
    pub const fn requires_confirmation(mut self, requires: bool) -> Self {
        self.requires_confirmation = requires;
        self
    }

    /// Attach an auto executor.
    #[must_use]
    pub fn auto_executor(mut self, tool: SharedTool) -> Self {
        self.auto_executor = Some(tool);
        self
    }

    /// Attach a confirmation executor.
    #[must_use]
    pub fn confirmation_executor(mut self, tool: SharedTool) -> Self {
        self.confirmation_executor = Some(tool);
        self
    }

    fn into_executor(self) -> Result<(String, Executor), RegistryError> {
        let executor = match (self.auto_executor, self.confirmation_executor) {
            (Some(_), Some(_)) => return Err(RegistryError::AmbiguousMode(self.name)),
            (None, None) => return Err(RegistryError::MissingExecutor(self.name)),
            (Some(tool), None) => Executor::Auto(tool),
            (None, Some(tool)) => Executor::Confirmation(tool),
        };
        if executor.policy().requires_confirmation() != self.requires_confirmation {
            return Err(RegistryError::ModeMismatch(self.name));
        }
        Ok((self.name, executor))
    }
}

impl fmt::Debug for ToolDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDeclaration")
            .field("name", &self.name)
            .field("requires_confirmation", &self.requires_confirmation)
            .field("auto_executor", &self.auto_executor.is_some())
            .field("confirmation_executor", &self.confirmation_executor.is_some())
            .finish()
    }
}

/// A collection of tools keyed by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed tool; its mode comes from [`Tool::POLICY`].
    pub fn add<T: Tool + 'static>(&mut self, tool: T) -> Result<(), RegistryError>
    where
        T::Output: 'static,
    {
        self.add_shared(Arc::new(tool))
    }

    /// Builder-style [`ToolRegistry::add`].
    pub fn with<T: Tool + 'static>(mut self, tool: T) -> Result<Self, RegistryError>
    where
        T::Output: 'static,
    {
        self.add(tool)?;
        Ok(self)
    }

    /// Add a shared tool; its mode comes from [`DynTool::policy`](super::DynTool::policy).
    pub fn add_shared(&mut self, tool: SharedTool) -> Result<(), RegistryError> {
        let name = tool.name().to_owned();
        let executor = match tool.policy() {
            ToolExecutionPolicy::Auto => Executor::Auto(tool),
            ToolExecutionPolicy::RequireConfirmation => Executor::Confirmation(tool),
        };
        self.insert(name, executor)
    }

    /// Register a dynamic declaration, rejecting both-or-neither executors.
    pub fn register(&mut self, declaration: ToolDeclaration) -> Result<(), RegistryError> {
        let (name, executor) = declaration.into_executor()?;
        self.insert(name, executor)
    }

    fn insert(&mut self, name: String, executor: Executor) -> Result<(), RegistryError> {
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let mut definition = executor.tool().definition();
        definition.name.clone_from(&name);
        tracing::debug!(tool = %name, policy = %executor.policy(), "Registered tool");
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                executor,
            },
        );
        Ok(())
    }

    /// Get a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Check if the registry contains a tool with the given name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Check if a tool is confirmation-gated.
    #[must_use]
    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .is_some_and(RegisteredTool::requires_confirmation)
    }

    /// Get the execution policy for a tool.
    #[must_use]
    pub fn policy(&self, name: &str) -> Option<ToolExecutionPolicy> {
        self.tools.get(name).map(|t| t.executor.policy())
    }

    /// Get all tool definitions, ordered by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    /// Get the names of all tools, ordered.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Get the number of tools in the registry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke an auto tool on behalf of the orchestrator.
    ///
    /// Confirmation-gated tools are refused; only the resolver runs them.
    pub async fn call_auto(&self, name: &str, args: Value) -> ToolResult<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::not_found(name))?;
        let executor = tool
            .auto_executor()
            .ok_or_else(|| ToolError::ConfirmationRequired(name.to_owned()))?;
        executor.call_json(args).await
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.values().map(|t| &t.executor).collect::<Vec<_>>())
            .finish()
    }
}
