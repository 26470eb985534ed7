//! Message types for the conversation log.
//!
//! A conversation is an ordered, append-only sequence of [`Message`]s. Each
//! message carries an ordered list of [`Part`]s: plain text or a
//! [`ToolInvocation`] whose [`ToolState`] moves through the confirmation
//! state machine.
//!
//! # Wire format
//!
//! ```json
//! {
//!     "id": "6f1c...",
//!     "role": "assistant",
//!     "createdAt": "2026-01-01T00:00:00Z",
//!     "parts": [
//!         { "type": "text", "text": "Let me check." },
//!         {
//!             "type": "tool-invocation",
//!             "callId": "call_1",
//!             "toolName": "getWeatherInformation",
//!             "args": { "city": "Paris" },
//!             "state": "confirmation-pending"
//!         }
//!     ]
//! }
//! ```
//!
//! A part that does not decode as either shape is kept as
//! [`Part::Malformed`] so that loading a damaged log never fails; the
//! sanitizer drops such parts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a tool invocation.
///
/// ```text
/// input-streaming ----------------------------------> [dropped by sanitizer]
/// input-available -> confirmation-pending -> approved -> output-available
///                                    |                 \-> output-error
///                                    \-> rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    /// The model is still emitting the call's arguments.
    InputStreaming,
    /// Arguments are complete; nothing has run yet.
    InputAvailable,
    /// Waiting for a human decision.
    ConfirmationPending,
    /// Approved; the executor has been started.
    Approved,
    /// Rejected by a human. Terminal.
    Rejected,
    /// Executor succeeded. Terminal.
    OutputAvailable,
    /// Executor (or resolution) failed. Terminal.
    OutputError,
}

impl ToolState {
    /// Get the wire representation of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InputStreaming => "input-streaming",
            Self::InputAvailable => "input-available",
            Self::ConfirmationPending => "confirmation-pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::OutputAvailable => "output-available",
            Self::OutputError => "output-error",
        }
    }

    /// Whether no further decision or executor call is expected.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::OutputAvailable | Self::OutputError
        )
    }

    /// Whether an invocation in this state must be withheld from a model call.
    ///
    /// `approved` has no result yet, so it is withheld along with the
    /// streaming and pending states.
    #[must_use]
    pub const fn is_unsubmittable(&self) -> bool {
        matches!(
            self,
            Self::InputStreaming | Self::ConfirmationPending | Self::Approved
        )
    }
}

impl fmt::Display for ToolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request by the model to call a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Stable call identifier, unique within a message store.
    pub call_id: String,
    /// Name of the tool in the registry.
    pub tool_name: String,
    /// Structured input, validated at resolution time.
    #[serde(default)]
    pub args: Value,
    /// Current lifecycle state.
    pub state: ToolState,
    /// Result, present only in terminal states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Raw human decision payload attached by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Value>,
    /// When the invocation entered [`ToolState::Approved`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl ToolInvocation {
    /// Create an invocation whose arguments are complete.
    #[must_use]
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            args,
            state: ToolState::InputAvailable,
            result: None,
            decision: None,
            approved_at: None,
        }
    }

    /// Set the state.
    #[must_use]
    pub const fn with_state(mut self, state: ToolState) -> Self {
        self.state = state;
        self
    }

    /// Attach a raw decision payload (e.g. `"approve"` or `{"approved": false}`).
    #[must_use]
    pub fn with_decision(mut self, decision: impl Into<Value>) -> Self {
        self.decision = Some(decision.into());
        self
    }

    /// Whether the invocation has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to a terminal state with its result.
    pub(crate) fn finish(&mut self, state: ToolState, result: Value) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.result = Some(result);
    }

    /// Move to [`ToolState::Approved`], stamping the approval time.
    pub(crate) fn approve(&mut self, at: DateTime<Utc>) {
        self.state = ToolState::Approved;
        self.approved_at = Some(at);
    }
}

/// A single element of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// A tool invocation.
    ToolInvocation(ToolInvocation),
    /// A part that failed to decode; kept verbatim until sanitized away.
    Malformed(Value),
}

impl Part {
    /// Create a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get the text if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Get the invocation if this is a tool-invocation part.
    #[must_use]
    pub const fn as_tool_invocation(&self) -> Option<&ToolInvocation> {
        match self {
            Self::ToolInvocation(inv) => Some(inv),
            _ => None,
        }
    }

    /// Mutable access to the invocation if this is a tool-invocation part.
    pub const fn as_tool_invocation_mut(&mut self) -> Option<&mut ToolInvocation> {
        match self {
            Self::ToolInvocation(inv) => Some(inv),
            _ => None,
        }
    }
}

impl From<ToolInvocation> for Part {
    fn from(inv: ToolInvocation) -> Self {
        Self::ToolInvocation(inv)
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WellFormedPart {
    Text { text: String },
    ToolInvocation(ToolInvocation),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WellFormedPartRef<'a> {
    Text { text: &'a str },
    ToolInvocation(&'a ToolInvocation),
}

impl Serialize for Part {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Text { text } => WellFormedPartRef::Text { text }.serialize(serializer),
            Self::ToolInvocation(inv) => {
                WellFormedPartRef::ToolInvocation(inv).serialize(serializer)
            }
            Self::Malformed(raw) => raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Part {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(match WellFormedPart::deserialize(&raw) {
            Ok(WellFormedPart::Text { text }) => Self::Text { text },
            Ok(WellFormedPart::ToolInvocation(inv)) => Self::ToolInvocation(inv),
            Err(_) => Self::Malformed(raw),
        })
    }
}

/// A message in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier, assigned at creation.
    pub id: String,
    /// Role of the sender.
    pub role: Role,
    /// Ordered content parts.
    #[serde(default)]
    pub parts: Vec<Part>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    /// Create a new system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create a new assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    /// Create an assistant message carrying tool invocations.
    #[must_use]
    pub fn assistant_with_invocations(invocations: Vec<ToolInvocation>) -> Self {
        Self::new(
            Role::Assistant,
            invocations.into_iter().map(Part::ToolInvocation).collect(),
        )
    }

    /// Override the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Get the concatenated text content of the message.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Iterate over the tool invocations in part order.
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(Part::as_tool_invocation)
    }

    /// Find the invocation with the given call id.
    #[must_use]
    pub fn tool_invocation(&self, call_id: &str) -> Option<&ToolInvocation> {
        self.tool_invocations().find(|inv| inv.call_id == call_id)
    }

    /// Check if this message has tool invocations.
    #[must_use]
    pub fn has_tool_invocations(&self) -> bool {
        self.tool_invocations().next().is_some()
    }
}
