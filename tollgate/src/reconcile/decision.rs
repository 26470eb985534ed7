//! Human decisions for confirmation-gated invocations.

use std::collections::HashMap;

use serde_json::Value;

use crate::message::ToolInvocation;

/// Canonical approval payload sent by confirmation UIs.
pub const APPROVAL_YES: &str = "Yes, confirmed.";

/// Canonical rejection payload sent by confirmation UIs.
pub const APPROVAL_NO: &str = "No, denied.";

/// Outcome of looking up the human decision for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    /// Run the confirmation executor.
    Approve,
    /// Synthesize a rejection without running anything.
    Reject,
    /// Keep waiting.
    #[default]
    Undecided,
}

impl Decision {
    /// Interpret a raw decision payload.
    ///
    /// Unrecognized payloads are [`Decision::Undecided`], never an error.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::Bool(true) => Self::Approve,
            Value::Bool(false) => Self::Reject,
            Value::String(s) => Self::from_word(s),
            Value::Object(map) => match map.get("approved") {
                Some(Value::Bool(true)) => Self::Approve,
                Some(Value::Bool(false)) => Self::Reject,
                _ => Self::Undecided,
            },
            _ => Self::Undecided,
        }
    }

    fn from_word(word: &str) -> Self {
        if word == APPROVAL_YES {
            return Self::Approve;
        }
        if word == APPROVAL_NO {
            return Self::Reject;
        }
        match word.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" | "yes" => Self::Approve,
            "reject" | "rejected" | "deny" | "denied" | "no" => Self::Reject,
            _ => Self::Undecided,
        }
    }

    /// Whether a decision has been made.
    #[must_use]
    pub const fn is_decided(&self) -> bool {
        !matches!(self, Self::Undecided)
    }
}

/// Where the resolver looks up human decisions.
pub trait DecisionSource: Send + Sync {
    /// Decision for `invocation`.
    fn decide(&self, invocation: &ToolInvocation) -> Decision;
}

/// Reads the decision payload carried on the invocation itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedDecisions;

impl DecisionSource for EmbeddedDecisions {
    fn decide(&self, invocation: &ToolInvocation) -> Decision {
        invocation
            .decision
            .as_ref()
            .map_or(Decision::Undecided, Decision::from_payload)
    }
}

/// Decisions delivered out of band, keyed by call id.
///
/// Falls back to the embedded payload for call ids it does not know.
#[derive(Debug, Clone, Default)]
pub struct DecisionMap {
    decisions: HashMap<String, Decision>,
}

impl DecisionMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision.
    pub fn insert(&mut self, call_id: impl Into<String>, decision: Decision) {
        self.decisions.insert(call_id.into(), decision);
    }

    /// Builder-style approval.
    #[must_use]
    pub fn approve(mut self, call_id: impl Into<String>) -> Self {
        self.insert(call_id, Decision::Approve);
        self
    }

    /// Builder-style rejection.
    #[must_use]
    pub fn reject(mut self, call_id: impl Into<String>) -> Self {
        self.insert(call_id, Decision::Reject);
        self
    }
}

impl DecisionSource for DecisionMap {
    fn decide(&self, invocation: &ToolInvocation) -> Decision {
        self.decisions
            .get(&invocation.call_id)
            .copied()
            .unwrap_or_else(|| EmbeddedDecisions.decide(invocation))
    }
}

/// Approves every gated invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl DecisionSource for ApproveAll {
    fn decide(&self, _invocation: &ToolInvocation) -> Decision {
        Decision::Approve
    }
}

/// Rejects every gated invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl DecisionSource for RejectAll {
    fn decide(&self, _invocation: &ToolInvocation) -> Decision {
        Decision::Reject
    }
}
