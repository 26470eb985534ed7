//! History sanitizer.
//!
//! Removes parts a previous run left in a state the model must never see.
//! The sanitizer is pure: it never touches the store or any executor, and
//! running it twice gives the same log as running it once.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::message::{Message, Part, ToolInvocation, ToolState};

/// Optional sanitizer rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Drop `approved` invocations approved longer ago than this.
    ///
    /// `None` leaves every `approved` invocation in place.
    pub stale_approved_after: Option<Duration>,
    /// Reference time for the staleness check.
    pub now: DateTime<Utc>,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            stale_approved_after: None,
            now: Utc::now(),
        }
    }
}

impl SanitizeOptions {
    /// Enable the stale-`approved` rule.
    #[must_use]
    pub const fn stale_approved_after(mut self, after: Duration) -> Self {
        self.stale_approved_after = Some(after);
        self
    }

    /// Override the reference time.
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    fn is_stale(&self, inv: &ToolInvocation) -> bool {
        let Some(after) = self.stale_approved_after else {
            return false;
        };
        // An approved invocation without a timestamp predates the stamp.
        inv.approved_at.is_none_or(|at| self.now - at > after)
    }

    fn keeps(&self, part: &Part) -> bool {
        match part {
            Part::Text { .. } => true,
            Part::Malformed(_) => false,
            Part::ToolInvocation(inv) => match inv.state {
                ToolState::InputStreaming => false,
                ToolState::Approved => !self.is_stale(inv),
                _ => true,
            },
        }
    }
}

/// Sanitize a log with the default rules.
#[must_use]
pub fn sanitize(log: &[Message]) -> Vec<Message> {
    sanitize_with(log, &SanitizeOptions::default())
}

/// Sanitize a log.
///
/// Message order and part order are preserved. A message is dropped only
/// when removing parts leaves it empty; messages that arrive empty stay.
#[must_use]
pub fn sanitize_with(log: &[Message], options: &SanitizeOptions) -> Vec<Message> {
    let mut dropped_parts = 0usize;
    let mut dropped_messages = 0usize;

    let cleaned: Vec<Message> = log
        .iter()
        .filter_map(|message| {
            let parts: Vec<Part> = message
                .parts
                .iter()
                .filter(|part| options.keeps(part))
                .cloned()
                .collect();
            let removed = message.parts.len() - parts.len();
            dropped_parts += removed;
            if removed > 0 && parts.is_empty() {
                dropped_messages += 1;
                return None;
            }
            Some(Message {
                parts,
                ..message.clone()
            })
        })
        .collect();

    if dropped_parts > 0 {
        debug!(dropped_parts, dropped_messages, "Sanitized message log");
    }
    cleaned
}
