//! At-most-once record of confirmation executor calls.
//!
//! The ledger is shared between the resolver and the executor tasks it
//! spawns. An entry is created before an executor starts and is never
//! removed by a later pass, so re-scanning a log (or a pass abandoned
//! mid-execution) can never start the same call id twice.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::message::ToolState;
use crate::tool::ToolResult;

/// Terminal outcome of one executor call.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// `output-available` or `output-error`.
    pub state: ToolState,
    /// Executor value, or the error's display string.
    pub result: Value,
}

impl Outcome {
    /// Convert an executor result into a terminal outcome.
    #[must_use]
    pub fn from_result(result: ToolResult<Value>) -> Self {
        match result {
            Ok(value) => Self {
                state: ToolState::OutputAvailable,
                result: value,
            },
            Err(err) => Self {
                state: ToolState::OutputError,
                result: Value::String(err.to_string()),
            },
        }
    }
}

/// Ledger entry for one call id.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    /// The executor has been started and has not returned yet.
    Started,
    /// The executor returned.
    Finished {
        /// What it returned.
        outcome: Outcome,
        /// Whether the terminal transition has been committed and emitted.
        reported: bool,
    },
}

/// Per-session execution ledger.
#[derive(Debug, Default)]
pub struct ExecutionLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl ExecutionLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LedgerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `call_id` for execution.
    ///
    /// Returns `false` if the call id was ever claimed before.
    pub fn try_start(&self, call_id: &str) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(call_id) {
            return false;
        }
        entries.insert(call_id.to_owned(), LedgerEntry::Started);
        true
    }

    /// Claim `call_id`, releasing it again if the claim is dropped unkept.
    pub(crate) fn claim(&self, call_id: &str) -> Option<Claim<'_>> {
        self.try_start(call_id).then(|| Claim {
            ledger: self,
            call_id: call_id.to_owned(),
            kept: false,
        })
    }

    /// Record the executor's outcome.
    pub fn finish(&self, call_id: &str, outcome: Outcome) {
        self.lock().insert(
            call_id.to_owned(),
            LedgerEntry::Finished {
                outcome,
                reported: false,
            },
        );
    }

    /// Mark the terminal transition for `call_id` as committed.
    pub fn mark_reported(&self, call_id: &str) {
        if let Some(LedgerEntry::Finished { reported, .. }) = self.lock().get_mut(call_id) {
            *reported = true;
        }
    }

    /// Release a claim whose executor was never started.
    pub(crate) fn forget(&self, call_id: &str) {
        let mut entries = self.lock();
        if matches!(entries.get(call_id), Some(LedgerEntry::Started)) {
            entries.remove(call_id);
        }
    }

    /// Current entry for `call_id`.
    #[must_use]
    pub fn get(&self, call_id: &str) -> Option<LedgerEntry> {
        self.lock().get(call_id).cloned()
    }

    /// Number of call ids ever claimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no call id has been claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// A `Started` entry held on behalf of an executor that has not been spawned.
///
/// Dropping the claim without [`Claim::keep`] forgets the entry.
pub(crate) struct Claim<'a> {
    ledger: &'a ExecutionLedger,
    call_id: String,
    kept: bool,
}

impl Claim<'_> {
    /// The executor has been spawned; the entry now outlives the claim.
    pub(crate) fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.ledger.forget(&self.call_id);
        }
    }
}
