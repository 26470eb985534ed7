//! Tool-call resolver.
//!
//! One [`Resolver::resolve`] call is one reconciliation pass over a
//! sanitized log. Confirmation-gated invocations are visited in message
//! order, then part order, and each is driven as far as its decision
//! allows:
//!
//! ```text
//! input-available ──▶ confirmation-pending        (no decision yet)
//! confirmation-pending ──▶ rejected                 (rejected, no executor)
//! confirmation-pending ──▶ approved ──▶ output-available | output-error
//! ```
//!
//! Executor calls are strictly sequential: the next invocation is not
//! looked at until the previous one's terminal state has been committed
//! and emitted. The executor itself runs on a spawned task and reports into
//! the shared [`ExecutionLedger`], so an abandoned pass can neither cancel
//! a started call nor cause it to run again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{Instrument, debug, debug_span, info, info_span, warn};

use crate::error::ToolError;
use crate::message::{Message, Part, ToolInvocation, ToolState};
use crate::stream::ToolUpdate;
use crate::tool::{RegisteredTool, ToolRegistry};

use super::decision::{Decision, DecisionSource};
use super::hooks::{NoopHooks, TransitionHooks};
use super::ledger::{ExecutionLedger, LedgerEntry, Outcome};

/// Result synthesized for a rejected invocation unless configured otherwise.
pub const DEFAULT_REJECTION_MESSAGE: &str = "User denied execution of this tool.";

/// Output of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// The rewritten log; the authoritative copy.
    pub log: Vec<Message>,
    /// One update per terminal transition, in commit order.
    pub events: Vec<ToolUpdate>,
    /// Call ids still waiting for a human decision.
    pub pending: Vec<String>,
    /// Call ids approved whose executor has not reported back.
    pub in_flight: Vec<String>,
}

impl Resolution {
    /// Whether the next model call has to wait.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !self.pending.is_empty() || !self.in_flight.is_empty()
    }

    /// Call ids holding up the turn: pending first, then in flight.
    #[must_use]
    pub fn blocking_call_ids(&self) -> Vec<String> {
        self.pending
            .iter()
            .chain(&self.in_flight)
            .cloned()
            .collect()
    }

    /// The log as it may be submitted to the model.
    ///
    /// Invocations without a result yet are removed, and a message left
    /// empty by that removal is dropped.
    #[must_use]
    pub fn model_log(&self) -> Vec<Message> {
        self.log
            .iter()
            .filter_map(|message| {
                let parts: Vec<Part> = message
                    .parts
                    .iter()
                    .filter(|part| {
                        !part
                            .as_tool_invocation()
                            .is_some_and(|inv| inv.state.is_unsubmittable())
                    })
                    .cloned()
                    .collect();
                if parts.is_empty() && !message.parts.is_empty() {
                    return None;
                }
                Some(Message {
                    parts,
                    ..message.clone()
                })
            })
            .collect()
    }
}

/// Resolves confirmation-gated tool invocations.
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<ToolRegistry>,
    ledger: Arc<ExecutionLedger>,
    rejection_message: String,
}

impl Resolver {
    /// Create a resolver with a fresh ledger.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            ledger: Arc::new(ExecutionLedger::new()),
            rejection_message: DEFAULT_REJECTION_MESSAGE.to_owned(),
        }
    }

    /// Share an existing ledger.
    ///
    /// Resolvers over the same message store must share one ledger.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<ExecutionLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Override the synthesized rejection result.
    #[must_use]
    pub fn with_rejection_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = message.into();
        self
    }

    /// The tool registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The execution ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<ExecutionLedger> {
        &self.ledger
    }

    /// The synthesized rejection result.
    #[must_use]
    pub fn rejection_message(&self) -> &str {
        &self.rejection_message
    }

    /// Run one pass without persistence or streaming callbacks.
    pub async fn resolve(&self, log: Vec<Message>, decisions: &dyn DecisionSource) -> Resolution {
        self.resolve_with(log, decisions, &NoopHooks).await
    }

    /// Run one pass, committing and emitting through `hooks`.
    pub async fn resolve_with(
        &self,
        log: Vec<Message>,
        decisions: &dyn DecisionSource,
        hooks: &dyn TransitionHooks,
    ) -> Resolution {
        let span = info_span!("reconcile", messages = log.len());
        async move {
            let slots = latest_occurrences(&log);
            let mut pass = Pass {
                resolution: Resolution {
                    log,
                    ..Resolution::default()
                },
                hooks,
            };
            for slot in slots {
                self.visit(&mut pass, slot, decisions).await;
            }
            let resolution = pass.resolution;
            info!(
                transitions = resolution.events.len(),
                pending = resolution.pending.len(),
                in_flight = resolution.in_flight.len(),
                "Reconciliation pass complete"
            );
            hooks.on_pass_end(&resolution).await;
            resolution
        }
        .instrument(span)
        .await
    }

    async fn visit(&self, pass: &mut Pass<'_>, slot: Slot, decisions: &dyn DecisionSource) {
        let Some(inv) = pass.invocation(slot).cloned() else {
            return;
        };
        if inv.is_terminal() || inv.state == ToolState::InputStreaming {
            return;
        }

        let Some(tool) = self.registry.get(&inv.tool_name) else {
            let err = ToolError::not_found(&inv.tool_name);
            warn!(call_id = %inv.call_id, tool = %inv.tool_name, "Unknown tool");
            pass.finish(slot, ToolState::OutputError, Value::String(err.to_string()))
                .await;
            return;
        };
        if !tool.requires_confirmation() {
            return;
        }

        // A recorded execution outranks any later decision on the same call id.
        if inv.state == ToolState::Approved || self.ledger.get(&inv.call_id).is_some() {
            self.collect_in_flight(pass, slot, &inv).await;
            return;
        }

        match decisions.decide(&inv) {
            Decision::Undecided => {
                if inv.state == ToolState::InputAvailable {
                    pass.set_state(slot, ToolState::ConfirmationPending);
                    pass.commit(slot, inv.clone()).await;
                }
                pass.resolution.pending.push(inv.call_id);
            }
            Decision::Reject => {
                let result = Value::String(self.rejection_message.clone());
                if !pass.finish(slot, ToolState::Rejected, result).await {
                    pass.resolution.pending.push(inv.call_id);
                }
            }
            Decision::Approve => self.execute(pass, slot, &inv, tool).await,
        }
    }

    /// Complete an invocation that already has a ledger entry, if it has finished.
    async fn collect_in_flight(&self, pass: &mut Pass<'_>, slot: Slot, inv: &ToolInvocation) {
        match self.ledger.get(&inv.call_id) {
            Some(LedgerEntry::Finished { outcome, reported }) => {
                self.report(pass, slot, &inv.call_id, outcome, reported).await;
            }
            Some(LedgerEntry::Started) => {
                debug!(call_id = %inv.call_id, "Executor still running");
                pass.resolution.in_flight.push(inv.call_id.clone());
            }
            None => {
                debug!(call_id = %inv.call_id, "Approved invocation has no recorded execution");
                pass.resolution.in_flight.push(inv.call_id.clone());
            }
        }
    }

    async fn execute(
        &self,
        pass: &mut Pass<'_>,
        slot: Slot,
        inv: &ToolInvocation,
        tool: &RegisteredTool,
    ) {
        let call_id = inv.call_id.clone();

        match self.ledger.get(&call_id) {
            Some(LedgerEntry::Finished { outcome, reported }) => {
                self.report(pass, slot, &call_id, outcome, reported).await;
                return;
            }
            Some(LedgerEntry::Started) => {
                pass.resolution.in_flight.push(call_id);
                return;
            }
            None => {}
        }

        if let Err(err) = tool.validate(&inv.args) {
            warn!(call_id = %call_id, tool = %inv.tool_name, error = %err, "Arguments rejected");
            pass.finish(slot, ToolState::OutputError, Value::String(err.to_string()))
                .await;
            return;
        }
        let Some(executor) = tool.confirmation_executor().cloned() else {
            return;
        };

        // Released again if the pass is dropped before the executor spawns.
        let Some(claim) = self.ledger.claim(&call_id) else {
            pass.resolution.in_flight.push(call_id);
            return;
        };
        pass.approve(slot);
        if !pass.commit(slot, inv.clone()).await {
            drop(claim);
            pass.resolution.pending.push(call_id);
            return;
        }
        debug!(call_id = %call_id, tool = %inv.tool_name, "Executor started");

        let ledger = Arc::clone(&self.ledger);
        let task_call_id = call_id.clone();
        let args = inv.args.clone();
        let span = debug_span!("executor", call_id = %call_id, tool = %inv.tool_name);
        let handle = tokio::spawn(
            async move {
                let outcome = Outcome::from_result(executor.call_json(args).await);
                ledger.finish(&task_call_id, outcome.clone());
                outcome
            }
            .instrument(span),
        );
        claim.keep();

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(call_id = %call_id, error = %err, "Executor task failed");
                let outcome =
                    Outcome::from_result(Err(ToolError::Panicked(inv.tool_name.clone())));
                self.ledger.finish(&call_id, outcome.clone());
                outcome
            }
        };
        if outcome.state == ToolState::OutputError {
            warn!(call_id = %call_id, tool = %inv.tool_name, result = %outcome.result, "Executor failed");
        }
        self.report(pass, slot, &call_id, outcome, false).await;
    }

    /// Apply a finished outcome; emit only if no earlier pass did.
    async fn report(
        &self,
        pass: &mut Pass<'_>,
        slot: Slot,
        call_id: &str,
        outcome: Outcome,
        reported: bool,
    ) {
        let committed = if reported {
            let Some(before) = pass.invocation(slot).cloned() else {
                return;
            };
            pass.set_terminal(slot, outcome.state, outcome.result);
            pass.commit(slot, before).await
        } else {
            pass.finish(slot, outcome.state, outcome.result).await
        };
        if committed {
            self.ledger.mark_reported(call_id);
        } else {
            pass.resolution.in_flight.push(call_id.to_owned());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    message: usize,
    part: usize,
}

/// Positions of the last occurrence of each call id, in log order.
fn latest_occurrences(log: &[Message]) -> Vec<Slot> {
    let mut latest: HashMap<&str, Slot> = HashMap::new();
    let mut order = Vec::new();
    for (message, msg) in log.iter().enumerate() {
        for (part, p) in msg.parts.iter().enumerate() {
            if let Some(inv) = p.as_tool_invocation() {
                let slot = Slot { message, part };
                latest.insert(inv.call_id.as_str(), slot);
                order.push((inv.call_id.as_str(), slot));
            }
        }
    }
    order
        .into_iter()
        .filter(|(call_id, slot)| latest.get(call_id) == Some(slot))
        .map(|(_, slot)| slot)
        .collect()
}

struct Pass<'h> {
    resolution: Resolution,
    hooks: &'h dyn TransitionHooks,
}

impl Pass<'_> {
    fn invocation(&self, slot: Slot) -> Option<&ToolInvocation> {
        self.resolution.log[slot.message].parts[slot.part].as_tool_invocation()
    }

    fn invocation_mut(&mut self, slot: Slot) -> Option<&mut ToolInvocation> {
        self.resolution.log[slot.message].parts[slot.part].as_tool_invocation_mut()
    }

    fn set_state(&mut self, slot: Slot, state: ToolState) {
        if let Some(inv) = self.invocation_mut(slot) {
            inv.state = state;
        }
    }

    fn approve(&mut self, slot: Slot) {
        if let Some(inv) = self.invocation_mut(slot) {
            inv.approve(Utc::now());
        }
    }

    fn set_terminal(&mut self, slot: Slot, state: ToolState, result: Value) {
        if let Some(inv) = self.invocation_mut(slot) {
            inv.finish(state, result);
        }
    }

    /// Commit the message holding `slot`; on failure restore `before`.
    async fn commit(&mut self, slot: Slot, before: ToolInvocation) -> bool {
        match self.hooks.on_commit(&self.resolution.log[slot.message]).await {
            Ok(()) => true,
            Err(err) => {
                warn!(call_id = %before.call_id, error = %err, "Commit failed, transition not applied");
                self.resolution.log[slot.message].parts[slot.part] = Part::ToolInvocation(before);
                false
            }
        }
    }

    /// Move to a terminal state, commit, and emit.
    async fn finish(&mut self, slot: Slot, state: ToolState, result: Value) -> bool {
        let Some(before) = self.invocation(slot).cloned() else {
            return false;
        };
        self.set_terminal(slot, state, result);
        if !self.commit(slot, before).await {
            return false;
        }
        let Some(inv) = self.invocation(slot) else {
            return false;
        };
        let update = ToolUpdate::from_invocation(inv);
        debug!(call_id = %update.call_id, tool = %update.tool_name, state = %update.new_state, "Tool invocation resolved");
        self.hooks.on_transition(&update).await;
        self.resolution.events.push(update);
        true
    }
}
