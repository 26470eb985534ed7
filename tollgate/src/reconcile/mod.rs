//! Tool-call reconciliation: sanitize, then resolve.
//!
//! A reconciliation pass takes a session's raw message log and returns a
//! log that is safe to hand to the model:
//!
//! 1. [`sanitize`] drops parts an interrupted run left half-written.
//! 2. [`Resolver::resolve`] drives every confirmation-gated invocation as
//!    far as its human decision allows, running each approved executor at
//!    most once and reporting terminal transitions in log order.
//!
//! ```rust,ignore
//! use tollgate::reconcile::{sanitize, EmbeddedDecisions, Resolver};
//!
//! let resolver = Resolver::new(registry);
//! let resolution = resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;
//! if !resolution.is_blocked() {
//!     submit(resolution.model_log()).await?;
//! }
//! ```

mod decision;
mod hooks;
mod ledger;
mod resolver;
mod sanitize;

pub use decision::{
    APPROVAL_NO, APPROVAL_YES, ApproveAll, Decision, DecisionMap, DecisionSource,
    EmbeddedDecisions, RejectAll,
};
pub use hooks::{LogLevel, LoggingHooks, NoopHooks, SharedTransitionHooks, TransitionHooks};
pub use ledger::{ExecutionLedger, LedgerEntry, Outcome};
pub use resolver::{DEFAULT_REJECTION_MESSAGE, Resolution, Resolver};
pub use sanitize::{SanitizeOptions, sanitize, sanitize_with};
