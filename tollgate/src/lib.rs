//! Tollgate - tool-call reconciliation for LLM conversations
//!
//! This crate keeps a persisted conversation log safe to hand to a language
//! model while tools that need a human's approval wait, run, or get
//! rejected. Each reconciliation pass sanitizes the log, resolves
//! confirmation-gated invocations at most once each, writes the results
//! back into the log, and mirrors every transition onto a live stream.

pub mod config;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod prelude;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod stream;
pub mod tool;

pub use error::{Error, Result, ToolError};
