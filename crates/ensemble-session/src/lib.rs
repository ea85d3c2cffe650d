//! Session and working-memory management for the Ensemble engine.
//!
//! A session is one user+workspace conversational or task context spanning
//! multiple agent turns. This crate owns the session record, its ephemeral
//! working memory, ordered per-session mutation, and the durable store
//! boundary.
//!
//! # Main types
//!
//! - [`AgentSession`] — One user+workspace conversation and its context.
//! - [`SessionContext`] / [`WorkingMemory`] — Ephemeral session state.
//! - [`SessionManager`] — Get-or-create, ordered mutation, archive, handoff.
//! - [`SessionStore`] — Durable persistence boundary.

/// Session manager.
pub mod manager;
/// Session record and context types.
pub mod session;
/// Durable store boundary.
pub mod store;

pub use manager::{ContextPatch, SessionManager};
pub use session::{AgentSession, SessionContext, SessionStatus, SessionType, WorkingMemory};
pub use store::{FileSessionStore, SessionStore};
