//! Long-term, scoped agent memory with expiry and feedback ingestion.
//!
//! Provides durable key-value knowledge agents use to personalize future
//! behavior: preference/pattern/feedback/insight records scoped by
//! workspace, user, and agent, with caller-supplied relevance scores,
//! atomic access accounting, expiry-aware reads, and background eviction.
//!
//! # Main types
//!
//! - [`MemoryStore`] — Trait for storing and querying scoped memories.
//! - [`InMemoryMemoryStore`] — Process-local store backing tests and MVPs.
//! - [`FileMemoryStore`] — JSONL-backed persistent store.
//! - [`AgentMemory`] — One stored fact with its access metadata.
//! - [`FeedbackLog`] — Append-only user feedback, derived into memories.

/// Background eviction loop.
pub mod eviction;
/// Feedback ingestion and derivation into memories.
pub mod feedback;
/// Store trait and implementations.
pub mod store;
/// Memory record types.
pub mod types;

pub use eviction::spawn_eviction;
pub use feedback::{AgentFeedback, FeedbackKind, FeedbackLog};
pub use store::{FileMemoryStore, InMemoryMemoryStore, MemoryStore};
pub use types::{AgentMemory, MemoryKind, MemoryScope, UpsertOptions};
