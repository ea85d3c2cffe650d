//! Core types and error definitions for the Ensemble engine.
//!
//! This crate provides the foundational types shared across all Ensemble
//! crates: the unified error enum, the agent vocabulary, conversation
//! message representations, the uniform agent invocation seam, and the
//! runtime settings objects handed to the engine at startup.
//!
//! # Main types
//!
//! - [`EnsembleError`] — Unified error enum for all Ensemble subsystems.
//! - [`EnsembleResult`] — Convenience alias for `Result<T, EnsembleError>`.
//! - [`AgentType`] — The specialized agents known to the engine.
//! - [`AgentMessage`] — A single turn within a conversation session.
//! - [`AgentInvoker`] — Uniform entry point into agent implementations.
//! - [`TaskRequest`] — A validated request for one capability invocation.
//! - [`EngineSettings`] — Aggregated runtime configuration, TOML-loadable.

/// Agent type vocabulary.
pub mod agent;
/// Unified error enum and result alias.
pub mod error;
/// Uniform agent invocation seam.
pub mod invoke;
/// Conversation message types.
pub mod message;
/// Runtime settings objects.
pub mod settings;

pub use agent::AgentType;
pub use error::{EnsembleError, EnsembleResult};
pub use invoke::{AgentInvoker, InvokeContext, TaskRequest};
pub use message::{AgentMessage, Role, ToolCall, ToolResult};
pub use settings::{
    BusConfig, EngineConfig, EngineSettings, MemoryConfig, RetryPolicy, WorkflowConfig,
};
