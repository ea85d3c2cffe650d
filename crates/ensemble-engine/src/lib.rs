//! Asynchronous task execution engine for the Ensemble framework.
//!
//! Runs single agent invocations on a fixed worker pool: submission
//! returns immediately with a task id, workers dequeue by priority,
//! invocations run under a wall-clock timeout with exponential-backoff
//! retries for transient failures, and cancellation interrupts in-flight
//! calls best-effort. Task status transitions are monotonic; terminal
//! states are never revisited.
//!
//! # Main types
//!
//! - [`TaskEngine`] — Submit, status, wait, cancel, progress.
//! - [`AgentTask`] — One tracked agent invocation.
//! - [`SubmitOptions`] — Per-task priority, timeout, and retry budget.

/// Engine implementation.
pub mod engine;
/// Task record types.
pub mod task;

pub use engine::TaskEngine;
pub use task::{AgentTask, SubmitOptions, TaskStatus};
