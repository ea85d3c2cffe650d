//! Priority-ordered inter-agent messaging for the Ensemble engine.
//!
//! Routes request/response/broadcast/handoff/status messages between
//! subscribed agents: higher-priority messages are delivered first, equal
//! priorities preserve arrival order, broadcasts fan out independently,
//! request/response pairs are correlated, and handoffs transfer the active
//! agent within a session with optional bounded history carry-over.
//!
//! # Main types
//!
//! - [`MessageBus`] — The bus itself: send, subscribe, request.
//! - [`BusSubscriber`] — Handler trait implemented by agent endpoints.
//! - [`InterAgentMessage`] — One routed message.
//! - [`HandoffRequest`] — Payload of a handoff message.

/// Bus implementation.
pub mod bus;
/// Message types.
pub mod message;

pub use bus::{BusSubscriber, MessageBus};
pub use message::{HandoffRequest, InterAgentMessage, MessageContext, MessageKind, Recipient};
