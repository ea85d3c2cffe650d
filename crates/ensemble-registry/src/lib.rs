//! Capability registry for the Ensemble engine.
//!
//! Maps each agent type to its declared capabilities, routing keywords, and
//! invoker. The registry is built once at startup and read-only afterwards;
//! it is passed explicitly to the engine instead of living in ambient
//! global state.
//!
//! # Main types
//!
//! - [`CapabilityRegistry`] — Immutable agent/capability lookup and
//!   boundary validation.
//! - [`RegistryBuilder`] — Startup-time construction of the registry.
//! - [`AgentCapability`] — A named operation an agent declares it can
//!   perform, with input/output contracts.

/// Capability descriptors.
pub mod capability;
/// Registry construction and lookup.
pub mod registry;

pub use capability::AgentCapability;
pub use registry::{CapabilityRegistry, RegistryBuilder};
