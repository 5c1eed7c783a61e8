//! `scopebus-core` — foundation building blocks for the scoped event bus.
//!
//! This crate contains **pure domain** primitives (no distribution
//! machinery): the scope hierarchy, strongly-typed identifiers, and the
//! error model shared by the bus crates.

pub mod error;
pub mod id;
pub mod scope;

pub use error::{BusError, BusResult};
pub use id::{BusId, EventId, RegistrationId};
pub use scope::Scope;
