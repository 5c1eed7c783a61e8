//! Error model for the scoped event bus.

use thiserror::Error;

use crate::scope::Scope;

/// Result type used across the bus crates.
pub type BusResult<T> = Result<T, BusError>;

/// Failures raised synchronously by bus operations.
///
/// Keep this focused on subscribe/publish-time failures. Per-listener
/// delivery failures are deliberately *not* represented here: they are
/// collected into a delivery report after all listeners have been
/// attempted, so one failing listener never aborts a dispatch.
#[derive(Debug, Error)]
pub enum BusError {
    /// Publish was asked to originate an event at a scope beneath or
    /// unrelated to the calling bus. Programmer error; raised before any
    /// delivery occurs and not worth retrying.
    #[error("unsupported scope: cannot publish at {target} from a bus scoped to {own}")]
    UnsupportedScope { target: Scope, own: Scope },

    /// The parent chain no longer reaches a live bus owning the target
    /// scope (an ancestor bus was destroyed).
    #[error("no live bus owns scope {scope} on the parent chain")]
    HierarchyDetached { scope: Scope },

    /// Operation on a bus that has already been destroyed.
    #[error("bus has been destroyed")]
    Destroyed,

    /// A listener-method declaration was malformed (e.g. duplicate method
    /// name). Fatal to that subscribe attempt; the registry is untouched.
    #[error("invalid listener configuration: {0}")]
    Configuration(String),

    /// Child-bus creation with a scope that is not strictly beneath the
    /// parent's scope.
    #[error("scope {child} is not strictly beneath parent scope {parent}")]
    InvalidChildScope { parent: Scope, child: Scope },
}

impl BusError {
    pub fn unsupported_scope(target: Scope, own: Scope) -> Self {
        Self::UnsupportedScope { target, own }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_child_scope(parent: Scope, child: Scope) -> Self {
        Self::InvalidChildScope { parent, child }
    }
}
