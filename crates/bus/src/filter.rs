//! Custom listener filters: arbitrary accept/reject logic applied before
//! delivery, after the type/scope/source checks.

use scopebus_core::RegistrationId;

use crate::event::EventEnvelope;

/// Identifying metadata of a candidate registration, handed to custom
/// filters alongside the event.
#[derive(Debug, Clone)]
pub struct ListenerIdentity {
    listener_type: &'static str,
    method: &'static str,
    registration: RegistrationId,
}

impl ListenerIdentity {
    pub(crate) fn new(
        listener_type: &'static str,
        method: &'static str,
        registration: RegistrationId,
    ) -> Self {
        Self {
            listener_type,
            method,
            registration,
        }
    }

    /// Type name of the subscribed listener object (or closure).
    pub fn listener_type(&self) -> &'static str {
        self.listener_type
    }

    /// Name the handler method was declared under.
    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn registration(&self) -> RegistrationId {
        self.registration
    }
}

impl core::fmt::Display for ListenerIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}::{}", self.listener_type, self.method)
    }
}

/// Pure accept/reject predicate over a full event and the candidate
/// listener's identity.
///
/// Instantiated once per registration and reused across dispatches; keep
/// implementations cheap and side-effect free.
pub trait EventFilter: Send + Sync + 'static {
    fn accepts(&self, event: &EventEnvelope, listener: &ListenerIdentity) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&EventEnvelope, &ListenerIdentity) -> bool + Send + Sync + 'static,
{
    fn accepts(&self, event: &EventEnvelope, listener: &ListenerIdentity) -> bool {
        self(event, listener)
    }
}
