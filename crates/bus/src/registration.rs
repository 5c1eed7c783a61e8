//! A single stored binding between a match rule and a delivery target.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use scopebus_core::{RegistrationId, Scope};

use crate::event::{EventEnvelope, Payload, payload_type_id};
use crate::filter::{EventFilter, ListenerIdentity};
use crate::topic::{TopicSpec, topic_accepts};

/// Application-level error raised by a failing listener invocation.
pub type HandlerError = anyhow::Error;

/// Result of attempting one listener invocation.
pub(crate) enum InvokeOutcome {
    Delivered,
    /// The weakly-held target object is no longer reachable; the entry
    /// should be purged.
    Gone,
    Failed(HandlerError),
}

pub(crate) type InvokeFn =
    Box<dyn Fn(&EventEnvelope, &dyn Payload) -> InvokeOutcome + Send + Sync>;

/// Non-owning link back to the subscribed object, used for liveness checks
/// and unsubscribe-by-object.
pub(crate) struct OwnerRef {
    /// Address of the original `Arc` allocation, for identity comparison.
    ptr: usize,
    weak: Weak<dyn Any + Send + Sync>,
}

impl OwnerRef {
    pub(crate) fn of<L: Send + Sync + 'static>(listener: &Arc<L>) -> Self {
        let erased: Arc<dyn Any + Send + Sync> = listener.clone();
        Self {
            ptr: Arc::as_ptr(listener) as *const () as usize,
            weak: Arc::downgrade(&erased),
        }
    }

    pub(crate) fn key<L: Send + Sync + 'static>(listener: &Arc<L>) -> usize {
        Arc::as_ptr(listener) as *const () as usize
    }

    fn is_alive(&self) -> bool {
        self.weak.strong_count() > 0
    }
}

/// One listener registration, as stored in a [`ListenerRegistry`].
///
/// All matching metadata is resolved at subscribe time; `invoke` is a
/// pre-bound closure so the hot dispatch path needs no introspection
/// beyond the payload `TypeId` comparison.
///
/// [`ListenerRegistry`]: crate::registry::ListenerRegistry
pub(crate) struct Registration {
    id: RegistrationId,
    identity: ListenerIdentity,
    payload_type: TypeId,
    scope: Option<Scope>,
    /// Acceptable source types; empty means "any source".
    sources: Vec<TypeId>,
    filter: Option<Arc<dyn EventFilter>>,
    topic: Option<TopicSpec>,
    /// Whether this registration also receives events declared at ancestor
    /// scopes of its own bus.
    propagate: bool,
    /// Set by unsubscribe/clear so in-flight dispatch snapshots stop
    /// delivering to this entry immediately.
    cancelled: AtomicBool,
    owner: Option<OwnerRef>,
    invoke: InvokeFn,
}

impl Registration {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: RegistrationId,
        identity: ListenerIdentity,
        payload_type: TypeId,
        scope: Option<Scope>,
        sources: Vec<TypeId>,
        filter: Option<Arc<dyn EventFilter>>,
        topic: Option<TopicSpec>,
        propagate: bool,
        owner: Option<OwnerRef>,
        invoke: InvokeFn,
    ) -> Self {
        Self {
            id,
            identity,
            payload_type,
            scope,
            sources,
            filter,
            topic,
            propagate,
            cancelled: AtomicBool::new(false),
            owner,
            invoke,
        }
    }

    pub(crate) fn id(&self) -> RegistrationId {
        self.id
    }

    pub(crate) fn identity(&self) -> &ListenerIdentity {
        &self.identity
    }

    pub(crate) fn propagate(&self) -> bool {
        self.propagate
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True when the entry has no owner (free-standing callback) or the
    /// owner is still reachable.
    pub(crate) fn owner_alive(&self) -> bool {
        self.owner.as_ref().is_none_or(OwnerRef::is_alive)
    }

    pub(crate) fn owned_by(&self, key: usize) -> bool {
        self.owner.as_ref().is_some_and(|owner| owner.ptr == key)
    }

    /// Find the representation of the event payload this registration was
    /// declared for, if any. This is the cheapest check, so it runs first.
    pub(crate) fn matching_representation<'a>(
        &self,
        envelope: &'a EventEnvelope,
    ) -> Option<&'a dyn Payload> {
        envelope
            .representations()
            .iter()
            .map(Arc::as_ref)
            .find(|rep| payload_type_id(*rep) == self.payload_type)
    }

    /// Scope, source, custom-filter, and topic checks, in that order.
    pub(crate) fn constraints_accept(&self, envelope: &EventEnvelope) -> bool {
        if self.scope.is_some_and(|scope| scope != envelope.scope()) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.contains(&envelope.source().type_id()) {
            return false;
        }
        if self
            .filter
            .as_ref()
            .is_some_and(|filter| !filter.accepts(envelope, &self.identity))
        {
            return false;
        }
        topic_accepts(self.topic.as_ref(), envelope.topic())
    }

    pub(crate) fn invoke(&self, envelope: &EventEnvelope, rep: &dyn Payload) -> InvokeOutcome {
        (self.invoke)(envelope, rep)
    }
}
