//! The scoped event bus: one node in the bus tree, owning a scope, a
//! listener registry, and weak links to its parent and children.
//!
//! ## Publish protocol
//!
//! A publish call names a target scope (defaulting to the calling bus's
//! own scope). The call is resolved against the live parent chain:
//!
//! 1. Target equals the bus's own scope: the bus itself originates.
//! 2. Target is a strict ancestor scope: the parent chain is walked up
//!    until a live bus owning that scope is found. A broken or overshot
//!    chain fails with [`BusError::HierarchyDetached`] before any
//!    listener runs.
//! 3. Anything else (a descendant or the scope of an unrelated branch)
//!    fails with [`BusError::UnsupportedScope`].
//!
//! The originating bus delivers directly to its own listeners, then the
//! event cascades down the whole subtree; descendant buses deliver only
//! to registrations that opted into propagation. Delivery is synchronous
//! and depth-first, and no registry lock is held while a listener runs.

use std::any::{Any, TypeId, type_name};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::debug;

use scopebus_core::{BusError, BusId, BusResult, RegistrationId, Scope};

use crate::adapter::{self, ListenerMethods};
use crate::event::{EventEnvelope, Payload, ScopedEvent, SourceInfo, downcast_payload};
use crate::filter::ListenerIdentity;
use crate::listener::EventBusListener;
use crate::registration::{HandlerError, InvokeFn, InvokeOutcome, OwnerRef, Registration};
use crate::registry::{Delivery, DeliveryReport, ListenerRegistry};

/// A handle to one bus in the scope tree. Cheap to clone; all clones
/// address the same underlying bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    id: BusId,
    scope: Scope,
    /// Weak so a destroyed or dropped parent never keeps this subtree
    /// publishing upward into a stale hierarchy.
    ///
    /// The parent and children locks guard only link mutation; no
    /// listener code runs under them, so they cannot be poisoned.
    parent: RwLock<Option<Weak<BusInner>>>,
    children: RwLock<Vec<Weak<BusInner>>>,
    registry: ListenerRegistry,
    destroyed: AtomicBool,
}

impl EventBus {
    /// Create a standalone bus with no parent.
    pub fn create_root(scope: Scope) -> Self {
        let bus = Self {
            inner: Arc::new(BusInner {
                id: BusId::new(),
                scope,
                parent: RwLock::new(None),
                children: RwLock::new(Vec::new()),
                registry: ListenerRegistry::new(),
                destroyed: AtomicBool::new(false),
            }),
        };
        debug!(bus = %bus.id(), %scope, "bus created");
        bus
    }

    /// Create a child bus at a scope strictly beneath this bus's scope.
    ///
    /// The child holds only a weak link back; destroying the parent later
    /// detaches the child rather than destroying it.
    pub fn create_child(&self, scope: Scope) -> BusResult<EventBus> {
        self.ensure_live()?;
        if !scope.is_descendant_of(self.inner.scope) {
            return Err(BusError::invalid_child_scope(self.inner.scope, scope));
        }

        let child = Self {
            inner: Arc::new(BusInner {
                id: BusId::new(),
                scope,
                parent: RwLock::new(Some(Arc::downgrade(&self.inner))),
                children: RwLock::new(Vec::new()),
                registry: ListenerRegistry::new(),
                destroyed: AtomicBool::new(false),
            }),
        };

        let mut children = self.inner.children.write().unwrap();
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        drop(children);

        debug!(parent = %self.id(), child = %child.id(), %scope, "child bus created");
        Ok(child)
    }

    pub fn id(&self) -> BusId {
        self.inner.id
    }

    pub fn scope(&self) -> Scope {
        self.inner.scope
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// The live parent bus, if this bus still has one.
    pub fn parent(&self) -> Option<EventBus> {
        let weak = self.inner.parent.read().unwrap().clone()?;
        weak.upgrade().map(|inner| EventBus { inner })
    }

    /// Number of registrations currently held (including entries whose
    /// owner has been dropped but not yet purged).
    pub fn registration_count(&self) -> usize {
        self.inner.registry.len()
    }

    fn ensure_live(&self) -> BusResult<()> {
        if self.is_destroyed() {
            Err(BusError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Subscribe every declared method of `listener`, with propagation
    /// from ancestor scopes enabled.
    ///
    /// The listener is held weakly: dropping the last outside `Arc`
    /// retires its registrations without an explicit unsubscribe. Returns
    /// how many methods were registered.
    pub fn subscribe<L: ListenerMethods>(&self, listener: &Arc<L>) -> BusResult<usize> {
        self.subscribe_with(listener, true)
    }

    /// [`subscribe`](Self::subscribe) with explicit control over whether
    /// the registrations receive events cascading from ancestor scopes.
    pub fn subscribe_with<L: ListenerMethods>(
        &self,
        listener: &Arc<L>,
        propagate: bool,
    ) -> BusResult<usize> {
        self.ensure_live()?;
        let registrations = adapter::bind(listener, propagate)?;
        let count = registrations.len();
        self.inner.registry.add_all(registrations);
        debug!(
            bus = %self.id(),
            listener = type_name::<L>(),
            methods = count,
            "listener subscribed"
        );
        Ok(count)
    }

    /// Subscribe a single-payload listener object. Weakly held, like
    /// [`subscribe`](Self::subscribe); accepts only untopiced events.
    pub fn subscribe_listener<P, L>(
        &self,
        listener: &Arc<L>,
        propagate: bool,
    ) -> BusResult<RegistrationId>
    where
        P: Payload,
        L: EventBusListener<P>,
    {
        self.ensure_live()?;
        let id = RegistrationId::new();
        let weak = Arc::downgrade(listener);
        let invoke: InvokeFn = Box::new(move |envelope, rep| {
            let Some(listener) = weak.upgrade() else {
                return InvokeOutcome::Gone;
            };
            let Some(payload) = downcast_payload::<P>(rep) else {
                return InvokeOutcome::Failed(anyhow::anyhow!(
                    "payload representation does not match declared type {}",
                    type_name::<P>()
                ));
            };
            match listener.on_event(ScopedEvent::new(envelope, payload)) {
                Ok(()) => InvokeOutcome::Delivered,
                Err(error) => InvokeOutcome::Failed(error),
            }
        });

        self.inner.registry.add(Arc::new(Registration::new(
            id,
            ListenerIdentity::new(type_name::<L>(), "on_event", id),
            TypeId::of::<P>(),
            None,
            Vec::new(),
            None,
            None,
            propagate,
            Some(OwnerRef::of(listener)),
            invoke,
        )));
        Ok(id)
    }

    /// Subscribe a free-standing closure for one payload type.
    ///
    /// Unlike object subscriptions there is no owner to hold weakly, so
    /// the closure is owned by the registry until unsubscribed by id or
    /// the bus is destroyed. Accepts only untopiced events.
    pub fn subscribe_fn<P, F>(&self, propagate: bool, handler: F) -> BusResult<RegistrationId>
    where
        P: Payload,
        F: for<'a> Fn(ScopedEvent<'a, P>) + Send + Sync + 'static,
    {
        self.try_subscribe_fn(propagate, move |event| {
            handler(event);
            Ok(())
        })
    }

    /// Fallible variant of [`subscribe_fn`](Self::subscribe_fn).
    pub fn try_subscribe_fn<P, F>(&self, propagate: bool, handler: F) -> BusResult<RegistrationId>
    where
        P: Payload,
        F: for<'a> Fn(ScopedEvent<'a, P>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let id = RegistrationId::new();
        let invoke: InvokeFn = Box::new(move |envelope, rep| {
            let Some(payload) = downcast_payload::<P>(rep) else {
                return InvokeOutcome::Failed(anyhow::anyhow!(
                    "payload representation does not match declared type {}",
                    type_name::<P>()
                ));
            };
            match handler(ScopedEvent::new(envelope, payload)) {
                Ok(()) => InvokeOutcome::Delivered,
                Err(error) => InvokeOutcome::Failed(error),
            }
        });

        self.inner.registry.add(Arc::new(Registration::new(
            id,
            ListenerIdentity::new(type_name::<F>(), "call", id),
            TypeId::of::<P>(),
            None,
            Vec::new(),
            None,
            None,
            propagate,
            None,
            invoke,
        )));
        Ok(id)
    }

    /// Remove every registration derived from `listener` on this bus.
    /// Returns how many were removed. In-flight dispatches that already
    /// snapshotted those entries stop delivering to them immediately.
    pub fn unsubscribe<L: Send + Sync + 'static>(&self, listener: &Arc<L>) -> usize {
        let removed = self.inner.registry.remove_owner(OwnerRef::key(listener));
        if removed > 0 {
            debug!(
                bus = %self.id(),
                listener = type_name::<L>(),
                removed,
                "listener unsubscribed"
            );
        }
        removed
    }

    /// Remove a single registration by id.
    pub fn unsubscribe_id(&self, id: RegistrationId) -> bool {
        self.inner.registry.remove_id(id)
    }

    /// Publish `payload` at this bus's own scope, without a topic.
    pub fn publish<S: Any, P: Payload>(
        &self,
        _source: &S,
        payload: P,
    ) -> BusResult<DeliveryReport> {
        self.publish_erased(self.inner.scope, None, SourceInfo::of::<S>(), Arc::new(payload))
    }

    /// Publish at this bus's own scope, tagged with a topic.
    pub fn publish_topic<S: Any, P: Payload>(
        &self,
        _source: &S,
        topic: &str,
        payload: P,
    ) -> BusResult<DeliveryReport> {
        self.publish_erased(
            self.inner.scope,
            Some(Arc::from(topic)),
            SourceInfo::of::<S>(),
            Arc::new(payload),
        )
    }

    /// Publish at `target`, this bus's own scope or a strict ancestor of
    /// it, without a topic.
    pub fn publish_at<S: Any, P: Payload>(
        &self,
        target: Scope,
        _source: &S,
        payload: P,
    ) -> BusResult<DeliveryReport> {
        self.publish_erased(target, None, SourceInfo::of::<S>(), Arc::new(payload))
    }

    /// Publish at `target`, tagged with a topic.
    pub fn publish_at_topic<S: Any, P: Payload>(
        &self,
        target: Scope,
        _source: &S,
        topic: &str,
        payload: P,
    ) -> BusResult<DeliveryReport> {
        self.publish_erased(
            target,
            Some(Arc::from(topic)),
            SourceInfo::of::<S>(),
            Arc::new(payload),
        )
    }

    fn publish_erased(
        &self,
        target: Scope,
        topic: Option<Arc<str>>,
        source: SourceInfo,
        payload: Arc<dyn Payload>,
    ) -> BusResult<DeliveryReport> {
        self.ensure_live()?;
        let origin = self.resolve_origin(target)?;

        let envelope = EventEnvelope::new(target, source, topic, payload);
        let mut report = DeliveryReport::default();
        deliver(&origin, &envelope, Delivery::Direct, &mut report);

        debug!(
            bus = %self.id(),
            event = %envelope.event_id(),
            scope = %target,
            delivered = report.delivered(),
            failures = report.failures().len(),
            "event published"
        );
        Ok(report)
    }

    /// The live bus that owns `target` on this bus's own parent chain.
    fn resolve_origin(&self, target: Scope) -> BusResult<Arc<BusInner>> {
        if target == self.inner.scope {
            return Ok(self.inner.clone());
        }
        if !target.is_ancestor_of(self.inner.scope) {
            return Err(BusError::unsupported_scope(target, self.inner.scope));
        }

        let mut cursor = self.inner.clone();
        loop {
            let link = cursor.parent.read().unwrap().clone();
            let Some(parent) = link.and_then(|weak| weak.upgrade()) else {
                return Err(BusError::HierarchyDetached { scope: target });
            };
            if parent.destroyed.load(Ordering::Acquire) {
                return Err(BusError::HierarchyDetached { scope: target });
            }
            if parent.scope == target {
                return Ok(parent);
            }
            // Overshot: the chain skipped past the target scope without any
            // bus owning it.
            if parent.scope.is_ancestor_of(target) {
                return Err(BusError::HierarchyDetached { scope: target });
            }
            cursor = parent;
        }
    }

    /// Destroy this bus: cancel and drop every registration, detach from
    /// the parent, and orphan the children (they stay alive but can no
    /// longer publish at ancestor scopes). Idempotent; subsequent
    /// subscribe/publish calls fail with [`BusError::Destroyed`].
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.registry.clear();

        // Take the parent link first, then lock the parent's child list;
        // child-before-parent ordering everywhere avoids deadlocking with
        // concurrent create_child calls.
        let parent = self.inner.parent.write().unwrap().take();
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent.children.write().unwrap().retain(|weak| {
                weak.upgrade()
                    .is_some_and(|child| !Arc::ptr_eq(&child, &self.inner))
            });
        }

        let children = std::mem::take(&mut *self.inner.children.write().unwrap());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.parent.write().unwrap().take();
        }

        debug!(bus = %self.id(), scope = %self.inner.scope, "bus destroyed");
    }
}

/// Depth-first sweep: the target bus first, then every live descendant.
/// Buses destroyed mid-cascade are skipped.
fn deliver(
    bus: &Arc<BusInner>,
    envelope: &EventEnvelope,
    delivery: Delivery,
    report: &mut DeliveryReport,
) {
    if bus.destroyed.load(Ordering::Acquire) {
        return;
    }
    bus.registry.dispatch(envelope, delivery, report);

    let children: Vec<Arc<BusInner>> = bus
        .children
        .read()
        .unwrap()
        .iter()
        .filter_map(Weak::upgrade)
        .collect();
    for child in &children {
        deliver(child, envelope, Delivery::Cascade, report);
    }
}
