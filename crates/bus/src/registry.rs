//! Per-bus listener registry: holds non-owning registrations and sweeps a
//! published event across them.

use std::sync::{Arc, RwLock};

use tracing::warn;

use scopebus_core::RegistrationId;

use crate::event::EventEnvelope;
use crate::registration::{HandlerError, InvokeOutcome, Registration};

/// How an event arrived at a registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The event was published at this bus's own scope.
    Direct,
    /// The event is cascading down from an ancestor scope; only
    /// propagating registrations receive it.
    Cascade,
}

/// One listener invocation that failed during a dispatch.
#[derive(Debug)]
pub struct DeliveryFailure {
    registration: RegistrationId,
    listener: String,
    error: HandlerError,
}

impl DeliveryFailure {
    pub fn registration(&self) -> RegistrationId {
        self.registration
    }

    /// `Type::method` identity of the failing listener.
    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub fn error(&self) -> &HandlerError {
        &self.error
    }
}

/// Outcome of one publish call, aggregated across the target bus and every
/// descendant it cascaded to.
///
/// Per-listener failures never abort a dispatch; they are collected here
/// and surfaced once all listeners have been attempted.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    delivered: usize,
    failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    /// Number of listeners that were successfully invoked.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn failures(&self) -> &[DeliveryFailure] {
        &self.failures
    }

    /// True when every matched listener was invoked without error.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The registrations of a single bus instance.
///
/// Mutation takes a write lock; dispatch clones the entry list under a read
/// lock and iterates the snapshot with no lock held, so a listener may
/// freely subscribe, unsubscribe, or publish reentrantly. Entries whose
/// weakly-held owner has been dropped are skipped and lazily purged.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    /// No listener code ever runs while this lock is held, so it cannot
    /// be poisoned; the `unwrap`s below rely on that.
    entries: RwLock<Vec<Arc<Registration>>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, registration: Arc<Registration>) {
        self.entries.write().unwrap().push(registration);
    }

    pub(crate) fn add_all(&self, registrations: impl IntoIterator<Item = Arc<Registration>>) {
        self.entries.write().unwrap().extend(registrations);
    }

    /// Cancel and remove every registration derived from the object
    /// identified by `owner_key`. Returns how many were removed.
    pub(crate) fn remove_owner(&self, owner_key: usize) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|entry| {
            if entry.owned_by(owner_key) {
                entry.cancel();
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    /// Cancel and remove a single registration by id.
    pub(crate) fn remove_id(&self, id: RegistrationId) -> bool {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|entry| {
            if entry.id() == id {
                entry.cancel();
                false
            } else {
                true
            }
        });
        before != entries.len()
    }

    /// Cancel and drop every registration (bus destruction).
    pub(crate) fn clear(&self) {
        let mut entries = self.entries.write().unwrap();
        for entry in entries.iter() {
            entry.cancel();
        }
        entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Sweep one event across a snapshot of the current registrations.
    ///
    /// Match order per entry: payload type, then scope constraint, then
    /// source constraint, then custom filter, then topic. Cancellation is
    /// rechecked immediately before invocation so an unsubscribe that
    /// raced this dispatch stops deliveries from that point on.
    pub(crate) fn dispatch(
        &self,
        envelope: &EventEnvelope,
        delivery: Delivery,
        report: &mut DeliveryReport,
    ) {
        let snapshot: Vec<Arc<Registration>> = self.entries.read().unwrap().clone();

        let mut saw_dead_owner = false;
        for entry in &snapshot {
            if delivery == Delivery::Cascade && !entry.propagate() {
                continue;
            }
            let Some(rep) = entry.matching_representation(envelope) else {
                continue;
            };
            if !entry.constraints_accept(envelope) {
                continue;
            }
            if entry.is_cancelled() {
                continue;
            }

            match entry.invoke(envelope, rep) {
                InvokeOutcome::Delivered => report.delivered += 1,
                InvokeOutcome::Gone => {
                    entry.cancel();
                    saw_dead_owner = true;
                }
                InvokeOutcome::Failed(error) => {
                    warn!(
                        listener = %entry.identity(),
                        event = %envelope.event_id(),
                        %error,
                        "listener invocation failed"
                    );
                    report.failures.push(DeliveryFailure {
                        registration: entry.id(),
                        listener: entry.identity().to_string(),
                        error,
                    });
                }
            }
        }

        if saw_dead_owner {
            self.purge_dead();
        }
    }

    /// Drop entries whose owner is gone or that were cancelled.
    pub(crate) fn purge_dead(&self) {
        self.entries
            .write()
            .unwrap()
            .retain(|entry| entry.owner_alive() && !entry.is_cancelled());
    }
}

#[cfg(test)]
mod tests {
    use std::any::TypeId;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use scopebus_core::Scope;

    use super::*;
    use crate::event::{Payload, SourceInfo};
    use crate::filter::ListenerIdentity;
    use crate::registration::{InvokeFn, OwnerRef};
    use crate::topic::TopicSpec;

    struct Probe {
        hits: AtomicUsize,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                hits: AtomicUsize::new(0),
            })
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    fn counting_registration(
        probe: &Arc<Probe>,
        payload_type: TypeId,
        scope: Option<Scope>,
        topic: Option<TopicSpec>,
        propagate: bool,
    ) -> Arc<Registration> {
        let id = scopebus_core::RegistrationId::new();
        let weak = Arc::downgrade(probe);
        let invoke: InvokeFn = Box::new(move |_, _| match weak.upgrade() {
            Some(probe) => {
                probe.hits.fetch_add(1, Ordering::SeqCst);
                InvokeOutcome::Delivered
            }
            None => InvokeOutcome::Gone,
        });
        Arc::new(Registration::new(
            id,
            ListenerIdentity::new("Probe", "count", id),
            payload_type,
            scope,
            Vec::new(),
            None,
            topic,
            propagate,
            Some(OwnerRef::of(probe)),
            invoke,
        ))
    }

    fn string_envelope(scope: Scope, topic: Option<&str>) -> EventEnvelope {
        EventEnvelope::new(
            scope,
            SourceInfo::of::<()>(),
            topic.map(Arc::from),
            Arc::new(String::from("payload")),
        )
    }

    #[test]
    fn dispatch_matches_payload_type_first() {
        let registry = ListenerRegistry::new();
        let probe = Probe::new();
        registry.add(counting_registration(
            &probe,
            TypeId::of::<String>(),
            None,
            None,
            true,
        ));
        registry.add(counting_registration(
            &probe,
            TypeId::of::<u64>(),
            None,
            None,
            true,
        ));

        let mut report = DeliveryReport::default();
        registry.dispatch(
            &string_envelope(Scope::Application, None),
            Delivery::Direct,
            &mut report,
        );

        assert_eq!(report.delivered(), 1);
        assert_eq!(probe.hits(), 1);
    }

    #[test]
    fn cascade_skips_non_propagating_entries() {
        let registry = ListenerRegistry::new();
        let probe = Probe::new();
        registry.add(counting_registration(
            &probe,
            TypeId::of::<String>(),
            None,
            None,
            false,
        ));

        let mut report = DeliveryReport::default();
        let envelope = string_envelope(Scope::Application, None);
        registry.dispatch(&envelope, Delivery::Cascade, &mut report);
        assert_eq!(probe.hits(), 0);

        registry.dispatch(&envelope, Delivery::Direct, &mut report);
        assert_eq!(probe.hits(), 1);
    }

    #[test]
    fn scope_constraint_must_equal_event_scope() {
        let registry = ListenerRegistry::new();
        let probe = Probe::new();
        registry.add(counting_registration(
            &probe,
            TypeId::of::<String>(),
            Some(Scope::Session),
            None,
            true,
        ));

        let mut report = DeliveryReport::default();
        registry.dispatch(
            &string_envelope(Scope::Application, None),
            Delivery::Direct,
            &mut report,
        );
        assert_eq!(probe.hits(), 0);

        registry.dispatch(
            &string_envelope(Scope::Session, None),
            Delivery::Direct,
            &mut report,
        );
        assert_eq!(probe.hits(), 1);
    }

    #[test]
    fn topic_constraints_gate_delivery() {
        let registry = ListenerRegistry::new();
        let untopiced = Probe::new();
        let topiced = Probe::new();
        registry.add(counting_registration(
            &untopiced,
            TypeId::of::<String>(),
            None,
            None,
            true,
        ));
        registry.add(counting_registration(
            &topiced,
            TypeId::of::<String>(),
            None,
            Some(TopicSpec::exact("alerts")),
            true,
        ));

        let mut report = DeliveryReport::default();
        registry.dispatch(
            &string_envelope(Scope::Application, Some("alerts")),
            Delivery::Direct,
            &mut report,
        );
        assert_eq!(untopiced.hits(), 0);
        assert_eq!(topiced.hits(), 1);

        registry.dispatch(
            &string_envelope(Scope::Application, None),
            Delivery::Direct,
            &mut report,
        );
        assert_eq!(untopiced.hits(), 1);
        assert_eq!(topiced.hits(), 1);
    }

    #[test]
    fn dead_owner_is_skipped_and_purged() {
        let registry = ListenerRegistry::new();
        let probe = Probe::new();
        registry.add(counting_registration(
            &probe,
            TypeId::of::<String>(),
            None,
            None,
            true,
        ));
        assert_eq!(registry.len(), 1);

        drop(probe);

        let mut report = DeliveryReport::default();
        registry.dispatch(
            &string_envelope(Scope::Application, None),
            Delivery::Direct,
            &mut report,
        );
        assert_eq!(report.delivered(), 0);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn failing_entry_does_not_stop_the_sweep() {
        let registry = ListenerRegistry::new();

        let id = scopebus_core::RegistrationId::new();
        let failing: InvokeFn =
            Box::new(|_, _| InvokeOutcome::Failed(anyhow::anyhow!("listener exploded")));
        registry.add(Arc::new(Registration::new(
            id,
            ListenerIdentity::new("Broken", "boom", id),
            TypeId::of::<String>(),
            None,
            Vec::new(),
            None,
            None,
            true,
            None,
            failing,
        )));

        let probe = Probe::new();
        registry.add(counting_registration(
            &probe,
            TypeId::of::<String>(),
            None,
            None,
            true,
        ));

        let mut report = DeliveryReport::default();
        registry.dispatch(
            &string_envelope(Scope::Application, None),
            Delivery::Direct,
            &mut report,
        );

        assert_eq!(probe.hits(), 1);
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].listener(), "Broken::boom");
    }

    #[test]
    fn remove_owner_cancels_for_inflight_snapshots() {
        let registry = ListenerRegistry::new();
        let probe = Probe::new();
        let registration = counting_registration(&probe, TypeId::of::<String>(), None, None, true);
        registry.add(registration.clone());

        assert_eq!(registry.remove_owner(OwnerRef::key(&probe)), 1);
        assert_eq!(registry.len(), 0);
        // A dispatch that had already snapshotted this entry would consult
        // the cancellation flag and skip it.
        assert!(registration.is_cancelled());
    }
}
