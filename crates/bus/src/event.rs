//! Events: payload model, source identity, and the per-publish envelope.

use std::any::{Any, TypeId, type_name};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use scopebus_core::{EventId, Scope};

/// Hard cap on the length of a payload's declared parent chain.
///
/// `as_parent` builds a fresh value each step, so a buggy implementation
/// could otherwise re-present itself forever.
const MAX_PARENT_CHAIN: usize = 16;

/// A value that can travel through the bus.
///
/// Every payload type implements this trait. Rust has no class subtyping,
/// so the covariant matching rule ("a registration for type `T` accepts any
/// payload that is a `T` or a subtype") is rendered explicitly: a payload
/// may re-present itself as its declared parent type via [`Payload::as_parent`],
/// and dispatch matches registrations against every representation in that
/// chain. Publishing the parent type directly never reaches listeners of
/// the child type.
///
/// Stock implementations exist for common primitives (`String`,
/// `&'static str`, integers, `bool`, `()`), which never declare a parent.
pub trait Payload: Any + Send + Sync + core::fmt::Debug {
    /// Present this payload as its declared parent type, if any.
    fn as_parent(&self) -> Option<Arc<dyn Payload>> {
        None
    }
}

macro_rules! impl_leaf_payload {
    ($($t:ty),* $(,)?) => {
        $(impl Payload for $t {})*
    };
}

impl_leaf_payload!(String, &'static str, i32, i64, u32, u64, usize, f64, bool, ());

/// Concrete type of a payload behind a trait object.
pub(crate) fn payload_type_id(payload: &dyn Payload) -> TypeId {
    (payload as &dyn Any).type_id()
}

/// Downcast a payload representation to a concrete type.
pub(crate) fn downcast_payload<P: Payload>(payload: &dyn Payload) -> Option<&P> {
    (payload as &dyn Any).downcast_ref::<P>()
}

/// Non-owning identity of the object an event was published from.
///
/// The envelope records *which class* published, not the object itself:
/// identity and source-class filtering are all the core needs, and a plain
/// identity can never extend the publisher's lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    type_id: TypeId,
    type_name: &'static str,
}

impl SourceInfo {
    /// Identity of a concrete source type.
    pub fn of<S: Any>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            type_name: type_name::<S>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// One published event, as it travels through the bus tree.
///
/// Envelopes are immutable: created once per publish call, shared unchanged
/// across the whole cascade, discarded when delivery completes. They are
/// never persisted.
#[derive(Debug)]
pub struct EventEnvelope {
    event_id: EventId,
    /// The scope this event was declared at (the target scope of the
    /// publish call, not necessarily the publishing bus's own scope).
    scope: Scope,
    source: SourceInfo,
    /// `None` means "no topic", which is distinct from an empty string.
    topic: Option<Arc<str>>,
    /// The payload and its declared parent representations, payload first.
    representations: Vec<Arc<dyn Payload>>,
    occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub(crate) fn new(
        scope: Scope,
        source: SourceInfo,
        topic: Option<Arc<str>>,
        payload: Arc<dyn Payload>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            scope,
            source,
            topic,
            representations: representation_chain(payload),
            occurred_at: Utc::now(),
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn source(&self) -> SourceInfo {
        self.source
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// The payload exactly as published.
    pub fn payload(&self) -> &dyn Payload {
        self.representations[0].as_ref()
    }

    /// View the payload as `P`, if `P` appears anywhere in the payload's
    /// representation chain.
    pub fn payload_ref<P: Payload>(&self) -> Option<&P> {
        self.representations
            .iter()
            .find_map(|rep| downcast_payload::<P>(rep.as_ref()))
    }

    pub fn payload_is<P: Payload>(&self) -> bool {
        self.payload_ref::<P>().is_some()
    }

    pub(crate) fn representations(&self) -> &[Arc<dyn Payload>] {
        &self.representations
    }
}

/// Walk `as_parent` links, payload first, stopping on repetition or at the
/// chain cap.
fn representation_chain(payload: Arc<dyn Payload>) -> Vec<Arc<dyn Payload>> {
    let mut seen = vec![payload_type_id(payload.as_ref())];
    let mut cursor = payload.clone();
    let mut chain = vec![payload];

    while chain.len() < MAX_PARENT_CHAIN {
        let Some(parent) = cursor.as_parent() else {
            break;
        };
        let type_id = payload_type_id(parent.as_ref());
        if seen.contains(&type_id) {
            break;
        }
        seen.push(type_id);
        cursor = parent.clone();
        chain.push(parent);
    }

    chain
}

/// The typed view of an event handed to a listener that wants more than
/// the bare payload.
pub struct ScopedEvent<'a, P> {
    envelope: &'a EventEnvelope,
    payload: &'a P,
}

impl<'a, P: Payload> ScopedEvent<'a, P> {
    pub(crate) fn new(envelope: &'a EventEnvelope, payload: &'a P) -> Self {
        Self { envelope, payload }
    }

    pub fn payload(&self) -> &'a P {
        self.payload
    }

    pub fn scope(&self) -> Scope {
        self.envelope.scope()
    }

    pub fn topic(&self) -> Option<&'a str> {
        self.envelope.topic.as_deref()
    }

    pub fn source(&self) -> SourceInfo {
        self.envelope.source()
    }

    pub fn event_id(&self) -> EventId {
        self.envelope.event_id()
    }

    pub fn envelope(&self) -> &'a EventEnvelope {
        self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Notice {
        text: String,
    }

    impl Payload for Notice {}

    #[derive(Debug, Clone)]
    struct UrgentNotice {
        text: String,
    }

    impl Payload for UrgentNotice {
        fn as_parent(&self) -> Option<Arc<dyn Payload>> {
            Some(Arc::new(Notice {
                text: self.text.clone(),
            }))
        }
    }

    /// A payload whose parent link never terminates on its own.
    #[derive(Debug, Clone)]
    struct Echo(u32);

    impl Payload for Echo {
        fn as_parent(&self) -> Option<Arc<dyn Payload>> {
            Some(Arc::new(Echo(self.0 + 1)))
        }
    }

    fn envelope_for(payload: Arc<dyn Payload>) -> EventEnvelope {
        EventEnvelope::new(Scope::Application, SourceInfo::of::<()>(), None, payload)
    }

    #[test]
    fn leaf_payload_has_single_representation() {
        let env = envelope_for(Arc::new("hello"));
        assert_eq!(env.representations().len(), 1);
        assert_eq!(env.payload_ref::<&'static str>(), Some(&"hello"));
        assert!(env.payload_ref::<String>().is_none());
    }

    #[test]
    fn parent_chain_is_walked_payload_first() {
        let env = envelope_for(Arc::new(UrgentNotice {
            text: "disk full".into(),
        }));
        assert_eq!(env.representations().len(), 2);
        assert!(env.payload_is::<UrgentNotice>());
        assert_eq!(
            env.payload_ref::<Notice>(),
            Some(&Notice {
                text: "disk full".into()
            })
        );
    }

    #[test]
    fn runaway_parent_chain_is_capped() {
        // Echo always re-presents itself as Echo, so the repetition check
        // stops the chain after the original payload.
        let env = envelope_for(Arc::new(Echo(0)));
        assert_eq!(env.representations().len(), 1);
    }

    #[test]
    fn topic_none_is_distinct_from_empty() {
        let no_topic = envelope_for(Arc::new(()));
        assert_eq!(no_topic.topic(), None);

        let empty = EventEnvelope::new(
            Scope::Application,
            SourceInfo::of::<()>(),
            Some(Arc::from("")),
            Arc::new(()),
        );
        assert_eq!(empty.topic(), Some(""));
    }

    #[test]
    fn source_info_identifies_the_publishing_type() {
        struct Publisher;
        let info = SourceInfo::of::<Publisher>();
        assert_eq!(info.type_id(), TypeId::of::<Publisher>());
        assert!(info.type_name().ends_with("Publisher"));
    }
}
