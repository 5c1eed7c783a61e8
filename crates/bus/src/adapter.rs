//! Listener-method adapter: derives registrations from declared handler
//! methods on an arbitrary object.
//!
//! There is no runtime annotation scanning in Rust, so the metadata
//! provider is a trait contract: a subscriber type declares its handler
//! methods once in [`ListenerMethods::listener_methods`], together with
//! the scope/source/filter/topic metadata an annotation would carry. Each
//! declaration captures the accepted payload type and the invocation form
//! (raw payload vs. typed event view) from the method's parameter, bound
//! once into a uniform invoke closure so the dispatch path never
//! introspects again.
//!
//! Declarations are collected and validated once per concrete type and
//! cached; `subscribe` turns the cached declarations into one weakly-held
//! registration per method.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use scopebus_core::{BusError, BusResult, RegistrationId, Scope};

use crate::event::{EventEnvelope, Payload, ScopedEvent, downcast_payload};
use crate::filter::{EventFilter, ListenerIdentity};
use crate::registration::{
    HandlerError, InvokeFn, InvokeOutcome, OwnerRef, Registration,
};
use crate::topic::{TopicFilter, TopicSpec};

/// Declares the handler methods of a subscriber type.
///
/// This is the adapter's whole query contract: what an annotated class
/// exposes through reflection elsewhere, a Rust type states here. A type
/// that wraps or extends another listener simply re-declares (or
/// delegates to) the inner type's methods.
///
/// A type with zero declarations is valid; subscribing it is a no-op.
pub trait ListenerMethods: Send + Sync + Sized + 'static {
    fn listener_methods(methods: &mut MethodRegistrar<Self>);
}

type MethodFn<L> =
    Arc<dyn Fn(&L, &EventEnvelope, &dyn Payload) -> Result<(), HandlerError> + Send + Sync>;

/// One declared handler method with its resolved metadata.
pub(crate) struct MethodSpec<L> {
    pub(crate) name: &'static str,
    pub(crate) payload_type: TypeId,
    pub(crate) scope: Option<Scope>,
    pub(crate) sources: Vec<TypeId>,
    pub(crate) filter: Option<Arc<dyn EventFilter>>,
    pub(crate) topic: Option<TopicSpec>,
    invoke: MethodFn<L>,
}

impl<L> std::fmt::Debug for MethodSpec<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("payload_type", &self.payload_type)
            .field("scope", &self.scope)
            .field("sources", &self.sources)
            .field("topic", &self.topic.as_ref().map(TopicSpec::declared))
            .finish_non_exhaustive()
    }
}

/// Collects the method declarations of one subscriber type.
pub struct MethodRegistrar<L: ListenerMethods> {
    specs: Vec<MethodSpec<L>>,
    problems: Vec<String>,
}

impl<L: ListenerMethods> MethodRegistrar<L> {
    fn new() -> Self {
        Self {
            specs: Vec::new(),
            problems: Vec::new(),
        }
    }

    /// Declare a method that takes the raw payload.
    pub fn payload<P: Payload>(
        &mut self,
        name: &'static str,
        method: fn(&L, &P),
    ) -> MethodOptions<'_, L> {
        self.try_payload(name, move |listener, payload: &P| {
            method(listener, payload);
            Ok(())
        })
    }

    /// Declare a fallible method that takes the raw payload.
    pub fn try_payload<P, F>(&mut self, name: &'static str, method: F) -> MethodOptions<'_, L>
    where
        P: Payload,
        F: Fn(&L, &P) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.push::<P>(
            name,
            Arc::new(move |listener, _envelope, rep| match downcast_payload::<P>(rep) {
                Some(payload) => method(listener, payload),
                None => Err(representation_mismatch::<P>()),
            }),
        )
    }

    /// Declare a method that takes the typed event view (payload plus
    /// scope, topic, and source metadata).
    pub fn event<P: Payload>(
        &mut self,
        name: &'static str,
        method: fn(&L, ScopedEvent<'_, P>),
    ) -> MethodOptions<'_, L> {
        self.try_event(name, move |listener, event: ScopedEvent<'_, P>| {
            method(listener, event);
            Ok(())
        })
    }

    /// Declare a fallible method that takes the typed event view.
    pub fn try_event<P, F>(&mut self, name: &'static str, method: F) -> MethodOptions<'_, L>
    where
        P: Payload,
        F: for<'a> Fn(&L, ScopedEvent<'a, P>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.push::<P>(
            name,
            Arc::new(move |listener, envelope, rep| match downcast_payload::<P>(rep) {
                Some(payload) => method(listener, ScopedEvent::new(envelope, payload)),
                None => Err(representation_mismatch::<P>()),
            }),
        )
    }

    fn push<P: Payload>(&mut self, name: &'static str, invoke: MethodFn<L>) -> MethodOptions<'_, L> {
        self.specs.push(MethodSpec {
            name,
            payload_type: TypeId::of::<P>(),
            scope: None,
            sources: Vec::new(),
            filter: None,
            topic: None,
            invoke,
        });
        let index = self.specs.len() - 1;
        MethodOptions {
            registrar: self,
            index,
        }
    }

    fn into_specs(self) -> BusResult<Vec<MethodSpec<L>>> {
        let mut problems = self.problems;
        let mut seen = Vec::new();
        for spec in &self.specs {
            if spec.name.is_empty() {
                problems.push(format!(
                    "{}: method declared with an empty name",
                    type_name::<L>()
                ));
            } else if seen.contains(&spec.name) {
                problems.push(format!(
                    "{}: method {:?} declared more than once",
                    type_name::<L>(),
                    spec.name
                ));
            }
            seen.push(spec.name);
        }

        if problems.is_empty() {
            Ok(self.specs)
        } else {
            Err(BusError::configuration(problems.join("; ")))
        }
    }
}

fn representation_mismatch<P: Payload>() -> HandlerError {
    anyhow::anyhow!(
        "payload representation does not match declared type {}",
        type_name::<P>()
    )
}

/// Builder for the metadata of one declared method.
pub struct MethodOptions<'a, L: ListenerMethods> {
    registrar: &'a mut MethodRegistrar<L>,
    index: usize,
}

impl<'a, L: ListenerMethods> MethodOptions<'a, L> {
    fn spec(&mut self) -> &mut MethodSpec<L> {
        &mut self.registrar.specs[self.index]
    }

    /// Only accept events declared at exactly this scope.
    pub fn scope(mut self, scope: Scope) -> Self {
        self.spec().scope = Some(scope);
        self
    }

    /// Only accept events published from sources of type `S`. Repeatable;
    /// any of the listed types matches.
    pub fn source<S: Any>(mut self) -> Self {
        self.spec().sources.push(TypeId::of::<S>());
        self
    }

    /// Attach a custom accept/reject filter.
    pub fn filter(mut self, filter: impl EventFilter) -> Self {
        self.spec().filter = Some(Arc::new(filter));
        self
    }

    /// Only accept events whose topic equals `declared` exactly.
    pub fn topic(self, declared: &str) -> Self {
        self.set_topic(TopicSpec::exact(declared))
    }

    /// Only accept events whose topic satisfies `filter` against
    /// `declared`.
    pub fn topic_with(self, declared: &str, filter: impl TopicFilter) -> Self {
        self.set_topic(TopicSpec::with_filter(declared, filter))
    }

    fn set_topic(mut self, topic: TopicSpec) -> Self {
        let name = self.registrar.specs[self.index].name;
        let previous = self.spec().topic.as_ref().map(|t| t.declared().to_owned());
        if let Some(previous) = previous {
            self.registrar.problems.push(format!(
                "{}: method {:?} declares a topic more than once (already {:?})",
                type_name::<L>(),
                name,
                previous
            ));
        }
        self.spec().topic = Some(topic);
        self
    }
}

type CachedSpecs = Result<Box<dyn Any + Send + Sync>, String>;

static METHOD_CACHE: OnceLock<Mutex<HashMap<TypeId, CachedSpecs>>> = OnceLock::new();

/// Collected (and validated) declarations for `L`, built once per concrete
/// type and cached.
pub(crate) fn methods_of<L: ListenerMethods>() -> BusResult<Arc<Vec<MethodSpec<L>>>> {
    let cache = METHOD_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = cache.lock().unwrap();
    let entry = map.entry(TypeId::of::<L>()).or_insert_with(|| {
        let mut registrar = MethodRegistrar::new();
        L::listener_methods(&mut registrar);
        registrar
            .into_specs()
            .map(|specs| Box::new(Arc::new(specs)) as Box<dyn Any + Send + Sync>)
            .map_err(|error| error.to_string())
    });

    match entry {
        Ok(specs) => Ok(specs
            .downcast_ref::<Arc<Vec<MethodSpec<L>>>>()
            .expect("cache entry stored under the declaring type")
            .clone()),
        Err(message) => Err(BusError::configuration(message.clone())),
    }
}

/// Bind the cached declarations of `L` to one concrete instance: one
/// weakly-held registration per declared method.
pub(crate) fn bind<L: ListenerMethods>(
    listener: &Arc<L>,
    propagate: bool,
) -> BusResult<Vec<Arc<Registration>>> {
    let specs = methods_of::<L>()?;
    let mut registrations = Vec::with_capacity(specs.len());

    for spec in specs.iter() {
        let id = RegistrationId::new();
        let weak = Arc::downgrade(listener);
        let method = spec.invoke.clone();
        let invoke: InvokeFn = Box::new(move |envelope, rep| match weak.upgrade() {
            None => InvokeOutcome::Gone,
            Some(listener) => match method(&listener, envelope, rep) {
                Ok(()) => InvokeOutcome::Delivered,
                Err(error) => InvokeOutcome::Failed(error),
            },
        });

        registrations.push(Arc::new(Registration::new(
            id,
            ListenerIdentity::new(type_name::<L>(), spec.name, id),
            spec.payload_type,
            spec.scope,
            spec.sources.clone(),
            spec.filter.clone(),
            spec.topic.clone(),
            propagate,
            Some(OwnerRef::of(listener)),
            invoke,
        )));
    }

    Ok(registrations)
}
