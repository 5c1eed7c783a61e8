//! Hierarchical, scope-aware publish/subscribe in process.
//!
//! Buses form a tree mirroring the [`Scope`] chain (application, session,
//! ui, view). An event is published at a scope and delivered synchronously
//! to the bus owning that scope and, for propagating registrations, to
//! every descendant bus. Listeners subscribe by declaring handler methods
//! ([`ListenerMethods`]), as a typed listener object
//! ([`EventBusListener`]), or as a plain closure; object subscriptions are
//! held weakly, so dropping the listener retires them.
//!
//! ```no_run
//! use std::sync::Arc;
//! use scopebus::{EventBus, ListenerMethods, MethodRegistrar, Scope};
//!
//! struct Sidebar;
//!
//! impl Sidebar {
//!     fn on_alert(&self, message: &String) {
//!         println!("alert: {message}");
//!     }
//! }
//!
//! impl ListenerMethods for Sidebar {
//!     fn listener_methods(methods: &mut MethodRegistrar<Self>) {
//!         methods.payload("on_alert", Self::on_alert).topic("alerts");
//!     }
//! }
//!
//! let root = EventBus::create_root(Scope::Application);
//! let sidebar = Arc::new(Sidebar);
//! root.subscribe(&sidebar).unwrap();
//!
//! struct App;
//! root.publish_topic(&App, "alerts", String::from("disk full")).unwrap();
//! ```

pub mod adapter;
pub mod bus;
pub mod event;
pub mod filter;
pub mod hierarchy;
pub mod listener;
mod registration;
pub mod registry;
pub mod topic;

pub use adapter::{ListenerMethods, MethodOptions, MethodRegistrar};
pub use bus::EventBus;
pub use event::{EventEnvelope, Payload, ScopedEvent, SourceInfo};
pub use filter::{EventFilter, ListenerIdentity};
pub use hierarchy::BusHierarchy;
pub use listener::EventBusListener;
pub use registration::HandlerError;
pub use registry::{DeliveryFailure, DeliveryReport};
pub use topic::{ExactTopicFilter, TopicFilter};

pub use scopebus_core::{BusError, BusId, BusResult, EventId, RegistrationId, Scope};
