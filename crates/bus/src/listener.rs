//! Direct typed-listener subscription form.

use crate::event::{Payload, ScopedEvent};
use crate::registration::HandlerError;

/// A listener object typed for one payload.
///
/// This is the direct subscription form: one registration per
/// `subscribe_listener` call, no scope/source/topic constraints (it
/// accepts only untopiced events). For constrained or multi-method
/// listeners, declare methods via [`ListenerMethods`] instead.
///
/// Return `Err` to report a delivery failure; it is collected into the
/// publish call's [`DeliveryReport`] without affecting other listeners.
///
/// [`ListenerMethods`]: crate::adapter::ListenerMethods
/// [`DeliveryReport`]: crate::registry::DeliveryReport
pub trait EventBusListener<P: Payload>: Send + Sync + 'static {
    fn on_event(&self, event: ScopedEvent<'_, P>) -> Result<(), HandlerError>;
}
