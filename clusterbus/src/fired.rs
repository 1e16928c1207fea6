//! The two representations a fired event can take, and its source.

use crate::event::{AnyEvent, Event};
use crate::key::EventTag;
use crate::payload::Payload;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An event as seen by the dispatcher: a typed value or an untyped payload.
#[derive(Clone)]
pub enum FiredEvent {
    /// A typed event constructed in this process.
    Typed(Arc<dyn AnyEvent>),
    /// A name-tagged payload, usually received from another node.
    Payload(Arc<Payload>),
}

impl FiredEvent {
    /// Wraps a typed event.
    pub fn typed<E: Event>(event: E) -> Self {
        Self::Typed(Arc::new(event))
    }

    /// Wraps a payload.
    pub fn payload(payload: Payload) -> Self {
        Self::Payload(Arc::new(payload))
    }

    /// Returns the event's own `(namespace, name)` tag.
    pub fn tag(&self) -> EventTag {
        match self {
            Self::Typed(event) => event.runtime_type().tag(),
            Self::Payload(payload) => payload.tag().clone(),
        }
    }

    /// Returns `true` for the typed representation.
    pub fn is_typed(&self) -> bool {
        matches!(self, Self::Typed(_))
    }

    /// Returns `true` when the event arrived as a payload.
    ///
    /// Handlers use this to avoid forwarding remote events back into the cluster.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Payload(_))
    }

    /// Views a typed event as `T` (its runtime type or any ancestor).
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        match self {
            Self::Typed(event) => event.downcast_ref::<T>(),
            Self::Payload(_) => None,
        }
    }

    /// Returns the payload, if this is the payload representation.
    pub fn as_payload(&self) -> Option<&Payload> {
        match self {
            Self::Typed(_) => None,
            Self::Payload(payload) => Some(payload),
        }
    }

    /// Returns the payload form, projecting typed events.
    pub fn to_payload(&self) -> Arc<Payload> {
        match self {
            Self::Typed(event) => Arc::new(Payload::project(event.as_ref())),
            Self::Payload(payload) => Arc::clone(payload),
        }
    }
}

impl<E: Event> From<E> for FiredEvent {
    fn from(event: E) -> Self {
        Self::typed(event)
    }
}

impl From<Payload> for FiredEvent {
    fn from(payload: Payload) -> Self {
        Self::payload(payload)
    }
}

impl fmt::Debug for FiredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typed(event) => f.debug_tuple("Typed").field(&event.runtime_type()).finish(),
            Self::Payload(payload) => f.debug_tuple("Payload").field(payload).finish(),
        }
    }
}

/// Who fired an event.
///
/// `Source::bus()` is the sentinel used when the caller does not name one.
#[derive(Clone, Default)]
pub struct Source(Option<Arc<dyn Any + Send + Sync>>);

impl Source {
    /// The default source: the bus itself.
    pub fn bus() -> Self {
        Self(None)
    }

    /// Wraps an arbitrary origin value.
    pub fn new<T: Any + Send + Sync>(origin: T) -> Self {
        Self(Some(Arc::new(origin)))
    }

    /// Wraps an already shared origin value.
    pub fn from_arc(origin: Arc<dyn Any + Send + Sync>) -> Self {
        Self(Some(origin))
    }

    /// Returns `true` for the bus sentinel.
    pub fn is_bus(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the origin value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|origin| origin.downcast_ref::<T>())
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bus() {
            f.write_str("Source(bus)")
        } else {
            f.write_str("Source(..)")
        }
    }
}
