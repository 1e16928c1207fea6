//! Listener bindings.
//!
//! A binding ties one callback to either an event type or an [`EventKey`].
//! Type-addressed callbacks receive the typed event (viewed as the bound type);
//! key-addressed callbacks receive the [`Payload`] form.

use crate::error::{CallbackResult, HandlerError};
use crate::event::{AnyEvent, Event, EventType};
use crate::fired::Source;
use crate::key::EventKey;
use crate::payload::Payload;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for a listener binding.
///
/// Returned by every `bind*` call and accepted by `unbind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this listener ID.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

/// What a binding is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingTarget {
    /// A concrete event type; also matches its subtypes.
    Type(EventType),
    /// A literal or wildcarded namespace/name key.
    Key(EventKey),
}

pub(crate) type TypedCallback = Arc<dyn Fn(&dyn AnyEvent, &Source) -> CallbackResult + Send + Sync>;
pub(crate) type PayloadCallback = Arc<dyn Fn(&Payload, &Source) -> CallbackResult + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Callback {
    Typed(TypedCallback),
    Payload(PayloadCallback),
}

/// A registered listener.
pub struct Binding {
    id: ListenerId,
    target: BindingTarget,
    name: &'static str,
    callback: Callback,
    // Set for subscriber bindings; the binding is dead once the owner is dropped.
    owner: Option<Weak<dyn Any + Send + Sync>>,
}

impl Binding {
    /// Type-addressed binding for `E` whose callback sees the event as `&E`.
    pub(crate) fn typed<E, F>(name: &'static str, callback: F) -> Self
    where
        E: Event,
        F: Fn(&E, &Source) -> CallbackResult + Send + Sync + 'static,
    {
        let callback: TypedCallback = Arc::new(move |event: &dyn AnyEvent, source: &Source| {
            match event.ancestor(TypeId::of::<E>()).and_then(|any| any.downcast_ref::<E>()) {
                Some(event) => callback(event, source),
                None => Err(HandlerError::failed(format!(
                    "{} is not a {}",
                    event.runtime_type(),
                    E::event_type()
                ))),
            }
        });
        Self::erased_typed(E::event_type(), name, callback)
    }

    /// Type-addressed binding with an already erased callback.
    pub(crate) fn erased_typed(
        event_type: EventType,
        name: &'static str,
        callback: TypedCallback,
    ) -> Self {
        Self {
            id: ListenerId::new(),
            target: BindingTarget::Type(event_type),
            name,
            callback: Callback::Typed(callback),
            owner: None,
        }
    }

    /// Key-addressed binding.
    pub(crate) fn keyed<F>(key: EventKey, name: &'static str, callback: F) -> Self
    where
        F: Fn(&Payload, &Source) -> CallbackResult + Send + Sync + 'static,
    {
        Self {
            id: ListenerId::new(),
            target: BindingTarget::Key(key),
            name,
            callback: Callback::Payload(Arc::new(callback)),
            owner: None,
        }
    }

    /// Returns the binding's ID.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns what the binding is addressed to.
    pub fn target(&self) -> &BindingTarget {
        &self.target
    }

    /// Returns the diagnostic name of the callback.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn callback(&self) -> &Callback {
        &self.callback
    }

    /// Ties the binding's lifetime to `owner`.
    pub(crate) fn owned_by(mut self, owner: Weak<dyn Any + Send + Sync>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Returns `false` once the owning subscriber has been dropped.
    pub fn is_live(&self) -> bool {
        self.owner
            .as_ref()
            .map_or(true, |owner| owner.strong_count() > 0)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("name", &self.name)
            .finish()
    }
}
