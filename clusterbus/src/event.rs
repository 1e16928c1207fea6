//! Core event traits and type descriptors.
//!
//! A typed event is described by an [`EventType`]: its `TypeId`, its
//! namespace/name tag, and an optional parent type. Subtyping is modelled by
//! composition: a child event embeds its parent value and exposes it through
//! [`Event::upcast`], so a listener bound to the parent receives a reference to
//! the embedded value.

use crate::key::EventTag;
use std::any::{Any, TypeId};
use std::fmt;

/// Upper bound on ancestor chain length, guarding against cyclic manual impls.
pub const MAX_ANCESTRY_DEPTH: usize = 64;

/// Core trait that all typed events must implement.
///
/// Most events should use `#[derive(Event)]`:
///
/// ```rust
/// use clusterbus::Event;
///
/// #[derive(Event, Clone, Debug)]
/// #[event(namespace = "sess")]
/// struct UserConnected {
///     jid: String,
/// }
///
/// #[derive(Event, Clone, Debug)]
/// #[event(namespace = "sess")]
/// struct UserReconnected {
///     #[event(parent)]
///     base: UserConnected,
///     attempts: u32,
/// }
///
/// assert_eq!(UserConnected::event_type().name(), "UserConnected");
/// assert!(UserReconnected::event_type().is_subtype_of(&UserConnected::event_type()));
/// ```
///
/// # Manual Implementation
///
/// ```rust
/// use clusterbus::{Event, EventType};
/// use std::any::{Any, TypeId};
///
/// struct Base;
///
/// impl Event for Base {
///     fn event_type() -> EventType {
///         EventType::of::<Self>("app", "Base", None)
///     }
/// }
///
/// struct Child {
///     base: Base,
/// }
///
/// impl Event for Child {
///     fn event_type() -> EventType {
///         EventType::of::<Self>("app", "Child", Some(Base::event_type))
///     }
///
///     fn upcast(&self, target: TypeId) -> Option<&dyn Any> {
///         if target == TypeId::of::<Self>() {
///             return Some(self);
///         }
///         self.base.upcast(target)
///     }
/// }
/// ```
pub trait Event: Send + Sync + Sized + 'static {
    /// Returns the descriptor of this event type.
    fn event_type() -> EventType;

    /// Returns `self`, or the embedded ancestor value whose type is `target`.
    ///
    /// Types with a parent must forward to the parent value so that every
    /// entry of [`EventType::ancestry`] can be reached.
    fn upcast(&self, target: TypeId) -> Option<&dyn Any> {
        if target == TypeId::of::<Self>() {
            Some(self)
        } else {
            None
        }
    }

    /// Returns the structured content carried by the payload projection.
    fn to_content(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Object-safe view of a typed event, implemented for every [`Event`].
pub trait AnyEvent: Send + Sync + 'static {
    /// Returns the descriptor of the event's runtime type.
    fn runtime_type(&self) -> EventType;

    /// Returns the value viewed as the ancestor type `target`, if it is one.
    fn ancestor(&self, target: TypeId) -> Option<&dyn Any>;

    /// Returns the structured content used for projection.
    fn content(&self) -> serde_json::Value;

    /// Returns a reference to self as Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Event> AnyEvent for T {
    fn runtime_type(&self) -> EventType {
        T::event_type()
    }

    fn ancestor(&self, target: TypeId) -> Option<&dyn Any> {
        Event::upcast(self, target)
    }

    fn content(&self) -> serde_json::Value {
        Event::to_content(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyEvent {
    /// Views the event as `T`, which may be its runtime type or any ancestor.
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.ancestor(TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }
}

impl fmt::Debug for dyn AnyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyEvent")
            .field("type", &self.runtime_type())
            .finish()
    }
}

/// Descriptor of a typed event: identity, tag, and parent.
#[derive(Clone, Copy)]
pub struct EventType {
    type_id: TypeId,
    type_name: &'static str,
    namespace: &'static str,
    name: &'static str,
    parent: Option<fn() -> EventType>,
}

impl EventType {
    /// Describes `T` with the given tag and optional parent descriptor.
    pub fn of<T: 'static>(
        namespace: &'static str,
        name: &'static str,
        parent: Option<fn() -> EventType>,
    ) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            namespace,
            name,
            parent,
        }
    }

    /// Returns the `TypeId` of the described type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the Rust type name, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Returns the simple name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the `(namespace, name)` tag.
    pub fn tag(&self) -> EventTag {
        EventTag::from_static(self.namespace, self.name)
    }

    /// Returns the declared parent type.
    pub fn parent(&self) -> Option<EventType> {
        self.parent.map(|parent| parent())
    }

    /// Iterates over this type followed by its successive ancestors.
    pub fn ancestry(&self) -> Ancestry {
        Ancestry {
            next: Some(*self),
            remaining: MAX_ANCESTRY_DEPTH,
        }
    }

    /// Returns `true` when `self` is `other` or a declared subtype of it.
    pub fn is_subtype_of(&self, other: &EventType) -> bool {
        self.ancestry().any(|ancestor| ancestor == *other)
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EventType {}

impl std::hash::Hash for EventType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventType")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Iterator over an ancestor chain, starting with the type itself.
#[derive(Debug, Clone)]
pub struct Ancestry {
    next: Option<EventType>,
    remaining: usize,
}

impl Iterator for Ancestry {
    type Item = EventType;

    fn next(&mut self) -> Option<EventType> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}
