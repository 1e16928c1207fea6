//! Bulk subscriber registration.
//!
//! A [`Subscriber`] lists its callbacks in an explicit [`SubscriptionTable`].
//! [`EventBus::register_all`](crate::EventBus::register_all) turns each entry
//! into an ordinary type-addressed binding and remembers which bindings belong
//! to the subscriber instance, so
//! [`EventBus::unregister_all`](crate::EventBus::unregister_all) can remove
//! exactly those.
//!
//! Callbacks hold a weak reference to the subscriber; a dropped subscriber
//! silently stops receiving events.
//!
//! ```rust
//! use clusterbus::{Event, EventBus, Subscriber, SubscriptionTable};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! #[derive(Event, Debug)]
//! struct SessionOpened {
//!     jid: String,
//! }
//!
//! #[derive(Default)]
//! struct SessionCounter {
//!     open: AtomicUsize,
//! }
//!
//! impl Subscriber for SessionCounter {
//!     fn subscriptions(table: &mut SubscriptionTable<Self>) {
//!         table.on(|counter: &Self, _event: &SessionOpened| {
//!             counter.open.fetch_add(1, Ordering::SeqCst);
//!         });
//!     }
//! }
//!
//! let bus = EventBus::new();
//! let counter = Arc::new(SessionCounter::default());
//! bus.register_all(&counter).unwrap();
//!
//! bus.fire(SessionOpened { jid: "alice@example.com".into() }).unwrap();
//! assert_eq!(counter.open.load(Ordering::SeqCst), 1);
//!
//! assert_eq!(bus.unregister_all(&counter), 1);
//! bus.fire(SessionOpened { jid: "bob@example.com".into() }).unwrap();
//! assert_eq!(counter.open.load(Ordering::SeqCst), 1);
//! ```

use crate::error::{EventBusResult, HandlerError};
use crate::event::{Event, EventType};
use crate::fired::Source;
use crate::listener::{Binding, ListenerId};
use std::any::{Any, TypeId};
use std::convert::Infallible;
use std::sync::{Arc, Weak};

/// An object whose callbacks are registered and removed as a group.
pub trait Subscriber: Send + Sync + Sized + 'static {
    /// Declares the subscriber's callbacks.
    fn subscriptions(table: &mut SubscriptionTable<Self>);
}

type MakeBinding<S> = Box<dyn FnOnce(Weak<S>) -> Binding>;

struct Subscription<S> {
    event_type: EventType,
    make: MakeBinding<S>,
}

/// The callbacks declared by one [`Subscriber`] type.
pub struct SubscriptionTable<S> {
    entries: Vec<Subscription<S>>,
}

impl<S: Subscriber> SubscriptionTable<S> {
    pub(crate) fn collect() -> Self {
        let mut table = Self {
            entries: Vec::new(),
        };
        S::subscriptions(&mut table);
        table
    }

    /// Subscribes `callback` to events of type `E` and its subtypes.
    pub fn on<E, F>(&mut self, callback: F) -> &mut Self
    where
        E: Event,
        F: Fn(&S, &E) + Send + Sync + 'static,
    {
        self.on_fallible(move |subscriber: &S, event: &E, _source: &Source| {
            callback(subscriber, event);
            Ok::<(), Infallible>(())
        })
    }

    /// Like [`on`](Self::on), also passing the event source.
    pub fn on_with_source<E, F>(&mut self, callback: F) -> &mut Self
    where
        E: Event,
        F: Fn(&S, &E, &Source) + Send + Sync + 'static,
    {
        self.on_fallible(move |subscriber: &S, event: &E, source: &Source| {
            callback(subscriber, event, source);
            Ok::<(), Infallible>(())
        })
    }

    /// Subscribes a callback whose errors are reported to the bus's error sink.
    pub fn on_fallible<E, F, Err>(&mut self, callback: F) -> &mut Self
    where
        E: Event,
        F: Fn(&S, &E, &Source) -> Result<(), Err> + Send + Sync + 'static,
        Err: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let make: MakeBinding<S> = Box::new(move |subscriber: Weak<S>| {
            Binding::typed::<E, _>(std::any::type_name::<S>(), move |event, source| {
                match subscriber.upgrade() {
                    Some(subscriber) => callback(&subscriber, event, source).map_err(HandlerError::failed),
                    None => Ok(()),
                }
            })
        });
        self.entries.push(Subscription {
            event_type: E::event_type(),
            make,
        });
        self
    }

    /// Number of declared callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Event types in declaration order.
    pub fn event_types(&self) -> impl Iterator<Item = EventType> + '_ {
        self.entries.iter().map(|entry| entry.event_type)
    }

    /// Checks every declared event type before anything is registered.
    pub(crate) fn validate(&self) -> EventBusResult<()> {
        self.entries
            .iter()
            .try_for_each(|entry| entry.event_type.tag().validate())
    }

    /// Creates one binding per entry, bound to `subscriber` and owned by it.
    pub(crate) fn into_bindings(self, subscriber: &Arc<S>) -> Vec<Binding> {
        let owner: Weak<dyn Any + Send + Sync> = Arc::<S>::downgrade(subscriber);
        self.entries
            .into_iter()
            .map(|entry| (entry.make)(Arc::downgrade(subscriber)).owned_by(owner.clone()))
            .collect()
    }
}

/// Identity of one subscriber instance: its type and its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriberKey {
    type_id: TypeId,
    address: usize,
}

impl SubscriberKey {
    pub(crate) fn of<S: Subscriber>(subscriber: &Arc<S>) -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            address: Arc::as_ptr(subscriber) as usize,
        }
    }
}

/// The listeners bound for one subscriber instance.
pub(crate) struct SubscriberRecord {
    owner: Weak<dyn Any + Send + Sync>,
    pub(crate) listeners: Vec<ListenerId>,
}

impl SubscriberRecord {
    pub(crate) fn new<S: Subscriber>(subscriber: &Arc<S>) -> Self {
        let owner: Weak<dyn Any + Send + Sync> = Arc::<S>::downgrade(subscriber);
        Self {
            owner,
            listeners: Vec::new(),
        }
    }

    /// Returns `false` once the subscriber has been dropped.
    pub(crate) fn is_live(&self) -> bool {
        self.owner.strong_count() > 0
    }
}
