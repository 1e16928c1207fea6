//! Catch-all handlers.
//!
//! Handlers are not addressed by type or key. Each declares a
//! [`RequiredType`] filter and receives every fired event that passes it,
//! together with the source and the remote-origin flag.

use crate::error::CallbackResult;
use crate::fired::{FiredEvent, Source};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Unique identifier for a registered handler.
///
/// # Examples
///
/// ```rust
/// use clusterbus::{CallbackResult, EventBus, FiredEvent, RequiredType, Source};
///
/// let bus = EventBus::new();
/// let id = bus.register(
///     RequiredType::AsIs,
///     |_event: &FiredEvent, _source: &Source, _remote: bool| -> CallbackResult { Ok(()) },
/// );
/// assert!(bus.unregister(id));
/// assert!(!bus.unregister(id));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this handler ID.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerId({})", self.0)
    }
}

/// Which fired events a handler accepts, and in which representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RequiredType {
    /// Every event, delivered in the representation it was fired in.
    #[default]
    AsIs,
    /// Locally constructed typed events only.
    Typed,
    /// Every event, delivered in payload form. Typed events are projected.
    Payload,
}

impl RequiredType {
    /// Returns `true` if a handler with this filter receives `event`.
    pub fn accepts(self, event: &FiredEvent) -> bool {
        match self {
            Self::AsIs | Self::Payload => true,
            Self::Typed => event.is_typed(),
        }
    }

    /// Returns `true` if accepted events are delivered in payload form.
    pub fn wants_payload(self) -> bool {
        matches!(self, Self::Payload)
    }
}

impl fmt::Display for RequiredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AsIs => "as_is",
            Self::Typed => "typed",
            Self::Payload => "payload",
        })
    }
}

/// A catch-all event handler.
///
/// Closures of the form `Fn(&FiredEvent, &Source, bool) -> CallbackResult`
/// implement this trait. The `bool` is the remote-origin flag: `true` when
/// the event was fired as a payload.
pub trait Handler: Send + Sync + 'static {
    /// Handles one event.
    fn handle(&self, event: &FiredEvent, source: &Source, remote: bool) -> CallbackResult;

    /// Diagnostic name used in logs and failure reports.
    fn handler_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F> Handler for F
where
    F: Fn(&FiredEvent, &Source, bool) -> CallbackResult + Send + Sync + 'static,
{
    fn handle(&self, event: &FiredEvent, source: &Source, remote: bool) -> CallbackResult {
        self(event, source, remote)
    }
}

/// A registered handler together with its filter.
pub struct HandlerEntry {
    id: HandlerId,
    required: RequiredType,
    name: &'static str,
    handler: Arc<dyn Handler>,
}

impl HandlerEntry {
    pub(crate) fn new<H: Handler>(required: RequiredType, handler: H) -> Self {
        Self {
            id: HandlerId::new(),
            required,
            name: handler.handler_name(),
            handler: Arc::new(handler),
        }
    }

    /// Returns the handler's ID.
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Returns the handler's filter.
    pub fn required_type(&self) -> RequiredType {
        self.required
    }

    /// Returns the diagnostic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("required", &self.required)
            .field("name", &self.name)
            .finish()
    }
}

/// Thread-safe list of catch-all handlers, kept in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<Vec<Arc<HandlerEntry>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler and returns its ID.
    pub fn register<H: Handler>(&self, required: RequiredType, handler: H) -> HandlerId {
        let entry = HandlerEntry::new(required, handler);
        let id = entry.id();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(entry));
        id
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.id() != id);
        entries.len() != before
    }

    /// Handlers whose filter accepts `event`.
    pub fn matching(&self, event: &FiredEvent) -> Vec<Arc<HandlerEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.required_type().accepts(event))
            .cloned()
            .collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every handler.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}
