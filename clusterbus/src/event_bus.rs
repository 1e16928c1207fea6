//! The event bus: registration, matching and dispatch.

use crate::dispatch::DispatchPlan;
use crate::error::{
    DiscardErrorSink, ErrorSink, EventBusError, EventBusResult, HandlerError, LogErrorSink,
};
use crate::event::{Event, EventType};
use crate::executor::{Executor, ExecutorConfig, InlineExecutor};
use crate::fired::{FiredEvent, Source};
use crate::handlers::{Handler, HandlerEntry, HandlerId, HandlerRegistry, RequiredType};
use crate::key::{EventKey, EventTag, Selector};
use crate::listener::{Binding, ListenerId};
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::payload::Payload;
use crate::registry::ListenerRegistry;
use crate::subscriber::{Subscriber, SubscriberKey, SubscriberRecord, SubscriptionTable};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Configuration for an event bus.
///
/// ```rust
/// use clusterbus::{EventBusConfig, ExecutorConfig};
///
/// let config: EventBusConfig = serde_json::from_str(
///     r#"{ "executor": { "kind": "worker_pool", "workers": 2 } }"#,
/// ).unwrap();
/// assert!(config.log_callback_failures);
/// assert!(matches!(config.executor, ExecutorConfig::WorkerPool { workers: 2, .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// How deliveries are executed.
    pub executor: ExecutorConfig,

    /// Whether callback failures are logged when no error sink is supplied.
    pub log_callback_failures: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::Inline,
            log_callback_failures: true,
        }
    }
}

struct BusInner {
    config: EventBusConfig,
    listeners: ListenerRegistry,
    handlers: HandlerRegistry,
    subscribers: Mutex<HashMap<SubscriberKey, SubscriberRecord>>,
    executor: Arc<dyn Executor>,
    error_sink: Arc<dyn ErrorSink>,
    metrics: Arc<DispatchMetrics>,
    shutting_down: AtomicBool,
}

/// In-process event bus shared by the components of one node.
///
/// Cloning is cheap; clones share registries and executor. The bus is never
/// global: construct one and pass it to the components that need it.
///
/// # Examples
///
/// ```rust
/// use clusterbus::{Event, EventBus, EventTag, Payload, WILDCARD};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// #[derive(Event, Debug)]
/// #[event(namespace = "pkg")]
/// struct EventA;
///
/// #[derive(Event, Debug)]
/// #[event(namespace = "pkg")]
/// struct EventB {
///     #[event(parent)]
///     base: EventA,
/// }
///
/// let bus = EventBus::new();
/// let typed = Arc::new(AtomicUsize::new(0));
/// let keyed = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&typed);
/// bus.bind(move |_: &EventA| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }).unwrap();
///
/// let counter = Arc::clone(&keyed);
/// bus.bind_key("pkg", WILDCARD, move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }).unwrap();
///
/// bus.fire(EventB { base: EventA }).unwrap();
/// bus.fire_payload(Payload::empty(EventTag::new("pkg", "EventC"))).unwrap();
///
/// assert_eq!(typed.load(Ordering::SeqCst), 1);
/// assert_eq!(keyed.load(Ordering::SeqCst), 2);
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus that delivers inline and logs callback failures.
    pub fn new() -> Self {
        Self::from_parts(
            EventBusConfig::default(),
            Arc::new(InlineExecutor),
            Arc::new(LogErrorSink),
        )
    }

    /// Creates a bus from configuration.
    ///
    /// Fails with [`EventBusError::ConfigurationError`] when the executor
    /// cannot be built.
    pub fn with_config(config: EventBusConfig) -> EventBusResult<Self> {
        Self::builder().with_config(config).build()
    }

    /// Returns a builder for a customised bus.
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    fn from_parts(
        config: EventBusConfig,
        executor: Arc<dyn Executor>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        tracing::debug!(executor = executor.name(), "event bus created");
        Self {
            inner: Arc::new(BusInner {
                config,
                listeners: ListenerRegistry::new(),
                handlers: HandlerRegistry::new(),
                subscribers: Mutex::new(HashMap::new()),
                executor,
                error_sink,
                metrics: Arc::new(DispatchMetrics::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    // Listener registration

    /// Binds a listener to events of type `E` and every subtype of `E`.
    pub fn bind<E, F>(&self, callback: F) -> EventBusResult<ListenerId>
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.bind_fallible(move |event: &E, _: &Source| {
            callback(event);
            Ok::<(), Infallible>(())
        })
    }

    /// Like [`bind`](Self::bind), also passing the event source.
    pub fn bind_with_source<E, F>(&self, callback: F) -> EventBusResult<ListenerId>
    where
        E: Event,
        F: Fn(&E, &Source) + Send + Sync + 'static,
    {
        self.bind_fallible(move |event: &E, source: &Source| {
            callback(event, source);
            Ok::<(), Infallible>(())
        })
    }

    /// Binds a listener whose errors are reported to the error sink.
    pub fn bind_fallible<E, F, Err>(&self, callback: F) -> EventBusResult<ListenerId>
    where
        E: Event,
        F: Fn(&E, &Source) -> Result<(), Err> + Send + Sync + 'static,
        Err: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let event_type = E::event_type();
        event_type.tag().validate()?;
        let binding = Binding::typed::<E, _>(std::any::type_name::<F>(), move |event, source| {
            callback(event, source).map_err(HandlerError::failed)
        });
        let id = self.inner.listeners.insert(binding);
        tracing::debug!(listener = %id, event_type = %event_type, "listener bound to type");
        Ok(id)
    }

    /// Binds a listener to a `(namespace, name)` key.
    ///
    /// Either segment may be [`WILDCARD`](crate::WILDCARD). The listener
    /// receives the payload form of matching events: payloads whose tag
    /// matches, and typed events whose own or ancestor tag matches.
    pub fn bind_key<N, M, F>(&self, namespace: N, name: M, callback: F) -> EventBusResult<ListenerId>
    where
        N: Into<Selector>,
        M: Into<Selector>,
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.bind_key_fallible(namespace, name, move |payload: &Payload, _: &Source| {
            callback(payload);
            Ok::<(), Infallible>(())
        })
    }

    /// Like [`bind_key`](Self::bind_key), also passing the event source.
    pub fn bind_key_with_source<N, M, F>(
        &self,
        namespace: N,
        name: M,
        callback: F,
    ) -> EventBusResult<ListenerId>
    where
        N: Into<Selector>,
        M: Into<Selector>,
        F: Fn(&Payload, &Source) + Send + Sync + 'static,
    {
        self.bind_key_fallible(namespace, name, move |payload: &Payload, source: &Source| {
            callback(payload, source);
            Ok::<(), Infallible>(())
        })
    }

    /// Binds a key listener whose errors are reported to the error sink.
    pub fn bind_key_fallible<N, M, F, Err>(
        &self,
        namespace: N,
        name: M,
        callback: F,
    ) -> EventBusResult<ListenerId>
    where
        N: Into<Selector>,
        M: Into<Selector>,
        F: Fn(&Payload, &Source) -> Result<(), Err> + Send + Sync + 'static,
        Err: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let key = EventKey::new(namespace, name)?;
        let binding = Binding::keyed(key.clone(), std::any::type_name::<F>(), move |payload, source| {
            callback(payload, source).map_err(HandlerError::failed)
        });
        let id = self.inner.listeners.insert(binding);
        tracing::debug!(listener = %id, key = %key, "listener bound to key");
        Ok(id)
    }

    /// Removes one listener. Returns `false` if it was not bound.
    pub fn unbind(&self, id: ListenerId) -> bool {
        let removed = self.inner.listeners.remove(id);
        if removed {
            tracing::debug!(listener = %id, "listener unbound");
        }
        removed
    }

    // Handler registration

    /// Registers a catch-all handler.
    pub fn register<H: Handler>(&self, required: RequiredType, handler: H) -> HandlerId {
        let id = self.inner.handlers.register(required, handler);
        tracing::debug!(handler = %id, required = %required, "handler registered");
        id
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let removed = self.inner.handlers.unregister(id);
        if removed {
            tracing::debug!(handler = %id, "handler unregistered");
        }
        removed
    }

    // Bulk subscribers

    /// Binds every callback declared by `subscriber`.
    ///
    /// All declarations are validated first; on error nothing is bound.
    /// Registering the same instance twice binds its callbacks twice.
    pub fn register_all<S: Subscriber>(&self, subscriber: &Arc<S>) -> EventBusResult<Vec<ListenerId>> {
        let table = SubscriptionTable::<S>::collect();
        table.validate()?;
        // A dropped subscriber's record may share this instance's address.
        self.prune_dropped_subscribers();

        let ids: Vec<ListenerId> = table
            .into_bindings(subscriber)
            .into_iter()
            .map(|binding| self.inner.listeners.insert(binding))
            .collect();

        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(SubscriberKey::of(subscriber))
            .or_insert_with(|| SubscriberRecord::new(subscriber))
            .listeners
            .extend(ids.iter().copied());

        tracing::debug!(
            subscriber = std::any::type_name::<S>(),
            listeners = ids.len(),
            "subscriber registered"
        );
        Ok(ids)
    }

    /// Removes every binding created for `subscriber` and returns how many
    /// were removed.
    pub fn unregister_all<S: Subscriber>(&self, subscriber: &Arc<S>) -> usize {
        self.prune_dropped_subscribers();
        let ids = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&SubscriberKey::of(subscriber))
            .map(|record| record.listeners)
            .unwrap_or_default();

        let removed = ids
            .into_iter()
            .filter(|id| self.inner.listeners.remove(*id))
            .count();
        tracing::debug!(
            subscriber = std::any::type_name::<S>(),
            listeners = removed,
            "subscriber unregistered"
        );
        removed
    }

    // Firing

    /// Fires a typed event with the bus as source.
    pub fn fire<E: Event>(&self, event: E) -> EventBusResult<()> {
        self.fire_event(FiredEvent::typed(event), Source::bus())
    }

    /// Fires a typed event with an explicit source.
    pub fn fire_with_source<E: Event>(&self, event: E, source: Source) -> EventBusResult<()> {
        self.fire_event(FiredEvent::typed(event), source)
    }

    /// Fires an untyped payload, usually one received from another node.
    ///
    /// Handlers see it with the remote flag set. Type-addressed listeners
    /// never receive payloads.
    pub fn fire_payload(&self, payload: Payload) -> EventBusResult<()> {
        self.fire_event(FiredEvent::payload(payload), Source::bus())
    }

    /// Fires an untyped payload with an explicit source.
    pub fn fire_payload_with_source(&self, payload: Payload, source: Source) -> EventBusResult<()> {
        self.fire_event(FiredEvent::payload(payload), source)
    }

    /// Matches `event` against every listener and handler and submits one
    /// task per delivery to the executor.
    ///
    /// Callback failures never surface here; they go to the error sink. The
    /// only errors are [`EventBusError::ShuttingDown`] and executor rejection.
    /// A rejected delivery does not stop the others: every task is offered to
    /// the executor, and one [`EventBusError::ExecutorRejected`] summarizing
    /// the rejections is returned afterwards.
    pub fn fire_event(&self, event: FiredEvent, source: Source) -> EventBusResult<()> {
        let inner = &self.inner;
        if inner.shutting_down.load(Ordering::Acquire) {
            return Err(EventBusError::ShuttingDown);
        }

        let listeners = inner.listeners.matches(&event);
        if listeners.dead > 0 {
            self.prune_dropped_subscribers();
        }
        let handlers = inner.handlers.matching(&event);
        let plan = DispatchPlan::build(&event, source, listeners, handlers);
        let remote = event.is_remote();
        let total = plan.len();

        inner.metrics.record_fire(remote, total);
        tracing::trace!(
            tag = %event.tag(),
            remote,
            deliveries = total,
            "firing event"
        );
        if plan.is_empty() {
            return Ok(());
        }

        let mut rejected = 0;
        let mut last_error = None;
        for task in plan.into_tasks(Arc::clone(&inner.error_sink), Arc::clone(&inner.metrics)) {
            match inner.executor.submit(task) {
                Ok(()) => inner.metrics.record_submitted(),
                Err(error) => {
                    inner.metrics.record_rejected();
                    tracing::warn!(
                        tag = %event.tag(),
                        executor = inner.executor.name(),
                        error = %error,
                        "delivery rejected"
                    );
                    rejected += 1;
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            None => Ok(()),
            Some(error) => Err(EventBusError::executor_rejected(format!(
                "{} of {} deliveries rejected, last: {}",
                rejected, total, error
            ))),
        }
    }

    /// Drops the bindings and records of subscribers that no longer exist.
    fn prune_dropped_subscribers(&self) {
        let pruned = self.inner.listeners.prune_dead();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, record| record.is_live());
        if !pruned.is_empty() {
            tracing::debug!(listeners = pruned.len(), "pruned listeners of dropped subscribers");
        }
    }

    // Introspection

    /// Listeners a fired event would reach, each at most once.
    pub fn lookup(&self, event: &FiredEvent) -> Vec<Arc<Binding>> {
        self.inner.listeners.matches(event).into_vec()
    }

    /// Listeners a typed event of type `E` would reach.
    pub fn listeners_for<E: Event>(&self) -> Vec<Arc<Binding>> {
        self.listeners_for_type(E::event_type())
    }

    /// Listeners a typed event of runtime type `event_type` would reach.
    pub fn listeners_for_type(&self, event_type: EventType) -> Vec<Arc<Binding>> {
        self.inner.listeners.matches_type(&event_type).into_vec()
    }

    /// Listeners registered for the concrete key `(namespace, name)`.
    ///
    /// Returns key listeners that match the tag, with wildcards, and type
    /// listeners whose own type carries exactly this tag. No hierarchy is
    /// walked.
    pub fn listeners_for_key<N, M>(&self, namespace: N, name: M) -> EventBusResult<Vec<Arc<Binding>>>
    where
        N: Into<Cow<'static, str>>,
        M: Into<Cow<'static, str>>,
    {
        let tag = EventTag::new(namespace, name);
        tag.validate()?;
        Ok(self.inner.listeners.lookup_key(&tag))
    }

    /// Handlers whose filter accepts `event`.
    pub fn matching_handlers(&self, event: &FiredEvent) -> Vec<Arc<HandlerEntry>> {
        self.inner.handlers.matching(event)
    }

    /// Number of bound listeners. Listeners of dropped subscribers are
    /// removed first and not counted.
    pub fn listener_count(&self) -> usize {
        self.prune_dropped_subscribers();
        self.inner.listeners.len()
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.len()
    }

    /// Removes every listener, handler and subscriber record.
    pub fn clear(&self) {
        self.inner.listeners.clear();
        self.inner.handlers.clear();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    // Lifecycle

    /// Current dispatch counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stops accepting fires and waits for queued deliveries to finish.
    ///
    /// Registration stays possible afterwards, but nothing is delivered.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(executor = self.inner.executor.name(), "event bus shutting down");
        self.inner.executor.shutdown();
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Returns the configuration the bus was built from.
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("executor", &self.inner.executor.name())
            .field("listeners", &self.listener_count())
            .field("handlers", &self.handler_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// Builder for [`EventBus`].
///
/// ```rust
/// use clusterbus::{CallbackFailure, EventBus, WorkerPool};
/// use std::sync::Arc;
///
/// let bus = EventBus::builder()
///     .with_executor(Arc::new(WorkerPool::new(2, 64).unwrap()))
///     .with_error_sink(|failure: CallbackFailure| eprintln!("{}", failure))
///     .build()
///     .unwrap();
/// bus.shutdown();
/// ```
#[derive(Default)]
pub struct EventBusBuilder {
    config: EventBusConfig,
    executor: Option<Arc<dyn Executor>>,
    error_sink: Option<Arc<dyn ErrorSink>>,
}

impl EventBusBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Selects the executor through configuration.
    pub fn with_executor_config(mut self, executor: ExecutorConfig) -> Self {
        self.config.executor = executor;
        self
    }

    /// Uses an already constructed executor, ignoring the executor config.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sends callback failures to `sink`.
    pub fn with_error_sink<S: ErrorSink>(mut self, sink: S) -> Self {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Enables or disables logging of callback failures.
    ///
    /// Has no effect when an error sink is supplied.
    pub fn with_failure_logging(mut self, enabled: bool) -> Self {
        self.config.log_callback_failures = enabled;
        self
    }

    /// Builds the bus.
    pub fn build(self) -> EventBusResult<EventBus> {
        let executor = match self.executor {
            Some(executor) => executor,
            None => self.config.executor.build()?,
        };
        let error_sink = match self.error_sink {
            Some(sink) => sink,
            None if self.config.log_callback_failures => Arc::new(LogErrorSink),
            None => Arc::new(DiscardErrorSink),
        };
        Ok(EventBus::from_parts(self.config, executor, error_sink))
    }
}
