//! Turning one fired event into independent delivery tasks.
//!
//! A [`DispatchPlan`] is built from the registry snapshots taken for one
//! `fire` call. Each [`Delivery`] owns everything it needs (the binding or
//! handler, the event in the representation that callback expects, and the
//! shared context), so it can run on any executor thread after the registry
//! locks are released.

use crate::error::{CallbackFailure, CallbackRef, CallbackResult, ErrorSink, HandlerError};
use crate::event::AnyEvent;
use crate::executor::Task;
use crate::fired::{FiredEvent, Source};
use crate::handlers::HandlerEntry;
use crate::key::EventTag;
use crate::listener::{Binding, Callback};
use crate::metrics::DispatchMetrics;
use crate::payload::Payload;
use crate::registry::ListenerMatches;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// State shared by every delivery of one fired event.
#[derive(Debug)]
pub(crate) struct DeliveryContext {
    pub(crate) source: Source,
    pub(crate) remote: bool,
    pub(crate) tag: EventTag,
}

/// One callback invocation.
pub(crate) enum Delivery {
    /// A type-addressed listener receiving the typed event.
    Typed {
        binding: Arc<Binding>,
        event: Arc<dyn AnyEvent>,
    },
    /// A key-addressed listener receiving the payload form.
    Payload {
        binding: Arc<Binding>,
        payload: Arc<Payload>,
    },
    /// A catch-all handler receiving the representation its filter asks for.
    Handler {
        entry: Arc<HandlerEntry>,
        event: FiredEvent,
    },
}

impl Delivery {
    fn callback_ref(&self) -> (CallbackRef, &'static str) {
        match self {
            Self::Typed { binding, .. } | Self::Payload { binding, .. } => {
                (CallbackRef::Listener(binding.id()), binding.name())
            }
            Self::Handler { entry, .. } => (CallbackRef::Handler(entry.id()), entry.name()),
        }
    }

    fn invoke(&self, context: &DeliveryContext) -> CallbackResult {
        match self {
            Self::Typed { binding, event } => match binding.callback() {
                Callback::Typed(callback) => callback(event.as_ref(), &context.source),
                Callback::Payload(callback) => {
                    callback(&Payload::project(event.as_ref()), &context.source)
                }
            },
            Self::Payload { binding, payload } => match binding.callback() {
                Callback::Payload(callback) => callback(payload, &context.source),
                Callback::Typed(_) => Err(HandlerError::failed(format!(
                    "{} cannot receive a payload",
                    binding.id()
                ))),
            },
            Self::Handler { entry, event } => {
                entry.handler().handle(event, &context.source, context.remote)
            }
        }
    }

    /// Runs the callback, containing errors and panics.
    ///
    /// Returns the failure instead of propagating it; the caller decides
    /// where it is reported.
    pub(crate) fn run(&self, context: &DeliveryContext) -> Result<(), CallbackFailure> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.invoke(context)))
            .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));

        outcome.map_err(|error| {
            let (callback, name) = self.callback_ref();
            CallbackFailure {
                callback,
                name,
                tag: context.tag.clone(),
                remote: context.remote,
                error,
            }
        })
    }
}

/// All deliveries for one fired event, in submission order.
///
/// Type-addressed listeners come first, then key-addressed listeners (which
/// see the projected payload for typed events), then handlers.
pub(crate) struct DispatchPlan {
    deliveries: Vec<Delivery>,
    context: Arc<DeliveryContext>,
}

impl DispatchPlan {
    pub(crate) fn build(
        event: &FiredEvent,
        source: Source,
        listeners: ListenerMatches,
        handlers: Vec<Arc<HandlerEntry>>,
    ) -> Self {
        let mut projected: Option<Arc<Payload>> = None;
        let mut payload_form = || Arc::clone(projected.get_or_insert_with(|| event.to_payload()));

        let mut deliveries = Vec::with_capacity(listeners.len() + handlers.len());

        if let FiredEvent::Typed(typed) = event {
            deliveries.extend(listeners.typed.into_iter().map(|binding| Delivery::Typed {
                binding,
                event: Arc::clone(typed),
            }));
        }
        for binding in listeners.keyed {
            deliveries.push(Delivery::Payload {
                binding,
                payload: payload_form(),
            });
        }
        for entry in handlers {
            let delivered = if entry.required_type().wants_payload() {
                FiredEvent::Payload(payload_form())
            } else {
                event.clone()
            };
            deliveries.push(Delivery::Handler {
                entry,
                event: delivered,
            });
        }

        Self {
            deliveries,
            context: Arc::new(DeliveryContext {
                source,
                remote: event.is_remote(),
                tag: event.tag(),
            }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Converts the plan into executor tasks that report to `sink`.
    pub(crate) fn into_tasks(
        self,
        sink: Arc<dyn ErrorSink>,
        metrics: Arc<DispatchMetrics>,
    ) -> impl Iterator<Item = Task> {
        let context = self.context;
        self.deliveries.into_iter().map(move |delivery| {
            let context = Arc::clone(&context);
            let sink = Arc::clone(&sink);
            let metrics = Arc::clone(&metrics);
            let task: Task = Box::new(move || {
                let result = delivery.run(&context);
                metrics.record_completed(result.is_err());
                if let Err(failure) = result {
                    sink.report(failure);
                }
            });
            task
        })
    }
}
