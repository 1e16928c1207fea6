//! Bulk registration of subscriber callbacks.

use crate::prelude::*;
use crate::testing::Recorder;
use crate::EventType;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Event, Debug, Clone, Default)]
#[event(namespace = "tigase.eventbus")]
struct Event1;

#[derive(Event, Debug, Clone, Default)]
#[event(namespace = "tigase.eventbus")]
struct Event12 {
    #[event(parent)]
    base: Event1,
}

#[derive(Debug)]
struct Transport;

#[derive(Default)]
struct Consumer {
    calls: Recorder<&'static str>,
}

impl Subscriber for Consumer {
    fn subscriptions(table: &mut SubscriptionTable<Self>) {
        table
            .on(|consumer: &Self, _: &Event1| consumer.calls.record("event1"))
            .on(|consumer: &Self, _: &Event12| consumer.calls.record("event12"))
            .on_with_source(|consumer: &Self, _: &Event12, source: &Source| {
                if source.downcast_ref::<Transport>().is_some() {
                    consumer.calls.record("event12-from-transport");
                }
            });
    }
}

#[test]
fn test_register_all_binds_every_declared_callback() {
    let bus = EventBus::new();
    let consumer = Arc::new(Consumer::default());

    let ids = bus.register_all(&consumer).unwrap();
    assert_eq!(ids.len(), 3);
    assert_eq!(bus.listener_count(), 3);

    bus.fire_with_source(Event12::default(), Source::new(Transport))
        .unwrap();
    let mut calls = consumer.calls.take();
    calls.sort_unstable();
    assert_eq!(calls, vec!["event1", "event12", "event12-from-transport"]);

    bus.fire(Event12::default()).unwrap();
    assert_eq!(consumer.calls.len(), 2);
    consumer.calls.take();

    bus.fire(Event1).unwrap();
    assert_eq!(consumer.calls.take(), vec!["event1"]);

    assert_eq!(bus.unregister_all(&consumer), 3);
    assert_eq!(bus.listener_count(), 0);

    bus.fire(Event12::default()).unwrap();
    assert!(consumer.calls.is_empty());
}

#[test]
fn test_unregister_all_leaves_other_bindings() {
    let bus = EventBus::new();
    let consumer = Arc::new(Consumer::default());
    let other = Arc::new(Consumer::default());
    let direct = Recorder::new();

    bus.register_all(&consumer).unwrap();
    bus.register_all(&other).unwrap();
    let sink = direct.clone();
    bus.bind(move |_: &Event1| sink.record(())).unwrap();

    assert_eq!(bus.unregister_all(&consumer), 3);
    assert_eq!(bus.unregister_all(&consumer), 0);

    bus.fire(Event1).unwrap();
    assert!(consumer.calls.is_empty());
    assert_eq!(other.calls.take(), vec!["event1"]);
    assert_eq!(direct.len(), 1);
}

#[test]
fn test_registering_twice_delivers_twice() {
    let bus = EventBus::new();
    let consumer = Arc::new(Consumer::default());

    bus.register_all(&consumer).unwrap();
    bus.register_all(&consumer).unwrap();

    bus.fire(Event1).unwrap();
    assert_eq!(consumer.calls.take(), vec!["event1", "event1"]);

    assert_eq!(bus.unregister_all(&consumer), 6);
}

#[test]
fn test_dropped_subscriber_stops_receiving() {
    let bus = EventBus::new();
    let consumer = Arc::new(Consumer::default());
    let calls = consumer.calls.clone();

    bus.register_all(&consumer).unwrap();
    drop(consumer);

    bus.fire(Event12::default()).unwrap();
    assert!(calls.is_empty());
    assert_eq!(bus.metrics().callback_failures, 0);
}

#[test]
fn test_invalid_declaration_binds_nothing() {
    #[derive(Debug)]
    struct Nameless;

    impl Event for Nameless {
        fn event_type() -> EventType {
            EventType::of::<Self>("tigase.eventbus", "", None)
        }
    }

    #[derive(Default)]
    struct Broken {
        hits: AtomicUsize,
    }

    impl Subscriber for Broken {
        fn subscriptions(table: &mut SubscriptionTable<Self>) {
            table
                .on(|broken: &Self, _: &Event1| {
                    broken.hits.fetch_add(1, Ordering::SeqCst);
                })
                .on(|broken: &Self, _: &Nameless| {
                    broken.hits.fetch_add(1, Ordering::SeqCst);
                });
        }
    }

    let bus = EventBus::new();
    let broken = Arc::new(Broken::default());

    let error = bus.register_all(&broken).unwrap_err();
    assert!(matches!(error, EventBusError::InvalidRegistration { .. }));
    assert_eq!(bus.listener_count(), 0);

    bus.fire(Event1).unwrap();
    assert_eq!(broken.hits.load(Ordering::SeqCst), 0);
    assert_eq!(bus.unregister_all(&broken), 0);
}

#[test]
fn test_fallible_subscriber_errors_reach_the_sink() {
    #[derive(Default)]
    struct Strict;

    impl Subscriber for Strict {
        fn subscriptions(table: &mut SubscriptionTable<Self>) {
            table.on_fallible(|_: &Self, _: &Event1, _: &Source| {
                Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "rejected"))
            });
        }
    }

    let failures = Recorder::new();
    let sink = failures.clone();
    let bus = EventBus::builder()
        .with_error_sink(move |failure: crate::CallbackFailure| sink.record(failure.error.to_string()))
        .build()
        .unwrap();

    let strict = Arc::new(Strict);
    bus.register_all(&strict).unwrap();
    bus.fire(Event1).unwrap();

    let messages = failures.take();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("rejected"));
    assert_eq!(bus.metrics().callback_failures, 1);
}
