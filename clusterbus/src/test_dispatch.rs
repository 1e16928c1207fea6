//! End-to-end dispatch scenarios on an inline bus.

use crate::prelude::*;
use crate::{CallbackResult, EventType};
use serde::Serialize;
use std::sync::{Arc, Mutex};

const NS: &str = "tigase.eventbus";

#[derive(Event, Debug, Clone, Default, Serialize)]
#[event(namespace = "tigase.eventbus", serde)]
struct Event1 {
    value: u32,
}

#[derive(Event, Debug, Clone, Default, Serialize)]
#[event(namespace = "tigase.eventbus", serde)]
struct Event12 {
    #[event(parent)]
    base: Event1,
    extra: u32,
}

#[derive(Event, Debug, Clone, Default)]
#[event(namespace = "tigase.eventbus")]
struct Event2;

fn event12() -> Event12 {
    Event12 {
        base: Event1 { value: 1 },
        extra: 2,
    }
}

/// Five result slots, like an array filled in by callbacks.
#[derive(Clone, Default)]
struct Slots(Arc<Mutex<[Option<String>; 5]>>);

impl Slots {
    fn set(&self, index: usize, value: String) {
        self.0.lock().unwrap()[index] = Some(value);
    }

    fn get(&self, index: usize) -> Option<String> {
        self.0.lock().unwrap()[index].clone()
    }

    fn filled(&self) -> [bool; 5] {
        self.0.lock().unwrap().clone().map(|slot| slot.is_some())
    }

    fn reset(&self) {
        *self.0.lock().unwrap() = Default::default();
    }
}

fn describe(event: &FiredEvent) -> String {
    match event {
        FiredEvent::Typed(typed) => format!("typed:{}", typed.runtime_type().name()),
        FiredEvent::Payload(payload) => format!("payload:{}", payload.tag()),
    }
}

struct Wired {
    bus: EventBus,
    slots: Slots,
    listeners: Vec<ListenerId>,
    handler: HandlerId,
}

/// Binds the standard five callbacks: typed `Event1`, typed `Event12`, key
/// `Event1`, key `Event12`, and an `AsIs` handler.
fn wire() -> Wired {
    let bus = EventBus::new();
    let slots = Slots::default();

    let s = slots.clone();
    let l0 = bus
        .bind(move |event: &Event1| s.set(0, format!("typed:{}", event.value)))
        .unwrap();
    let s = slots.clone();
    let l1 = bus
        .bind(move |event: &Event12| s.set(1, format!("typed:{}", event.extra)))
        .unwrap();
    let s = slots.clone();
    let l2 = bus
        .bind_key(NS, "Event1", move |payload| s.set(2, format!("payload:{}", payload.tag())))
        .unwrap();
    let s = slots.clone();
    let l3 = bus
        .bind_key(NS, "Event12", move |payload| s.set(3, format!("payload:{}", payload.tag())))
        .unwrap();
    let s = slots.clone();
    let handler = bus.register(
        RequiredType::AsIs,
        move |event: &FiredEvent, _: &Source, _: bool| -> CallbackResult {
            s.set(4, describe(event));
            Ok(())
        },
    );

    Wired {
        bus,
        slots,
        listeners: vec![l0, l1, l2, l3],
        handler,
    }
}

fn qualified(name: &str) -> Payload {
    Payload::empty(EventTag::from_qualified(&format!("{}.{}", NS, name)).unwrap())
}

#[test]
fn test_supertype_fire_skips_subtype_and_unrelated_listeners() {
    let bus = EventBus::new();
    let slots = Slots::default();

    let s = slots.clone();
    bus.bind(move |_: &Event1| s.set(1, "l".into())).unwrap();
    let s = slots.clone();
    bus.bind(move |_: &Event12| s.set(2, "l".into())).unwrap();
    let s = slots.clone();
    bus.bind(move |_: &Event2| s.set(3, "l".into())).unwrap();

    bus.fire(Event1::default()).unwrap();

    assert_eq!(slots.filled(), [false, true, false, false, false]);
}

#[test]
fn test_listeners_added_later_all_receive_subtype() {
    let bus = EventBus::new();
    bus.fire(event12()).unwrap();
    assert_eq!(bus.metrics().undelivered, 1);

    let wired = wire();
    wired.bus.fire(event12()).unwrap();
    assert_eq!(wired.slots.filled(), [true; 5]);
}

#[test]
fn test_fire_across_representations() {
    let wired = wire();
    let slots = &wired.slots;

    wired.bus.fire(Event1 { value: 7 }).unwrap();
    assert_eq!(slots.get(0).as_deref(), Some("typed:7"));
    assert_eq!(slots.get(1), None);
    assert_eq!(slots.get(2).as_deref(), Some("payload:tigase.eventbus.Event1"));
    assert_eq!(slots.get(3), None);
    assert_eq!(slots.get(4).as_deref(), Some("typed:Event1"));

    slots.reset();
    wired.bus.fire(event12()).unwrap();
    // The Event1 listener sees the embedded base value.
    assert_eq!(slots.get(0).as_deref(), Some("typed:1"));
    assert_eq!(slots.get(1).as_deref(), Some("typed:2"));
    // Key listeners receive the projection of the runtime type.
    assert_eq!(slots.get(2).as_deref(), Some("payload:tigase.eventbus.Event12"));
    assert_eq!(slots.get(3).as_deref(), Some("payload:tigase.eventbus.Event12"));
    assert_eq!(slots.get(4).as_deref(), Some("typed:Event12"));

    slots.reset();
    wired.bus.fire_payload(qualified("Event1")).unwrap();
    assert_eq!(slots.filled(), [false, false, true, false, true]);
    assert_eq!(slots.get(4).as_deref(), Some("payload:tigase.eventbus.Event1"));

    slots.reset();
    wired.bus.fire_payload(qualified("Event12")).unwrap();
    assert_eq!(slots.filled(), [false, false, false, true, true]);
}

#[test]
fn test_projected_payload_carries_serialized_content() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    bus.bind_key(NS, WILDCARD, move |payload| {
        *sink.lock().unwrap() = Some(payload.content().clone());
    })
    .unwrap();

    bus.fire(event12()).unwrap();
    assert_eq!(
        seen.lock().unwrap().clone(),
        Some(serde_json::json!({ "base": { "value": 1 }, "extra": 2 }))
    );
}

#[test]
fn test_listener_lookup_counts_with_keys_and_wildcards() {
    let bus = EventBus::new();
    bus.bind(|_: &Event1| {}).unwrap();
    bus.bind(|_: &Event12| {}).unwrap();
    bus.bind_key(NS, "Event1", |_| {}).unwrap();
    bus.bind_key(NS, WILDCARD, |_| {}).unwrap();
    bus.bind_key(WILDCARD, WILDCARD, |_| {}).unwrap();

    assert_eq!(bus.listeners_for::<Event1>().len(), 4);
    assert_eq!(bus.listeners_for_key(NS, "Event1").unwrap().len(), 4);
    assert_eq!(bus.listeners_for::<Event12>().len(), 5);
    assert_eq!(bus.lookup(&FiredEvent::typed(event12())).len(), 5);
}

#[test]
fn test_listener_lookup_counts_for_typed_bindings() {
    #[derive(Debug)]
    struct Unrelated;

    impl Event for Unrelated {
        fn event_type() -> EventType {
            EventType::of::<Self>("std", "String", None)
        }
    }

    let bus = EventBus::new();
    bus.bind(|_: &Event1| {}).unwrap();
    bus.bind(|_: &Event2| {}).unwrap();
    bus.bind(|_: &Event2| {}).unwrap();
    bus.bind(|_: &Event12| {}).unwrap();
    bus.bind(|_: &Event12| {}).unwrap();

    assert_eq!(bus.listeners_for::<Event1>().len(), 1);
    assert_eq!(bus.listeners_for::<Event2>().len(), 2);
    assert_eq!(bus.listeners_for::<Event12>().len(), 3);
    assert_eq!(bus.listeners_for::<Unrelated>().len(), 0);

    // Key lookups name one type and never walk its hierarchy.
    assert_eq!(bus.listeners_for_key(NS, "Event1").unwrap().len(), 1);
    assert_eq!(bus.listeners_for_key(NS, "Event12").unwrap().len(), 2);
    assert_eq!(bus.listeners_for_key(NS, "Missing").unwrap().len(), 0);
}

#[test]
fn test_removing_listeners_one_at_a_time() {
    let wired = wire();
    let mut expected = [true; 5];

    wired.bus.fire(event12()).unwrap();
    assert_eq!(wired.slots.filled(), expected);

    for (index, id) in wired.listeners.iter().enumerate() {
        assert!(wired.bus.unbind(*id));
        expected[index] = false;

        wired.slots.reset();
        wired.bus.fire(event12()).unwrap();
        assert_eq!(wired.slots.filled(), expected, "after removing listener {}", index);
    }

    assert!(wired.bus.unregister(wired.handler));
    wired.slots.reset();
    wired.bus.fire(event12()).unwrap();
    assert_eq!(wired.slots.filled(), [false; 5]);
}

#[test]
fn test_unbind_is_idempotent() {
    let wired = wire();
    let first = wired.listeners[0];

    assert!(wired.bus.unbind(first));
    assert!(!wired.bus.unbind(first));
    assert!(wired.bus.unregister(wired.handler));
    assert!(!wired.bus.unregister(wired.handler));
    assert_eq!(wired.bus.listener_count(), 3);
}

#[test]
fn test_handlers_are_independent_of_listeners() {
    let wired = wire();
    for id in &wired.listeners {
        wired.bus.unbind(*id);
    }
    wired.bus.fire(Event2).unwrap();
    assert_eq!(wired.slots.filled(), [false, false, false, false, true]);
    assert_eq!(wired.slots.get(4).as_deref(), Some("typed:Event2"));
}

#[test]
fn test_same_callback_bound_twice_is_two_bindings() {
    let bus = EventBus::new();
    let hits = Arc::new(Mutex::new(0));
    let callback = {
        let hits = Arc::clone(&hits);
        move |_: &Payload| *hits.lock().unwrap() += 1
    };

    let first = bus.bind_key(NS, "Event1", callback.clone()).unwrap();
    bus.bind_key(NS, WILDCARD, callback).unwrap();

    bus.fire_payload(qualified("Event1")).unwrap();
    assert_eq!(*hits.lock().unwrap(), 2);

    bus.unbind(first);
    bus.fire_payload(qualified("Event1")).unwrap();
    assert_eq!(*hits.lock().unwrap(), 3);
}
