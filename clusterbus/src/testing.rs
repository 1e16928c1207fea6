//! Testing utilities for clusterbus applications.
//!
//! [`Recorder`] collects values from callbacks, possibly running on other
//! threads, and lets a test wait for them. [`EventSpy`] attaches to a bus as a
//! catch-all handler and records every delivered event.

use crate::error::CallbackResult;
use crate::event_bus::EventBus;
use crate::fired::{FiredEvent, Source};
use crate::handlers::{HandlerId, RequiredType};
use crate::key::EventTag;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A shared, clonable list of recorded values.
///
/// # Examples
///
/// ```rust
/// use clusterbus::testing::Recorder;
/// use std::time::Duration;
///
/// let recorder = Recorder::new();
/// let sender = recorder.clone();
/// std::thread::spawn(move || sender.record(42));
///
/// assert!(recorder.wait_for(1, Duration::from_secs(5)));
/// assert_eq!(recorder.snapshot(), vec![42]);
/// ```
#[derive(Debug)]
pub struct Recorder<T> {
    shared: Arc<Shared<T>>,
}

#[derive(Debug)]
struct Shared<T> {
    values: Mutex<Vec<T>>,
    changed: Condvar,
}

impl<T> Recorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                values: Mutex::new(Vec::new()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Appends a value and wakes waiters.
    pub fn record(&self, value: T) {
        self.lock().push(value);
        self.shared.changed.notify_all();
    }

    /// Number of recorded values.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every recorded value.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.lock())
    }

    /// Blocks until at least `count` values are recorded or `timeout` passes.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut values = self.lock();
        while values.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            values = self
                .shared
                .changed
                .wait_timeout(values, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.shared
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Recorder<T> {
    /// Copies the recorded values.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().clone()
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One event observed by an [`EventSpy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpyRecord {
    /// The event's own tag.
    pub tag: EventTag,
    /// Whether it was fired as a payload.
    pub remote: bool,
    /// Whether the bus itself was the source.
    pub from_bus: bool,
}

/// Records every event a bus delivers.
///
/// # Examples
///
/// ```rust
/// use clusterbus::testing::EventSpy;
/// use clusterbus::{EventBus, EventTag, Payload};
///
/// let bus = EventBus::new();
/// let spy = EventSpy::attach(&bus);
///
/// bus.fire_payload(Payload::empty(EventTag::new("pkg", "Ping"))).unwrap();
///
/// assert_eq!(spy.count_for(&EventTag::new("pkg", "Ping")), 1);
/// assert!(spy.records()[0].remote);
/// spy.detach(&bus);
/// ```
#[derive(Debug, Clone)]
pub struct EventSpy {
    handler: HandlerId,
    records: Recorder<SpyRecord>,
}

impl EventSpy {
    /// Registers an `AsIs` handler on `bus` that records every event.
    pub fn attach(bus: &EventBus) -> Self {
        let records = Recorder::new();
        let sink = records.clone();
        let handler = bus.register(
            RequiredType::AsIs,
            move |event: &FiredEvent, source: &Source, remote: bool| -> CallbackResult {
                sink.record(SpyRecord {
                    tag: event.tag(),
                    remote,
                    from_bus: source.is_bus(),
                });
                Ok(())
            },
        );
        Self { handler, records }
    }

    /// Removes the spy's handler from `bus`.
    pub fn detach(&self, bus: &EventBus) -> bool {
        bus.unregister(self.handler)
    }

    /// Everything observed so far.
    pub fn records(&self) -> Vec<SpyRecord> {
        self.records.snapshot()
    }

    /// Number of observed events with the given tag.
    pub fn count_for(&self, tag: &EventTag) -> usize {
        self.records()
            .iter()
            .filter(|record| &record.tag == tag)
            .count()
    }

    /// Total number of observed events.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Waits until `count` events were observed.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.records.wait_for(count, timeout)
    }

    /// Forgets everything observed so far.
    pub fn clear(&self) {
        self.records.take();
    }
}
