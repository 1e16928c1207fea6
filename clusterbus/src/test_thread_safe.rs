//! Concurrent use of one bus from many threads.

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::testing::Recorder;
    use crate::{EventBusConfig, ExecutorConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[derive(Event, Clone, Debug)]
    #[event(namespace = "sm")]
    struct StreamOpened {
        id: u64,
    }

    #[derive(Event, Clone, Debug)]
    #[event(namespace = "sm")]
    struct StreamResumed {
        #[event(parent)]
        opened: StreamOpened,
    }

    fn pooled_bus(workers: usize) -> EventBus {
        EventBus::with_config(EventBusConfig {
            executor: ExecutorConfig::WorkerPool {
                workers,
                queue_capacity: 256,
            },
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_fire_from_many_threads() {
        let bus = pooled_bus(4);
        let seen = Recorder::new();
        let sink = seen.clone();
        bus.bind(move |event: &StreamOpened| sink.record(event.id))
            .unwrap();

        let producers: Vec<_> = (0..8u64)
            .map(|thread_index| {
                let bus = bus.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        bus.fire(StreamOpened {
                            id: thread_index * 1000 + i,
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(seen.wait_for(400, Duration::from_secs(10)));
        let mut ids = seen.snapshot();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 400);
        bus.shutdown();
    }

    #[test]
    fn test_bind_and_unbind_while_firing() {
        let bus = pooled_bus(2);
        let delivered = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&delivered);
        let anchor = bus
            .bind(move |_: &StreamOpened| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let churn = {
            let bus = bus.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let id = bus.bind_key("sm", WILDCARD, |_| {}).unwrap();
                    assert!(bus.unbind(id));
                }
            })
        };
        let firing = {
            let bus = bus.clone();
            thread::spawn(move || {
                for id in 0..200 {
                    bus.fire(StreamResumed {
                        opened: StreamOpened { id },
                    })
                    .unwrap();
                }
            })
        };
        churn.join().unwrap();
        firing.join().unwrap();

        // Shutdown drains the queue.
        bus.shutdown();
        assert_eq!(delivered.load(Ordering::SeqCst), 200);
        assert_eq!(bus.listener_count(), 1);
        assert!(bus.unbind(anchor));
    }

    #[test]
    fn test_handlers_registered_across_threads() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let registrars: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                let hits = Arc::clone(&hits);
                thread::spawn(move || {
                    bus.register(
                        RequiredType::Typed,
                        move |_: &FiredEvent, _: &Source, _: bool| -> CallbackResult {
                            hits.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        },
                    )
                })
            })
            .collect();
        let ids: Vec<HandlerId> = registrars
            .into_iter()
            .map(|registrar| registrar.join().unwrap())
            .collect();

        assert_eq!(bus.handler_count(), 4);
        bus.fire(StreamOpened { id: 1 }).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 4);

        for id in ids {
            assert!(bus.unregister(id));
        }
        bus.fire(StreamOpened { id: 2 }).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_fire_after_shutdown_is_rejected_on_every_clone() {
        let bus = pooled_bus(1);
        let clone = bus.clone();
        bus.shutdown();

        assert!(clone.is_shutting_down());
        assert!(matches!(
            clone.fire(StreamOpened { id: 0 }),
            Err(EventBusError::ShuttingDown)
        ));
        // A second shutdown is a no-op.
        clone.shutdown();
    }

    #[test]
    fn test_nested_fire_from_worker_does_not_deadlock() {
        let bus = EventBus::with_config(EventBusConfig {
            executor: ExecutorConfig::WorkerPool {
                workers: 1,
                queue_capacity: 1,
            },
            ..Default::default()
        })
        .unwrap();
        let resumed = Recorder::new();

        let inner = bus.clone();
        bus.bind(move |event: &StreamOpened| {
            if event.id < 20 {
                inner
                    .fire(StreamOpened { id: event.id + 1 })
                    .unwrap();
            }
        })
        .unwrap();
        let sink = resumed.clone();
        bus.bind(move |event: &StreamOpened| sink.record(event.id))
            .unwrap();

        bus.fire(StreamOpened { id: 0 }).unwrap();
        assert!(resumed.wait_for(21, Duration::from_secs(10)));
        bus.shutdown();
    }
}
