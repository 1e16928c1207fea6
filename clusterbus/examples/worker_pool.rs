//! Delivering events on a bounded worker pool, with bulk subscribers.

use clusterbus::prelude::*;
use clusterbus::{CallbackFailure, EventBusConfig, ExecutorConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Event, Clone, Debug)]
#[event(namespace = "tigase.stats")]
struct PacketRouted {
    size: usize,
}

#[derive(Event, Clone, Debug)]
#[event(namespace = "tigase.stats")]
struct PacketDropped {
    reason: String,
}

#[derive(Default)]
struct Statistics {
    routed_bytes: AtomicUsize,
    dropped: AtomicUsize,
}

impl Subscriber for Statistics {
    fn subscriptions(table: &mut SubscriptionTable<Self>) {
        table
            .on(|stats: &Self, event: &PacketRouted| {
                stats.routed_bytes.fetch_add(event.size, Ordering::Relaxed);
            })
            .on_fallible(|stats: &Self, event: &PacketDropped, _: &Source| {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                if event.reason.is_empty() {
                    return Err("dropped packet without a reason");
                }
                Ok(())
            });
    }
}

fn main() -> Result<(), EventBusError> {
    println!("🚀 clusterbus worker pool example");

    let config: EventBusConfig = serde_json::from_str(
        r#"{ "executor": { "kind": "worker_pool", "workers": 4, "queue_capacity": 128 } }"#,
    )
    .map_err(|error| EventBusError::configuration(error.to_string()))?;

    let bus = EventBus::builder()
        .with_config(config)
        .with_error_sink(|failure: CallbackFailure| {
            println!("⚠️  {}", failure);
        })
        .build()?;

    let stats = Arc::new(Statistics::default());
    let ids = bus.register_all(&stats)?;
    println!("📝 registered {} subscriber callbacks", ids.len());

    for size in 1..=1000 {
        bus.fire(PacketRouted { size })?;
    }
    bus.fire(PacketDropped {
        reason: "queue full".into(),
    })?;
    bus.fire(PacketDropped {
        reason: String::new(),
    })?;

    // Waits for every queued delivery.
    bus.shutdown();

    let metrics = bus.metrics();
    println!(
        "📊 routed {} bytes, dropped {} packets",
        stats.routed_bytes.load(Ordering::Relaxed),
        stats.dropped.load(Ordering::Relaxed),
    );
    println!(
        "📊 {} deliveries, {} failures, {:.0} events/s",
        metrics.deliveries_completed,
        metrics.callback_failures,
        metrics.events_per_second(),
    );

    println!("🧹 removed {} callbacks", bus.unregister_all(&stats));
    Ok(())
}
