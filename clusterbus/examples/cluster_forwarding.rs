//! Forwarding locally fired events to other cluster nodes.
//!
//! A `Payload` handler sees every event in payload form together with its
//! remote flag, so it can forward local events without echoing remote ones.

use clusterbus::prelude::*;
use clusterbus::CallbackResult;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::Mutex;

#[derive(Event, Clone, Debug, Serialize, Deserialize)]
#[event(namespace = "tigase.muc", serde)]
struct RoomCreated {
    room: String,
    owner: String,
}

/// Stands in for the connection to another node.
struct Link {
    outgoing: Mutex<mpsc::Sender<Payload>>,
}

struct Node {
    name: &'static str,
    bus: EventBus,
}

impl Node {
    fn new(name: &'static str, link: mpsc::Sender<Payload>) -> Result<Self, EventBusError> {
        let bus = EventBus::new();
        let link = Link {
            outgoing: Mutex::new(link),
        };

        bus.register(
            RequiredType::Payload,
            move |event: &FiredEvent, _: &Source, remote: bool| -> CallbackResult {
                if remote {
                    return Ok(());
                }
                let payload = event.to_payload();
                link.outgoing
                    .lock()
                    .map_err(|_| HandlerError::panic("link lock poisoned"))?
                    .send((*payload).clone())
                    .map_err(HandlerError::failed)?;
                Ok(())
            },
        );

        bus.bind_key("tigase.muc", WILDCARD, move |payload: &Payload| {
            println!("📥 [{}] key listener got {}", name, payload.tag());
        })?;

        Ok(Self { name, bus })
    }

    fn receive(&self, payload: Payload) -> Result<(), EventBusError> {
        println!("🌐 [{}] delivering remote {}", self.name, payload.tag());
        self.bus
            .fire_payload_with_source(payload, Source::new("cluster-link"))
    }
}

fn main() -> Result<(), EventBusError> {
    println!("🚀 clusterbus cluster forwarding example");

    let (to_second, from_first) = mpsc::channel();
    let (to_first, _from_second) = mpsc::channel();

    let first = Node::new("node-1", to_second)?;
    let second = Node::new("node-2", to_first)?;

    second.bus.bind(|event: &RoomCreated| {
        println!("🏠 typed listener on node-2 saw {}", event.room);
    })?;

    first.bus.fire(RoomCreated {
        room: "lobby@muc.example.com".into(),
        owner: "alice@example.com".into(),
    })?;

    for payload in from_first.try_iter() {
        let room: RoomCreated = payload
            .decode()
            .map_err(|error| EventBusError::internal(error.to_string()))?;
        println!("📨 node-2 decoded room {} owned by {}", room.room, room.owner);
        second.receive(payload)?;
    }

    // Typed listeners never see remote payloads; node-2's typed listener
    // stayed silent and node-2 did not forward the remote event back.
    println!(
        "\n📊 node-1 fired {} event(s), node-2 received {} remote event(s)",
        first.bus.metrics().fired_typed,
        second.bus.metrics().fired_payload,
    );

    Ok(())
}
