//! Basic clusterbus usage: typed listeners, hierarchy and key listeners.

use clusterbus::prelude::*;
use serde::Serialize;

#[derive(Event, Clone, Debug, Serialize)]
#[event(namespace = "sess", serde)]
struct UserSessionEvent {
    jid: String,
}

#[derive(Event, Clone, Debug, Serialize)]
#[event(namespace = "sess", serde)]
struct UserConnected {
    #[event(parent)]
    session: UserSessionEvent,
    resource: String,
}

#[derive(Event, Clone, Debug, Serialize)]
#[event(namespace = "sess", serde)]
struct UserDisconnected {
    #[event(parent)]
    session: UserSessionEvent,
}

fn main() -> Result<(), EventBusError> {
    println!("🚀 clusterbus basic example");

    let bus = EventBus::new();

    // Receives every session event, including subtypes.
    bus.bind(|event: &UserSessionEvent| {
        println!("👤 session activity for {}", event.jid);
    })?;

    let connected = bus.bind(|event: &UserConnected| {
        println!("🔌 {} connected from {}", event.session.jid, event.resource);
    })?;

    // Key listeners see the payload form, whatever the runtime type.
    bus.bind_key("sess", WILDCARD, |payload: &Payload| {
        println!("📦 {} -> {}", payload.tag(), payload.content());
    })?;

    bus.fire(UserConnected {
        session: UserSessionEvent {
            jid: "alice@example.com".into(),
        },
        resource: "mobile".into(),
    })?;

    bus.fire(UserDisconnected {
        session: UserSessionEvent {
            jid: "alice@example.com".into(),
        },
    })?;

    println!("\n🧹 removing the connection listener");
    bus.unbind(connected);

    bus.fire(UserConnected {
        session: UserSessionEvent {
            jid: "bob@example.com".into(),
        },
        resource: "desktop".into(),
    })?;

    println!(
        "\n📊 {} listeners for UserConnected, {} for key sess.UserSessionEvent",
        bus.listeners_for::<UserConnected>().len(),
        bus.listeners_for_key("sess", "UserSessionEvent")?.len(),
    );

    Ok(())
}
