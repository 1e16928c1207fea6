//! # clusterbus - In-Process Event Bus for Clustered Servers
//!
//! clusterbus lets the components of one server node publish and subscribe to
//! events without knowing about each other, while staying interoperable with
//! events that arrive from other cluster nodes as untyped, name-tagged payloads.
//!
//! ## Features
//!
//! - **Typed events with hierarchy**: a listener bound to `EventA` also receives
//!   every declared subtype of `EventA`, never the reverse
//! - **Key listeners**: bind to a `(namespace, name)` pair, with wildcards, and
//!   receive the payload form of local and remote events alike
//! - **Catch-all handlers**: observe every event with a representation filter
//!   and a remote-origin flag for loop-free cluster forwarding
//! - **Pluggable delivery**: inline, bounded worker pool, or tokio
//! - **Bulk subscribers**: register and remove a component's callbacks as a group
//!
//! ## Quick Start
//!
//! ```rust
//! use clusterbus::{Event, EventBus, FiredEvent, RequiredType, Source, CallbackResult};
//!
//! #[derive(Event, Clone, Debug)]
//! #[event(namespace = "sess")]
//! struct UserConnected {
//!     jid: String,
//! }
//!
//! let bus = EventBus::new();
//!
//! bus.bind(|event: &UserConnected| {
//!     println!("{} connected", event.jid);
//! }).expect("valid event type");
//!
//! // Forward locally fired events to the rest of the cluster.
//! bus.register(
//!     RequiredType::Payload,
//!     |event: &FiredEvent, _source: &Source, remote: bool| -> CallbackResult {
//!         if !remote {
//!             let _payload = event.to_payload();
//!         }
//!         Ok(())
//!     },
//! );
//!
//! bus.fire(UserConnected { jid: "alice@example.com".into() })
//!     .expect("bus is running");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Lets the derive macro's `::clusterbus::` paths resolve inside this crate.
extern crate self as clusterbus;

// Re-export derive macro
pub use clusterbus_derive::Event;

pub mod error;
pub mod event;
pub mod event_bus;
pub mod executor;
pub mod fired;
pub mod handlers;
pub mod key;
pub mod listener;
pub mod metrics;
pub mod payload;
pub mod registry;
pub mod subscriber;
pub mod testing;

mod dispatch;

pub use error::{
    CallbackFailure, CallbackRef, CallbackResult, ClusterCommandError, DiscardErrorSink,
    ErrorSink, EventBusError, EventBusResult, HandlerError, LogErrorSink,
};
pub use event::{AnyEvent, Ancestry, Event, EventType, MAX_ANCESTRY_DEPTH};
pub use event_bus::{EventBus, EventBusBuilder, EventBusConfig};
#[cfg(feature = "async")]
pub use executor::TokioExecutor;
pub use executor::{Executor, ExecutorConfig, InlineExecutor, Task, WorkerPool};
pub use fired::{FiredEvent, Source};
pub use handlers::{Handler, HandlerEntry, HandlerId, RequiredType};
pub use key::{EventKey, EventTag, Selector, WILDCARD};
pub use listener::{Binding, BindingTarget, ListenerId};
pub use metrics::MetricsSnapshot;
pub use payload::Payload;
pub use subscriber::{Subscriber, SubscriptionTable};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CallbackResult, Event, EventBus, EventBusBuilder, EventBusError, EventKey, EventTag,
        FiredEvent, Handler, HandlerError, HandlerId, ListenerId, Payload, RequiredType, Source,
        Subscriber, SubscriptionTable, WILDCARD,
    };
}

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}

/// Version information for the clusterbus library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod test_dispatch;

#[cfg(test)]
mod test_subscribers;

#[cfg(test)]
mod test_thread_safe;
