//! Untyped, name-tagged event payloads and the projection of typed events.
//!
//! Events that cross node boundaries lose their Rust type; they travel as a
//! [`Payload`]: a namespace, a name, and structured content. Typed events fired
//! locally are projected into the same form so that key-addressed listeners see
//! them too.

use crate::event::AnyEvent;
use crate::key::EventTag;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A namespace+name tagged event with opaque structured content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(flatten)]
    tag: EventTag,
    #[serde(default)]
    content: Value,
}

impl Payload {
    /// Creates a payload with the given tag and content.
    pub fn new(tag: EventTag, content: Value) -> Self {
        Self { tag, content }
    }

    /// Creates a payload with no content.
    pub fn empty(tag: EventTag) -> Self {
        Self::new(tag, Value::Null)
    }

    /// Projects a typed event into its payload form.
    ///
    /// The tag is the runtime type's own `(namespace, name)`; the content is
    /// whatever the event exposes through [`Event::to_content`](crate::Event::to_content).
    pub fn project(event: &dyn AnyEvent) -> Self {
        Self {
            tag: event.runtime_type().tag(),
            content: event.content(),
        }
    }

    /// Returns the tag.
    pub fn tag(&self) -> &EventTag {
        &self.tag
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &str {
        self.tag.namespace()
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        self.tag.name()
    }

    /// Returns the content.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Consumes the payload, returning its tag and content.
    pub fn into_parts(self) -> (EventTag, Value) {
        (self.tag, self.content)
    }

    /// Deserializes the content into `T`.
    ///
    /// The bus never does this itself; transports that know the concrete type
    /// can rebuild a typed event before firing it.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.content)
    }
}
