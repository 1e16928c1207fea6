//! Namespace/name addressing.
//!
//! Every event, typed or not, is known to the bus by an [`EventTag`]: the
//! concrete `(namespace, name)` pair that survives cluster transport. Listeners
//! that do not bind to a Rust type subscribe with an [`EventKey`], whose
//! segments may be wildcarded.

use crate::error::{EventBusError, EventBusResult};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Wildcard selector, matching any namespace or any name.
pub const WILDCARD: Selector = Selector::Any;

/// The concrete `(namespace, name)` pair of an event type or payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventTag {
    namespace: Cow<'static, str>,
    name: Cow<'static, str>,
}

impl EventTag {
    /// Creates a tag from a namespace and a name.
    pub fn new<N, M>(namespace: N, name: M) -> Self
    where
        N: Into<Cow<'static, str>>,
        M: Into<Cow<'static, str>>,
    {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Creates a tag from static strings without allocating.
    pub const fn from_static(namespace: &'static str, name: &'static str) -> Self {
        Self {
            namespace: Cow::Borrowed(namespace),
            name: Cow::Borrowed(name),
        }
    }

    /// Splits a qualified name such as `"tigase.eventbus.Event1"` at its last `.`.
    ///
    /// Returns `None` when there is no separator or either side is empty.
    pub fn from_qualified(qualified: &str) -> Option<Self> {
        let (namespace, name) = qualified.rsplit_once('.')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace.to_string(), name.to_string()))
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `namespace.name`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub(crate) fn validate(&self) -> EventBusResult<()> {
        validate_segment("namespace", &self.namespace)?;
        validate_segment("name", &self.name)
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// One segment of an [`EventKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// Matches any value.
    Any,
    /// Matches exactly this value.
    Exact(Cow<'static, str>),
}

impl Selector {
    /// Returns `true` when this selector matches `value`.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == value,
        }
    }

    /// Returns `true` for the wildcard selector.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns the exact value, or `None` for the wildcard.
    pub fn as_exact(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Exact(value) => Some(value),
        }
    }
}

impl From<&str> for Selector {
    fn from(value: &str) -> Self {
        Self::Exact(Cow::Owned(value.to_string()))
    }
}

impl From<String> for Selector {
    fn from(value: String) -> Self {
        Self::Exact(Cow::Owned(value))
    }
}

impl From<Option<&str>> for Selector {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Self::Any, Self::from)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(value) => f.write_str(value),
        }
    }
}

/// A listener's subscription key: `(namespace | *, name | *)`.
///
/// Keys are opaque strings. They need not correspond to any Rust type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    namespace: Selector,
    name: Selector,
}

impl EventKey {
    /// Creates a key, validating any exact segment.
    pub fn new<N, M>(namespace: N, name: M) -> EventBusResult<Self>
    where
        N: Into<Selector>,
        M: Into<Selector>,
    {
        let key = Self {
            namespace: namespace.into(),
            name: name.into(),
        };
        if let Selector::Exact(namespace) = &key.namespace {
            validate_segment("namespace", namespace)?;
        }
        if let Selector::Exact(name) = &key.name {
            validate_segment("name", name)?;
        }
        Ok(key)
    }

    /// The `(*, *)` key, matching every event.
    pub fn any() -> Self {
        Self {
            namespace: Selector::Any,
            name: Selector::Any,
        }
    }

    /// Returns the namespace selector.
    pub fn namespace(&self) -> &Selector {
        &self.namespace
    }

    /// Returns the name selector.
    pub fn name(&self) -> &Selector {
        &self.name
    }

    /// Returns `true` when this key matches `tag`, treating wildcards as always-equal.
    pub fn matches(&self, tag: &EventTag) -> bool {
        self.namespace.matches(tag.namespace()) && self.name.matches(tag.name())
    }

    /// Returns `true` when either segment is wildcarded.
    pub fn is_wildcard(&self) -> bool {
        self.namespace.is_wildcard() || self.name.is_wildcard()
    }
}

impl From<EventTag> for EventKey {
    fn from(tag: EventTag) -> Self {
        Self {
            namespace: Selector::Exact(tag.namespace),
            name: Selector::Exact(tag.name),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.namespace, self.name)
    }
}

fn validate_segment(field: &str, value: &str) -> EventBusResult<()> {
    if value.trim().is_empty() {
        return Err(EventBusError::invalid_registration(format!(
            "{} must not be blank",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_key_matches_only_its_tag() {
        let key = EventKey::new("pkg", "EventA").unwrap();
        assert!(key.matches(&EventTag::new("pkg", "EventA")));
        assert!(!key.matches(&EventTag::new("pkg", "EventB")));
        assert!(!key.matches(&EventTag::new("other", "EventA")));
        assert!(!key.is_wildcard());
    }

    #[test]
    fn test_wildcard_segments() {
        let by_namespace = EventKey::new("pkg", WILDCARD).unwrap();
        assert!(by_namespace.matches(&EventTag::new("pkg", "Anything")));
        assert!(!by_namespace.matches(&EventTag::new("other", "Anything")));

        let by_name = EventKey::new(WILDCARD, "Ping").unwrap();
        assert!(by_name.matches(&EventTag::new("a", "Ping")));
        assert!(by_name.matches(&EventTag::new("b", "Ping")));
        assert!(!by_name.matches(&EventTag::new("a", "Pong")));

        let none: Option<&str> = None;
        let everything = EventKey::new(none, none).unwrap();
        assert_eq!(everything, EventKey::any());
    }

    #[test]
    fn test_blank_segments_are_rejected() {
        assert!(matches!(
            EventKey::new("", "EventA"),
            Err(EventBusError::InvalidRegistration { .. })
        ));
        assert!(matches!(
            EventKey::new("pkg", "   "),
            Err(EventBusError::InvalidRegistration { .. })
        ));
        assert!(EventKey::new(WILDCARD, WILDCARD).is_ok());
    }

    #[test]
    fn test_qualified_names() {
        let tag = EventTag::from_qualified("tigase.eventbus.Event12").unwrap();
        assert_eq!(tag.namespace(), "tigase.eventbus");
        assert_eq!(tag.name(), "Event12");
        assert_eq!(tag.qualified(), "tigase.eventbus.Event12");
        assert_eq!(tag.to_string(), "tigase.eventbus.Event12");

        assert!(EventTag::from_qualified("NoSeparator").is_none());
        assert!(EventTag::from_qualified(".Leading").is_none());
        assert!(EventTag::from_qualified("trailing.").is_none());
    }

    #[test]
    fn test_display() {
        let key = EventKey::new("pkg", WILDCARD).unwrap();
        assert_eq!(key.to_string(), "(pkg, *)");
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z]{1,3}(\\.[a-z]{1,3}){0,2}"
    }

    proptest! {
        #[test]
        fn prop_any_key_matches_every_tag(ns in segment(), name in segment()) {
            prop_assert!(EventKey::any().matches(&EventTag::new(ns, name)));
        }

        #[test]
        fn prop_exact_key_matches_iff_equal(
            key_ns in segment(), key_name in segment(),
            ns in segment(), name in segment(),
        ) {
            let key = EventKey::new(key_ns.as_str(), key_name.as_str()).unwrap();
            let tag = EventTag::new(ns.clone(), name.clone());
            prop_assert_eq!(key.matches(&tag), key_ns == ns && key_name == name);
        }

        #[test]
        fn prop_wildcards_are_broader(ns in segment(), name in segment(), other in segment()) {
            let tag = EventTag::new(ns.clone(), other);
            let exact = EventKey::new(ns.as_str(), name.as_str()).unwrap();
            let namespace_wide = EventKey::new(ns.as_str(), WILDCARD).unwrap();
            if exact.matches(&tag) {
                prop_assert!(namespace_wide.matches(&tag));
            }
            prop_assert!(namespace_wide.matches(&tag));
        }
    }
}
