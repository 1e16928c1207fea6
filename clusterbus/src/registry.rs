//! Listener registry and the hierarchy-aware matching algorithm.
//!
//! Type-addressed bindings are indexed by `TypeId`; key-addressed bindings by
//! namespace then name, with separate slots for wildcarded segments so that a
//! candidate tag is resolved with at most four map probes.
//!
//! Lookups clone the matched `Arc<Binding>`s out from under a read lock, so a
//! concurrent `remove` either happens before the snapshot (and the binding is
//! not delivered to) or after it (and the in-flight delivery still sees a
//! complete binding).

use crate::event::EventType;
use crate::fired::FiredEvent;
use crate::key::{EventTag, Selector};
use crate::listener::{Binding, BindingTarget, ListenerId};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// Bindings that matched one fired event, split by how they are delivered.
#[derive(Debug, Default)]
pub struct ListenerMatches {
    /// Type-addressed bindings; they receive the typed event.
    pub typed: Vec<Arc<Binding>>,
    /// Key-addressed bindings; they receive the payload form.
    pub keyed: Vec<Arc<Binding>>,
    /// Bindings skipped because their subscriber was dropped.
    pub dead: usize,
}

impl ListenerMatches {
    /// Total number of distinct matched bindings.
    pub fn len(&self) -> usize {
        self.typed.len() + self.keyed.len()
    }

    /// Returns `true` when nothing matched.
    pub fn is_empty(&self) -> bool {
        self.typed.is_empty() && self.keyed.is_empty()
    }

    /// All matched bindings, typed first.
    pub fn into_vec(self) -> Vec<Arc<Binding>> {
        let mut all = self.typed;
        all.extend(self.keyed);
        all
    }
}

#[derive(Default)]
struct NameIndex {
    exact: HashMap<String, Vec<Arc<Binding>>>,
    any: Vec<Arc<Binding>>,
}

impl NameIndex {
    fn slot_mut(&mut self, name: &Selector) -> &mut Vec<Arc<Binding>> {
        match name {
            Selector::Any => &mut self.any,
            Selector::Exact(name) => self.exact.entry(name.to_string()).or_default(),
        }
    }

    fn remove(&mut self, name: &Selector, id: ListenerId) -> bool {
        match name {
            Selector::Any => remove_from(&mut self.any, id),
            Selector::Exact(name) => {
                let Some(slot) = self.exact.get_mut(name.as_ref()) else {
                    return false;
                };
                let removed = remove_from(slot, id);
                if slot.is_empty() {
                    self.exact.remove(name.as_ref());
                }
                removed
            }
        }
    }

    fn collect(&self, name: &str, out: &mut Vec<Arc<Binding>>, seen: &mut HashSet<ListenerId>) -> usize {
        let mut dead = 0;
        if let Some(slot) = self.exact.get(name) {
            dead += push_unseen(slot, out, seen);
        }
        dead + push_unseen(&self.any, out, seen)
    }

    fn dead_ids(&self, out: &mut Vec<ListenerId>) {
        for slot in self.exact.values().chain(std::iter::once(&self.any)) {
            collect_dead(slot, out);
        }
    }

    fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.any.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    by_type: HashMap<TypeId, Vec<Arc<Binding>>>,
    by_namespace: HashMap<String, NameIndex>,
    any_namespace: NameIndex,
    targets: HashMap<ListenerId, BindingTarget>,
}

impl RegistryState {
    fn keyed_index_mut(&mut self, namespace: &Selector) -> &mut NameIndex {
        match namespace {
            Selector::Any => &mut self.any_namespace,
            Selector::Exact(namespace) => self.by_namespace.entry(namespace.to_string()).or_default(),
        }
    }

    fn collect_keyed(&self, tag: &EventTag, out: &mut Vec<Arc<Binding>>, seen: &mut HashSet<ListenerId>) -> usize {
        let mut dead = 0;
        if let Some(index) = self.by_namespace.get(tag.namespace()) {
            dead += index.collect(tag.name(), out, seen);
        }
        dead + self.any_namespace.collect(tag.name(), out, seen)
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        let Some(target) = self.targets.remove(&id) else {
            return false;
        };
        match target {
            BindingTarget::Type(event_type) => {
                let type_id = event_type.type_id();
                let Some(slot) = self.by_type.get_mut(&type_id) else {
                    return false;
                };
                let removed = remove_from(slot, id);
                if slot.is_empty() {
                    self.by_type.remove(&type_id);
                }
                removed
            }
            BindingTarget::Key(key) => match key.namespace() {
                Selector::Any => self.any_namespace.remove(key.name(), id),
                Selector::Exact(namespace) => {
                    let Some(index) = self.by_namespace.get_mut(namespace.as_ref()) else {
                        return false;
                    };
                    let removed = index.remove(key.name(), id);
                    if index.is_empty() {
                        self.by_namespace.remove(namespace.as_ref());
                    }
                    removed
                }
            },
        }
    }
}

/// Thread-safe storage of listener bindings.
#[derive(Default)]
pub struct ListenerRegistry {
    state: RwLock<RegistryState>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a binding and returns its ID.
    pub fn insert(&self, binding: Binding) -> ListenerId {
        let id = binding.id();
        let target = binding.target().clone();
        let binding = Arc::new(binding);

        let mut state = self.write();
        match &target {
            BindingTarget::Type(event_type) => {
                state
                    .by_type
                    .entry(event_type.type_id())
                    .or_default()
                    .push(binding);
            }
            BindingTarget::Key(key) => {
                state
                    .keyed_index_mut(key.namespace())
                    .slot_mut(key.name())
                    .push(binding);
            }
        }
        state.targets.insert(id, target);
        id
    }

    /// Removes exactly one binding. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.write().remove(id)
    }

    /// Removes every binding whose subscriber has been dropped and returns
    /// their IDs.
    pub fn prune_dead(&self) -> Vec<ListenerId> {
        let mut state = self.write();
        let mut dead = Vec::new();
        for slot in state.by_type.values() {
            collect_dead(slot, &mut dead);
        }
        for index in state.by_namespace.values() {
            index.dead_ids(&mut dead);
        }
        state.any_namespace.dead_ids(&mut dead);

        dead.retain(|id| state.remove(*id));
        dead
    }

    /// Bindings matching a fired event.
    ///
    /// A typed event of runtime type `T0` matches type bindings on any entry of
    /// its ancestor chain, and key bindings on the tag of any chain entry. A
    /// payload matches key bindings on its own tag only; type bindings never
    /// match payloads. Each binding appears at most once.
    pub fn matches(&self, fired: &FiredEvent) -> ListenerMatches {
        match fired {
            FiredEvent::Typed(event) => self.matches_type(&event.runtime_type()),
            FiredEvent::Payload(payload) => {
                let state = self.read();
                let mut matches = ListenerMatches::default();
                matches.dead =
                    state.collect_keyed(payload.tag(), &mut matches.keyed, &mut HashSet::new());
                matches
            }
        }
    }

    /// Bindings that a typed event of runtime type `event_type` would reach.
    pub fn matches_type(&self, event_type: &EventType) -> ListenerMatches {
        let state = self.read();
        let mut seen = HashSet::new();
        let mut matches = ListenerMatches::default();

        for ancestor in event_type.ancestry() {
            if let Some(slot) = state.by_type.get(&ancestor.type_id()) {
                matches.dead += push_unseen(slot, &mut matches.typed, &mut seen);
            }
        }
        // The runtime type's own tag is the first chain entry, so the projected
        // payload's matches are already covered by this walk.
        for ancestor in event_type.ancestry() {
            matches.dead += state.collect_keyed(&ancestor.tag(), &mut matches.keyed, &mut seen);
        }
        matches
    }

    /// Key-addressed bindings matching a payload tag exactly (with wildcards).
    pub fn matches_tag(&self, tag: &EventTag) -> Vec<Arc<Binding>> {
        let state = self.read();
        let mut seen = HashSet::new();
        let mut keyed = Vec::new();
        state.collect_keyed(tag, &mut keyed, &mut seen);
        keyed
    }

    /// Diagnostic lookup by key: key-addressed matches for `tag`, plus
    /// type-addressed bindings whose own type carries exactly that tag.
    ///
    /// No hierarchy is walked; a key names one type, not its ancestors.
    pub fn lookup_key(&self, tag: &EventTag) -> Vec<Arc<Binding>> {
        let state = self.read();
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for slot in state.by_type.values() {
            let same_tag = slot.iter().filter(|binding| match binding.target() {
                BindingTarget::Type(event_type) => {
                    event_type.namespace() == tag.namespace() && event_type.name() == tag.name()
                }
                BindingTarget::Key(_) => false,
            });
            for binding in same_tag.filter(|binding| binding.is_live()) {
                if seen.insert(binding.id()) {
                    found.push(Arc::clone(binding));
                }
            }
        }
        state.collect_keyed(tag, &mut found, &mut seen);
        found
    }

    /// Returns the binding with the given ID.
    pub fn get(&self, id: ListenerId) -> Option<Arc<Binding>> {
        let state = self.read();
        let target = state.targets.get(&id)?;
        let slot = match target {
            BindingTarget::Type(event_type) => state.by_type.get(&event_type.type_id())?,
            BindingTarget::Key(key) => {
                let index = match key.namespace() {
                    Selector::Any => &state.any_namespace,
                    Selector::Exact(namespace) => state.by_namespace.get(namespace.as_ref())?,
                };
                match key.name() {
                    Selector::Any => &index.any,
                    Selector::Exact(name) => index.exact.get(name.as_ref())?,
                }
            }
        };
        slot.iter().find(|binding| binding.id() == id).cloned()
    }

    /// Returns `true` if a binding with this ID is registered.
    pub fn contains(&self, id: ListenerId) -> bool {
        self.read().targets.contains_key(&id)
    }

    /// Number of registered bindings.
    pub fn len(&self) -> usize {
        self.read().targets.len()
    }

    /// Returns `true` when no bindings are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every binding.
    pub fn clear(&self) {
        *self.write() = RegistryState::default();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("bindings", &self.len())
            .finish()
    }
}

fn collect_dead(slot: &[Arc<Binding>], out: &mut Vec<ListenerId>) {
    out.extend(
        slot.iter()
            .filter(|binding| !binding.is_live())
            .map(|binding| binding.id()),
    );
}

fn remove_from(slot: &mut Vec<Arc<Binding>>, id: ListenerId) -> bool {
    let before = slot.len();
    slot.retain(|binding| binding.id() != id);
    slot.len() != before
}

/// Appends the live bindings of `slot` not seen yet; returns how many dead
/// bindings were skipped.
fn push_unseen(
    slot: &[Arc<Binding>],
    out: &mut Vec<Arc<Binding>>,
    seen: &mut HashSet<ListenerId>,
) -> usize {
    let mut dead = 0;
    for binding in slot {
        if !seen.insert(binding.id()) {
            continue;
        }
        if binding.is_live() {
            out.push(Arc::clone(binding));
        } else {
            dead += 1;
        }
    }
    dead
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::key::{EventKey, WILDCARD};
    use crate::payload::Payload;
    use std::any::Any;

    #[derive(Debug)]
    struct EventA;

    impl Event for EventA {
        fn event_type() -> EventType {
            EventType::of::<Self>("pkg", "EventA", None)
        }
    }

    #[derive(Debug)]
    struct EventB {
        base: EventA,
    }

    impl Event for EventB {
        fn event_type() -> EventType {
            EventType::of::<Self>("pkg", "EventB", Some(EventA::event_type))
        }

        fn upcast(&self, target: TypeId) -> Option<&dyn Any> {
            if target == TypeId::of::<Self>() {
                return Some(self);
            }
            self.base.upcast(target)
        }
    }

    #[derive(Debug)]
    struct Unrelated;

    impl Event for Unrelated {
        fn event_type() -> EventType {
            EventType::of::<Self>("other", "Unrelated", None)
        }
    }

    fn typed<E: Event>(registry: &ListenerRegistry) -> ListenerId {
        registry.insert(Binding::typed::<E, _>("typed", |_, _| Ok(())))
    }

    fn keyed(registry: &ListenerRegistry, key: EventKey) -> ListenerId {
        registry.insert(Binding::keyed(key, "keyed", |_, _| Ok(())))
    }

    fn ids(bindings: &[Arc<Binding>]) -> HashSet<ListenerId> {
        bindings.iter().map(|binding| binding.id()).collect()
    }

    #[test]
    fn test_five_listener_scenario() {
        let registry = ListenerRegistry::new();
        let on_a = typed::<EventA>(&registry);
        let on_b = typed::<EventB>(&registry);
        let key_a = keyed(&registry, EventKey::new("pkg", "EventA").unwrap());
        let pkg_any = keyed(&registry, EventKey::new("pkg", WILDCARD).unwrap());
        let any_any = keyed(&registry, EventKey::any());

        let for_b = registry.matches_type(&EventB::event_type());
        assert_eq!(for_b.len(), 5);
        assert_eq!(ids(&for_b.typed), HashSet::from([on_a, on_b]));
        assert_eq!(ids(&for_b.keyed), HashSet::from([key_a, pkg_any, any_any]));

        let for_a = registry.matches_type(&EventA::event_type());
        assert_eq!(for_a.len(), 4);
        assert!(!ids(&for_a.typed).contains(&on_b));

        let by_key = registry.lookup_key(&EventTag::new("pkg", "EventA"));
        assert_eq!(ids(&by_key), HashSet::from([on_a, key_a, pkg_any, any_any]));
    }

    #[test]
    fn test_payloads_match_keys_literally() {
        let registry = ListenerRegistry::new();
        typed::<EventA>(&registry);
        let key_a = keyed(&registry, EventKey::new("pkg", "EventA").unwrap());
        let key_b = keyed(&registry, EventKey::new("pkg", "EventB").unwrap());

        let payload_b = FiredEvent::payload(Payload::empty(EventTag::new("pkg", "EventB")));
        let matched = registry.matches(&payload_b);
        assert!(matched.typed.is_empty());
        assert_eq!(ids(&matched.keyed), HashSet::from([key_b]));

        let payload_a = FiredEvent::payload(Payload::empty(EventTag::new("pkg", "EventA")));
        assert_eq!(ids(&registry.matches(&payload_a).keyed), HashSet::from([key_a]));
    }

    #[test]
    fn test_typed_event_reaches_ancestor_keys() {
        let registry = ListenerRegistry::new();
        let key_a = keyed(&registry, EventKey::new("pkg", "EventA").unwrap());
        let name_only = keyed(&registry, EventKey::new(WILDCARD, "EventA").unwrap());

        let fired = FiredEvent::typed(EventB { base: EventA });
        assert_eq!(ids(&registry.matches(&fired).keyed), HashSet::from([key_a, name_only]));
    }

    #[test]
    fn test_wildcards_are_deduplicated_across_chain() {
        let registry = ListenerRegistry::new();
        keyed(&registry, EventKey::new("pkg", WILDCARD).unwrap());
        keyed(&registry, EventKey::any());

        // Both chain entries live in "pkg"; each wildcard must still appear once.
        let matched = registry.matches_type(&EventB::event_type());
        assert_eq!(matched.keyed.len(), 2);
    }

    #[test]
    fn test_unrelated_types_do_not_match() {
        let registry = ListenerRegistry::new();
        typed::<EventA>(&registry);
        keyed(&registry, EventKey::new("pkg", WILDCARD).unwrap());

        assert!(registry.matches_type(&Unrelated::event_type()).is_empty());
    }

    #[test]
    fn test_remove_is_idempotent_and_precise() {
        let registry = ListenerRegistry::new();
        let first = keyed(&registry, EventKey::new("pkg", "EventA").unwrap());
        let second = keyed(&registry, EventKey::new("pkg", "EventA").unwrap());
        let on_a = typed::<EventA>(&registry);
        assert_eq!(registry.len(), 3);

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert!(!registry.contains(first));
        assert!(registry.contains(second));
        assert!(registry.get(second).is_some());
        assert!(registry.get(first).is_none());

        assert!(registry.remove(on_a));
        assert!(registry.matches_type(&EventA::event_type()).typed.is_empty());
        assert_eq!(registry.len(), 1);

        assert!(!registry.remove(ListenerId::new()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dead_bindings_are_skipped_then_pruned() {
        let registry = ListenerRegistry::new();
        let kept = typed::<EventA>(&registry);
        let owner: Arc<dyn Any + Send + Sync> = Arc::new(());
        let owned = registry.insert(
            Binding::typed::<EventA, _>("owned", |_, _| Ok(())).owned_by(Arc::downgrade(&owner)),
        );
        let owned_key = registry.insert(
            Binding::keyed(EventKey::any(), "owned", |_, _| Ok(()))
                .owned_by(Arc::downgrade(&owner)),
        );

        let live = registry.matches_type(&EventB::event_type());
        assert_eq!(live.dead, 0);
        assert_eq!(ids(&live.typed), HashSet::from([kept, owned]));
        assert!(registry.prune_dead().is_empty());

        drop(owner);
        let matches = registry.matches_type(&EventB::event_type());
        assert_eq!(matches.dead, 2);
        assert_eq!(ids(&matches.typed), HashSet::from([kept]));
        assert!(matches.keyed.is_empty());
        assert_eq!(registry.len(), 3);

        let pruned: HashSet<_> = registry.prune_dead().into_iter().collect();
        assert_eq!(pruned, HashSet::from([owned, owned_key]));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(kept));
        assert!(registry.prune_dead().is_empty());
    }

    #[test]
    fn test_clear() {
        let registry = ListenerRegistry::new();
        typed::<EventA>(&registry);
        keyed(&registry, EventKey::any());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.matches_type(&EventA::event_type()).is_empty());
    }
}
