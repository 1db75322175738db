//! Ownership facts along one control-flow path, and how paths merge.
//!
//! Branches clone the current [`FlowState`]; at the join point the copies
//! are merged with [`FlowState::join`]. A path that returned, broke or
//! continued is unreachable and drops out of the merge.

use std::collections::{BTreeMap, BTreeSet};

use keel_ast::Span;

use super::{BindingId, OwnershipState};

/// How a binding left the function's control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MoveSite {
    /// Passed to an `own` parameter.
    Argument,
    /// Handed to the caller by `return`.
    Return,
    /// `free` or a `release` function.
    Free,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub span: Span,
    pub site: MoveSite,
}

type FieldKey = (BindingId, String);

/// A pointer-valued place: a binding and the fields selected from it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NullPath {
    pub root: BindingId,
    pub fields: Vec<String>,
}

impl NullPath {
    pub fn binding(root: BindingId) -> Self {
        NullPath {
            root,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str) -> Self {
        self.fields.push(name.to_string());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowState {
    pub reachable: bool,
    states: Vec<OwnershipState>,
    events: Vec<Option<Event>>,
    fields: BTreeMap<FieldKey, (OwnershipState, Option<Event>)>,
    init_fields: BTreeMap<BindingId, BTreeSet<String>>,
    narrowed: BTreeSet<NullPath>,
}

impl FlowState {
    pub fn new() -> Self {
        FlowState {
            reachable: true,
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn state(&self, id: BindingId) -> OwnershipState {
        self.states.get(id).copied().unwrap_or(OwnershipState::Gone)
    }

    /// Where the binding was last moved or freed.
    pub fn event(&self, id: BindingId) -> Option<Event> {
        self.events.get(id).copied().flatten()
    }

    fn grow(&mut self, id: BindingId) {
        if self.states.len() <= id {
            self.states.resize(id + 1, OwnershipState::Gone);
            self.events.resize(id + 1, None);
        }
    }

    pub fn set(&mut self, id: BindingId, state: OwnershipState, event: Option<Event>) {
        self.grow(id);
        self.states[id] = state;
        if event.is_some() || !state.is_dead() {
            self.events[id] = event;
        }
    }

    /// Start a fresh binding (or re-enter its declaration in a loop).
    pub fn declare(&mut self, id: BindingId, state: OwnershipState) {
        self.set(id, state, None);
        self.fields.retain(|(b, _), _| *b != id);
        self.init_fields.remove(&id);
        self.forget_narrowing(id, &[]);
    }

    /// The whole binding was overwritten.
    pub fn reinitialize(&mut self, id: BindingId) {
        self.declare(id, OwnershipState::Owned);
    }

    pub fn field(&self, id: BindingId, name: &str) -> Option<(OwnershipState, Option<Event>)> {
        self.fields.get(&(id, name.to_string())).copied()
    }

    pub fn set_field(&mut self, id: BindingId, name: &str, state: OwnershipState, event: Option<Event>) {
        self.fields.insert((id, name.to_string()), (state, event));
    }

    pub fn clear_field(&mut self, id: BindingId, name: &str) {
        self.fields.remove(&(id, name.to_string()));
    }

    /// First field of `id` that was moved or freed out of it.
    pub fn dead_field(&self, id: BindingId) -> Option<(&str, OwnershipState, Option<Event>)> {
        self.fields
            .iter()
            .find(|((b, _), (s, _))| *b == id && s.is_dead())
            .map(|((_, name), (s, e))| (name.as_str(), *s, *e))
    }

    /// Record a field assignment into an uninitialized struct binding and
    /// return how many distinct fields are now initialized.
    pub fn init_field(&mut self, id: BindingId, name: &str) -> usize {
        let set = self.init_fields.entry(id).or_default();
        set.insert(name.to_string());
        set.len()
    }

    pub fn is_field_init(&self, id: BindingId, name: &str) -> bool {
        self.init_fields.get(&id).is_some_and(|s| s.contains(name))
    }

    pub fn narrow(&mut self, path: NullPath) {
        self.narrowed.insert(path);
    }

    pub fn unnarrow(&mut self, path: &NullPath) {
        self.narrowed.remove(path);
    }

    pub fn is_narrowed(&self, path: &NullPath) -> bool {
        self.narrowed.contains(path)
    }

    /// A write to `root.prefix` drops what was known about it and every
    /// path below it.
    pub fn forget_narrowing(&mut self, root: BindingId, prefix: &[String]) {
        self.narrowed
            .retain(|p| p.root != root || !p.fields.starts_with(prefix));
    }

    /// Merge two paths. Unreachable paths contribute nothing.
    pub fn join(&self, other: &FlowState) -> FlowState {
        if !self.reachable {
            return other.clone();
        }
        if !other.reachable {
            return self.clone();
        }

        let len = self.states.len().max(other.states.len());
        let mut out = FlowState::new();
        out.states.reserve(len);
        for id in 0..len {
            let (a, b) = (self.state(id), other.state(id));
            let joined = a.join(b);
            let event = if joined == a { self.event(id) } else { other.event(id) };
            out.states.push(joined);
            out.events.push(event.or_else(|| self.event(id)).or_else(|| other.event(id)));
        }

        let keys: BTreeSet<&FieldKey> = self.fields.keys().chain(other.fields.keys()).collect();
        for key in keys {
            let a = self.fields.get(key).copied().unwrap_or((OwnershipState::Owned, None));
            let b = other.fields.get(key).copied().unwrap_or((OwnershipState::Owned, None));
            let joined = a.0.join(b.0);
            let event = if joined == a.0 { a.1.or(b.1) } else { b.1.or(a.1) };
            out.fields.insert(key.clone(), (joined, event));
        }

        for (id, set) in &self.init_fields {
            if let Some(theirs) = other.init_fields.get(id) {
                let common: BTreeSet<String> = set.intersection(theirs).cloned().collect();
                if !common.is_empty() {
                    out.init_fields.insert(*id, common);
                }
            }
        }

        out.narrowed = self.narrowed.intersection(&other.narrowed).cloned().collect();
        out
    }

    /// Join every path in `paths`; an empty set is unreachable.
    pub fn join_all(paths: impl IntoIterator<Item = FlowState>) -> FlowState {
        paths
            .into_iter()
            .fold(FlowState::unreachable(), |acc, p| acc.join(&p))
    }
}
