#![forbid(unsafe_code)]

//! Per-binding ownership states and the facts the function checker keeps
//! about each binding.

use keel_ast::{Qualifier, Span};

use crate::comptime::ComptimeValue;
use crate::types::Type;

pub mod flow;

pub use flow::{Event, FlowState, MoveSite, NullPath};

/// Index into the binding arena of one function check.
pub type BindingId = usize;

/// Ownership state of a binding.
///
/// `Uninitialized -> Owned -> {Moved, Borrowed(n), Freed}`. `Moved` and
/// `Freed` are terminal: the binding cannot be read, freed or assigned
/// again. `Borrowed(n)` drops back to `Owned` when its last borrow is
/// released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OwnershipState {
    /// Declared without a value. Must be assigned before it is read.
    Uninitialized,

    /// Holds its value: it can be read, borrowed, moved or freed.
    Owned,

    /// `n` borrows are live. Reads are allowed; moves, frees and
    /// overwrites are not.
    Borrowed(u32),

    /// Transferred into an `own` parameter or returned to the caller.
    Moved,

    /// Released by `free` or by a `release` function.
    Freed,

    /// The scope that introduced the binding has exited.
    Gone,
}

impl OwnershipState {
    /// Whether the value can still be read.
    pub fn is_live(&self) -> bool {
        matches!(self, OwnershipState::Owned | OwnershipState::Borrowed(_))
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, OwnershipState::Moved | OwnershipState::Freed)
    }

    pub fn borrow_count(&self) -> u32 {
        match self {
            OwnershipState::Borrowed(n) => *n,
            _ => 0,
        }
    }

    /// One more live borrow.
    pub fn borrowed(self) -> Self {
        match self {
            OwnershipState::Owned => OwnershipState::Borrowed(1),
            OwnershipState::Borrowed(n) => OwnershipState::Borrowed(n.saturating_add(1)),
            other => other,
        }
    }

    /// One borrow released.
    pub fn released(self) -> Self {
        match self {
            OwnershipState::Borrowed(n) if n > 1 => OwnershipState::Borrowed(n - 1),
            OwnershipState::Borrowed(_) => OwnershipState::Owned,
            other => other,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            OwnershipState::Gone => 0,
            OwnershipState::Owned => 1,
            OwnershipState::Borrowed(_) => 2,
            OwnershipState::Uninitialized => 3,
            OwnershipState::Moved => 4,
            OwnershipState::Freed => 5,
        }
    }

    /// State after two control-flow paths meet. A binding that is freed,
    /// moved or uninitialized on either path is treated as such.
    pub fn join(self, other: Self) -> Self {
        match (self, other) {
            (OwnershipState::Borrowed(a), OwnershipState::Borrowed(b)) => OwnershipState::Borrowed(a.max(b)),
            (a, b) if a.rank() >= b.rank() => a,
            (_, b) => b,
        }
    }

    pub fn display(&self) -> String {
        match self {
            OwnershipState::Uninitialized => "uninitialized".to_string(),
            OwnershipState::Owned => "owned".to_string(),
            OwnershipState::Borrowed(n) => format!("borrowed({n})"),
            OwnershipState::Moved => "moved".to_string(),
            OwnershipState::Freed => "freed".to_string(),
            OwnershipState::Gone => "gone".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Local,
    Param(Qualifier),
    /// `for` loop variable.
    LoopVar,
    /// `if p |q|`: `q` stands for `p`.
    Capture { source: Option<BindingId> },
    /// Holds a `ref`. `source` is the binding whose borrow count it holds;
    /// `None` when it re-borrows something the function does not own.
    Borrow { source: Option<BindingId> },
}

#[derive(Clone, Debug)]
pub struct Binding {
    pub name: String,
    pub span: Span,
    pub ty: Option<Type>,
    pub kind: BindingKind,
    /// Index of the scope that introduced the binding.
    pub depth: usize,
    pub mutable: bool,
    /// Value of a block-level `const`.
    pub comptime: Option<ComptimeValue>,
}

impl Binding {
    /// Borrow bindings and `ref` parameters never own what they point at.
    pub fn is_borrow(&self) -> bool {
        matches!(
            self.kind,
            BindingKind::Borrow { .. } | BindingKind::Param(Qualifier::Ref)
        )
    }
}

/// One step of a binding's ownership history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub span: Span,
    pub state: OwnershipState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_count_returns_to_owned() {
        let s = OwnershipState::Owned.borrowed().borrowed();
        assert_eq!(s, OwnershipState::Borrowed(2));
        assert_eq!(s.released().released(), OwnershipState::Owned);
    }

    #[test]
    fn dead_states_ignore_borrows() {
        assert_eq!(OwnershipState::Moved.borrowed(), OwnershipState::Moved);
        assert_eq!(OwnershipState::Freed.released(), OwnershipState::Freed);
    }

    #[test]
    fn join_is_conservative() {
        use OwnershipState::*;
        assert_eq!(Owned.join(Moved), Moved);
        assert_eq!(Moved.join(Freed), Freed);
        assert_eq!(Owned.join(Uninitialized), Uninitialized);
        assert_eq!(Borrowed(1).join(Borrowed(3)), Borrowed(3));
        assert_eq!(Owned.join(Borrowed(1)), Borrowed(1));
    }
}
