// ============================================================================
// spark-context - Type Definitions
// Keys, handles, and the type-erased reaction trait
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use super::constants::*;
use super::runtime::with_runtime;

// =============================================================================
// VALUES AND KEYS
// =============================================================================

/// A value stored in a context.
///
/// Values are shared, immutable, and type-erased. Use `Rc::downcast` (or the
/// typed accessors on `Context`) to get the concrete type back.
pub type Value = Rc<dyn Any>;

/// Identity of a context entry.
///
/// A key is either a plain name or a type identity. Type keys use the raw
/// type path with generic arguments stripped, so `Vec<i32>` and
/// `Vec<String>` share one key and the later registration replaces the
/// earlier one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Name(Arc<str>),
    Type(&'static str),
}

impl Key {
    /// Key for a plain name.
    pub fn named(name: impl AsRef<str>) -> Self {
        Key::Name(Arc::from(name.as_ref()))
    }

    /// Raw type key for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        let full = std::any::type_name::<T>();
        let raw = match full.find('<') {
            Some(end) => &full[..end],
            None => full,
        };
        Key::Type(raw)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Key::Name(name) => name,
            Key::Type(path) => path,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(self, Key::Type(_))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::named(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(Arc::from(name))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

// =============================================================================
// HANDLES
// =============================================================================

/// Slot handle into the context table.
///
/// The generation is bumped every time a slot is freed, so a handle to a
/// disposed context never aliases a context created later in the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Identifier of a registered reaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactionId(pub(crate) u64);

impl fmt::Display for ReactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

// =============================================================================
// SOURCES
// =============================================================================

/// Something a reaction can depend on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// A key as seen from one context (set, removed, or delegated through it)
    Entry(ScopeId, Key),
    /// The active-child pointer of a context
    ActiveChild(ScopeId),
    /// The cached result of a computed value for one requesting context
    Computed(ReactionId),
}

impl Source {
    /// Context this source belongs to, if any.
    pub fn scope(&self) -> Option<ScopeId> {
        match self {
            Source::Entry(scope, _) | Source::ActiveChild(scope) => Some(*scope),
            Source::Computed(_) => None,
        }
    }
}

// =============================================================================
// REACTION CORE
// =============================================================================

/// Shared bookkeeping for every reaction kind.
pub struct ReactionCore {
    id: ReactionId,

    /// Context whose disposal destroys this reaction
    owner: ScopeId,

    /// Flags bitmask (kind + status)
    flags: Cell<u32>,

    /// Sources read during the most recent run
    deps: RefCell<Vec<Source>>,
}

impl ReactionCore {
    /// New reactions start DIRTY: they have never run.
    pub fn new(kind: u32, owner: ScopeId) -> Self {
        Self {
            id: with_runtime(|rt| rt.next_reaction_id()),
            owner,
            flags: Cell::new(kind | DIRTY),
            deps: RefCell::new(Vec::new()),
        }
    }
}

// =============================================================================
// TYPE-ERASED REACTION
// =============================================================================
//
// Sessions, injection bindings and computed caches all live in the same
// registry and subscriber index. Graph operations only need the flags and
// the dependency list; `update` is the single entry point the scheduler uses.
// =============================================================================

/// Type-erased reaction interface for scheduling and updates.
pub trait AnyReaction: Any {
    /// Shared bookkeeping
    fn core(&self) -> &ReactionCore;

    /// Run the reaction again after one of its sources changed
    fn update(&self);

    fn id(&self) -> ReactionId {
        self.core().id
    }

    fn owner(&self) -> ScopeId {
        self.core().owner
    }

    fn flags(&self) -> u32 {
        self.core().flags.get()
    }

    fn set_flags(&self, flags: u32) {
        self.core().flags.set(flags);
    }

    fn is_dirty(&self) -> bool {
        self.flags() & DIRTY != 0
    }

    fn is_destroyed(&self) -> bool {
        self.flags() & DESTROYED != 0
    }

    fn is_grouped(&self) -> bool {
        self.flags() & GROUPED != 0
    }

    fn is_updating(&self) -> bool {
        self.flags() & REACTION_IS_UPDATING != 0
    }

    fn mark_dirty(&self) {
        self.set_flags((self.flags() & STATUS_MASK) | DIRTY);
    }

    fn mark_clean(&self) {
        self.set_flags((self.flags() & STATUS_MASK) | CLEAN);
    }

    fn mark_destroyed(&self) {
        self.set_flags(self.flags() | DESTROYED);
    }

    fn dep_count(&self) -> usize {
        self.core().deps.borrow().len()
    }

    /// Swap in the dependency list of the latest run, returning the old one
    fn replace_deps(&self, deps: Vec<Source>) -> Vec<Source> {
        self.core().deps.replace(deps)
    }

    fn deps(&self) -> Vec<Source> {
        self.core().deps.borrow().clone()
    }
}

// =============================================================================
// TESTS
// =============================================================================
