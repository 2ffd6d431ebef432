// ============================================================================
// spark-context - Computed Values
// Lazily evaluated entries, cached per requesting context
// ============================================================================
//
// A computed value is stored once, in the context where it was set, but it
// is evaluated in the context that asked for it: a function that reads
// "selection" gets the selection of the asking child, not of its own owner.
// Each asking context therefore gets its own cache, which is a COMPUTED
// reaction owned by (and disposed with) that context.
//
// Caches are never scheduled. A write only marks them dirty, and the next
// read recomputes.
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::core::constants::*;
use crate::core::types::{AnyReaction, Key, ReactionCore, ScopeId, Source, Value};
use crate::primitives::scope::Context;
use crate::reactivity::tracking::{destroy_reaction, register_reaction, run_tracked, track_read};

// =============================================================================
// COMPUTED VALUE
// =============================================================================

/// Function behind a computed entry.
///
/// `context` is the context the value is requested from; `key` is the key it
/// was registered under. Any context read made while computing becomes a
/// dependency of the cached result.
pub trait ComputedValue {
    fn compute(&self, context: &Context, key: &Key) -> Option<Value>;
}

impl<F> ComputedValue for F
where
    F: Fn(&Context, &Key) -> Option<Value>,
{
    fn compute(&self, context: &Context, key: &Key) -> Option<Value> {
        self(context, key)
    }
}

// =============================================================================
// COMPUTED SLOT
// =============================================================================

/// The computed entry as stored in its owning context.
pub struct ComputedSlot {
    func: Rc<dyn ComputedValue>,
    caches: RefCell<FxHashMap<ScopeId, Rc<ComputedCache>>>,
}

impl ComputedSlot {
    pub(crate) fn new(func: Rc<dyn ComputedValue>) -> Self {
        Self {
            func,
            caches: RefCell::new(FxHashMap::default()),
        }
    }

    /// Value of this entry as seen from `origin`, recomputing if stale.
    pub(crate) fn evaluate(&self, origin: Context, key: &Key) -> Option<Value> {
        let cache = self.cache_for(origin, key);
        track_read(Source::Computed(cache.id()));

        if cache.is_updating() {
            warn!(key = %key, context = %origin.id(), "computed value depends on itself");
            return None;
        }
        if cache.is_dirty() {
            cache.recompute();
        }
        cache.value.borrow().clone()
    }

    fn cache_for(&self, origin: Context, key: &Key) -> Rc<ComputedCache> {
        let existing = self.caches.borrow().get(&origin.id()).cloned();
        if let Some(cache) = existing.filter(|c| !c.is_destroyed()) {
            return cache;
        }

        let cache = Rc::new(ComputedCache {
            core: ReactionCore::new(COMPUTED, origin.id()),
            func: self.func.clone(),
            requester: origin,
            key: key.clone(),
            value: RefCell::new(None),
        });
        register_reaction(cache.clone());

        let mut caches = self.caches.borrow_mut();
        caches.retain(|_, c| !c.is_destroyed());
        caches.insert(origin.id(), cache.clone());
        cache
    }

    /// Drop every cache. Called when the entry is overwritten, removed, or
    /// its context is disposed.
    pub(crate) fn release(&self) {
        let caches: Vec<Rc<ComputedCache>> =
            self.caches.borrow_mut().drain().map(|(_, c)| c).collect();
        for cache in caches {
            destroy_reaction(cache.id());
        }
    }

    /// Number of contexts with a live cache for this entry
    pub fn cache_count(&self) -> usize {
        self.caches
            .borrow()
            .values()
            .filter(|c| !c.is_destroyed())
            .count()
    }
}

// =============================================================================
// COMPUTED CACHE
// =============================================================================

struct ComputedCache {
    core: ReactionCore,
    func: Rc<dyn ComputedValue>,
    requester: Context,
    key: Key,
    value: RefCell<Option<Value>>,
}

impl ComputedCache {
    fn recompute(&self) {
        // Clean first: a write racing the computation must be able to
        // dirty it again.
        self.mark_clean();
        self.set_flags(self.flags() | REACTION_IS_UPDATING);
        let guard = Recomputing(self);

        trace!(key = %self.key, context = %self.requester.id(), "recomputing");
        let value = run_tracked(self, || self.func.compute(&self.requester, &self.key));
        drop(guard);

        // Replace outside the borrow so the old value drops unborrowed
        let old = self.value.replace(value);
        drop(old);
    }
}

/// Clears the updating flag when a computation ends. A computation that
/// panicked leaves the cache dirty so the next read tries again.
struct Recomputing<'a>(&'a ComputedCache);

impl Drop for Recomputing<'_> {
    fn drop(&mut self) {
        let cache = self.0;
        cache.set_flags(cache.flags() & !REACTION_IS_UPDATING);
        if std::thread::panicking() {
            cache.mark_dirty();
        }
    }
}

impl AnyReaction for ComputedCache {
    fn core(&self) -> &ReactionCore {
        &self.core
    }

    fn update(&self) {
        // Lazy: the next read recomputes
    }
}
