// ============================================================================
// spark-context - Runtime
// Thread-local state shared by every context tree on a thread
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use rustc_hash::{FxBuildHasher, FxHashMap};

use super::config::RuntimeConfig;
use super::error::ContextError;
use super::tree::{ScopeNode, ScopeTable};
use super::types::{AnyReaction, ReactionId, ScopeId, Source};
use crate::primitives::updater::PendingUpdate;

/// Insertion-ordered set with the fast hasher.
pub type FxIndexSet<T> = IndexSet<T, FxBuildHasher>;

// =============================================================================
// TRACKING FRAME
// =============================================================================

/// One reaction currently collecting reads.
pub(crate) struct TrackFrame {
    pub reaction: ReactionId,
    /// Kind bits of the reaction (SESSION, BINDING, COMPUTED)
    pub kind: u32,
    /// Sources read so far, in first-read order
    pub reads: FxIndexSet<Source>,
}

// =============================================================================
// RUNTIME
// =============================================================================

/// Thread-local runtime holding all global state.
pub struct Runtime {
    // =========================================================================
    // CONTEXT TREE
    // =========================================================================
    pub(crate) scopes: RefCell<ScopeTable>,

    // =========================================================================
    // REACTION GRAPH
    // =========================================================================
    /// Every live reaction, keyed by id
    pub(crate) reactions: RefCell<FxHashMap<ReactionId, Rc<dyn AnyReaction>>>,

    /// Reverse index: which reactions read a source in their latest run
    pub(crate) subscribers: RefCell<FxHashMap<Source, FxIndexSet<ReactionId>>>,

    /// Stack of reactions collecting reads (innermost last)
    pub(crate) frames: RefCell<Vec<TrackFrame>>,

    /// Whether we're currently untracking (reading without creating dependencies)
    pub(crate) untracking: Cell<bool>,

    next_reaction: Cell<u64>,

    /// Incremented on every accepted write
    write_version: Cell<u64>,

    // =========================================================================
    // SCHEDULING
    // =========================================================================
    /// Current batch depth (for nested batches)
    pub(crate) batch_depth: Cell<u32>,

    /// Immediate reactions waiting for the next flush
    pub(crate) pending: RefCell<FxIndexSet<ReactionId>>,

    /// Grouped reactions waiting for `process_waiting()`, in first-dirtied order
    pub(crate) waiting: RefCell<FxIndexSet<ReactionId>>,

    /// Whether we're currently flushing
    pub(crate) is_flushing: Cell<bool>,

    /// Updates posted from other threads through a `ContextUpdater`
    pub(crate) updates: Arc<Mutex<VecDeque<PendingUpdate>>>,

    pub(crate) config: Cell<RuntimeConfig>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            scopes: RefCell::new(ScopeTable::default()),
            reactions: RefCell::new(FxHashMap::default()),
            subscribers: RefCell::new(FxHashMap::default()),
            frames: RefCell::new(Vec::new()),
            untracking: Cell::new(false),
            next_reaction: Cell::new(1),
            write_version: Cell::new(1),
            batch_depth: Cell::new(0),
            pending: RefCell::new(FxIndexSet::default()),
            waiting: RefCell::new(FxIndexSet::default()),
            is_flushing: Cell::new(false),
            updates: Arc::new(Mutex::new(VecDeque::new())),
            config: Cell::new(RuntimeConfig::default()),
        }
    }

    // =========================================================================
    // CONTEXT TREE
    // =========================================================================

    /// Read a node. `None` if the context is gone.
    pub(crate) fn scope<R>(&self, id: ScopeId, f: impl FnOnce(&ScopeNode) -> R) -> Option<R> {
        self.scopes.borrow().get(id).map(f)
    }

    /// Mutate a node, failing with `Disposed` if the context is gone.
    ///
    /// The closure must not call back into user code: the table stays
    /// borrowed while it runs.
    pub(crate) fn scope_mut<R>(
        &self,
        id: ScopeId,
        f: impl FnOnce(&mut ScopeNode) -> Result<R, ContextError>,
    ) -> Result<R, ContextError> {
        let mut scopes = self.scopes.borrow_mut();
        let node = scopes
            .get_mut(id)
            .ok_or(ContextError::Disposed { scope: id })?;
        f(node)
    }

    pub(crate) fn is_live(&self, id: ScopeId) -> bool {
        self.scope(id, ScopeNode::is_live).unwrap_or(false)
    }

    /// Number of contexts alive on this thread (including ones mid-disposal)
    pub fn scope_count(&self) -> usize {
        self.scopes.borrow().len()
    }

    // =========================================================================
    // REACTIONS
    // =========================================================================

    pub(crate) fn reaction(&self, id: ReactionId) -> Option<Rc<dyn AnyReaction>> {
        self.reactions.borrow().get(&id).cloned()
    }

    pub(crate) fn next_reaction_id(&self) -> ReactionId {
        let id = self.next_reaction.get();
        self.next_reaction.set(id + 1);
        ReactionId(id)
    }

    /// Number of registered reactions on this thread
    pub fn reaction_count(&self) -> usize {
        self.reactions.borrow().len()
    }

    // =========================================================================
    // VERSION COUNTER
    // =========================================================================

    pub(crate) fn increment_write_version(&self) -> u64 {
        let v = self.write_version.get() + 1;
        self.write_version.set(v);
        v
    }

    pub fn get_write_version(&self) -> u64 {
        self.write_version.get()
    }

    // =========================================================================
    // STATE QUERIES
    // =========================================================================

    pub fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }

    pub fn is_tracking(&self) -> bool {
        !self.untracking.get() && !self.frames.borrow().is_empty()
    }

    pub(crate) fn current_frame_kind(&self) -> Option<u32> {
        self.frames.borrow().last().map(|frame| frame.kind)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Access the thread-local runtime.
///
/// Calls may nest, but callers must not hold a `RefCell` borrow of runtime
/// state across a call into user code.
pub fn with_runtime<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    RUNTIME.with(f)
}

/// Whether reads are currently being recorded.
pub fn is_tracking() -> bool {
    with_runtime(|rt| rt.is_tracking())
}

/// Whether a batch is open on this thread.
pub fn is_batching() -> bool {
    with_runtime(|rt| rt.is_batching())
}

/// Write counter; increases on every accepted context write.
pub fn write_version() -> u64 {
    with_runtime(|rt| rt.get_write_version())
}
