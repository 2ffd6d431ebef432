// ============================================================================
// spark-context - Dependency Tracking
// Recording reads and propagating writes through the reaction graph
// ============================================================================
//
// The key challenge in Rust is borrow scoping: reactions run user code that
// reads and writes contexts, which in turn touches the runtime. We must
// release every RefCell borrow before calling out, using the
// "collect-then-mutate" pattern throughout.
// ============================================================================

use std::rc::Rc;

use rustc_hash::FxHashSet;
use tracing::trace;

use crate::core::constants::*;
use crate::core::runtime::{with_runtime, FxIndexSet, TrackFrame};
use crate::core::types::{AnyReaction, ReactionId, ScopeId, Source};
use crate::reactivity::scheduling::{flush_sync, schedule_reaction};

// =============================================================================
// TRACK READ - Register dependency when resolving a key
// =============================================================================

/// Record a read of `source` in the innermost tracking frame.
///
/// Does nothing outside a reaction or inside `untrack`.
pub fn track_read(source: Source) {
    with_runtime(|rt| {
        if rt.untracking.get() {
            return;
        }
        if let Some(frame) = rt.frames.borrow_mut().last_mut() {
            frame.reads.insert(source);
        }
    });
}

// =============================================================================
// RUN TRACKED - Execute a reaction body while collecting reads
// =============================================================================

/// Run `f` as the body of `reaction`, replacing its dependencies with the
/// sources read during this run.
///
/// Reads are collected from scratch on every run, so a reaction depends on
/// what its most recent execution touched and nothing else.
pub fn run_tracked<R>(reaction: &dyn AnyReaction, f: impl FnOnce() -> R) -> R {
    let id = reaction.id();
    let prev_untracking = with_runtime(|rt| {
        rt.frames.borrow_mut().push(TrackFrame {
            reaction: id,
            kind: reaction.flags() & KIND_MASK,
            reads: FxIndexSet::default(),
        });
        rt.untracking.replace(false)
    });

    // Guard so the frame is popped even if the body panics
    struct FrameGuard {
        id: ReactionId,
        prev_untracking: bool,
    }

    impl Drop for FrameGuard {
        fn drop(&mut self) {
            let frame = with_runtime(|rt| {
                rt.untracking.set(self.prev_untracking);
                rt.frames.borrow_mut().pop()
            });
            if let Some(frame) = frame {
                debug_assert_eq!(frame.reaction, self.id);
                install_dependencies(self.id, frame.reads);
            }
        }
    }

    let _guard = FrameGuard {
        id,
        prev_untracking,
    };
    f()
}

// =============================================================================
// INSTALL DEPENDENCIES - Wire up deps after a run
// =============================================================================

/// Replace a reaction's dependencies with `reads`.
///
/// Only sources that were dropped are unsubscribed, so subscriber order for
/// sources read again stays stable between runs. Destroyed or unregistered
/// reactions never subscribe.
pub fn install_dependencies(id: ReactionId, reads: FxIndexSet<Source>) {
    let Some(reaction) = with_runtime(|rt| rt.reaction(id)) else {
        return;
    };
    if reaction.is_destroyed() {
        return;
    }

    let old = reaction.replace_deps(reads.iter().cloned().collect());

    with_runtime(|rt| {
        let mut subscribers = rt.subscribers.borrow_mut();
        for source in old.iter().filter(|s| !reads.contains(*s)) {
            unsubscribe(&mut subscribers, source, id);
        }
        for source in reads {
            subscribers.entry(source).or_default().insert(id);
        }
    });
}

fn unsubscribe(
    subscribers: &mut rustc_hash::FxHashMap<Source, FxIndexSet<ReactionId>>,
    source: &Source,
    id: ReactionId,
) {
    if let Some(set) = subscribers.get_mut(source) {
        set.shift_remove(&id);
        if set.is_empty() {
            subscribers.remove(source);
        }
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Register a reaction and attach it to its owning context.
pub fn register_reaction(reaction: Rc<dyn AnyReaction>) {
    let id = reaction.id();
    let owner = reaction.owner();
    with_runtime(|rt| {
        rt.reactions.borrow_mut().insert(id, reaction);
        // A missing owner means the reaction outlives nothing; it is still
        // destroyed explicitly by whoever created it.
        let _ = rt.scope_mut(owner, |node| {
            node.reactions.push(id);
            Ok(())
        });
    });
}

/// Destroy a reaction: mark it DESTROYED, drop it from every index and queue.
///
/// Idempotent. The reaction itself is dropped after all borrows are released.
pub fn destroy_reaction(id: ReactionId) {
    let removed = with_runtime(|rt| {
        let reaction = rt.reactions.borrow_mut().remove(&id)?;
        reaction.mark_destroyed();
        let deps = reaction.replace_deps(Vec::new());
        {
            let mut subscribers = rt.subscribers.borrow_mut();
            for source in &deps {
                unsubscribe(&mut subscribers, source, id);
            }
            subscribers.remove(&Source::Computed(id));
        }
        rt.pending.borrow_mut().shift_remove(&id);
        rt.waiting.borrow_mut().shift_remove(&id);
        let _ = rt.scope_mut(reaction.owner(), |node| {
            node.reactions.retain(|r| *r != id);
            Ok(())
        });
        Some(reaction)
    });

    if removed.is_some() {
        trace!(reaction = %id, "reaction destroyed");
    }
    drop(removed);
}

/// Forget every subscription keyed by a source of `scope`.
pub(crate) fn release_sources(scope: ScopeId) {
    with_runtime(|rt| {
        rt.subscribers
            .borrow_mut()
            .retain(|source, _| source.scope() != Some(scope));
    });
}

// =============================================================================
// NOTIFY WRITE - Called when a context entry changes
// =============================================================================

/// Notify the reaction graph that `source` changed.
///
/// Marks dependents dirty and, unless a batch or flush is in progress, runs
/// the immediate ones before returning.
pub fn notify_write(source: Source) {
    mark_reactions(source);

    let should_flush = with_runtime(|rt| !rt.is_batching() && !rt.is_flushing.get());
    if should_flush {
        flush_sync();
    }
}

// =============================================================================
// MARK REACTIONS - Propagate dirty state through the graph
// =============================================================================

/// Mark every reaction that depends on `source` dirty.
///
/// Computed caches are marked dirty and their own dependents are visited in
/// turn. Sessions and bindings that just became dirty are scheduled.
///
/// # Algorithm
/// Uses an explicit stack to avoid recursion on long computed chains, and a
/// visited set so cyclic computed values cannot loop forever.
pub fn mark_reactions(source: Source) {
    let mut to_schedule: Vec<(ReactionId, bool)> = Vec::new();
    let mut visited: FxHashSet<Source> = FxHashSet::default();
    let mut stack = vec![source];

    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }

        // BORROW SAFETY: collect first, then release the borrow
        let reactions: Vec<Rc<dyn AnyReaction>> = with_runtime(|rt| {
            let subscribers = rt.subscribers.borrow();
            let Some(ids) = subscribers.get(&current) else {
                return Vec::new();
            };
            let reactions = rt.reactions.borrow();
            ids.iter().filter_map(|id| reactions.get(id).cloned()).collect()
        });

        for reaction in reactions {
            if reaction.is_destroyed() {
                continue;
            }
            let flags = reaction.flags();

            if flags & COMPUTED != 0 {
                reaction.mark_dirty();
                stack.push(Source::Computed(reaction.id()));
            } else if flags & DIRTY == 0 {
                reaction.mark_dirty();
                to_schedule.push((reaction.id(), flags & GROUPED != 0));
            }
        }
    }

    for (id, grouped) in to_schedule {
        schedule_reaction(id, grouped);
    }
}

// =============================================================================
// TESTS
// =============================================================================
