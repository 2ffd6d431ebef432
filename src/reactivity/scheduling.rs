// ============================================================================
// spark-context - Reaction Scheduling
// Immediate and grouped queues
// ============================================================================
//
// Immediate reactions run as soon as the outermost write (or batch) returns.
// Grouped reactions are parked in the waiting queue until the caller asks
// for them with `process_waiting()`. There are no timers and no background
// work: every flush is driven by the caller.
// ============================================================================

use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{error, trace};

use crate::core::config::config;
use crate::core::constants::REACTION_IS_UPDATING;
use crate::core::runtime::with_runtime;
use crate::core::types::{AnyReaction, ReactionId};
use crate::primitives::updater::drain_updates;
use crate::reactivity::batching::batch;

// =============================================================================
// SCHEDULE
// =============================================================================

/// Queue a dirty reaction.
///
/// Queues are insertion-ordered sets, so a reaction queued twice before a
/// flush still runs once, at its first position.
pub fn schedule_reaction(id: ReactionId, grouped: bool) {
    with_runtime(|rt| {
        if grouped {
            rt.waiting.borrow_mut().insert(id);
        } else {
            rt.pending.borrow_mut().insert(id);
        }
    });
}

/// Queue a reaction that was dirtied while it was running, and flush if
/// nothing else will.
pub(crate) fn reschedule(id: ReactionId, grouped: bool) {
    schedule_reaction(id, grouped);
    if grouped {
        return;
    }
    let should_flush = with_runtime(|rt| !rt.is_batching() && !rt.is_flushing.get());
    if should_flush {
        flush_sync();
    }
}

fn runnable(id: ReactionId) -> Option<Rc<dyn AnyReaction>> {
    let reaction = with_runtime(|rt| rt.reaction(id))?;
    if reaction.is_destroyed() || reaction.is_updating() || !reaction.is_dirty() {
        return None;
    }
    Some(reaction)
}

type PanicPayload = Box<dyn Any + Send>;

/// Run one reaction. A panic is caught so the rest of the queue still
/// drains; the first payload is kept for the caller to resume.
fn run_reaction(reaction: &dyn AnyReaction, first_panic: &mut Option<PanicPayload>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| reaction.update())) {
        reaction.set_flags(reaction.flags() & !REACTION_IS_UPDATING);
        error!(reaction = %reaction.id(), "reaction panicked");
        first_panic.get_or_insert(payload);
    }
}

// =============================================================================
// FLUSH SYNC
// =============================================================================

/// Run every pending immediate reaction, including the ones they dirty.
///
/// Re-entrant calls return straight away; the outer flush picks up whatever
/// was queued. Panics if updates keep cascading past the configured
/// `max_update_depth`, which means some reaction keeps re-triggering itself.
///
/// A reaction that panics does not stop the others: the queue drains
/// first, then the first panic is resumed.
pub fn flush_sync() {
    let was_flushing = with_runtime(|rt| rt.is_flushing.replace(true));
    if was_flushing {
        return;
    }

    // Guard so the flag is reset even if a reaction panics
    struct FlushGuard;

    impl Drop for FlushGuard {
        fn drop(&mut self) {
            with_runtime(|rt| rt.is_flushing.set(false));
        }
    }

    let _guard = FlushGuard;
    let max_depth = config().max_update_depth;
    let mut iterations = 0u32;
    let mut first_panic = None;

    loop {
        let pending: Vec<ReactionId> =
            with_runtime(|rt| rt.pending.take().into_iter().collect());
        if pending.is_empty() {
            break;
        }

        iterations += 1;
        if iterations > max_depth {
            error!(max_depth, "update cascade did not settle");
            panic!(
                "Maximum update depth exceeded. This can happen when a reaction \
                 continuously triggers itself."
            );
        }

        trace!(count = pending.len(), iteration = iterations, "flushing reactions");
        for id in pending {
            if let Some(reaction) = runnable(id) {
                run_reaction(&*reaction, &mut first_panic);
            }
        }
    }

    drop(_guard);
    if let Some(payload) = first_panic {
        resume_unwind(payload);
    }
}

// =============================================================================
// PROCESS WAITING
// =============================================================================

/// Flush the grouped queue.
///
/// Applies updates posted through a `ContextUpdater` first, then runs each
/// grouped reaction that is dirty, once, in the order it was first marked
/// dirty. Immediate reactions dirtied along the way run when the enclosing
/// batch closes. Grouped reactions dirtied during this flush wait for the
/// next call.
pub fn process_waiting() {
    drain_updates();

    let waiting: Vec<ReactionId> = with_runtime(|rt| rt.waiting.take().into_iter().collect());
    if waiting.is_empty() {
        return;
    }

    trace!(count = waiting.len(), "processing grouped reactions");
    let mut first_panic = None;
    batch(|| {
        for id in waiting {
            if let Some(reaction) = runnable(id) {
                run_reaction(&*reaction, &mut first_panic);
            }
        }
    });
    if let Some(payload) = first_panic {
        resume_unwind(payload);
    }
}

// =============================================================================
// TESTS
// =============================================================================
