// ============================================================================
// spark-context - Batching
// Group multiple writes into a single reaction cycle
// ============================================================================

use crate::core::runtime::with_runtime;
use crate::reactivity::scheduling::flush_sync;

// =============================================================================
// BATCH
// =============================================================================

/// Batch multiple context writes into a single reaction cycle.
///
/// Without batching, each write re-runs its immediate dependents before
/// returning. Inside a batch they run once, after the outermost batch
/// completes. Grouped reactions are unaffected: they always wait for
/// `process_waiting()`.
///
/// # Example
///
/// ```
/// use spark_context::{batch, Context};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let ctx = Context::create();
/// ctx.set("a", 1).unwrap();
/// ctx.set("b", 2).unwrap();
///
/// let runs = Rc::new(Cell::new(0));
/// let counter = runs.clone();
/// ctx.run_and_track(move |ctx| {
///     let _ = (ctx.get("a"), ctx.get("b"));
///     counter.set(counter.get() + 1);
///     true
/// })
/// .unwrap();
/// assert_eq!(runs.get(), 1);
///
/// batch(|| {
///     ctx.set("a", 10).unwrap();
///     ctx.set("b", 20).unwrap();
/// });
///
/// // Ran once more, not twice
/// assert_eq!(runs.get(), 2);
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    with_runtime(|rt| rt.batch_depth.set(rt.batch_depth.get() + 1));

    // Use a guard pattern to ensure we exit the batch even on panic
    struct BatchGuard;

    impl Drop for BatchGuard {
        fn drop(&mut self) {
            let depth = with_runtime(|rt| {
                let depth = rt.batch_depth.get().saturating_sub(1);
                rt.batch_depth.set(depth);
                depth
            });

            // When outermost batch completes, flush pending reactions
            if depth == 0 && !std::thread::panicking() {
                flush_sync();
            }
        }
    }

    let _guard = BatchGuard;
    f()
}

// =============================================================================
// UNTRACK
// =============================================================================

/// Read contexts without creating dependencies.
///
/// # Example
///
/// ```
/// use spark_context::{untrack, Context};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let ctx = Context::create();
/// ctx.set("tracked", 1).unwrap();
/// ctx.set("peeked", 2).unwrap();
///
/// let runs = Rc::new(Cell::new(0));
/// let counter = runs.clone();
/// ctx.run_and_track(move |ctx| {
///     let _ = ctx.get("tracked");
///     let _ = untrack(|| ctx.get("peeked"));
///     counter.set(counter.get() + 1);
///     true
/// })
/// .unwrap();
///
/// ctx.set("peeked", 3).unwrap();
/// assert_eq!(runs.get(), 1);
///
/// ctx.set("tracked", 4).unwrap();
/// assert_eq!(runs.get(), 2);
/// ```
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let prev = with_runtime(|rt| rt.untracking.replace(true));

    // Use a guard pattern to ensure we restore even on panic
    struct UntrackGuard {
        prev: bool,
    }

    impl Drop for UntrackGuard {
        fn drop(&mut self) {
            with_runtime(|rt| rt.untracking.set(self.prev));
        }
    }

    let _guard = UntrackGuard { prev };
    f()
}

/// Check if currently in untrack mode.
pub fn is_untracking() -> bool {
    with_runtime(|rt| rt.untracking.get())
}

// =============================================================================
// TESTS
// =============================================================================
