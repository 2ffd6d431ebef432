// ============================================================================
// spark-context - Context Updater
// Single funnel for updates that originate on other threads
// ============================================================================
//
// Contexts are thread-local. A service registry or file watcher running
// elsewhere cannot touch them directly; it posts updates through a
// `ContextUpdater`, and the owning thread applies them the next time it
// calls `process_waiting()`.
// ============================================================================

use std::any::Any;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::core::runtime::with_runtime;
use crate::core::types::{Key, ScopeId, Source, Value};
use crate::primitives::scope::Context;
use crate::reactivity::batching::batch;
use crate::reactivity::scheduling::process_waiting;
use crate::reactivity::tracking::notify_write;

pub(crate) enum UpdateOp {
    Set(Key, Box<dyn Any + Send>),
    Remove(Key),
    /// The value behind the key changed in place; re-run its readers
    Invalidate(Key),
}

pub(crate) struct PendingUpdate {
    scope: ScopeId,
    op: UpdateOp,
}

/// Thread-safe handle that queues writes for one context.
#[derive(Clone)]
pub struct ContextUpdater {
    scope: ScopeId,
    queue: Arc<Mutex<VecDeque<PendingUpdate>>>,
}

impl ContextUpdater {
    fn push(&self, op: UpdateOp) {
        self.queue.lock().push_back(PendingUpdate {
            scope: self.scope,
            op,
        });
    }

    pub fn set<V: Any + Send>(&self, key: impl Into<Key>, value: V) {
        self.push(UpdateOp::Set(key.into(), Box::new(value)));
    }

    pub fn remove(&self, key: impl Into<Key>) {
        self.push(UpdateOp::Remove(key.into()));
    }

    pub fn invalidate(&self, key: impl Into<Key>) {
        self.push(UpdateOp::Invalidate(key.into()));
    }

    /// Number of updates queued on this thread's runtime, for any context.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Context {
    /// Handle for posting updates to this context from any thread.
    pub fn updater(&self) -> ContextUpdater {
        ContextUpdater {
            scope: self.id(),
            queue: with_runtime(|rt| rt.updates.clone()),
        }
    }

    /// Apply queued cross-thread updates, then flush grouped reactions.
    pub fn process_waiting(&self) {
        process_waiting();
    }
}

/// Apply every queued update, in posting order, inside one batch.
///
/// Updates aimed at contexts that have been disposed are dropped.
pub(crate) fn drain_updates() {
    let updates: Vec<PendingUpdate> = with_runtime(|rt| rt.updates.lock().drain(..).collect());
    if updates.is_empty() {
        return;
    }

    trace!(count = updates.len(), "applying posted updates");
    batch(|| {
        for PendingUpdate { scope, op } in updates {
            let context = Context::from_id(scope);
            if context.is_disposed() {
                debug!(context = %scope, "dropping update for disposed context");
                continue;
            }
            let result = match op {
                UpdateOp::Set(key, value) => {
                    let value: Box<dyn Any> = value;
                    context.set_value(key, Value::from(value))
                }
                UpdateOp::Remove(key) => context.remove(key),
                UpdateOp::Invalidate(key) => {
                    notify_write(Source::Entry(scope, key));
                    Ok(())
                }
            };
            if let Err(err) = result {
                warn!(context = %scope, error = %err, "posted update rejected");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn updates_apply_on_process_waiting() {
        let ctx = Context::create();
        let updater = ctx.updater();

        let handle = std::thread::spawn(move || {
            updater.set("status", String::from("online"));
            updater.pending()
        });
        assert_eq!(handle.join().unwrap(), 1);

        assert!(ctx.get("status").is_none());
        ctx.process_waiting();
        assert_eq!(
            ctx.get_as::<String>("status").as_deref().map(String::as_str),
            Some("online")
        );
    }

    #[test]
    fn invalidate_reruns_readers() {
        let ctx = Context::create();
        ctx.set("service", 1).unwrap();
        let runs = Rc::new(Cell::new(0));
        let inner = runs.clone();
        ctx.run_and_track(move |ctx| {
            let _ = ctx.get("service");
            inner.set(inner.get() + 1);
            true
        })
        .unwrap();

        ctx.updater().invalidate("service");
        assert_eq!(runs.get(), 1);
        ctx.process_waiting();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn updates_for_disposed_contexts_are_dropped() {
        let root = Context::create();
        let child = root.create_child().unwrap();
        let updater = child.updater();
        updater.set("x", 1);
        updater.remove("y");
        child.dispose();

        root.process_waiting();
        assert_eq!(updater.pending(), 0);
        assert!(root.get("x").is_none());
    }
}
