// ============================================================================
// spark-context - Activation
// The active-child chain and lookups redirected to the active leaf
// ============================================================================

use tracing::trace;

use crate::core::error::ContextError;
use crate::core::runtime::with_runtime;
use crate::core::types::{Key, ScopeId, Source, Value};
use crate::primitives::scope::Context;
use crate::reactivity::batching::batch;
use crate::reactivity::tracking::{notify_write, track_read};

/// Point `parent`'s active child at `child`. Returns true if it changed.
fn set_active_child(parent: ScopeId, child: Option<ScopeId>) -> bool {
    with_runtime(|rt| {
        rt.scope_mut(parent, |node| {
            if node.active_child == child {
                return Ok(false);
            }
            node.active_child = child;
            Ok(true)
        })
    })
    .unwrap_or(false)
}

fn parent_of(id: ScopeId) -> Option<ScopeId> {
    with_runtime(|rt| rt.scope(id, |node| node.parent)).flatten()
}

impl Context {
    /// Make this context its parent's active child, and each ancestor the
    /// active child of its own parent, up to the root.
    pub fn activate(&self) -> Result<(), ContextError> {
        self.ensure_live()?;

        let mut changed = Vec::new();
        let mut child = self.id();
        while let Some(parent) = parent_of(child) {
            if set_active_child(parent, Some(child)) {
                changed.push(parent);
            }
            child = parent;
        }

        trace!(context = %self.id(), changed = changed.len(), "activated");
        batch(|| {
            for parent in changed {
                notify_write(Source::ActiveChild(parent));
            }
        });
        Ok(())
    }

    /// Activate this context and make it the active leaf: any active chain
    /// below it is cut.
    pub fn activate_branch(&self) -> Result<(), ContextError> {
        batch(|| {
            self.activate()?;
            if set_active_child(self.id(), None) {
                notify_write(Source::ActiveChild(self.id()));
            }
            Ok(())
        })
    }

    /// Clear the parent's active-child pointer if it points at this context.
    pub fn deactivate(&self) -> Result<(), ContextError> {
        self.ensure_live()?;
        let Some(parent) = parent_of(self.id()) else {
            return Ok(());
        };

        let cleared = with_runtime(|rt| {
            rt.scope_mut(parent, |node| {
                if node.active_child != Some(self.id()) {
                    return Ok(false);
                }
                node.active_child = None;
                Ok(true)
            })
        })?;
        if cleared {
            trace!(context = %self.id(), "deactivated");
            notify_write(Source::ActiveChild(parent));
        }
        Ok(())
    }

    /// The active child, if one is set and still alive. Tracked.
    pub fn get_active_child(&self) -> Option<Context> {
        track_read(Source::ActiveChild(self.id()));
        with_runtime(|rt| {
            let child = rt.scope(self.id(), |node| node.active_child).flatten()?;
            rt.scope(child, |_| Context::from_id(child))
        })
    }

    /// Follow active children down to the deepest one. Returns this context
    /// if it has no active child. Tracked at every level.
    ///
    /// # Panics
    /// If the context has been disposed.
    pub fn get_active_leaf(&self) -> Context {
        if let Err(err) = self.ensure_readable() {
            panic!("{err}");
        }
        let mut current = *self;
        while let Some(child) = current.get_active_child() {
            current = child;
        }
        current
    }

    /// Resolve `key` from the active leaf instead of this context.
    pub fn get_active(&self, key: impl Into<Key>) -> Option<Value> {
        self.get_active_leaf().get(key)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_marks_every_ancestor() {
        let p = Context::create();
        let a = p.create_child().unwrap();
        let b = p.create_child().unwrap();
        let b1 = b.create_child().unwrap();

        b1.activate().unwrap();
        assert_eq!(p.get_active_leaf(), b1);
        assert_eq!(p.get_active_child(), Some(b));

        a.activate().unwrap();
        assert_eq!(p.get_active_leaf(), a);
        // b still remembers its own active child
        assert_eq!(b.get_active_leaf(), b1);
    }

    #[test]
    fn disposing_the_leaf_falls_back_to_its_parent() {
        let p = Context::create();
        let _a = p.create_child().unwrap();
        let b = p.create_child().unwrap();
        let b1 = b.create_child().unwrap();

        b1.activate().unwrap();
        assert_eq!(p.get_active_leaf(), b1);

        b1.dispose();
        assert_eq!(p.get_active_leaf(), b);
    }

    #[test]
    fn activate_branch_cuts_the_chain_below() {
        let p = Context::create();
        let b = p.create_child().unwrap();
        let b1 = b.create_child().unwrap();

        b1.activate().unwrap();
        b.activate_branch().unwrap();
        assert_eq!(p.get_active_leaf(), b);
        assert_eq!(b.get_active_child(), None);
    }

    #[test]
    fn deactivate_only_clears_own_pointer() {
        let p = Context::create();
        let a = p.create_child().unwrap();
        let b = p.create_child().unwrap();

        a.activate().unwrap();
        b.deactivate().unwrap();
        assert_eq!(p.get_active_leaf(), a);

        a.deactivate().unwrap();
        assert_eq!(p.get_active_leaf(), p);
    }

    #[test]
    fn get_active_reads_the_leaf_value() {
        let p = Context::create();
        let a = p.create_child().unwrap();
        p.set("selection", 1).unwrap();
        a.set("selection", 2).unwrap();

        let read = |ctx: &Context| {
            ctx.get_active("selection")
                .and_then(|v| v.downcast_ref::<i32>().copied())
        };
        assert_eq!(read(&p), Some(1));
        a.activate().unwrap();
        assert_eq!(read(&p), Some(2));
    }
}
