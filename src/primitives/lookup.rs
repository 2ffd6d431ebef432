// ============================================================================
// spark-context - Key Resolution
// The parent-chain walk and the external lookup hook
// ============================================================================

use std::rc::Rc;

use crate::core::runtime::with_runtime;
use crate::core::tree::Slot;
use crate::core::types::{Key, ScopeId, Source, Value};
use crate::primitives::computed::ComputedSlot;
use crate::primitives::scope::Context;
use crate::reactivity::tracking::track_read;

// =============================================================================
// LOOKUP STRATEGY
// =============================================================================

/// Resolver a context consults for keys it does not hold locally.
///
/// Typically installed on a root context to expose an outside registry.
/// The runtime stops calling it as soon as its context starts disposing,
/// and calls `dispose` once afterwards.
pub trait LookupStrategy {
    fn lookup(&self, key: &Key, context: &Context) -> Option<Value>;

    fn contains_key(&self, key: &Key, context: &Context) -> bool {
        self.lookup(key, context).is_some()
    }

    fn dispose(&self) {}
}

// =============================================================================
// WALK
// =============================================================================

enum Step {
    Found(Value),
    Masked,
    Computed(Rc<ComputedSlot>),
    Delegate {
        lookup: Option<Rc<dyn LookupStrategy>>,
        parent: Option<ScopeId>,
    },
}

/// Inspect one context without holding the borrow past the call.
fn step(id: ScopeId, key: &Key) -> Option<Step> {
    with_runtime(|rt| {
        rt.scope(id, |node| match node.values.get(key) {
            Some(Slot::Value(value)) => Step::Found(value.clone()),
            Some(Slot::Masked) => Step::Masked,
            Some(Slot::Computed(slot)) => Step::Computed(slot.clone()),
            None => Step::Delegate {
                lookup: node.lookup.clone().filter(|_| node.is_live()),
                parent: node.parent,
            },
        })
    })
}

fn is_live(id: ScopeId) -> bool {
    with_runtime(|rt| rt.is_live(id))
}

/// Resolve `key` as seen from `origin`.
///
/// Every context visited is recorded as a read before it is inspected, so a
/// later write anywhere along the chain (including one that shadows an
/// ancestor) re-runs the reader.
pub(crate) fn resolve(origin: Context, key: &Key) -> Option<Value> {
    let mut current = Some(origin.id());

    while let Some(id) = current {
        track_read(Source::Entry(id, key.clone()));

        match step(id, key)? {
            Step::Found(value) => return Some(value),
            Step::Masked => return None,
            Step::Computed(slot) => return slot.evaluate(origin, key),
            Step::Delegate { lookup, parent } => {
                if let Some(lookup) = lookup {
                    let value = lookup.lookup(key, &Context::from_id(id));
                    // Disposal may have started while the strategy ran
                    if value.is_some() && is_live(id) {
                        return value;
                    }
                }
                current = parent;
            }
        }
    }

    None
}

/// Whether `key` resolves from `origin`, without evaluating computed values.
pub(crate) fn contains(origin: Context, key: &Key) -> bool {
    let mut current = Some(origin.id());

    while let Some(id) = current {
        track_read(Source::Entry(id, key.clone()));

        match step(id, key) {
            None | Some(Step::Masked) => return false,
            Some(Step::Found(_)) | Some(Step::Computed(_)) => return true,
            Some(Step::Delegate { lookup, parent }) => {
                if let Some(lookup) = lookup {
                    if lookup.contains_key(key, &Context::from_id(id)) && is_live(id) {
                        return true;
                    }
                }
                current = parent;
            }
        }
    }

    false
}

/// Resolve `key` in `origin` alone: no parent, no lookup strategy.
pub(crate) fn local(origin: Context, key: &Key) -> Option<Value> {
    track_read(Source::Entry(origin.id(), key.clone()));

    match step(origin.id(), key)? {
        Step::Found(value) => Some(value),
        Step::Computed(slot) => slot.evaluate(origin, key),
        Step::Masked | Step::Delegate { .. } => None,
    }
}

/// Whether `origin` itself holds `key` (a value or a computed value).
pub(crate) fn contains_local(origin: Context, key: &Key) -> bool {
    track_read(Source::Entry(origin.id(), key.clone()));
    matches!(
        step(origin.id(), key),
        Some(Step::Found(_)) | Some(Step::Computed(_))
    )
}
