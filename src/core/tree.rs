// ============================================================================
// spark-context - Context Tree Storage
// Generational slot table holding every context node on this thread
// ============================================================================
//
// Nodes refer to each other by `ScopeId`, never by pointer. Parent, child and
// active-child links are plain ids, and a stale id (wrong generation) simply
// resolves to nothing. This keeps disposal free of reference cycles.
// ============================================================================

use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::types::{Key, ReactionId, ScopeId, Value};
use crate::inject::record::AnyInjection;
use crate::primitives::computed::ComputedSlot;
use crate::primitives::lookup::LookupStrategy;

// =============================================================================
// NODE
// =============================================================================

/// What a context holds locally for one key.
#[derive(Clone)]
pub(crate) enum Slot {
    Value(Value),
    Computed(Rc<ComputedSlot>),
    /// Removed locally: hides any value an ancestor holds for the key
    Masked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScopeState {
    Live,
    /// Disposal has started. Reads are still served, writes are rejected
    /// and the lookup strategy is no longer consulted.
    Disposing,
}

pub(crate) struct ScopeNode {
    pub name: Option<String>,
    pub parent: Option<ScopeId>,
    /// In creation order
    pub children: Vec<ScopeId>,
    pub values: FxHashMap<Key, Slot>,
    pub active_child: Option<ScopeId>,
    pub lookup: Option<Rc<dyn LookupStrategy>>,
    pub state: ScopeState,
    /// Reactions destroyed with this context
    pub reactions: Vec<ReactionId>,
    /// Injected objects torn down with this context, in registration order
    pub injections: Vec<Rc<dyn AnyInjection>>,
}

impl ScopeNode {
    pub fn new(
        name: Option<String>,
        parent: Option<ScopeId>,
        lookup: Option<Rc<dyn LookupStrategy>>,
    ) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            values: FxHashMap::default(),
            active_child: None,
            lookup,
            state: ScopeState::Live,
            reactions: Vec::new(),
            injections: Vec::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.state == ScopeState::Live
    }
}

// =============================================================================
// TABLE
// =============================================================================

struct ScopeSlot {
    generation: u32,
    node: Option<ScopeNode>,
}

#[derive(Default)]
pub(crate) struct ScopeTable {
    slots: Vec<ScopeSlot>,
    free: Vec<u32>,
}

impl ScopeTable {
    pub fn insert(&mut self, node: ScopeNode) -> ScopeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return ScopeId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(ScopeSlot {
            generation: 0,
            node: Some(node),
        });
        ScopeId {
            index,
            generation: 0,
        }
    }

    /// Free the slot, bumping its generation so `id` goes stale.
    pub fn remove(&mut self, id: ScopeId) -> Option<ScopeNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    pub fn get(&self, id: ScopeId) -> Option<&ScopeNode> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Option<&mut ScopeNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
