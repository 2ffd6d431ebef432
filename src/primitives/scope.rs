// ============================================================================
// spark-context - Context
//
// Hierarchical key/value scopes with change tracking and disposal.
// ============================================================================
//
// A `Context` is a small copyable handle into the thread-local context
// table. Lookups walk the parent chain; writes notify every reaction that
// read the entry; `dispose()` tears down a whole subtree.
//
// Key features:
// - get/set/remove with masking (a removed key hides ancestor values)
// - computed values evaluated per requesting context
// - run_and_track sessions and injected bindings follow what they read
// - dispose() runs pre-destroy hooks exactly once, children first
// ============================================================================

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use crate::core::constants::COMPUTED;
use crate::core::error::ContextError;
use crate::core::runtime::with_runtime;
use crate::core::tree::{ScopeNode, ScopeState, Slot};
use crate::core::types::{Key, ScopeId, Source, Value};
use crate::primitives::computed::{ComputedSlot, ComputedValue};
use crate::primitives::lookup::{self, LookupStrategy};
use crate::reactivity::batching::batch;
use crate::reactivity::tracking::{destroy_reaction, notify_write, release_sources};

// =============================================================================
// CONTEXT
// =============================================================================

/// Handle to one context in the tree.
///
/// Handles are `Copy` and compare by identity. They stay valid (but inert)
/// after disposal: reads panic and writes return `ContextError::Disposed`.
/// Contexts belong to the thread that created them, so the handle is
/// neither `Send` nor `Sync`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Context {
    id: ScopeId,
    _local: PhantomData<Rc<()>>,
}

impl Context {
    pub(crate) fn from_id(id: ScopeId) -> Self {
        Self {
            id,
            _local: PhantomData,
        }
    }

    /// Create an unnamed root context.
    pub fn create() -> Self {
        Self::builder().build()
    }

    /// Configure a root context before creating it.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn name(&self) -> Option<String> {
        with_runtime(|rt| rt.scope(self.id, |node| node.name.clone())).flatten()
    }

    /// Parent context, `None` for roots and disposed contexts.
    pub fn parent(&self) -> Option<Context> {
        with_runtime(|rt| rt.scope(self.id, |node| node.parent))
            .flatten()
            .map(Context::from_id)
    }

    /// Children in creation order.
    pub fn children(&self) -> Vec<Context> {
        with_runtime(|rt| rt.scope(self.id, |node| node.children.clone()))
            .unwrap_or_default()
            .into_iter()
            .map(Context::from_id)
            .collect()
    }

    /// True once disposal has started.
    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.is_live(self.id))
    }

    /// Readable: not yet removed. Disposing contexts stay readable so
    /// pre-destroy hooks can look at current values.
    pub(crate) fn ensure_readable(&self) -> Result<(), ContextError> {
        match with_runtime(|rt| rt.scope(self.id, |_| ())) {
            Some(()) => Ok(()),
            None => Err(ContextError::Disposed { scope: self.id }),
        }
    }

    pub(crate) fn ensure_live(&self) -> Result<(), ContextError> {
        if with_runtime(|rt| rt.is_live(self.id)) {
            Ok(())
        } else {
            Err(ContextError::Disposed { scope: self.id })
        }
    }

    fn expect_readable(&self) {
        if let Err(err) = self.ensure_readable() {
            panic!("{err}");
        }
    }

    // =========================================================================
    // CHILDREN
    // =========================================================================

    pub fn create_child(&self) -> Result<Context, ContextError> {
        self.spawn_child(None)
    }

    pub fn create_child_named(&self, name: impl Into<String>) -> Result<Context, ContextError> {
        self.spawn_child(Some(name.into()))
    }

    fn spawn_child(&self, name: Option<String>) -> Result<Context, ContextError> {
        self.ensure_live()?;
        let id = with_runtime(|rt| {
            let id = rt
                .scopes
                .borrow_mut()
                .insert(ScopeNode::new(name, Some(self.id), None));
            rt.scope_mut(self.id, |node| {
                node.children.push(id);
                Ok(())
            })?;
            Ok::<_, ContextError>(id)
        })?;
        debug!(context = %id, parent = %self.id, "context created");
        Ok(Context::from_id(id))
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Resolve `key`: local entry, then the lookup strategy, then the parent.
    ///
    /// # Panics
    /// If the context has been disposed. See [`Context::try_get`].
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.expect_readable();
        lookup::resolve(*self, &key.into())
    }

    pub fn try_get(&self, key: impl Into<Key>) -> Result<Option<Value>, ContextError> {
        self.ensure_readable()?;
        Ok(lookup::resolve(*self, &key.into()))
    }

    /// Resolve `key` and downcast. A value of another type reads as `None`.
    pub fn get_as<V: Any>(&self, key: impl Into<Key>) -> Option<Rc<V>> {
        let key = key.into();
        let value = self.get(&key)?;
        match value.downcast::<V>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key = %key, expected = std::any::type_name::<V>(), "value has another type");
                None
            }
        }
    }

    /// Resolve the raw type key of `V`.
    pub fn get_typed<V: Any>(&self) -> Option<Rc<V>> {
        self.get_as::<V>(Key::of::<V>())
    }

    /// Resolve `key` in this context only.
    pub fn get_local(&self, key: impl Into<Key>) -> Option<Value> {
        self.expect_readable();
        lookup::local(*self, &key.into())
    }

    pub fn contains_key(&self, key: impl Into<Key>) -> bool {
        self.expect_readable();
        lookup::contains(*self, &key.into())
    }

    pub fn contains_local_key(&self, key: impl Into<Key>) -> bool {
        self.expect_readable();
        lookup::contains_local(*self, &key.into())
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Store `value` under `key` and re-run everything that read the entry.
    pub fn set<V: Any>(&self, key: impl Into<Key>, value: V) -> Result<(), ContextError> {
        self.set_value(key, Rc::new(value))
    }

    /// Store an already shared value. Setting the very same `Rc` again is a
    /// no-op and notifies nobody.
    pub fn set_value(&self, key: impl Into<Key>, value: Value) -> Result<(), ContextError> {
        self.write(key.into(), Slot::Value(value))
    }

    /// Store `value` under the raw type key of `V`.
    pub fn set_typed<V: Any>(&self, value: V) -> Result<(), ContextError> {
        self.set_value(Key::of::<V>(), Rc::new(value))
    }

    /// Store a computed value under `key`.
    pub fn set_computed(
        &self,
        key: impl Into<Key>,
        func: impl ComputedValue + 'static,
    ) -> Result<(), ContextError> {
        let slot = ComputedSlot::new(Rc::new(func));
        self.write(key.into(), Slot::Computed(Rc::new(slot)))
    }

    /// Remove `key` locally. The key stays masked: values held by ancestors
    /// are not visible through this context until it is set again.
    pub fn remove(&self, key: impl Into<Key>) -> Result<(), ContextError> {
        self.write(key.into(), Slot::Masked)
    }

    fn write(&self, key: Key, slot: Slot) -> Result<(), ContextError> {
        let in_computed = with_runtime(|rt| rt.current_frame_kind())
            .is_some_and(|kind| kind & COMPUTED != 0);
        if in_computed {
            return Err(ContextError::WriteInComputed { key });
        }

        let previous = with_runtime(|rt| {
            rt.scope_mut(self.id, |node| {
                if node.state != ScopeState::Live {
                    return Err(ContextError::Disposed { scope: self.id });
                }
                if let (Some(Slot::Value(old)), Slot::Value(new)) = (node.values.get(&key), &slot)
                {
                    if Rc::ptr_eq(old, new) {
                        return Ok(None);
                    }
                }
                Ok(Some(node.values.insert(key.clone(), slot)))
            })
        })?;

        let Some(previous) = previous else {
            return Ok(());
        };
        if let Some(Slot::Computed(old)) = &previous {
            old.release();
        }
        drop(previous);

        let version = with_runtime(|rt| rt.increment_write_version());
        trace!(context = %self.id, key = %key, version, "entry written");
        notify_write(Source::Entry(self.id, key));
        Ok(())
    }

    // =========================================================================
    // DISPOSAL
    // =========================================================================

    /// Dispose this context and its whole subtree.
    ///
    /// Order: children (in creation order, each fully disposed), then this
    /// context's injected objects in registration order (pre-destroy hooks
    /// fire), then computed caches, sessions and bindings owned here. Finally
    /// the context detaches from its parent and its lookup strategy is
    /// disposed. Calling it again is a no-op.
    pub fn dispose(&self) {
        let started = with_runtime(|rt| {
            rt.scope_mut(self.id, |node| {
                if node.state != ScopeState::Live {
                    return Ok(false);
                }
                node.state = ScopeState::Disposing;
                Ok(true)
            })
        });
        if !matches!(started, Ok(true)) {
            return;
        }
        debug!(context = %self.id, "disposing context");

        let lookup = batch(|| self.teardown());

        if let Some(lookup) = lookup {
            if catch_unwind(AssertUnwindSafe(|| lookup.dispose())).is_err() {
                error!(context = %self.id, "lookup strategy panicked while disposing");
            }
        }
    }

    fn teardown(&self) -> Option<Rc<dyn LookupStrategy>> {
        let children: Vec<ScopeId> =
            with_runtime(|rt| rt.scope(self.id, |node| node.children.clone())).unwrap_or_default();
        for child in children {
            Context::from_id(child).dispose();
        }

        let injections = with_runtime(|rt| {
            rt.scope_mut(self.id, |node| Ok(std::mem::take(&mut node.injections)))
        })
        .unwrap_or_default();
        for injection in injections {
            injection.teardown(false);
        }

        let computed: Vec<Rc<ComputedSlot>> = with_runtime(|rt| {
            rt.scope(self.id, |node| {
                node.values
                    .values()
                    .filter_map(|slot| match slot {
                        Slot::Computed(c) => Some(c.clone()),
                        _ => None,
                    })
                    .collect()
            })
        })
        .unwrap_or_default();
        for slot in computed {
            slot.release();
        }

        let reactions = with_runtime(|rt| {
            rt.scope_mut(self.id, |node| Ok(std::mem::take(&mut node.reactions)))
        })
        .unwrap_or_default();
        for id in reactions {
            destroy_reaction(id);
        }
        release_sources(self.id);

        // Detach, clearing the active-child pointer if it points here
        let parent = with_runtime(|rt| rt.scope(self.id, |node| node.parent)).flatten();
        if let Some(parent) = parent {
            let was_active = with_runtime(|rt| {
                rt.scope_mut(parent, |node| {
                    node.children.retain(|c| *c != self.id);
                    let was_active = node.active_child == Some(self.id);
                    if was_active {
                        node.active_child = None;
                    }
                    Ok(was_active)
                })
            })
            .unwrap_or(false);
            if was_active {
                notify_write(Source::ActiveChild(parent));
            }
        }

        // Values drop here, after every borrow is released
        let node = with_runtime(|rt| rt.scopes.borrow_mut().remove(self.id));
        debug!(context = %self.id, "context disposed");
        node.and_then(|node| node.lookup.clone())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builder for root contexts.
#[derive(Default)]
pub struct ContextBuilder {
    name: Option<String>,
    lookup: Option<Rc<dyn LookupStrategy>>,
}

impl ContextBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Resolver consulted for keys this root does not hold.
    pub fn lookup(mut self, lookup: impl LookupStrategy + 'static) -> Self {
        self.lookup = Some(Rc::new(lookup));
        self
    }

    pub fn build(self) -> Context {
        let id = with_runtime(|rt| {
            rt.scopes
                .borrow_mut()
                .insert(ScopeNode::new(self.name, None, self.lookup))
        });
        debug!(context = %id, "root context created");
        Context::from_id(id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn int(value: Option<Value>) -> Option<i32> {
        value.and_then(|v| v.downcast_ref::<i32>().copied())
    }

    #[test]
    fn set_then_get_round_trips() {
        let ctx = Context::create();
        ctx.set("x", 1).unwrap();
        assert_eq!(int(ctx.get("x")), Some(1));

        ctx.set("x", 2).unwrap();
        assert_eq!(int(ctx.get("x")), Some(2));
    }

    #[test]
    fn children_delegate_to_parents() {
        let root = Context::create();
        let child = root.create_child().unwrap();
        let grandchild = child.create_child().unwrap();

        root.set("x", 1).unwrap();
        assert_eq!(int(grandchild.get("x")), Some(1));
        assert!(grandchild.contains_key("x"));
        assert!(!grandchild.contains_local_key("x"));
        assert!(grandchild.get_local("x").is_none());

        child.set("x", 2).unwrap();
        assert_eq!(int(grandchild.get("x")), Some(2));
        assert_eq!(int(root.get("x")), Some(1));
    }

    #[test]
    fn remove_masks_ancestor_values() {
        let root = Context::create();
        let child = root.create_child().unwrap();
        root.set("x", 1).unwrap();

        child.remove("x").unwrap();
        assert!(child.get("x").is_none());
        assert!(!child.contains_key("x"));
        assert_eq!(int(root.get("x")), Some(1));

        child.set("x", 3).unwrap();
        assert_eq!(int(child.get("x")), Some(3));
    }

    #[test]
    fn typed_keys_and_accessors() {
        let ctx = Context::create();
        ctx.set_typed(String::from("hello")).unwrap();
        assert_eq!(ctx.get_typed::<String>().as_deref().map(String::as_str), Some("hello"));
        assert!(ctx.get_as::<i32>(Key::of::<String>()).is_none());
    }

    #[test]
    fn builder_sets_name() {
        let ctx = Context::builder().name("workbench").build();
        assert_eq!(ctx.name().as_deref(), Some("workbench"));
        let child = ctx.create_child_named("part").unwrap();
        assert_eq!(child.parent(), Some(ctx));
        assert_eq!(ctx.children(), vec![child]);
        assert!(child.to_string().starts_with("part"));
    }

    #[test]
    fn disposed_context_rejects_writes_and_panics_on_reads() {
        let ctx = Context::create();
        ctx.dispose();

        assert!(ctx.is_disposed());
        assert_eq!(
            ctx.set("x", 1),
            Err(ContextError::Disposed { scope: ctx.id() })
        );
        assert!(ctx.try_get("x").is_err());
        assert!(ctx.create_child().is_err());

        let read = catch_unwind(AssertUnwindSafe(|| ctx.get("x")));
        assert!(read.is_err());
    }

    #[test]
    fn dispose_twice_is_a_noop() {
        let root = Context::create();
        let child = root.create_child().unwrap();
        child.dispose();
        child.dispose();
        assert!(root.children().is_empty());
        assert!(!root.is_disposed());
    }

    #[test]
    fn dispose_removes_the_whole_subtree() {
        let root = Context::create();
        let child = root.create_child().unwrap();
        let grandchild = child.create_child().unwrap();

        root.dispose();
        assert!(child.is_disposed());
        assert!(grandchild.is_disposed());
    }

    struct Registry {
        disposed: Rc<Cell<bool>>,
        calls: Rc<Cell<u32>>,
    }

    impl LookupStrategy for Registry {
        fn lookup(&self, key: &Key, _context: &Context) -> Option<Value> {
            self.calls.set(self.calls.get() + 1);
            (key.as_str() == "service").then(|| Rc::new(42i32) as Value)
        }

        fn dispose(&self) {
            self.disposed.set(true);
        }
    }

    #[test]
    fn lookup_strategy_supplies_missing_keys() {
        let disposed = Rc::new(Cell::new(false));
        let calls = Rc::new(Cell::new(0));
        let root = Context::builder()
            .lookup(Registry {
                disposed: disposed.clone(),
                calls: calls.clone(),
            })
            .build();
        let child = root.create_child().unwrap();

        assert_eq!(int(child.get("service")), Some(42));
        assert!(child.contains_key("service"));
        assert!(child.get("other").is_none());

        root.set("service", 7).unwrap();
        let before = calls.get();
        assert_eq!(int(child.get("service")), Some(7));
        assert_eq!(calls.get(), before, "local values win over the strategy");

        root.dispose();
        assert!(disposed.get());
    }

    #[test]
    fn same_rc_is_not_a_change() {
        let ctx = Context::create();
        let value: Value = Rc::new(5i32);
        ctx.set_value("x", value.clone()).unwrap();
        let version = crate::core::runtime::write_version();
        ctx.set_value("x", value).unwrap();
        assert_eq!(crate::core::runtime::write_version(), version);
    }
}
