// ============================================================================
// spark-context - Injection Records
// Per-object bookkeeping: bindings, lifecycle state, teardown
// ============================================================================
//
// Each field and each method of an injected object is its own reaction (a
// binding). A change to one of its inputs re-resolves and re-applies that
// binding alone. The record ties the bindings to the target and owns the
// lifecycle state machine:
//
//   Uninjected -> Injecting -> Live -> TearingDown -> Dead
//
// The record only holds a weak reference to the target. Dropping the target
// silently retires its bindings.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{debug, error};

use crate::core::constants::*;
use crate::core::error::InjectionError;
use crate::core::types::{AnyReaction, ReactionCore};
use crate::inject::descriptor::Descriptor;
use crate::inject::requirement::{resolve_all, Args, Requirement};
use crate::primitives::scope::Context;
use crate::reactivity::scheduling::reschedule;
use crate::reactivity::tracking::{destroy_reaction, run_tracked};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectionState {
    Uninjected,
    Injecting,
    Live,
    TearingDown,
    Dead,
}

// =============================================================================
// RECORD
// =============================================================================

pub(crate) struct InjectionRecord<T: 'static> {
    pub target: Weak<RefCell<T>>,
    pub descriptor: Rc<Descriptor<T>>,
    pub tracked: Context,
    pub static_ctx: Option<Context>,
    pub bindings: RefCell<Vec<Rc<BindingReaction<T>>>>,
    pub state: Cell<InjectionState>,
    pub post_construct_called: Cell<bool>,
    pub pre_destroy_called: Cell<bool>,
}

impl<T: 'static> InjectionRecord<T> {
    pub fn new(
        target: &Rc<RefCell<T>>,
        descriptor: Rc<Descriptor<T>>,
        tracked: Context,
        static_ctx: Option<Context>,
    ) -> Self {
        Self {
            target: Rc::downgrade(target),
            descriptor,
            tracked,
            static_ctx,
            bindings: RefCell::new(Vec::new()),
            state: Cell::new(InjectionState::Uninjected),
            post_construct_called: Cell::new(false),
            pre_destroy_called: Cell::new(false),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.descriptor.type_name()
    }

    /// Create one binding per field, then one per method, in declared order.
    pub fn create_bindings(self: &Rc<Self>) -> Vec<Rc<BindingReaction<T>>> {
        let fields = (0..self.descriptor.fields.len()).map(|i| (BindingKind::Field(i), false));
        let methods = self
            .descriptor
            .methods
            .iter()
            .enumerate()
            .map(|(i, m)| (BindingKind::Method(i), m.grouped));

        fields
            .chain(methods)
            .map(|(kind, grouped)| {
                let flags = if grouped { BINDING | GROUPED } else { BINDING };
                Rc::new(BindingReaction {
                    core: ReactionCore::new(flags, self.tracked.id()),
                    record: Rc::downgrade(self),
                    kind,
                })
            })
            .collect()
    }

    /// Run every post-construct hook. Only the first call has an effect.
    pub fn post_construct(&self) -> Result<(), InjectionError> {
        if self.post_construct_called.replace(true) {
            return Ok(());
        }
        let Some(target) = self.target.upgrade() else {
            return Ok(());
        };
        let mut target = target
            .try_borrow_mut()
            .map_err(|_| InjectionError::TargetBorrowed {
                target: self.type_name(),
            })?;
        for hook in &self.descriptor.post_construct {
            hook(&mut *target);
        }
        Ok(())
    }

    fn run_pre_destroy(&self, target: &RefCell<T>) {
        if self.pre_destroy_called.replace(true) {
            return;
        }
        let Ok(mut target) = target.try_borrow_mut() else {
            error!(target = self.type_name(), "target borrowed, pre-destroy hooks skipped");
            return;
        };
        for hook in &self.descriptor.pre_destroy {
            // A failing hook must not stop the others
            if catch_unwind(AssertUnwindSafe(|| hook(&mut *target))).is_err() {
                error!(target = self.type_name(), "pre-destroy hook panicked");
            }
        }
    }

    /// Hand every binding "nothing", so the object drops what it was given.
    fn nullify(&self, target: &RefCell<T>) {
        let Ok(mut target) = target.try_borrow_mut() else {
            error!(target = self.type_name(), "target borrowed, values not cleared");
            return;
        };
        for field in &self.descriptor.fields {
            if catch_unwind(AssertUnwindSafe(|| (field.apply)(&mut *target, None))).is_err() {
                error!(target = self.type_name(), "field rejected being cleared");
            }
        }
        for method in &self.descriptor.methods {
            let args = Args::absent(method.requirements.len());
            if catch_unwind(AssertUnwindSafe(|| (method.apply)(&mut *target, &args))).is_err() {
                error!(
                    target = self.type_name(),
                    method = method.name,
                    "method rejected being cleared"
                );
            }
        }
    }
}

// =============================================================================
// TYPE-ERASED RECORD
// =============================================================================

/// What a context needs from the injections it owns.
pub(crate) trait AnyInjection {
    /// Address of the target allocation, for lookups by object
    fn target_addr(&self) -> usize;

    fn state(&self) -> InjectionState;

    /// The target was dropped without being uninjected
    fn is_orphaned(&self) -> bool;

    /// Run pre-destroy (once), retire every binding, and optionally clear
    /// injected values. Idempotent.
    fn teardown(&self, nullify: bool);
}

impl<T: 'static> AnyInjection for InjectionRecord<T> {
    fn target_addr(&self) -> usize {
        self.target.as_ptr() as *const () as usize
    }

    fn state(&self) -> InjectionState {
        self.state.get()
    }

    fn is_orphaned(&self) -> bool {
        self.target.strong_count() == 0
    }

    fn teardown(&self, nullify: bool) {
        if matches!(
            self.state.get(),
            InjectionState::TearingDown | InjectionState::Dead
        ) {
            return;
        }
        self.state.set(InjectionState::TearingDown);
        debug!(target = self.type_name(), context = %self.tracked.id(), "tearing down injection");

        let target = self.target.upgrade();
        if let Some(target) = &target {
            self.run_pre_destroy(target);
        }

        let bindings = std::mem::take(&mut *self.bindings.borrow_mut());
        for binding in bindings {
            destroy_reaction(binding.id());
        }

        if nullify {
            if let Some(target) = &target {
                self.nullify(target);
            }
        }
        self.state.set(InjectionState::Dead);
    }
}

// =============================================================================
// BINDING
// =============================================================================

#[derive(Clone, Copy, Debug)]
pub(crate) enum BindingKind {
    Field(usize),
    Method(usize),
}

/// Reaction keeping one field or method of the target up to date.
pub(crate) struct BindingReaction<T: 'static> {
    core: ReactionCore,
    record: Weak<InjectionRecord<T>>,
    kind: BindingKind,
}

impl<T: 'static> BindingReaction<T> {
    fn requirements<'a>(&self, descriptor: &'a Descriptor<T>) -> &'a [Requirement] {
        match self.kind {
            BindingKind::Field(i) => std::slice::from_ref(&descriptor.fields[i].requirement),
            BindingKind::Method(i) => &descriptor.methods[i].requirements,
        }
    }

    /// Resolve this binding's requirements, recording what was read.
    pub fn resolve(&self) -> Result<Args, InjectionError> {
        let Some(record) = self.record.upgrade() else {
            return Ok(Args::default());
        };
        self.mark_clean();
        let requirements = self.requirements(&record.descriptor);
        run_tracked(self, || {
            resolve_all(
                requirements,
                record.tracked,
                record.static_ctx,
                None,
                record.type_name(),
            )
        })
    }

    /// Hand resolved values to the target.
    pub fn apply(&self, args: Args) -> Result<(), InjectionError> {
        let Some(record) = self.record.upgrade() else {
            return Ok(());
        };
        let Some(target) = record.target.upgrade() else {
            return Ok(());
        };
        let mut target = target
            .try_borrow_mut()
            .map_err(|_| InjectionError::TargetBorrowed {
                target: record.type_name(),
            })?;

        match self.kind {
            BindingKind::Field(i) => {
                let value = args.into_values().into_iter().next().flatten();
                (record.descriptor.fields[i].apply)(&mut *target, value);
            }
            BindingKind::Method(i) => {
                (record.descriptor.methods[i].apply)(&mut *target, &args);
            }
        }
        Ok(())
    }
}

impl<T: 'static> AnyReaction for BindingReaction<T> {
    fn core(&self) -> &ReactionCore {
        &self.core
    }

    fn update(&self) {
        let Some(record) = self.record.upgrade() else {
            destroy_reaction(self.id());
            return;
        };
        if record.state.get() != InjectionState::Live {
            return;
        }
        if record.target.strong_count() == 0 {
            record.teardown(false);
            return;
        }

        self.set_flags(self.flags() | REACTION_IS_UPDATING);
        let result = self.resolve().and_then(|args| self.apply(args));
        self.set_flags(self.flags() & !REACTION_IS_UPDATING);

        if let Err(err) = result {
            error!(target = record.type_name(), error = %err, "re-injection failed");
        }
        if self.is_dirty() {
            reschedule(self.id(), self.is_grouped());
        }
    }
}
