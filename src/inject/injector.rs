// ============================================================================
// spark-context - Injector
// inject / make / uninject / invoke
// ============================================================================

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::core::error::{ContextError, InjectionError};
use crate::core::runtime::with_runtime;
use crate::core::types::{AnyReaction, Value};
use crate::inject::descriptor::{descriptor_of, Descriptor, Injectable, Marker};
use crate::inject::record::{AnyInjection, InjectionRecord, InjectionState};
use crate::inject::requirement::resolve_all;
use crate::primitives::scope::Context;
use crate::reactivity::batching::{batch, untrack};
use crate::reactivity::tracking::{destroy_reaction, register_reaction};

// =============================================================================
// INJECT
// =============================================================================

/// Inject `target` from `tracked`, falling back to `static_ctx` for keys the
/// tracked chain does not supply.
///
/// Fields are injected first, then methods. Once every binding has been
/// applied the post-construct hooks run, exactly once. From then on each
/// binding re-runs on its own when a tracked input changes. Values found
/// through `static_ctx` are never tracked.
///
/// Nothing is applied unless every mandatory requirement resolves.
pub fn inject<T: Injectable>(
    target: &Rc<RefCell<T>>,
    tracked: &Context,
    static_ctx: Option<&Context>,
) -> Result<(), InjectionError> {
    inject_with(target, &descriptor_of::<T>(), tracked, static_ctx)
}

/// [`inject`] with an explicit descriptor.
pub fn inject_with<T: 'static>(
    target: &Rc<RefCell<T>>,
    descriptor: &Rc<Descriptor<T>>,
    tracked: &Context,
    static_ctx: Option<&Context>,
) -> Result<(), InjectionError> {
    tracked.ensure_live()?;

    let record = Rc::new(InjectionRecord::new(
        target,
        descriptor.clone(),
        *tracked,
        static_ctx.copied(),
    ));
    debug!(target = record.type_name(), context = %tracked.id(), "injecting");

    // One batch: writes made by hooks or setters land after injection
    // completes, and see the record live.
    batch(|| {
        record.state.set(InjectionState::Injecting);
        let bindings = record.create_bindings();
        for binding in &bindings {
            register_reaction(binding.clone());
        }
        *record.bindings.borrow_mut() = bindings.clone();

        let abort = |err: InjectionError| -> Result<(), InjectionError> {
            for binding in &bindings {
                destroy_reaction(binding.id());
            }
            record.bindings.borrow_mut().clear();
            record.state.set(InjectionState::Dead);
            Err(err)
        };

        // Resolve everything before applying anything
        let mut resolved = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            match binding.resolve() {
                Ok(args) => resolved.push(args),
                Err(err) => return abort(err),
            }
        }
        for (binding, args) in bindings.iter().zip(resolved) {
            if let Err(err) = binding.apply(args) {
                return abort(err);
            }
        }
        if let Err(err) = record.post_construct() {
            return abort(err);
        }

        // A hook may have disposed the context
        let attached = with_runtime(|rt| {
            rt.scope_mut(tracked.id(), |node| {
                if !node.is_live() {
                    return Err(ContextError::Disposed { scope: tracked.id() });
                }
                let (orphaned, live): (Vec<_>, Vec<_>) = std::mem::take(&mut node.injections)
                    .into_iter()
                    .partition(|r| r.is_orphaned());
                node.injections = live;
                node.injections.push(record.clone() as Rc<dyn AnyInjection>);
                Ok(orphaned)
            })
        });
        let orphaned = match attached {
            Ok(orphaned) => orphaned,
            Err(err) => return abort(err.into()),
        };
        record.state.set(InjectionState::Live);

        // Objects dropped without being uninjected
        for stale in orphaned {
            stale.teardown(false);
        }
        Ok(())
    })
}

// =============================================================================
// MAKE
// =============================================================================

/// Construct a `T` with its single declared constructor, then inject it.
///
/// Constructor arguments are resolved once and not tracked. For a
/// descriptor marked [`Descriptor::singleton`] the first successful `make`
/// on this thread is cached and every later call returns that instance.
pub fn make<T: Injectable>(
    tracked: &Context,
    static_ctx: Option<&Context>,
) -> Result<Rc<RefCell<T>>, InjectionError> {
    make_with(&descriptor_of::<T>(), tracked, static_ctx)
}

/// [`make`] with an explicit descriptor.
pub fn make_with<T: 'static>(
    descriptor: &Rc<Descriptor<T>>,
    tracked: &Context,
    static_ctx: Option<&Context>,
) -> Result<Rc<RefCell<T>>, InjectionError> {
    tracked.ensure_live()?;
    if descriptor.is_singleton() {
        if let Some(instance) = cached_singleton::<T>() {
            return Ok(instance);
        }
    }

    let constructor = match descriptor.constructors.as_slice() {
        [] => {
            return Err(InjectionError::NoConstructor {
                target: descriptor.type_name(),
            });
        }
        [constructor] => constructor,
        many => {
            return Err(InjectionError::AmbiguousConstructor {
                target: descriptor.type_name(),
                count: many.len(),
            });
        }
    };

    let args = untrack(|| {
        resolve_all(
            &constructor.requirements,
            *tracked,
            static_ctx.copied(),
            None,
            descriptor.type_name(),
        )
    })?;

    let target = Rc::new(RefCell::new((constructor.build)(&args)));
    inject_with(&target, descriptor, tracked, static_ctx)?;
    if descriptor.is_singleton() {
        debug!(target = descriptor.type_name(), "caching singleton");
        cache_singleton(&target);
    }
    Ok(target)
}

thread_local! {
    static SINGLETONS: RefCell<FxHashMap<TypeId, Rc<dyn Any>>> =
        RefCell::new(FxHashMap::default());
}

fn cached_singleton<T: 'static>() -> Option<Rc<RefCell<T>>> {
    let cached = SINGLETONS.with(|s| s.borrow().get(&TypeId::of::<T>()).cloned())?;
    cached.downcast::<RefCell<T>>().ok()
}

fn cache_singleton<T: 'static>(instance: &Rc<RefCell<T>>) {
    SINGLETONS.with(|s| {
        s.borrow_mut().insert(TypeId::of::<T>(), instance.clone() as Rc<dyn Any>);
    });
}

// =============================================================================
// UNINJECT
// =============================================================================

/// Detach `target` from `context` while the context lives on.
///
/// Runs pre-destroy (if it has not run yet), retires every binding, then
/// passes "nothing" to every field and method so the object lets go of
/// injected values. Returns `false` if `target` was not injected there.
pub fn uninject<T: 'static>(
    target: &Rc<RefCell<T>>,
    context: &Context,
) -> Result<bool, InjectionError> {
    let addr = Rc::as_ptr(target) as *const () as usize;
    let record = with_runtime(|rt| {
        rt.scope_mut(context.id(), |node| {
            let position = node.injections.iter().position(|r| r.target_addr() == addr);
            Ok(position.map(|p| node.injections.remove(p)))
        })
    })?;

    match record {
        Some(record) => {
            record.teardown(true);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Lifecycle state of `target` in `context`, if it was injected there.
pub fn injection_state<T: 'static>(
    target: &Rc<RefCell<T>>,
    context: &Context,
) -> Option<InjectionState> {
    let addr = Rc::as_ptr(target) as *const () as usize;
    with_runtime(|rt| {
        rt.scope(context.id(), |node| {
            node.injections
                .iter()
                .find(|r| r.target_addr() == addr)
                .map(|r| r.state())
        })
    })
    .flatten()
}

// =============================================================================
// INVOKE
// =============================================================================

/// Call the method of `target` marked `marker`, once, without tracking.
pub fn invoke<T: Injectable>(
    target: &Rc<RefCell<T>>,
    marker: Marker,
    tracked: &Context,
    static_ctx: Option<&Context>,
    extra: Option<Value>,
) -> Result<Option<Value>, InjectionError> {
    invoke_with(target, &descriptor_of::<T>(), marker, tracked, static_ctx, extra)
}

/// [`invoke`] with an explicit descriptor.
///
/// `extra` fills any typed requirement nothing else satisfies. Among
/// several methods with the same marker, the first whose requirements all
/// resolve is called; if none do, the last resolution error is returned.
pub fn invoke_with<T: 'static>(
    target: &Rc<RefCell<T>>,
    descriptor: &Rc<Descriptor<T>>,
    marker: Marker,
    tracked: &Context,
    static_ctx: Option<&Context>,
    extra: Option<Value>,
) -> Result<Option<Value>, InjectionError> {
    match call_marked(target, descriptor, marker, tracked, static_ctx, extra)? {
        Some(result) => Ok(result),
        None => Err(InjectionError::NoInvocable {
            target: descriptor.type_name(),
            marker,
        }),
    }
}

/// Like [`invoke`], but returns `default` when `T` has no method marked
/// `marker`. Unresolved requirements still fail.
pub fn invoke_or<T: Injectable>(
    target: &Rc<RefCell<T>>,
    marker: Marker,
    tracked: &Context,
    static_ctx: Option<&Context>,
    extra: Option<Value>,
    default: Option<Value>,
) -> Result<Option<Value>, InjectionError> {
    let descriptor = descriptor_of::<T>();
    let called = call_marked(target, &descriptor, marker, tracked, static_ctx, extra)?;
    Ok(called.unwrap_or(default))
}

/// `Ok(None)` when no method carries `marker`.
fn call_marked<T: 'static>(
    target: &Rc<RefCell<T>>,
    descriptor: &Rc<Descriptor<T>>,
    marker: Marker,
    tracked: &Context,
    static_ctx: Option<&Context>,
    extra: Option<Value>,
) -> Result<Option<Option<Value>>, InjectionError> {
    tracked.ensure_live()?;
    let mut last_error = None;

    for invocable in descriptor.invocables.iter().filter(|i| i.marker == marker) {
        let args = untrack(|| {
            resolve_all(
                &invocable.requirements,
                *tracked,
                static_ctx.copied(),
                extra.as_ref(),
                descriptor.type_name(),
            )
        });
        match args {
            Ok(args) => {
                let mut target =
                    target
                        .try_borrow_mut()
                        .map_err(|_| InjectionError::TargetBorrowed {
                            target: descriptor.type_name(),
                        })?;
                return Ok(Some((invocable.call)(&mut *target, &args)));
            }
            Err(err) => last_error = Some(err),
        }
    }

    match last_error {
        Some(err) => Err(err),
        None => Ok(None),
    }
}
