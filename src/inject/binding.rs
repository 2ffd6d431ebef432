// ============================================================================
// spark-context - Bindings
// Service type -> implementation, consulted by make_bound and by typed
// requirements nothing else satisfies
// ============================================================================
//
// A binding says "when something asks for an `S`, make an `I` and turn it
// into an `S`". Bindings are registered per thread. A binding is found by
// the requested type plus a qualifier: unqualified bindings answer
// `Requirement::of::<S>()`, named ones answer
// `Requirement::named(name).typed::<S>()`.
// ============================================================================

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, error};

use crate::core::error::InjectionError;
use crate::core::types::{Key, Value};
use crate::inject::descriptor::Injectable;
use crate::inject::injector::make;
use crate::primitives::scope::Context;

type Producer = Rc<dyn Fn(&Context, Option<&Context>) -> Result<Value, InjectionError>>;

thread_local! {
    static BINDINGS: RefCell<FxHashMap<(TypeId, Key), Producer>> =
        RefCell::new(FxHashMap::default());
}

/// Bind service type `S` to implementation `I`.
///
/// `convert` turns the freshly made `I` into the `S` handed out, typically
/// a trait object. A later binding for the same `S` replaces this one.
pub fn add_binding<S: Any, I: Injectable>(convert: impl Fn(Rc<RefCell<I>>) -> S + 'static) {
    register::<S, I>(Key::of::<S>(), convert);
}

/// Like [`add_binding`], under the qualifier `name`.
pub fn add_named_binding<S: Any, I: Injectable>(
    name: impl Into<Key>,
    convert: impl Fn(Rc<RefCell<I>>) -> S + 'static,
) {
    register::<S, I>(name.into(), convert);
}

fn register<S: Any, I: Injectable>(
    qualifier: Key,
    convert: impl Fn(Rc<RefCell<I>>) -> S + 'static,
) {
    debug!(
        service = std::any::type_name::<S>(),
        implementation = std::any::type_name::<I>(),
        qualifier = %qualifier,
        "binding added"
    );
    let producer: Producer = Rc::new(move |tracked, static_ctx| {
        make::<I>(tracked, static_ctx).map(|instance| Rc::new(convert(instance)) as Value)
    });
    BINDINGS.with(|b| {
        b.borrow_mut().insert((TypeId::of::<S>(), qualifier), producer);
    });
}

/// Whether an unqualified binding exists for `S`.
pub fn has_binding<S: Any>() -> bool {
    find(TypeId::of::<S>(), &Key::of::<S>()).is_some()
}

fn find(ty: TypeId, qualifier: &Key) -> Option<Producer> {
    BINDINGS.with(|b| b.borrow().get(&(ty, qualifier.clone())).cloned())
}

/// Make the implementation bound to `S` and return it as an `S`.
pub fn make_bound<S: Any>(
    tracked: &Context,
    static_ctx: Option<&Context>,
) -> Result<Rc<S>, InjectionError> {
    make_qualified::<S>(&Key::of::<S>(), tracked, static_ctx)
}

/// [`make_bound`] for a binding registered with [`add_named_binding`].
pub fn make_bound_named<S: Any>(
    name: impl Into<Key>,
    tracked: &Context,
    static_ctx: Option<&Context>,
) -> Result<Rc<S>, InjectionError> {
    make_qualified::<S>(&name.into(), tracked, static_ctx)
}

fn make_qualified<S: Any>(
    qualifier: &Key,
    tracked: &Context,
    static_ctx: Option<&Context>,
) -> Result<Rc<S>, InjectionError> {
    let service = std::any::type_name::<S>();
    let Some(producer) = find(TypeId::of::<S>(), qualifier) else {
        return Err(InjectionError::NoBinding {
            service,
            qualifier: qualifier.clone(),
        });
    };
    let value = producer(tracked, static_ctx)?;
    value.downcast::<S>().map_err(|_| InjectionError::NoBinding {
        service,
        qualifier: qualifier.clone(),
    })
}

/// Make a value for a typed requirement through its binding, if any.
///
/// A failing binding is reported and treated as unresolved.
pub(crate) fn make_for(
    ty: TypeId,
    qualifier: &Key,
    tracked: Context,
    static_ctx: Option<Context>,
) -> Option<Value> {
    let producer = find(ty, qualifier)?;
    match producer(&tracked, static_ctx.as_ref()) {
        Ok(value) => Some(value),
        Err(err) => {
            error!(qualifier = %qualifier, error = %err, "binding failed to make a value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::descriptor::Descriptor;
    use crate::inject::requirement::Requirement;
    use pretty_assertions::assert_eq;

    trait Greeter {
        fn greet(&self) -> String;
    }

    struct English {
        name: String,
    }

    impl Greeter for English {
        fn greet(&self) -> String {
            format!("hello {}", self.name)
        }
    }

    impl Injectable for English {
        fn descriptor() -> Descriptor<Self> {
            Descriptor::new().constructor([Requirement::named("name")], |args| English {
                name: args
                    .get::<&str>(0)
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            })
        }
    }

    type SharedGreeter = Rc<RefCell<dyn Greeter>>;

    #[test]
    fn bound_services_are_made_from_their_implementation() {
        let ctx = Context::create();
        ctx.set("name", "ada").unwrap();
        assert!(!has_binding::<SharedGreeter>());

        add_binding::<SharedGreeter, English>(|english| english as SharedGreeter);
        assert!(has_binding::<SharedGreeter>());

        let greeter = make_bound::<SharedGreeter>(&ctx, None).unwrap();
        assert_eq!(greeter.borrow().greet(), "hello ada");
    }

    #[test]
    fn missing_bindings_are_reported() {
        let ctx = Context::create();
        let result = make_bound_named::<SharedGreeter>("formal", &ctx, None);
        assert_eq!(
            result.err(),
            Some(InjectionError::NoBinding {
                service: std::any::type_name::<SharedGreeter>(),
                qualifier: Key::from("formal"),
            })
        );
    }
}
