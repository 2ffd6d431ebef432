// ============================================================================
// spark-context - Injection Descriptors
// Declarative description of what a type needs and which hooks it has
// ============================================================================
//
// A descriptor replaces annotation scanning: each injectable type lists its
// constructor, fields, setter-style methods, lifecycle hooks and invocable
// methods once, through a builder. Descriptors for `Injectable` types are
// built on first use and cached per thread.
// ============================================================================

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::core::types::Value;
use crate::inject::requirement::{Args, Requirement};

// =============================================================================
// CALLBACK TYPES
// =============================================================================

pub type FieldFn<T> = Rc<dyn Fn(&mut T, Option<Value>)>;
pub type MethodFn<T> = Rc<dyn Fn(&mut T, &Args)>;
pub type HookFn<T> = Rc<dyn Fn(&mut T)>;
pub type ConstructorFn<T> = Rc<dyn Fn(&Args) -> T>;
pub type InvokeFn<T> = Rc<dyn Fn(&mut T, &Args) -> Option<Value>>;

/// Selects the method `invoke` calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    Execute,
    CanExecute,
    Named(&'static str),
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Execute => f.write_str("execute"),
            Marker::CanExecute => f.write_str("can-execute"),
            Marker::Named(name) => f.write_str(name),
        }
    }
}

// =============================================================================
// MEMBERS
// =============================================================================

pub(crate) struct Constructor<T> {
    pub requirements: Vec<Requirement>,
    pub build: ConstructorFn<T>,
}

pub(crate) struct FieldBinding<T> {
    pub requirement: Requirement,
    pub apply: FieldFn<T>,
}

pub(crate) struct MethodBinding<T> {
    pub name: &'static str,
    pub requirements: Vec<Requirement>,
    pub grouped: bool,
    pub apply: MethodFn<T>,
}

pub(crate) struct Invocable<T> {
    pub marker: Marker,
    pub requirements: Vec<Requirement>,
    pub call: InvokeFn<T>,
}

// =============================================================================
// DESCRIPTOR
// =============================================================================

/// Everything the injector needs to know about `T`.
///
/// Fields are injected before methods, each group in declaration order.
/// Hooks run in declaration order.
pub struct Descriptor<T> {
    type_name: &'static str,
    pub(crate) constructors: Vec<Constructor<T>>,
    pub(crate) fields: Vec<FieldBinding<T>>,
    pub(crate) methods: Vec<MethodBinding<T>>,
    pub(crate) post_construct: Vec<HookFn<T>>,
    pub(crate) pre_destroy: Vec<HookFn<T>>,
    pub(crate) invocables: Vec<Invocable<T>>,
    singleton: bool,
}

impl<T: 'static> Descriptor<T> {
    pub fn new() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            constructors: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            post_construct: Vec::new(),
            pre_destroy: Vec::new(),
            invocables: Vec::new(),
            singleton: false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// `make` builds one instance per thread and hands it out from then on.
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// Constructor used by `make`. Declaring more than one makes `make` fail.
    pub fn constructor(
        mut self,
        requirements: impl IntoIterator<Item = Requirement>,
        build: impl Fn(&Args) -> T + 'static,
    ) -> Self {
        self.constructors.push(Constructor {
            requirements: requirements.into_iter().collect(),
            build: Rc::new(build),
        });
        self
    }

    /// Field receiving a `U`. Values of other types are rejected at
    /// resolution time.
    pub fn field<U: Any>(
        self,
        requirement: Requirement,
        apply: impl Fn(&mut T, Option<Rc<U>>) + 'static,
    ) -> Self {
        self.field_value(requirement.typed::<U>(), move |target, value| {
            apply(target, value.and_then(|v| v.downcast::<U>().ok()))
        })
    }

    /// Field receiving the raw value.
    pub fn field_value(
        mut self,
        requirement: Requirement,
        apply: impl Fn(&mut T, Option<Value>) + 'static,
    ) -> Self {
        self.fields.push(FieldBinding {
            requirement,
            apply: Rc::new(apply),
        });
        self
    }

    /// Setter-style method, re-invoked on its own whenever one of its
    /// requirements changes.
    pub fn method(
        self,
        name: &'static str,
        requirements: impl IntoIterator<Item = Requirement>,
        apply: impl Fn(&mut T, &Args) + 'static,
    ) -> Self {
        self.push_method(name, requirements, false, apply)
    }

    /// Like [`Descriptor::method`], but re-invocations wait for
    /// `process_waiting()`.
    pub fn grouped_method(
        self,
        name: &'static str,
        requirements: impl IntoIterator<Item = Requirement>,
        apply: impl Fn(&mut T, &Args) + 'static,
    ) -> Self {
        self.push_method(name, requirements, true, apply)
    }

    fn push_method(
        mut self,
        name: &'static str,
        requirements: impl IntoIterator<Item = Requirement>,
        grouped: bool,
        apply: impl Fn(&mut T, &Args) + 'static,
    ) -> Self {
        self.methods.push(MethodBinding {
            name,
            requirements: requirements.into_iter().collect(),
            grouped,
            apply: Rc::new(apply),
        });
        self
    }

    /// Runs once, after the first injection of every field and method.
    pub fn post_construct(mut self, hook: impl Fn(&mut T) + 'static) -> Self {
        self.post_construct.push(Rc::new(hook));
        self
    }

    /// Runs once, when the object is uninjected or its context disposes.
    pub fn pre_destroy(mut self, hook: impl Fn(&mut T) + 'static) -> Self {
        self.pre_destroy.push(Rc::new(hook));
        self
    }

    /// Method called by `invoke` for `marker`. When several share a marker
    /// the first one whose requirements resolve wins.
    pub fn invocable(
        mut self,
        marker: Marker,
        requirements: impl IntoIterator<Item = Requirement>,
        call: impl Fn(&mut T, &Args) -> Option<Value> + 'static,
    ) -> Self {
        self.invocables.push(Invocable {
            marker,
            requirements: requirements.into_iter().collect(),
            call: Rc::new(call),
        });
        self
    }
}

impl<T: 'static> Default for Descriptor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Descriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("type_name", &self.type_name)
            .field("constructors", &self.constructors.len())
            .field("fields", &self.fields.len())
            .field(
                "methods",
                &self.methods.iter().map(|m| m.name).collect::<Vec<_>>(),
            )
            .field("post_construct", &self.post_construct.len())
            .field("pre_destroy", &self.pre_destroy.len())
            .field("invocables", &self.invocables.len())
            .field("singleton", &self.singleton)
            .finish()
    }
}

// =============================================================================
// INJECTABLE
// =============================================================================

/// Types that describe themselves to the injector.
pub trait Injectable: Sized + 'static {
    fn descriptor() -> Descriptor<Self>;
}

thread_local! {
    static DESCRIPTORS: RefCell<FxHashMap<TypeId, Rc<dyn Any>>> =
        RefCell::new(FxHashMap::default());
}

/// Cached descriptor of `T`, built on first use.
pub fn descriptor_of<T: Injectable>() -> Rc<Descriptor<T>> {
    let cached = DESCRIPTORS.with(|d| d.borrow().get(&TypeId::of::<T>()).cloned());
    if let Some(descriptor) = cached.and_then(|any| any.downcast::<Descriptor<T>>().ok()) {
        return descriptor;
    }

    // Built outside the borrow: a descriptor may ask for other descriptors
    let descriptor = Rc::new(T::descriptor());
    DESCRIPTORS.with(|d| {
        d.borrow_mut()
            .insert(TypeId::of::<T>(), descriptor.clone() as Rc<dyn Any>)
    });
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static BUILDS: Cell<u32> = const { Cell::new(0) };
    }

    struct Widget;

    impl Injectable for Widget {
        fn descriptor() -> Descriptor<Self> {
            BUILDS.with(|b| b.set(b.get() + 1));
            Descriptor::new()
                .constructor([], |_| Widget)
                .field::<i32>(Requirement::named("size"), |_, _| {})
                .method("layout", [Requirement::named("width")], |_, _| {})
                .grouped_method("paint", [], |_, _| {})
        }
    }

    #[test]
    fn descriptors_are_built_once_per_thread() {
        let first = descriptor_of::<Widget>();
        let second = descriptor_of::<Widget>();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(BUILDS.with(Cell::get), 1);
    }

    #[test]
    fn builder_records_members_in_order() {
        let descriptor = Widget::descriptor();
        assert_eq!(descriptor.constructors.len(), 1);
        assert_eq!(descriptor.fields.len(), 1);
        let names: Vec<_> = descriptor.methods.iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["layout", "paint"]);
        assert!(descriptor.methods[1].grouped);
        assert!(descriptor.type_name().ends_with("Widget"));
    }

    #[test]
    fn markers_display() {
        assert_eq!(Marker::Execute.to_string(), "execute");
        assert_eq!(Marker::CanExecute.to_string(), "can-execute");
        assert_eq!(Marker::Named("save").to_string(), "save");
    }
}
