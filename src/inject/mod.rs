// ============================================================================
// spark-context - Injection Module
// Descriptors, requirements, and the injector
// ============================================================================

pub mod binding;
pub mod descriptor;
pub mod injector;
pub(crate) mod record;
pub mod requirement;

pub use binding::{add_binding, add_named_binding, has_binding, make_bound, make_bound_named};
pub use descriptor::{descriptor_of, Descriptor, Injectable, Marker};
pub use injector::{
    inject, inject_with, injection_state, invoke, invoke_or, invoke_with, make, make_with,
    uninject,
};
pub use record::InjectionState;
pub use requirement::{Args, Requirement};
