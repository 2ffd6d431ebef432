// ============================================================================
// spark-context - Hierarchical Reactive Contexts
// ============================================================================
//
// A tree of key/value contexts with change tracking and dependency
// injection. Reads record what they touched; writes re-run exactly the
// sessions and injected bindings that read the changed entry.
// ============================================================================

#[macro_use]
mod macros;

pub mod core;
pub mod inject;
pub mod primitives;
pub mod reactivity;

// Re-export core items at crate root for ergonomic access
pub use crate::core::constants;
pub use crate::core::{
    config, configure, is_batching, is_tracking, with_runtime, write_version, AnyReaction,
    ContextError, InjectionError, Key, ReactionCore, ReactionId, Runtime, RuntimeConfig, ScopeId,
    Source, Value,
};

// Re-export primitives at crate root
pub use primitives::{
    ComputedSlot, ComputedValue, Context, ContextBuilder, ContextUpdater, LookupStrategy,
    SessionFn,
};

// Re-export injection
pub use inject::{
    add_binding, add_named_binding, descriptor_of, has_binding, inject, inject_with,
    injection_state, invoke, invoke_or, invoke_with, make, make_bound, make_bound_named,
    make_with, uninject, Args, Descriptor, Injectable, InjectionState, Marker, Requirement,
};

// Re-export reactivity functions
pub use reactivity::batching::{batch, is_untracking, untrack};
pub use reactivity::scheduling::{flush_sync, process_waiting};

// =============================================================================
// TESTS
// =============================================================================
