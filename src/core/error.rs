// ============================================================================
// spark-context - Errors
// ============================================================================

use thiserror::Error;

use super::types::{Key, ScopeId};
use crate::inject::descriptor::Marker;

/// Errors raised by context operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was disposed, or is being disposed and rejects changes.
    #[error("context {scope} is disposed")]
    Disposed { scope: ScopeId },
    /// A computed value function tried to write to a context.
    #[error("cannot write `{key}` while a computed value is being evaluated")]
    WriteInComputed { key: Key },
}

/// Errors raised by `inject`, `make`, `uninject` and `invoke`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectionError {
    /// A mandatory requirement resolved to nothing.
    #[error("unable to resolve `{key}` for {target}")]
    Unresolved { target: &'static str, key: Key },
    /// More than one constructor was declared.
    #[error("{target} declares {count} constructors, expected exactly one")]
    AmbiguousConstructor { target: &'static str, count: usize },
    /// `make` was asked to build a type without a constructor.
    #[error("{target} declares no constructor")]
    NoConstructor { target: &'static str },
    /// No method carries the requested marker.
    #[error("{target} has no invocable method marked {marker}")]
    NoInvocable { target: &'static str, marker: Marker },
    /// `make_bound` found no binding for the requested service.
    #[error("no binding for {service} qualified `{qualifier}`")]
    NoBinding {
        service: &'static str,
        qualifier: Key,
    },
    /// The target object was mutably borrowed while the injector needed it.
    #[error("{target} is already borrowed")]
    TargetBorrowed { target: &'static str },
    #[error(transparent)]
    Context(#[from] ContextError),
}
