// ============================================================================
// spark-context - Core Module
// Fundamental types, the context table, and the thread-local runtime
// ============================================================================

pub mod config;
pub mod constants;
pub mod error;
pub mod runtime;
pub(crate) mod tree;
pub mod types;

// Re-export commonly used items
pub use config::{config, configure, RuntimeConfig};
pub use constants::*;
pub use error::{ContextError, InjectionError};
pub use runtime::{is_batching, is_tracking, with_runtime, write_version, Runtime};
pub use types::{AnyReaction, Key, ReactionCore, ReactionId, ScopeId, Source, Value};
