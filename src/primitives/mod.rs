// ============================================================================
// spark-context - Primitives Module
// Contexts, lookup, computed values, activation, sessions, updaters
// ============================================================================

pub mod activation;
pub mod computed;
pub mod lookup;
pub mod scope;
pub mod session;
pub mod updater;

// Re-export for convenience
pub use computed::{ComputedSlot, ComputedValue};
pub use lookup::LookupStrategy;
pub use scope::{Context, ContextBuilder};
pub use session::SessionFn;
pub use updater::ContextUpdater;
