// ============================================================================
// spark-context - Reactivity Module
// Dependency tracking, dirty propagation, and scheduling
// ============================================================================

pub mod batching;
pub mod scheduling;
pub mod tracking;

// Re-export main tracking functions
pub use tracking::{
    destroy_reaction, install_dependencies, mark_reactions, notify_write, register_reaction,
    run_tracked, track_read,
};

// Re-export scheduling functions
pub use scheduling::{flush_sync, process_waiting, schedule_reaction};

// Re-export batching functions
pub use batching::{batch, is_untracking, untrack};
