// ============================================================================
// spark-context - Constants
// Flag constants for reaction kinds and states
// ============================================================================

// =============================================================================
// REACTION KIND FLAGS
// =============================================================================

/// Reaction created by `Context::run_and_track`
pub const SESSION: u32 = 1 << 0;

/// Reaction that keeps one injected field or method in sync
pub const BINDING: u32 = 1 << 1;

/// Per-context cache of a computed value
pub const COMPUTED: u32 = 1 << 2;

/// Reaction is deferred until `process_waiting()`
pub const GROUPED: u32 = 1 << 3;

/// Mask selecting the kind bits (SESSION, BINDING, COMPUTED)
pub const KIND_MASK: u32 = SESSION | BINDING | COMPUTED;

// =============================================================================
// REACTION STATE FLAGS
// =============================================================================

/// Reaction is clean (up-to-date)
pub const CLEAN: u32 = 1 << 10;

/// Reaction is dirty (needs to run again)
pub const DIRTY: u32 = 1 << 11;

/// Reaction is currently being updated
pub const REACTION_IS_UPDATING: u32 = 1 << 13;

/// Reaction has been destroyed
pub const DESTROYED: u32 = 1 << 14;

// =============================================================================
// STATUS MASK (for clearing status bits)
// =============================================================================

/// Mask to clear all status bits (CLEAN, DIRTY)
pub const STATUS_MASK: u32 = !(DIRTY | CLEAN);

// =============================================================================
// TESTS
// =============================================================================
