// ============================================================================
// spark-context - Runtime Configuration
// ============================================================================

use super::runtime::with_runtime;

/// Per-thread runtime settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Flush rounds allowed before a cascade of updates is treated as a loop
    pub max_update_depth: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_update_depth: 1000,
        }
    }
}

/// Install `config` for every context on the current thread.
pub fn configure(config: RuntimeConfig) {
    with_runtime(|rt| rt.config.set(config));
}

/// Settings currently in effect on this thread.
pub fn config() -> RuntimeConfig {
    with_runtime(|rt| rt.config.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_replaces_defaults() {
        assert_eq!(config(), RuntimeConfig::default());

        configure(RuntimeConfig {
            max_update_depth: 5,
        });
        assert_eq!(config().max_update_depth, 5);

        configure(RuntimeConfig::default());
    }
}
