//! Engine configuration.
//!
//! Defaults are sized for the console-emulator-class workload the engine
//! was built around: a ~170 MiB tracked region dirtying ~1500 pages per
//! frame, with single-digit-millisecond frame budgets.

/// Configuration for the rollback engine.
///
/// # Example
///
/// ```ignore
/// use rewind_engine::EngineConfig;
///
/// // Deeper history for a slower-paced simulation
/// let config = EngineConfig {
///     history_depth: 15,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of frames the engine can roll back.
    ///
    /// The snapshot ring holds `history_depth + 1` slots; the extra slot
    /// keeps the rollback walk's start and end indices from colliding
    /// when the window is used in full.
    ///
    /// Default: 7
    pub history_depth: u32,

    /// Maximum dirty pages captured per frame.
    ///
    /// Each ring slot reserves `max_dirty_pages * page_size` bytes of
    /// arena up front. A frame that dirties more pages than this is
    /// uncapturable and the engine reports it as fatal.
    ///
    /// Default: 2000 (~8 MiB of arena per slot at 4 KiB pages)
    pub max_dirty_pages: usize,

    /// Total copy parallelism, including the submitting thread.
    ///
    /// The pool spawns `worker_threads - 1` OS threads; the thread that
    /// calls into the engine works the remainder and steals jobs while it
    /// waits, so `1` means fully single-threaded.
    ///
    /// Default: 4
    pub worker_threads: usize,

    /// Emit per-frame and per-rollback diagnostics on stderr.
    ///
    /// Default: false
    pub trace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_depth: 7,
            max_dirty_pages: 2000,
            worker_threads: 4,
            trace: false,
        }
    }
}

impl EngineConfig {
    /// A fully single-threaded configuration, useful when debugging the
    /// capture and restore paths.
    pub fn single_threaded() -> Self {
        Self {
            worker_threads: 1,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_depth == 0 {
            return Err(ConfigError::ZeroHistoryDepth);
        }
        if self.max_dirty_pages == 0 {
            return Err(ConfigError::ZeroDirtyPages);
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    /// Ring capacity: `history_depth + 1`.
    #[inline]
    pub fn ring_capacity(&self) -> u32 {
        self.history_depth + 1
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `history_depth` must be at least 1.
    ZeroHistoryDepth,
    /// `max_dirty_pages` must be at least 1.
    ZeroDirtyPages,
    /// `worker_threads` must be at least 1 (the submitting thread).
    ZeroWorkers,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroHistoryDepth => write!(f, "history depth must be at least 1"),
            ConfigError::ZeroDirtyPages => write!(f, "max dirty pages must be at least 1"),
            ConfigError::ZeroWorkers => write!(f, "worker threads must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert_eq!(EngineConfig::default().ring_capacity(), 8);
    }

    #[test]
    fn test_single_threaded_preset() {
        let config = EngineConfig::single_threaded();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_threads, 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = EngineConfig {
            history_depth: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroHistoryDepth));

        let config = EngineConfig {
            max_dirty_pages: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroDirtyPages));

        let config = EngineConfig {
            worker_threads: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkers));
    }
}
