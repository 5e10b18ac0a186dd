//! Engine error taxonomy.
//!
//! Configuration and host errors (`Config`, `BadAlignment`, `Watch`,
//! `Arena`) are fatal: they surface at init or on the first frame that
//! exceeds the sizing, and the caller is expected to abort rather than
//! run a simulation whose history window is corrupt. The rollback usage
//! errors (`TargetOutOfWindow`, `RollbackBeforeWarmup`) are recoverable:
//! they are returned before any page is touched.

use rewind_mem::{ArenaError, WatchError};

use crate::config::ConfigError;

/// Errors surfaced by the rollback engine.
#[derive(Debug)]
pub enum EngineError {
    /// The configuration failed validation.
    Config(ConfigError),
    /// The tracked region is not page- and vector-aligned, or its length
    /// is not a whole number of pages.
    BadAlignment {
        /// Region base address.
        base: usize,
        /// Region length in bytes.
        len: usize,
    },
    /// The write watch failed or overflowed; the frame was not captured
    /// and the history window can no longer be trusted.
    Watch(WatchError),
    /// A slot arena ran out of space; `max_dirty_pages` is undersized
    /// for the workload.
    Arena(ArenaError),
    /// The rollback target is not strictly inside the history window.
    /// Memory is unchanged.
    TargetOutOfWindow {
        /// Frame the simulation is about to run.
        current: u32,
        /// Requested target frame.
        target: u32,
        /// Configured history depth.
        depth: u32,
    },
    /// Fewer than `R` frames have been simulated, so the ring is not yet
    /// fully populated. Memory is unchanged.
    RollbackBeforeWarmup {
        /// Frame the simulation is about to run.
        current: u32,
        /// Frames required before rollback is possible.
        required: u32,
    },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Config(err) => write!(f, "invalid engine configuration: {}", err),
            EngineError::BadAlignment { base, len } => write!(
                f,
                "tracked region must be page-aligned with page-multiple length: base={:#x} len={:#x}",
                base, len
            ),
            EngineError::Watch(err) => write!(f, "write watch failed: {}", err),
            EngineError::Arena(err) => write!(f, "snapshot arena exhausted: {}", err),
            EngineError::TargetOutOfWindow {
                current,
                target,
                depth,
            } => write!(
                f,
                "rollback target {} out of window for frame {} (depth {})",
                target, current, depth
            ),
            EngineError::RollbackBeforeWarmup { current, required } => write!(
                f,
                "rollback at frame {} before history warmup ({} frames required)",
                current, required
            ),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<WatchError> for EngineError {
    fn from(err: WatchError) -> Self {
        EngineError::Watch(err)
    }
}

impl From<ArenaError> for EngineError {
    fn from(err: ArenaError) -> Self {
        EngineError::Arena(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = EngineError::TargetOutOfWindow {
            current: 20,
            target: 5,
            depth: 7,
        };
        assert!(err.to_string().contains("out of window"));

        let err = EngineError::RollbackBeforeWarmup {
            current: 3,
            required: 8,
        };
        assert!(err.to_string().contains("warmup"));
    }

    #[test]
    fn test_from_watch_error() {
        let err: EngineError = WatchError::DirtyOverflow {
            found: 200,
            capacity: 100,
        }
        .into();
        assert!(matches!(
            err,
            EngineError::Watch(WatchError::DirtyOverflow { .. })
        ));
    }
}
