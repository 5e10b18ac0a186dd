//! Incremental state rollback for deterministic simulations.
//!
//! At the end of every simulated frame the engine captures only the
//! memory pages that frame wrote, into a ring of per-frame snapshot
//! slots. On demand it rewinds the tracked region to the state it held
//! at the start of any frame inside a bounded window, so the simulation
//! can be re-run from there with corrected inputs — the rollback-netcode
//! loop, at console-emulator scale (~170 MiB of state, ~1500 dirty pages
//! a frame, single-digit-millisecond budgets).
//!
//! # Architecture
//!
//! - [`rewind_mem::PageWatcher`] reports which pages changed since the
//!   last frame boundary.
//! - A [`SnapshotRing`] of `history_depth + 1` [`Savestate`] slots owns
//!   the captured pages; each slot's copies live in its own bump arena,
//!   so eviction is a pointer reset.
//! - A [`JobPool`] fans the page copies out across workers; the
//!   submitting thread handles the remainder and steals work while it
//!   waits.
//! - [`RollbackEngine`] composes the three: capture on
//!   [`RollbackEngine::on_frame_end`], rewind on
//!   [`RollbackEngine::rollback`].
//!
//! # Usage
//!
//! ```ignore
//! use rewind_engine::{EngineConfig, GameMemory, RollbackEngine};
//!
//! let mut engine = RollbackEngine::new(EngineConfig::default(), hooks)?;
//! loop {
//!     simulate(frame);
//!     engine.on_frame_end(frame, false)?;
//!     if let Some(target) = corrected_input_frame() {
//!         engine.rollback(frame + 1, target)?;
//!         for f in target..=frame {
//!             simulate(f);
//!             engine.on_frame_end(f, true)?;
//!         }
//!         engine.reset_write_watch();
//!     }
//!     frame += 1;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod engine;
mod error;
mod jobs;
mod ring;
mod stats;

pub use config::{ConfigError, EngineConfig};
pub use engine::{GameMemory, RollbackEngine};
pub use error::EngineError;
pub use jobs::{JobContext, JobPool};
pub use ring::{Savestate, SnapshotRing};
pub use stats::EngineStats;
