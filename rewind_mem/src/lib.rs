//! Page-granular memory primitives for the rewind rollback engine.
//!
//! This crate owns everything that touches raw pages:
//!
//! - [`TrackedRegion`]: a contiguous, page-aligned allocation registered
//!   with the host's write-watch facility. This is the "game memory" a
//!   deterministic simulation mutates.
//! - [`PageWatcher`]: answers "which pages of the region were written since
//!   I last asked?" as a strictly ascending address list, clearing the set
//!   as it reads it.
//! - [`PageArena`]: a bump allocator that hands out page-aligned,
//!   page-sized slices from a pre-reserved backing buffer. Reset is a
//!   single offset store.
//! - [`fast_copy`]: a non-temporal wide-vector copy for page-sized,
//!   32-byte-aligned blocks.
//!
//! # Platform mechanisms
//!
//! On Windows the watcher rides the kernel's write-watch facility
//! (`VirtualAlloc` with `MEM_WRITE_WATCH`, `GetWriteWatch`). On Unix hosts
//! there is no equivalent, so the watcher keeps a 64-bit content hash per
//! page and reports pages whose hash changed. The hash pass costs
//! O(region) per query but needs no faults and no signal handling.
//!
//! # Safety
//!
//! The watcher and the copy primitive are only meaningful while the
//! mutator of the region is quiesced. The rollback engine serializes every
//! call against the simulation thread; nothing here locks.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod arena;
mod copy;
mod region;
mod util;
mod watch;

pub use arena::{ArenaError, PageArena};
pub use copy::{CopyLevel, copy_level, fast_copy};
pub use region::{RegionError, TrackedRegion};
pub use util::{VECTOR_ALIGN, align_up, is_aligned, mib, page_size};
pub use watch::{PageWatcher, WatchError};
