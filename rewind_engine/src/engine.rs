//! The rollback engine: capture on frame end, restore on demand.
//!
//! Every saved frame is a **post-state**: the slot stamped `f` holds the
//! bytes its dirty pages had at the end of frame `f`. That convention
//! shapes the rollback walk. Sitting at the start of frame `C` (the end
//! of `C-1`), rewinding to the start of frame `T` means applying the
//! captures stamped `C-2, C-3, …, T-1` in that order: the first slot to
//! consult is `C-2` because `C-1` is where we already are, and the final
//! `T-1` application is what lands memory on the start-of-`T` boundary.
//!
//! # Phases
//!
//! Capture and restore both fan page copies out over the job pool, but at
//! any moment only one phase executes and the simulation thread is
//! quiesced, so the tracked region needs no locking. The one ordering
//! rule that matters: all arena allocation happens on the capture thread
//! before any worker is dispatched.

use smallvec::SmallVec;

use rewind_mem::{PageWatcher, VECTOR_ALIGN, fast_copy, is_aligned, page_size};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::jobs::{JobContext, JobPool};
use crate::ring::{Savestate, SnapshotRing};
use crate::stats::EngineStats;

/// The engine's window into the simulator's memory.
///
/// Mirrors the host-callback contract: the tracked region is owned by the
/// simulator and borrowed by the engine from init to shutdown. The
/// optional frame counter points at a `u32` *inside* tracked memory that
/// the simulation writes every frame; the engine uses it purely to assert
/// against rollback drift.
pub trait GameMemory {
    /// Base pointer of the tracked region (page-aligned).
    fn game_state(&self) -> *mut u8;
    /// Length of the tracked region in bytes (a whole number of pages).
    fn game_state_size(&self) -> usize;
    /// Diagnostic frame counter inside tracked memory, if the simulator
    /// maintains one.
    fn game_mem_frame(&self) -> Option<*const u32> {
        None
    }
}

/// Which way a parallel page pass copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Tracked region → slot copies (frame-end capture).
    Capture,
    /// Slot copies → tracked region (rollback restore).
    Restore,
}

/// A contiguous run of one slot's (address, copy) pairs, shippable to a
/// worker.
#[derive(Clone, Copy)]
struct PageSpan {
    pages: *const usize,
    copies: *const *mut u8,
    len: usize,
}

// Safety: a span points into one Savestate's arrays and is only alive
// between a dispatch and the wait() that closes it; the slot outlives
// both, and concurrent spans cover disjoint index ranges.
unsafe impl Send for PageSpan {}

impl PageSpan {
    #[inline]
    fn slice(slot: &Savestate, start: usize, len: usize) -> PageSpan {
        debug_assert!(start + len <= slot.page_count());
        unsafe {
            PageSpan {
                pages: slot.dirty_pages().as_ptr().add(start),
                copies: slot.copies().as_ptr().add(start),
                len,
            }
        }
    }

    /// Copy every pair in the span.
    ///
    /// # Safety
    ///
    /// The slot this span was sliced from must still be alive, its
    /// copies allocated, and no other span may cover the same indices.
    unsafe fn run(self, direction: Direction, page: usize) {
        for k in 0..self.len {
            unsafe {
                let addr = *self.pages.add(k);
                let copy = *self.copies.add(k);
                match direction {
                    Direction::Capture => fast_copy(copy, addr as *const u8, page),
                    Direction::Restore => fast_copy(addr as *mut u8, copy as *const u8, page),
                }
            }
        }
    }
}

/// Incremental snapshot / rollback engine over one tracked region.
///
/// Create it once per region, call [`RollbackEngine::on_frame_end`] after
/// every simulated frame, and [`RollbackEngine::rollback`] to rewind.
/// Dropping the engine stops the workers and frees every arena.
pub struct RollbackEngine {
    config: EngineConfig,
    hooks: Box<dyn GameMemory>,
    base: usize,
    len: usize,
    page: usize,
    watcher: PageWatcher,
    ring: SnapshotRing,
    pool: JobPool,
    ctx: JobContext,
    stats: EngineStats,
}

impl std::fmt::Debug for RollbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackEngine")
            .field("config", &self.config)
            .field("base", &self.base)
            .field("len", &self.len)
            .field("page", &self.page)
            .finish_non_exhaustive()
    }
}

impl RollbackEngine {
    /// Bind the engine to the simulator's tracked region.
    ///
    /// Validates the configuration and the region geometry, binds the
    /// write watch and clears its dirty set (the current contents become
    /// the baseline), reserves every slot arena, and spawns the worker
    /// pool. Call exactly once per region.
    pub fn new(config: EngineConfig, hooks: Box<dyn GameMemory>) -> Result<Self, EngineError> {
        config.validate()?;
        let page = page_size();

        let base_ptr = hooks.game_state();
        let len = hooks.game_state_size();
        let base = base_ptr as usize;
        if base_ptr.is_null()
            || len == 0
            || !is_aligned(base, page)
            || !is_aligned(base, VECTOR_ALIGN)
            || !is_aligned(len, page)
        {
            return Err(EngineError::BadAlignment { base, len });
        }

        let mut watcher = PageWatcher::bind(base_ptr, len)?;
        watcher.reset();

        let ring = SnapshotRing::new(
            config.ring_capacity() as usize,
            config.max_dirty_pages,
            page,
        );
        // The submitting thread works too, so the pool is one narrower
        // than the configured parallelism.
        let pool = JobPool::new(config.worker_threads - 1);

        Ok(RollbackEngine {
            config,
            hooks,
            base,
            len,
            page,
            watcher,
            ring,
            pool,
            ctx: JobContext::new(),
            stats: EngineStats::new(),
        })
    }

    /// Engine statistics.
    #[inline]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// The active configuration.
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clear the write watch without capturing.
    ///
    /// Callers do this after a rollback, before resimulating, so the
    /// resim captures start from a clean dirty set.
    pub fn reset_write_watch(&mut self) {
        self.watcher.reset();
    }

    /// Capture the frame that just finished simulating.
    ///
    /// Pulls the dirty-page list for `frame`, (re)occupies the slot at
    /// `frame mod R`, and copies the dirty pages' post-state into the
    /// slot arena in parallel. During a resim pass (`is_resim`) the slot
    /// is rewritten without eviction so surviving arena allocations are
    /// reused positionally.
    ///
    /// Returns the number of pages captured. Watch failures and arena
    /// exhaustion are fatal for the history window: the slot is left
    /// invalid and the error is surfaced for the caller to abort on.
    pub fn on_frame_end(&mut self, frame: u32, is_resim: bool) -> Result<usize, EngineError> {
        let idx = self.ring.slot_index(frame);
        let slot = self.ring.slot_mut(idx);

        if slot.valid() && !is_resim {
            // Only the live timeline evicts; resim rewrites in place.
            slot.evict();
            self.stats.record_eviction();
            if self.config.trace {
                eprintln!("[rewind] evicted slot {} for frame {}", idx, frame);
            }
        }

        slot.stamp(frame);
        let n = self
            .watcher
            .take_dirty(slot.dirty_pages_mut(), self.config.max_dirty_pages)?;
        validate_dirty_list(self.base, self.len, self.page, slot.dirty_pages());

        // Every allocation lands before any worker sees the slot; the
        // arena has no locks and this is what keeps it safe.
        slot.ensure_copies(self.page)?;
        slot.mark_valid();

        run_parallel(
            &self.pool,
            &self.ctx,
            slot,
            self.config.worker_threads,
            self.page,
            Direction::Capture,
        );

        self.stats.record_capture(n, is_resim);
        if self.config.trace {
            let mib = (n * self.page) as f64 / 1024.0 / 1024.0;
            eprintln!(
                "[rewind] frame {} -> slot {}: {} dirty pages ({:.2} MiB){}",
                frame,
                idx,
                n,
                mib,
                if is_resim { " [resim]" } else { "" }
            );
        }
        Ok(n)
    }

    /// Rewind the tracked region to the start of `target_frame`.
    ///
    /// `current_frame` is the frame the simulation is about to run (the
    /// memory is at the end of `current_frame - 1`). On success the
    /// memory holds the state it had at the start of `target_frame`
    /// (equivalently the end of `target_frame - 1`) and the caller is
    /// expected to resimulate `[target_frame, current_frame)` with
    /// `is_resim = true`, after clearing the watch via
    /// [`RollbackEngine::reset_write_watch`].
    ///
    /// Fails without touching memory when the history is not yet warm
    /// (`current_frame < R`) or the target is outside the window.
    pub fn rollback(&mut self, current_frame: u32, target_frame: u32) -> Result<(), EngineError> {
        let r = self.ring.len() as u32;
        if current_frame < r {
            return Err(EngineError::RollbackBeforeWarmup {
                current: current_frame,
                required: r,
            });
        }
        if target_frame >= current_frame
            || current_frame - target_frame > self.config.history_depth
        {
            return Err(EngineError::TargetOutOfWindow {
                current: current_frame,
                target: target_frame,
                depth: self.config.history_depth,
            });
        }

        // How many extra steps beyond the one-frame rewind. Bounded by
        // history_depth - 1, so the walk can never wrap past its start;
        // the ring's scratch slot is what guarantees that.
        let offset = (current_frame - target_frame - 1) as usize;
        assert!(offset < self.ring.len() - 1, "rollback walk would wrap");

        let ring_len = self.ring.len();
        let mut cur_idx = self.ring.slot_index(current_frame - 2);
        let end_idx = (cur_idx + ring_len - offset) % ring_len;

        if self.config.trace {
            eprintln!(
                "[rewind] rolling back {} frame(s): frame {} -> {}, slots {} -> {}",
                current_frame - target_frame,
                current_frame,
                target_frame,
                cur_idx,
                end_idx
            );
            for i in 0..ring_len {
                let slot = self.ring.slot(i);
                eprintln!(
                    "[rewind]   slot {}: frame {} ({} pages{})",
                    i,
                    slot.frame(),
                    slot.page_count(),
                    if slot.valid() { "" } else { ", invalid" }
                );
            }
        }

        let mut slots_restored = 0usize;
        let mut pages_restored = 0usize;
        loop {
            let slot = self.ring.slot(cur_idx);
            assert!(
                slot.valid(),
                "rollback consulted an invalid slot (index {}, frame {})",
                cur_idx,
                slot.frame()
            );
            self.trace_head_page_witness(slot);
            run_parallel(
                &self.pool,
                &self.ctx,
                slot,
                self.config.worker_threads,
                self.page,
                Direction::Restore,
            );
            slots_restored += 1;
            pages_restored += slot.page_count();
            if cur_idx == end_idx {
                break;
            }
            cur_idx = (cur_idx + ring_len - 1) % ring_len;
        }

        // The final slot applied must be the one stamped target - 1;
        // anything else means the ring and the frame counter disagree.
        // (current >= R forces target >= 1, so the subtraction is safe.)
        let landed = self.ring.slot(end_idx).frame();
        assert_eq!(
            landed,
            target_frame - 1,
            "rollback walk landed on frame {} instead of {}",
            landed,
            target_frame - 1
        );
        if let Some(counter) = self.hooks.game_mem_frame() {
            let in_memory = unsafe { counter.read() };
            assert_eq!(
                in_memory,
                target_frame - 1,
                "tracked memory reports frame {} after rollback to start of {}",
                in_memory,
                target_frame
            );
        }

        self.stats.record_rollback(slots_restored, pages_restored);
        Ok(())
    }

    /// Trace helper: when the head page of the region is part of a slot
    /// being restored, report the frame-counter transition it will cause.
    fn trace_head_page_witness(&self, slot: &Savestate) {
        if !self.config.trace {
            return;
        }
        if slot.dirty_pages().first() == Some(&self.base) {
            let stored = unsafe { (slot.copies()[0] as *const u32).read() };
            if let Some(counter) = self.hooks.game_mem_frame() {
                let now = unsafe { counter.read() };
                eprintln!("[rewind]   head page: frame {} -> {}", now, stored);
            }
        }
    }
}

/// Release-mode validation of a freshly taken dirty list: page-aligned,
/// strictly ascending, and entirely inside the tracked region. A failure
/// here is a host or caller bug the engine must not paper over.
fn validate_dirty_list(base: usize, len: usize, page: usize, dirty: &[usize]) {
    let mut prev = 0usize;
    for (i, &addr) in dirty.iter().enumerate() {
        assert!(
            addr % page == 0,
            "dirty address {:#x} is not page-aligned",
            addr
        );
        assert!(
            addr >= base && addr < base + len,
            "dirty address {:#x} outside tracked region [{:#x}, {:#x})",
            addr,
            base,
            base + len
        );
        assert!(
            i == 0 || addr > prev,
            "dirty list not strictly ascending at index {}",
            i
        );
        prev = addr;
    }
}

/// Fan one slot's pages out over the pool and join.
///
/// The pages split into `workers` contiguous ranges; the `n mod workers`
/// remainder runs on the submitting thread after dispatch, before the
/// wait. Capture and restore share this shape.
fn run_parallel(
    pool: &JobPool,
    ctx: &JobContext,
    slot: &Savestate,
    workers: usize,
    page: usize,
    direction: Direction,
) {
    let n = slot.page_count();
    if n == 0 {
        return;
    }

    let per_worker = n / workers;
    let mut spans: SmallVec<[PageSpan; 8]> = SmallVec::new();
    if per_worker > 0 {
        for w in 0..workers {
            spans.push(PageSpan::slice(slot, w * per_worker, per_worker));
        }
    }
    let tail = PageSpan::slice(slot, workers * per_worker, n - workers * per_worker);

    for span in spans {
        // Safety: spans cover disjoint ranges of a slot that outlives
        // the wait() below.
        pool.submit(ctx, move || unsafe { span.run(direction, page) });
    }
    unsafe { tail.run(direction, page) };
    pool.wait(ctx);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_dirty_list_accepts_well_formed() {
        let page = page_size();
        let base = 0x10_0000;
        validate_dirty_list(base, page * 16, page, &[base, base + page, base + page * 5]);
        validate_dirty_list(base, page * 16, page, &[]);
    }

    #[test]
    #[should_panic(expected = "not strictly ascending")]
    fn test_validate_dirty_list_rejects_duplicates() {
        let page = page_size();
        let base = 0x10_0000;
        validate_dirty_list(base, page * 16, page, &[base, base]);
    }

    #[test]
    #[should_panic(expected = "outside tracked region")]
    fn test_validate_dirty_list_rejects_out_of_range() {
        let page = page_size();
        let base = 0x10_0000;
        validate_dirty_list(base, page * 2, page, &[base + page * 2]);
    }
}
