//! Snapshot slots and the history ring.
//!
//! A [`Savestate`] records the post-state of one frame: the ascending
//! list of page addresses the frame wrote, and a parallel list of
//! page-sized copies holding those pages' bytes as they stood at frame
//! end. Copies live in the slot's own arena, sized up front for the
//! worst-case dirty set, so evicting a slot is one bump-pointer reset.
//!
//! The [`SnapshotRing`] is pure indexing convention: the slot for frame
//! `f` is `f mod R` where `R = history_depth + 1`. The extra slot lets
//! the rollback walk run from `current - 2` back to `target - 1` without
//! its start and end indices colliding when the window is full.

use rewind_mem::{ArenaError, PageArena};

/// One frame's capture: dirty-page addresses, post-state copies, and the
/// arena that owns the copies.
pub struct Savestate {
    /// Frame whose post-state this slot holds. Meaningless while `valid`
    /// is false.
    frame: u32,
    /// Whether this slot currently owns captured data.
    valid: bool,
    /// Ascending page base addresses written during `frame`.
    dirty_pages: Vec<usize>,
    /// Parallel page copies; `copies[i]` holds the end-of-frame bytes of
    /// `dirty_pages[i]`. Null means "not yet allocated" — resim passes
    /// reuse surviving allocations positionally instead of re-bumping.
    copies: Vec<*mut u8>,
    /// Backing storage for `copies`.
    arena: PageArena,
}

// Safety: the raw copy pointers target the slot's own arena; the ring is
// owned by the simulation thread and workers only touch slots between a
// dispatch and the wait that follows it.
unsafe impl Send for Savestate {}

impl Savestate {
    fn new(max_dirty_pages: usize, page_size: usize) -> Self {
        Savestate {
            frame: 0,
            valid: false,
            dirty_pages: Vec::with_capacity(max_dirty_pages),
            copies: vec![std::ptr::null_mut(); max_dirty_pages],
            arena: PageArena::new(max_dirty_pages * page_size, page_size),
        }
    }

    /// Frame stamp.
    #[inline]
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Whether the slot owns captured data.
    #[inline]
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Number of captured pages.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.dirty_pages.len()
    }

    /// Captured page addresses, ascending.
    #[inline]
    pub fn dirty_pages(&self) -> &[usize] {
        &self.dirty_pages
    }

    pub(crate) fn stamp(&mut self, frame: u32) {
        self.frame = frame;
        self.valid = false;
    }

    pub(crate) fn mark_valid(&mut self) {
        self.valid = true;
    }

    pub(crate) fn dirty_pages_mut(&mut self) -> &mut Vec<usize> {
        &mut self.dirty_pages
    }

    pub(crate) fn copies(&self) -> &[*mut u8] {
        &self.copies
    }

    /// Drop the slot's capture: one arena reset plus nulling the copy
    /// pointers so the next occupant re-allocates.
    pub(crate) fn evict(&mut self) {
        self.arena.reset();
        let count = self.dirty_pages.len();
        for copy in &mut self.copies[..count] {
            *copy = std::ptr::null_mut();
        }
        self.dirty_pages.clear();
        self.valid = false;
    }

    /// Allocate a copy page for every dirty index that lacks one.
    ///
    /// During a resim pass the pointers from the previous occupancy
    /// survive (the arena was not reset), so only indices beyond the old
    /// dirty count allocate. All allocation happens here, on the capture
    /// thread, before any worker is dispatched — that sequencing is what
    /// keeps the single-threaded arena safe.
    pub(crate) fn ensure_copies(&mut self, page_size: usize) -> Result<(), ArenaError> {
        for i in 0..self.dirty_pages.len() {
            if self.copies[i].is_null() {
                self.copies[i] = self.arena.alloc(page_size)?.as_ptr();
            }
        }
        Ok(())
    }
}

/// Fixed array of savestates indexed by `frame mod capacity`.
pub struct SnapshotRing {
    slots: Vec<Savestate>,
}

impl SnapshotRing {
    /// Build a ring of `capacity` empty slots.
    pub fn new(capacity: usize, max_dirty_pages: usize, page_size: usize) -> Self {
        assert!(capacity >= 2, "ring needs the scratch slot");
        SnapshotRing {
            slots: (0..capacity)
                .map(|_| Savestate::new(max_dirty_pages, page_size))
                .collect(),
        }
    }

    /// Ring capacity (`history_depth + 1`).
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Rings are never empty; for clippy symmetry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The slot index owning frame `frame`.
    #[inline]
    pub fn slot_index(&self, frame: u32) -> usize {
        frame as usize % self.slots.len()
    }

    /// Borrow the slot at `index`.
    #[inline]
    pub fn slot(&self, index: usize) -> &Savestate {
        &self.slots[index]
    }

    /// Mutably borrow the slot at `index`.
    #[inline]
    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Savestate {
        &mut self.slots[index]
    }
}
