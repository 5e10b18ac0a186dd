//! Deterministic synthetic game simulation.
//!
//! Stands in for a real game loop: owns the tracked region, stamps the
//! current frame into the first four bytes at the start of every frame,
//! then sprays writes along a fixed page stride. The stride depends only
//! on the region size, so every frame touches the same page set with
//! frame-dependent values — the same workload shape as a resimulating
//! emulator rewriting its working set each tick.

use rewind_engine::GameMemory;
use rewind_mem::{RegionError, TrackedRegion, page_size};

/// Hooks handed to the engine; the game keeps ownership of the region.
struct GameHooks {
    base: *mut u8,
    len: usize,
}

impl GameMemory for GameHooks {
    fn game_state(&self) -> *mut u8 {
        self.base
    }

    fn game_state_size(&self) -> usize {
        self.len
    }

    fn game_mem_frame(&self) -> Option<*const u32> {
        Some(self.base as *const u32)
    }
}

/// The synthetic game: a tracked region plus a write-fuzzing step.
pub struct SyntheticGame {
    region: TrackedRegion,
    writes: usize,
}

impl SyntheticGame {
    /// Allocate the tracked region and fix the per-frame write count.
    pub fn new(state_bytes: usize, writes: usize) -> Result<Self, RegionError> {
        Ok(SyntheticGame {
            region: TrackedRegion::alloc(state_bytes)?,
            writes,
        })
    }

    /// Engine-facing view of the game memory.
    pub fn hooks(&self) -> Box<dyn GameMemory> {
        Box::new(GameHooks {
            base: self.region.base(),
            len: self.region.len(),
        })
    }

    /// Region size in bytes.
    pub fn state_size(&self) -> usize {
        self.region.len()
    }

    /// Run one frame of the fake simulation.
    ///
    /// Returns how many distinct pages the frame touched (the head page
    /// included), which the driver reports against the engine's counts.
    pub fn simulate_frame(&mut self, frame: u32) -> usize {
        let page = page_size();
        let bytes = self.region.as_mut_slice();
        let len = bytes.len();

        bytes[0..4].copy_from_slice(&frame.to_le_bytes());
        let mut touched = vec![false; len / page];
        touched[0] = true;

        // Arbitrary starting point, page-and-a-half stride: cycles the
        // same offsets every frame.
        let mut offset = len / 2;
        for w in 0..self.writes {
            let value = frame.wrapping_mul(0x9E37_79B9).wrapping_add(w as u32);
            bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            touched[offset / page] = true;
            touched[(offset + 3) / page] = true;
            offset = (offset + page + page / 2) % (len - 4);
        }

        touched.iter().filter(|&&t| t).count()
    }

    /// The frame counter currently stored at offset 0.
    pub fn head_frame(&self) -> u32 {
        u32::from_le_bytes(self.region.as_slice()[0..4].try_into().unwrap())
    }
}
