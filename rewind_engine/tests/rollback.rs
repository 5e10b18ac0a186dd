//! End-to-end rollback scenarios.
//!
//! A deterministic synthetic simulation drives the engine the way a real
//! game loop would: the frame counter lands in the first four bytes of
//! tracked memory at the start of every frame, and each frame performs
//! the same strided page-write pattern with frame-dependent values. The
//! fixed page set per frame is the locality regime the post-state ring
//! is designed around, and it makes full-region byte comparisons exact.

use rustc_hash::FxHashSet;

use rewind_engine::{EngineConfig, EngineError, GameMemory, RollbackEngine};
use rewind_mem::{TrackedRegion, WatchError, page_size};

// =============================================================================
// Test harness
// =============================================================================

/// Hooks over a region owned by the test body.
struct RegionHooks {
    base: *mut u8,
    len: usize,
}

impl GameMemory for RegionHooks {
    fn game_state(&self) -> *mut u8 {
        self.base
    }

    fn game_state_size(&self) -> usize {
        self.len
    }

    fn game_mem_frame(&self) -> Option<*const u32> {
        // First four bytes of game memory hold the simulated frame.
        Some(self.base as *const u32)
    }
}

/// Deterministic write-fuzzer over a tracked region.
struct Sim {
    region: TrackedRegion,
    writes: usize,
}

impl Sim {
    fn new(pages: usize, writes: usize) -> Sim {
        Sim {
            region: TrackedRegion::alloc(pages * page_size()).expect("region alloc"),
            writes,
        }
    }

    fn hooks(&self) -> Box<dyn GameMemory> {
        Box::new(RegionHooks {
            base: self.region.base(),
            len: self.region.len(),
        })
    }

    /// Simulate one frame: stamp the frame counter, then write
    /// frame-dependent values along a fixed page stride. The page set
    /// touched is identical every frame; only the values differ.
    ///
    /// Returns the base addresses of every page the frame wrote.
    fn step(&mut self, frame: u32) -> FxHashSet<usize> {
        let page = page_size();
        let base = self.region.base() as usize;
        let bytes = self.region.as_mut_slice();
        let len = bytes.len();
        let mut written = FxHashSet::default();

        bytes[0..4].copy_from_slice(&frame.to_le_bytes());
        written.insert(base);

        let mut offset = len / 2;
        for w in 0..self.writes {
            let value = frame.wrapping_mul(0x9E37).wrapping_add(w as u32);
            bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            written.insert(base + offset / page * page);
            written.insert(base + (offset + 3) / page * page);
            offset = (offset + page + page / 2) % (len - 4);
        }
        written
    }

    /// Write one u32 at the start of an arbitrary page, bypassing the
    /// fixed pattern.
    fn poke(&mut self, page_idx: usize, value: u32) {
        let offset = page_idx * page_size();
        self.region.as_mut_slice()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn snapshot(&self) -> Vec<u8> {
        self.region.as_slice().to_vec()
    }

    fn head_frame(&self) -> u32 {
        u32::from_le_bytes(self.region.as_slice()[0..4].try_into().unwrap())
    }
}

fn setup(config: EngineConfig) -> (Sim, RollbackEngine) {
    let sim = Sim::new(64, 40);
    let engine = RollbackEngine::new(config, sim.hooks()).expect("engine init");
    (sim, engine)
}

/// Simulate and capture frames `first..=last`, returning a snapshot of
/// the region as it stood at the end of each frame.
fn run_frames(
    sim: &mut Sim,
    engine: &mut RollbackEngine,
    first: u32,
    last: u32,
    is_resim: bool,
) -> Vec<Vec<u8>> {
    let mut snaps = Vec::new();
    for frame in first..=last {
        sim.step(frame);
        engine.on_frame_end(frame, is_resim).expect("capture");
        snaps.push(sim.snapshot());
    }
    snaps
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_warmup_rollback_refused_memory_untouched() {
    let (mut sim, mut engine) = setup(EngineConfig::default());

    // Seven frames simulated; the eight-slot ring is not yet warm.
    run_frames(&mut sim, &mut engine, 0, 6, false);
    let before = sim.snapshot();

    let err = engine.rollback(7, 0).unwrap_err();
    assert!(matches!(err, EngineError::RollbackBeforeWarmup { .. }));
    assert_eq!(sim.snapshot(), before);
}

#[test]
fn test_single_frame_rewind() {
    let (mut sim, mut engine) = setup(EngineConfig::default());

    let snaps = run_frames(&mut sim, &mut engine, 0, 9, false);

    // Rolling back "to where we already are" is out of window.
    let err = engine.rollback(10, 10).unwrap_err();
    assert!(matches!(err, EngineError::TargetOutOfWindow { .. }));

    // One frame back: start of frame 9 is the end of frame 8.
    engine.rollback(10, 9).expect("rollback");
    assert_eq!(sim.snapshot(), snaps[8]);
    assert_eq!(sim.head_frame(), 8);
}

#[test]
fn test_maximum_rewind() {
    let (mut sim, mut engine) = setup(EngineConfig::default());

    let snaps = run_frames(&mut sim, &mut engine, 0, 14, false);

    // Full-depth rewind: seven frames back from the start of frame 15.
    engine.rollback(15, 8).expect("rollback");
    assert_eq!(sim.snapshot(), snaps[7]);
    assert_eq!(sim.head_frame(), 7);
}

#[test]
fn test_target_out_of_window_leaves_memory_alone() {
    let (mut sim, mut engine) = setup(EngineConfig::default());

    run_frames(&mut sim, &mut engine, 0, 14, false);
    let before = sim.snapshot();

    // Eight frames back exceeds a depth-seven window.
    let err = engine.rollback(15, 7).unwrap_err();
    assert!(matches!(
        err,
        EngineError::TargetOutOfWindow {
            current: 15,
            target: 7,
            depth: 7
        }
    ));
    assert_eq!(sim.snapshot(), before);
}

#[test]
fn test_ring_coverage_every_depth() {
    for delta in 1..=7u32 {
        let (mut sim, mut engine) = setup(EngineConfig::default());
        let snaps = run_frames(&mut sim, &mut engine, 0, 14, false);

        let target = 15 - delta;
        engine.rollback(15, target).expect("rollback in window");
        assert_eq!(sim.snapshot(), snaps[(target - 1) as usize]);
        assert_eq!(sim.head_frame(), target - 1);
    }
}

#[test]
fn test_rewind_resim_determinism() {
    let (mut sim, mut engine) = setup(EngineConfig::default());

    let snaps = run_frames(&mut sim, &mut engine, 0, 14, false);
    let end_of_14 = snaps[14].clone();

    engine.rollback(15, 10).expect("first rollback");
    let after_first_rollback = sim.snapshot();
    assert_eq!(after_first_rollback, snaps[9]);

    // Redrive frames 10..15 with the same inputs; eviction suppressed.
    engine.reset_write_watch();
    run_frames(&mut sim, &mut engine, 10, 14, true);
    assert_eq!(sim.snapshot(), end_of_14);

    // A second identical rollback lands on identical bytes.
    engine.rollback(15, 10).expect("second rollback");
    assert_eq!(sim.snapshot(), after_first_rollback);
}

#[test]
fn test_capture_count_matches_written_pages() {
    let (mut sim, mut engine) = setup(EngineConfig::default());

    // Warm frame so every page in the pattern holds frame-0 values;
    // frame 1 then changes bytes on exactly the pages it writes.
    sim.step(0);
    engine.on_frame_end(0, false).expect("warm capture");

    let written = sim.step(1);
    let captured = engine.on_frame_end(1, false).expect("capture");
    assert_eq!(captured, written.len());
}

#[test]
fn test_capture_is_idempotent() {
    let (mut sim, mut engine) = setup(EngineConfig::default());

    sim.step(0);
    let first = engine.on_frame_end(0, false).expect("first capture");
    assert!(first > 0);

    // No writes in between: the recapture's dirty set is empty.
    let second = engine.on_frame_end(0, false).expect("second capture");
    assert_eq!(second, 0);
}

#[test]
fn test_worker_equivalence() {
    let mut finals: Vec<Vec<u8>> = Vec::new();

    for workers in [1usize, 2, 4, 8] {
        let config = EngineConfig {
            worker_threads: workers,
            ..Default::default()
        };
        let (mut sim, mut engine) = setup(config);

        run_frames(&mut sim, &mut engine, 0, 14, false);
        engine.rollback(15, 8).expect("rollback");
        engine.reset_write_watch();
        run_frames(&mut sim, &mut engine, 8, 14, true);

        finals.push(sim.snapshot());
    }

    for other in &finals[1..] {
        assert_eq!(&finals[0], other);
    }
}

#[test]
fn test_overflow_guard() {
    let config = EngineConfig {
        max_dirty_pages: 8,
        ..Default::default()
    };
    let mut sim = Sim::new(64, 0);
    let mut engine = RollbackEngine::new(config, sim.hooks()).expect("engine init");

    // A few small frames first so the ring holds real captures.
    for frame in 0..4u32 {
        sim.poke(0, frame);
        sim.poke(5, frame);
        engine.on_frame_end(frame, false).expect("small capture");
    }

    // A frame that dirties more pages than the capture capacity.
    for page_idx in 8..28 {
        sim.poke(page_idx, 0xDEAD);
    }
    let err = engine.on_frame_end(4, false).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Watch(WatchError::DirtyOverflow {
            found: 20,
            capacity: 8
        })
    ));

    // The failure is contained: the next in-budget frame captures fine.
    sim.poke(3, 7);
    let captured = engine.on_frame_end(5, false).expect("recovery capture");
    assert_eq!(captured, 1);
}

#[test]
fn test_misaligned_region_rejected() {
    struct MisalignedHooks {
        base: *mut u8,
        len: usize,
    }
    impl GameMemory for MisalignedHooks {
        fn game_state(&self) -> *mut u8 {
            self.base
        }
        fn game_state_size(&self) -> usize {
            // Off by one: not a whole number of pages.
            self.len - 1
        }
    }

    let sim = Sim::new(4, 0);
    let hooks = Box::new(MisalignedHooks {
        base: sim.region.base(),
        len: sim.region.len(),
    });
    let err = RollbackEngine::new(EngineConfig::default(), hooks).unwrap_err();
    assert!(matches!(err, EngineError::BadAlignment { .. }));
}
