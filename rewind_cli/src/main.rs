//! Synthetic driver for the rewind rollback engine.
//!
//! Allocates a tracked region, fuzzes writes into it frame after frame,
//! and periodically rolls back and resimulates — the loop a rollback-
//! netcode game runs when late inputs arrive. Timing and engine counters
//! are printed at the end so capture and restore costs are visible.

mod args;
mod sim;

use std::process::ExitCode;
use std::time::Instant;

use rewind_engine::{EngineConfig, RollbackEngine};
use rewind_mem::{copy_level, mib, page_size};

use crate::args::{DriverArgs, Mode, USAGE};
use crate::sim::SyntheticGame;

/// Successful run.
const EXIT_SUCCESS: u8 = 0;
/// Engine or allocation failure.
const EXIT_ERROR: u8 = 1;
/// Bad command line.
const EXIT_USAGE_ERROR: u8 = 2;

fn main() -> ExitCode {
    let parsed = match args::parse(std::env::args().skip(1)) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("error: {}", err);
            eprint!("{}", USAGE);
            return ExitCode::from(EXIT_USAGE_ERROR);
        }
    };

    match parsed.mode {
        Mode::PrintHelp => {
            print!("{}", USAGE);
            ExitCode::from(EXIT_SUCCESS)
        }
        Mode::PrintVersion => {
            println!("rewind {}", env!("CARGO_PKG_VERSION"));
            ExitCode::from(EXIT_SUCCESS)
        }
        Mode::Run => match run(&parsed) {
            Ok(()) => ExitCode::from(EXIT_SUCCESS),
            Err(err) => {
                eprintln!("error: {}", err);
                ExitCode::from(EXIT_ERROR)
            }
        },
    }
}

fn run(args: &DriverArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut game = SyntheticGame::new(mib(args.state_mib), args.writes)?;

    let config = EngineConfig {
        history_depth: args.history,
        // Headroom over the nominal write count: a frame's dirty set can
        // exceed the write count when writes straddle page boundaries.
        max_dirty_pages: (args.writes * 2).max(2000),
        worker_threads: args.workers,
        trace: args.trace,
    };
    let mut engine = RollbackEngine::new(config, game.hooks())?;

    println!(
        "rewind: {} MiB tracked region ({} pages), {} writes/frame, {} workers, {} copy path",
        args.state_mib,
        game.state_size() / page_size(),
        args.writes,
        args.workers,
        copy_level().name()
    );

    let run_start = Instant::now();
    let mut slowest_frame_ms = 0.0f64;

    for frame in 0..args.frames {
        let frame_start = Instant::now();

        let rollback_due = args.rollback_interval > 0
            && frame % args.rollback_interval == 0
            && frame > args.history;
        if rollback_due {
            // Late inputs arrived: rewind the full window and replay it.
            let target = frame - args.history;
            engine.rollback(frame, target)?;
            engine.reset_write_watch();
            for resim_frame in target..frame {
                game.simulate_frame(resim_frame);
                engine.on_frame_end(resim_frame, true)?;
            }
            assert_eq!(
                game.head_frame(),
                frame - 1,
                "resimulation should land at the end of the previous frame"
            );
        }

        let touched = game.simulate_frame(frame);
        let captured = engine.on_frame_end(frame, false)?;

        let elapsed_ms = frame_start.elapsed().as_secs_f64() * 1000.0;
        slowest_frame_ms = slowest_frame_ms.max(elapsed_ms);
        if args.trace {
            eprintln!(
                "[driver] frame {}: {} pages touched, {} captured, {:.3} ms",
                frame, touched, captured, elapsed_ms
            );
        }
    }

    let total = run_start.elapsed();
    let stats = engine.stats();
    let saved_mib = stats.pages_saved() as f64 * page_size() as f64 / 1024.0 / 1024.0;
    let restored_mib = stats.pages_restored() as f64 * page_size() as f64 / 1024.0 / 1024.0;

    println!(
        "simulated {} frames ({} resim) in {:.2?}; slowest frame {:.3} ms",
        args.frames,
        stats.total_frames() - u64::from(args.frames),
        total,
        slowest_frame_ms
    );
    println!(
        "captured {:.1} MiB across {} evictions; {} rollbacks restored {:.1} MiB",
        saved_mib,
        stats.evictions(),
        stats.rollbacks(),
        restored_mib
    );

    Ok(())
}
