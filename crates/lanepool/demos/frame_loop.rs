//! Demo: a synthetic frame loop driving lanepool
//!
//! Each frame polls input, decodes a few assets on the worker pool, records
//! render work once the input for that frame is in, and waits for everything
//! at the frame boundary.
//!
//! Run with `RUST_LOG=lanepool=debug cargo run --example frame_loop`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lanepool::{HybridPool, LaneKind, PoolConfig};
use tracing_subscriber::EnvFilter;

const FRAMES: u64 = 120;
const ASSETS_PER_FRAME: u64 = 6;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pool = match HybridPool::new() {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!("{}; falling back to a fixed pool", e);
            HybridPool::with_config(
                PoolConfig::default()
                    .with_workers(lanepool::DEFAULT_MIN_WORKERS)
                    .with_scale_interval(Duration::from_millis(100)),
            )?
        }
    };

    println!("lanepool v{} ({} workers)", lanepool::VERSION, pool.worker_count());

    let frame_counter = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    for frame in 0..FRAMES {
        let pose = pool.submit_input(move || {
            thread::sleep(Duration::from_micros(300));
            frame as f32 * 0.01
        });

        // Heavier decode work every tenth frame drives the scaler up
        let decode_cost = if frame % 10 == 0 { 4_000 } else { 200 };
        let assets: Vec<_> = (0..ASSETS_PER_FRAME)
            .map(|i| {
                pool.submit(move || {
                    thread::sleep(Duration::from_micros(decode_cost));
                    frame * ASSETS_PER_FRAME + i
                })
            })
            .collect();

        let pose = pose.wait()?;
        let counter = Arc::clone(&frame_counter);
        pool.submit_render(move || {
            tracing::trace!(frame, pose, "recording frame");
            thread::sleep(Duration::from_micros(800));
            counter.fetch_add(1, Ordering::Relaxed);
        });

        for asset in assets {
            asset.wait()?;
        }
        pool.wait_for_all();

        if frame % 30 == 0 {
            let stats = pool.stats();
            println!(
                "frame {:>3}: workers={} active={} render_done={} worker_done={}",
                frame,
                stats.current_workers,
                stats.active_workers,
                stats.lane(LaneKind::Render).completed,
                stats.lane(LaneKind::Worker).completed,
            );
        }
    }

    println!(
        "{} frames in {:?}, final stats: {:?}",
        frame_counter.load(Ordering::Relaxed),
        started.elapsed(),
        pool.stats()
    );

    Ok(())
}
