//! Scaler
//!
//! Control loop that samples elastic-pool utilization at a fixed interval and
//! grows or shrinks the pool by one worker per tick. Growing and shrinking
//! use separate thresholds so the pool does not oscillate around one value.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::worker::ElasticPool;
use crate::error::PoolError;

/// Outcome of one scaler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Spawn one worker
    Grow,
    /// Retire one worker
    Shrink,
    /// Leave the pool as is
    Hold,
}

/// Hysteretic grow/shrink rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    pub min_workers: usize,
    pub max_workers: usize,
    pub scale_down_threshold: f64,
    pub scale_up_threshold: f64,
}

impl ScalingPolicy {
    pub fn new(min_workers: usize, max_workers: usize, down: f64, up: f64) -> Self {
        Self {
            min_workers,
            max_workers,
            scale_down_threshold: down,
            scale_up_threshold: up,
        }
    }

    /// `active / current`; an empty pool counts as saturated
    pub fn utilization(active: usize, current: usize) -> f64 {
        if current == 0 {
            1.0
        } else {
            active as f64 / current as f64
        }
    }

    /// Decide the next step.
    ///
    /// `retiring` counts workers already told to retire that have not exited.
    /// While one is outstanding no further worker is retired, so the count
    /// can never drop below `min_workers`. Growth only compares `current`,
    /// which still includes retirees, so it can never exceed `max_workers`.
    pub fn decide(&self, active: usize, current: usize, retiring: usize) -> ScaleDecision {
        let utilization = Self::utilization(active, current);
        if utilization >= self.scale_up_threshold && current < self.max_workers {
            ScaleDecision::Grow
        } else if utilization <= self.scale_down_threshold
            && current > self.min_workers
            && retiring == 0
        {
            ScaleDecision::Shrink
        } else {
            ScaleDecision::Hold
        }
    }
}

/// Stop flag the scaler sleeps on
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

/// Scaler thread
#[derive(Debug)]
pub(crate) struct Scaler {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl Scaler {
    /// Start ticking `pool` every `interval`
    pub(crate) fn spawn(pool: Arc<ElasticPool>, interval: Duration) -> Result<Self, PoolError> {
        let signal = Arc::new(StopSignal::default());
        let name = "lanepool-scaler".to_string();

        let thread = {
            let signal = Arc::clone(&signal);
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || scaler_loop(&pool, &signal, interval))
                .map_err(|source| PoolError::Spawn { name, source })?
        };

        Ok(Self {
            signal,
            thread: Some(thread),
        })
    }

    /// Request stop without waiting
    pub(crate) fn stop(&self) {
        *self.signal.stopped.lock() = true;
        self.signal.condvar.notify_all();
    }

    /// Stop and join. A tick in progress completes first.
    pub(crate) fn shutdown(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("scaler thread panicked");
            }
        }
    }
}

impl Drop for Scaler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn scaler_loop(pool: &ElasticPool, signal: &StopSignal, interval: Duration) {
    tracing::debug!(interval_ms = interval.as_millis() as u64, "scaler started");

    let mut stopped = signal.stopped.lock();
    let mut next_tick = Instant::now().checked_add(interval);
    while !*stopped {
        let Some(deadline) = next_tick else {
            // Interval beyond the clock's range: never tick, only wait for stop
            signal.condvar.wait(&mut stopped);
            continue;
        };
        if !signal.condvar.wait_until(&mut stopped, deadline).timed_out() {
            // Stop request or spurious wake-up
            continue;
        }
        next_tick = Instant::now().checked_add(interval);
        MutexGuard::unlocked(&mut stopped, || {
            pool.tick();
        });
    }

    tracing::debug!("scaler exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{self, ThreadConfig};
    use proptest::prelude::*;

    fn policy() -> ScalingPolicy {
        ScalingPolicy::new(2, 8, 0.25, 0.75)
    }

    #[test]
    fn test_utilization() {
        assert_eq!(ScalingPolicy::utilization(3, 4), 0.75);
        assert_eq!(ScalingPolicy::utilization(0, 4), 0.0);
        assert_eq!(ScalingPolicy::utilization(0, 0), 1.0);
    }

    #[test]
    fn test_grow_at_threshold() {
        assert_eq!(policy().decide(3, 4, 0), ScaleDecision::Grow);
        assert_eq!(policy().decide(8, 8, 0), ScaleDecision::Hold);
    }

    #[test]
    fn test_shrink_at_threshold() {
        assert_eq!(policy().decide(1, 4, 0), ScaleDecision::Shrink);
        assert_eq!(policy().decide(0, 2, 0), ScaleDecision::Hold);
    }

    #[test]
    fn test_hysteresis_band_holds() {
        assert_eq!(policy().decide(2, 4, 0), ScaleDecision::Hold);
    }

    #[test]
    fn test_no_shrink_while_retiring() {
        assert_eq!(policy().decide(0, 4, 1), ScaleDecision::Hold);
    }

    #[test]
    fn test_scaler_thread_grows_pool() {
        let pool = Arc::new(
            ElasticPool::start(1, ScalingPolicy::new(1, 3, 0.25, 0.75), ThreadConfig::default(), platform::native())
                .unwrap(),
        );
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam::channel::bounded(1);
        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        started_rx.recv().unwrap();

        let mut scaler = Scaler::spawn(Arc::clone(&pool), Duration::from_millis(10)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.current_workers() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        scaler.shutdown();

        assert!(pool.current_workers() >= 2);
        assert!(pool.current_workers() <= 3);
        drop(release_tx);
        pool.wait_idle();
    }

    #[test]
    fn test_unbounded_interval_never_ticks() {
        let pool = Arc::new(
            ElasticPool::start(2, ScalingPolicy::new(1, 4, 0.25, 0.75), ThreadConfig::default(), platform::native())
                .unwrap(),
        );
        let mut scaler = Scaler::spawn(Arc::clone(&pool), Duration::MAX).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(!scaler.thread.as_ref().unwrap().is_finished());
        assert_eq!(pool.current_workers(), 2);

        scaler.shutdown();
        assert!(scaler.thread.is_none());
    }

    proptest! {
        /// Model: each step picks a load level, applies the decision, and
        /// optionally lets outstanding retirements finish.
        #[test]
        fn prop_worker_count_stays_in_bounds(
            min in 1usize..4,
            extra in 0usize..6,
            steps in proptest::collection::vec((0.0f64..=1.0, any::<bool>()), 1..200),
        ) {
            let max = min + extra;
            let policy = ScalingPolicy::new(min, max, 0.25, 0.75);
            let mut current = min;
            let mut retiring = 0usize;

            for (load, finish_retirements) in steps {
                let active = ((current as f64) * load).round() as usize;
                match policy.decide(active, current, retiring) {
                    ScaleDecision::Grow => current += 1,
                    ScaleDecision::Shrink => retiring += 1,
                    ScaleDecision::Hold => {}
                }
                if finish_retirements {
                    current -= retiring;
                    retiring = 0;
                }
                prop_assert!(current - retiring >= min);
                prop_assert!(current <= max);
            }
        }
    }
}
