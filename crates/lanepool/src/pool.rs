//! Hybrid Pool
//!
//! Owns the render and input lanes, the elastic worker pool and its scaler,
//! and exposes submission and barrier operations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{self, PoolConfig, WorkerCount, DEFAULT_MAX_WORKERS, DEFAULT_MIN_WORKERS};
use crate::error::PoolError;
use crate::task::Handle;
use crate::thread::{DedicatedLane, ElasticPool, LaneKind, LaneStats, ScaleDecision, ScalingPolicy, Scaler};

/// Point-in-time view of the pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub render: LaneStats,
    pub input: LaneStats,
    pub workers: LaneStats,
    /// Live elastic workers, including ones still retiring
    pub current_workers: usize,
    /// Elastic workers executing a task
    pub active_workers: usize,
    /// Elastic workers told to retire that have not exited yet
    pub retiring_workers: usize,
    /// Elastic workers spawned since construction
    pub spawned_workers: u64,
    /// Elastic workers that completed retirement
    pub retired_workers: u64,
    /// Worker slots available for work and not executing anything
    pub idle_slots: Vec<usize>,
}

impl PoolStats {
    /// Stats for one lane
    pub fn lane(&self, kind: LaneKind) -> &LaneStats {
        match kind {
            LaneKind::Render => &self.render,
            LaneKind::Input => &self.input,
            LaneKind::Worker => &self.workers,
        }
    }

    /// Every lane idle
    pub fn is_idle(&self) -> bool {
        LaneKind::ALL.iter().all(|&kind| self.lane(kind).is_idle())
    }
}

/// Render lane + input lane + elastic worker pool
#[derive(Debug)]
pub struct HybridPool {
    render: DedicatedLane,
    input: DedicatedLane,
    workers: Arc<ElasticPool>,
    scaler: Option<Scaler>,
    shut_down: bool,
}

impl HybridPool {
    /// Create with an automatically sized worker pool
    pub fn new() -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::default())
    }

    /// Create with exactly `n` initial workers
    pub fn with_workers(n: usize) -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::default().with_workers(n))
    }

    /// Worker count automatic sizing would pick on this host
    pub fn optimal_worker_count() -> usize {
        config::optimal_worker_count_for(
            config::probe_hardware_threads(),
            DEFAULT_MIN_WORKERS,
            DEFAULT_MAX_WORKERS,
        )
    }

    /// Create with custom configuration
    pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let hardware = config.hardware_threads();
        let initial = match config.workers {
            WorkerCount::Fixed(n) => n,
            WorkerCount::Auto => {
                let required = config.required_threads();
                if hardware < required {
                    return Err(PoolError::InsufficientThreads {
                        available: hardware,
                        required,
                    });
                }
                config::optimal_worker_count_for(hardware, config.min_workers, config.max_workers)
            }
        };

        let render = DedicatedLane::spawn(LaneKind::Render, config.render, Arc::clone(&config.configurator))?;
        let input = DedicatedLane::spawn(LaneKind::Input, config.input, Arc::clone(&config.configurator))?;

        let policy = ScalingPolicy::new(
            config.min_workers,
            config.max_workers,
            config.scale_down_threshold,
            config.scale_up_threshold,
        );
        let workers = Arc::new(ElasticPool::start(
            initial,
            policy,
            config.worker,
            Arc::clone(&config.configurator),
        )?);

        let scaler = if config.scaling_enabled {
            Some(Scaler::spawn(Arc::clone(&workers), config.scale_interval)?)
        } else {
            None
        };

        tracing::info!(
            hardware_threads = hardware,
            workers = initial,
            min = config.min_workers,
            max = config.max_workers,
            scaling = config.scaling_enabled,
            "lanepool {} started",
            crate::VERSION
        );

        Ok(Self {
            render,
            input,
            workers,
            scaler,
            shut_down: false,
        })
    }

    /// Submit to the elastic worker pool
    pub fn submit<F, T>(&self, work: F) -> Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.workers.submit(work)
    }

    /// Submit to the render lane; runs after every earlier render task
    pub fn submit_render<F, T>(&self, work: F) -> Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.render.submit(work)
    }

    /// Submit to the input lane; runs after every earlier input task
    pub fn submit_input<F, T>(&self, work: F) -> Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.input.submit(work)
    }

    /// Submit to the lane named by `kind`
    pub fn submit_to<F, T>(&self, kind: LaneKind, work: F) -> Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match kind {
            LaneKind::Render => self.submit_render(work),
            LaneKind::Input => self.submit_input(work),
            LaneKind::Worker => self.submit(work),
        }
    }

    /// Block until `kind` has nothing queued and nothing executing
    pub fn wait_for(&self, kind: LaneKind) {
        match kind {
            LaneKind::Render => self.render.wait_idle(),
            LaneKind::Input => self.input.wait_idle(),
            LaneKind::Worker => self.workers.wait_idle(),
        }
    }

    /// Like [`wait_for`](Self::wait_for), giving up after `timeout`.
    /// Returns whether the lane became idle.
    pub fn wait_for_timeout(&self, kind: LaneKind, timeout: Duration) -> bool {
        match kind {
            LaneKind::Render => self.render.wait_idle_timeout(timeout),
            LaneKind::Input => self.input.wait_idle_timeout(timeout),
            LaneKind::Worker => self.workers.wait_idle_timeout(timeout),
        }
    }

    /// Wait for render, then input, then the worker pool
    pub fn wait_for_all(&self) {
        for kind in LaneKind::ALL {
            self.wait_for(kind);
        }
    }

    /// [`wait_for_all`](Self::wait_for_all) bounded by one overall deadline
    pub fn wait_for_all_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_for_all();
            return true;
        };
        LaneKind::ALL.iter().all(|&kind| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.wait_for_timeout(kind, remaining)
        })
    }

    /// Run one scaler iteration now, serialised with the scaler thread
    pub fn scale_tick(&self) -> ScaleDecision {
        self.workers.tick()
    }

    /// Live elastic workers
    pub fn worker_count(&self) -> usize {
        self.workers.current_workers()
    }

    /// Whether a dedicated lane is executing a task
    pub fn is_busy(&self, kind: LaneKind) -> bool {
        match kind {
            LaneKind::Render => self.render.is_busy(),
            LaneKind::Input => self.input.is_busy(),
            LaneKind::Worker => self.workers.active_workers() > 0,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            render: self.render.stats(),
            input: self.input.stats(),
            workers: self.workers.stats(),
            current_workers: self.workers.current_workers(),
            active_workers: self.workers.active_workers(),
            retiring_workers: self.workers.retiring_workers(),
            spawned_workers: self.workers.spawned_total(),
            retired_workers: self.workers.retired_total(),
            idle_slots: self.workers.idle_slots(),
        }
    }

    /// Stop everything and join every thread.
    ///
    /// Lanes run what was queued before the call; queued elastic tasks are
    /// cancelled. Tasks already executing always run to completion.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        tracing::debug!("lanepool shutting down");

        // Signal everything first so the threads wind down in parallel
        if let Some(scaler) = &self.scaler {
            scaler.stop();
        }
        self.render.stop();
        self.input.stop();
        self.workers.stop();

        // The scaler goes first: membership changes are over before workers are joined.
        if let Some(mut scaler) = self.scaler.take() {
            scaler.shutdown();
        }
        self.render.shutdown();
        self.input.shutdown();
        self.workers.shutdown();

        tracing::info!("lanepool shut down");
    }
}

impl Drop for HybridPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
