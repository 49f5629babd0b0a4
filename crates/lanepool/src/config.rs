//! Pool Configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;
use crate::platform::{self, ThreadConfig, ThreadConfigurator, ThreadPriority};

/// Threads kept out of the elastic pool: two lanes, the scaler and the caller
pub const RESERVED_THREADS: usize = 4;

/// Default lower bound on elastic workers
pub const DEFAULT_MIN_WORKERS: usize = 2;

/// Default upper bound on elastic workers
pub const DEFAULT_MAX_WORKERS: usize = 64;

/// Initial elastic pool size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerCount {
    /// Derived from the hardware-concurrency probe
    #[default]
    Auto,
    /// Exactly this many workers at start-up
    Fixed(usize),
}

/// Pool configuration options
#[derive(Clone)]
pub struct PoolConfig {
    /// Initial worker count
    pub workers: WorkerCount,

    /// Scaler never retires below this
    pub min_workers: usize,

    /// Scaler never spawns above this
    pub max_workers: usize,

    /// Scaler sampling interval
    pub scale_interval: Duration,

    /// Utilization at or above which one worker is added
    pub scale_up_threshold: f64,

    /// Utilization at or below which one worker is retired
    pub scale_down_threshold: f64,

    /// Run the scaler thread
    pub scaling_enabled: bool,

    /// Logical thread count to use instead of probing the host
    pub hardware_threads: Option<usize>,

    /// Render lane thread
    pub render: ThreadConfig,

    /// Input lane thread
    pub input: ThreadConfig,

    /// Elastic worker threads
    pub worker: ThreadConfig,

    /// Backend applying `ThreadConfig`s
    pub configurator: Arc<dyn ThreadConfigurator>,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("workers", &self.workers)
            .field("min_workers", &self.min_workers)
            .field("max_workers", &self.max_workers)
            .field("scale_interval", &self.scale_interval)
            .field("scale_up_threshold", &self.scale_up_threshold)
            .field("scale_down_threshold", &self.scale_down_threshold)
            .field("scaling_enabled", &self.scaling_enabled)
            .field("hardware_threads", &self.hardware_threads)
            .field("render", &self.render)
            .field("input", &self.input)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: WorkerCount::Auto,
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            scale_interval: Duration::from_millis(1000),
            scale_up_threshold: 0.75,
            scale_down_threshold: 0.25,
            scaling_enabled: true,
            hardware_threads: None,
            render: ThreadConfig::with_priority(ThreadPriority::High),
            input: ThreadConfig::with_priority(ThreadPriority::Normal),
            worker: ThreadConfig::with_priority(ThreadPriority::Normal),
            configurator: platform::native(),
        }
    }
}

impl PoolConfig {
    /// Start with exactly `n` workers, widening the scaler bounds to include `n`
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = WorkerCount::Fixed(n);
        self.min_workers = self.min_workers.min(n);
        self.max_workers = self.max_workers.max(n);
        self
    }

    /// Bound the elastic pool to `[min, max]` workers
    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self
    }

    /// Set the scaler sampling interval
    pub fn with_scale_interval(mut self, interval: Duration) -> Self {
        self.scale_interval = interval;
        self
    }

    /// Set the scale-up / scale-down utilization thresholds
    pub fn with_thresholds(mut self, down: f64, up: f64) -> Self {
        self.scale_down_threshold = down;
        self.scale_up_threshold = up;
        self
    }

    /// Disable the scaler thread; the pool keeps its initial size
    pub fn without_scaling(mut self) -> Self {
        self.scaling_enabled = false;
        self
    }

    /// Pretend the host has `n` logical threads
    pub fn with_hardware_threads(mut self, n: usize) -> Self {
        self.hardware_threads = Some(n);
        self
    }

    pub fn with_render_thread(mut self, config: ThreadConfig) -> Self {
        self.render = config;
        self
    }

    pub fn with_input_thread(mut self, config: ThreadConfig) -> Self {
        self.input = config;
        self
    }

    pub fn with_worker_threads(mut self, config: ThreadConfig) -> Self {
        self.worker = config;
        self
    }

    /// Use a custom priority/affinity backend
    pub fn with_configurator(mut self, configurator: Arc<dyn ThreadConfigurator>) -> Self {
        self.configurator = configurator;
        self
    }

    /// Logical threads available, probed unless overridden
    pub fn hardware_threads(&self) -> usize {
        self.hardware_threads.unwrap_or_else(probe_hardware_threads)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), PoolError> {
        let invalid = |msg: String| Err(PoolError::InvalidConfig(msg));

        if self.min_workers == 0 {
            return invalid("min_workers must be at least 1".into());
        }
        if self.min_workers > self.max_workers {
            return invalid(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            ));
        }
        if self.scale_interval.is_zero() {
            return invalid("scale_interval must be non-zero".into());
        }
        let in_unit = |t: f64| (0.0..=1.0).contains(&t);
        if !in_unit(self.scale_down_threshold) || !in_unit(self.scale_up_threshold) {
            return invalid("scaling thresholds must lie in [0, 1]".into());
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return invalid(format!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.scale_down_threshold, self.scale_up_threshold
            ));
        }
        if let WorkerCount::Fixed(n) = self.workers {
            if n < self.min_workers || n > self.max_workers {
                return invalid(format!(
                    "worker count {} outside [{}, {}]",
                    n, self.min_workers, self.max_workers
                ));
            }
        }
        Ok(())
    }

    /// Smallest host that can run the pool with automatic sizing
    pub fn required_threads(&self) -> usize {
        RESERVED_THREADS + self.min_workers
    }
}

/// Logical thread count of the host
pub fn probe_hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Initial worker count for a host with `hardware_threads` logical threads
pub fn optimal_worker_count_for(hardware_threads: usize, min: usize, max: usize) -> usize {
    hardware_threads
        .saturating_sub(RESERVED_THREADS)
        .clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render.priority, ThreadPriority::High);
        assert_eq!(config.input.priority, ThreadPriority::Normal);
        assert_eq!(config.scale_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_optimal_worker_count() {
        assert_eq!(optimal_worker_count_for(16, 2, 64), 12);
        assert_eq!(optimal_worker_count_for(4, 2, 64), 2);
        assert_eq!(optimal_worker_count_for(1, 2, 64), 2);
        assert_eq!(optimal_worker_count_for(256, 2, 64), 64);
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let config = PoolConfig::default().with_bounds(8, 4);
        assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_min() {
        let config = PoolConfig::default().with_bounds(0, 4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_overlapping_thresholds() {
        let config = PoolConfig::default().with_thresholds(0.8, 0.5);
        assert!(config.validate().is_err());
        let config = PoolConfig::default().with_thresholds(0.25, 1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_fixed_count_out_of_bounds() {
        // Bounds set after the count can exclude it
        let config = PoolConfig::default().with_workers(5).with_bounds(2, 4);
        assert!(config.validate().is_err());
        let config = PoolConfig::default().with_workers(3).with_bounds(2, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fixed_count_widens_bounds() {
        let config = PoolConfig::default().with_workers(1);
        assert_eq!((config.min_workers, config.max_workers), (1, DEFAULT_MAX_WORKERS));
        assert!(config.validate().is_ok());

        let config = PoolConfig::default().with_bounds(2, 4).with_workers(6);
        assert_eq!((config.min_workers, config.max_workers), (2, 6));
        assert!(config.validate().is_ok());

        let config = PoolConfig::default().with_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hardware_override() {
        let config = PoolConfig::default().with_hardware_threads(3);
        assert_eq!(config.hardware_threads(), 3);
        assert_eq!(config.required_threads(), RESERVED_THREADS + DEFAULT_MIN_WORKERS);
    }
}
