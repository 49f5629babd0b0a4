//! lanepool
//!
//! Hybrid task pool for frame-driven engines.
//!
//! Three categories of work:
//! - **Render lane**: one thread, strict submission order
//! - **Input lane**: one thread, strict submission order
//! - **Worker pool**: fungible threads sharing one queue; a scaler thread
//!   grows or shrinks it with load
//!
//! Every submission returns a [`Handle`] that yields the task's value or
//! the panic it raised. Barrier operations ([`HybridPool::wait_for`],
//! [`HybridPool::wait_for_all`]) block until a lane has nothing queued and
//! nothing executing.
//!
//! # Example
//! ```rust,no_run
//! use lanepool::{HybridPool, LaneKind};
//!
//! let pool = HybridPool::new()?;
//!
//! pool.submit_input(|| { /* poll controllers */ });
//! let mesh = pool.submit(|| vec![0u8; 1024]);
//! pool.submit_render(|| { /* record command buffers */ });
//!
//! pool.wait_for(LaneKind::Render);
//! assert_eq!(mesh.wait()?.len(), 1024);
//! pool.wait_for_all();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod config;
mod error;
mod pool;
mod queue;
mod task;
pub mod platform;
pub mod thread;

pub use config::{
    optimal_worker_count_for, probe_hardware_threads, PoolConfig, WorkerCount,
    DEFAULT_MAX_WORKERS, DEFAULT_MIN_WORKERS, RESERVED_THREADS,
};
pub use error::{PlatformError, PoolError, TaskError};
pub use platform::{ThreadConfig, ThreadConfigurator, ThreadPriority};
pub use pool::{HybridPool, PoolStats};
pub use task::Handle;
pub use thread::{LaneKind, LaneStats, ScaleDecision, ScalingPolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
