//! Error types

use std::io;

/// Pool-wide errors, raised at construction
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Insufficient hardware threads: {available} available, at least {required} required")]
    InsufficientThreads { available: usize, required: usize },

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Per-task errors, delivered through a [`Handle`](crate::Handle)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task body panicked; carries the panic message
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The task was dropped unexecuted because the pool shut down
    #[error("Task cancelled: pool shut down before it was executed")]
    Cancelled,
}

/// Thread priority / affinity failures. Only ever logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("Thread configuration not supported on this platform")]
    Unsupported,

    #[error("{op} failed with OS error {code}")]
    Os { op: &'static str, code: i32 },

    #[error("CPU core {core} beyond CPU set size {limit}")]
    CoreOutOfRange { core: usize, limit: usize },
}
