//! Thread Configuration
//!
//! Priority classes and CPU-core pinning for pool threads. Each target OS
//! gets one [`ThreadConfigurator`] backend; pool code only talks to the trait
//! and never branches on the platform. Applying a configuration is
//! best-effort: failures are logged and the thread carries on.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod fallback;

#[cfg(target_os = "linux")]
pub use linux::LinuxThreads as NativeThreads;
#[cfg(not(target_os = "linux"))]
pub use fallback::UnsupportedThreads as NativeThreads;

use std::fmt;
use std::sync::Arc;

use crate::error::PlatformError;

/// Scheduling priority class of a pool thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ThreadPriority {
    Low,
    #[default]
    Normal,
    High,
    RealTime,
}

impl ThreadPriority {
    /// Get priority name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::RealTime => "realtime",
        }
    }
}

/// Per-thread configuration applied when a pool thread starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadConfig {
    /// Priority class
    pub priority: ThreadPriority,
    /// CPU core to pin the thread to
    pub core: Option<usize>,
}

impl ThreadConfig {
    /// Configuration with the given priority and no pinning
    pub fn with_priority(priority: ThreadPriority) -> Self {
        Self { priority, core: None }
    }

    /// Pin to a CPU core
    pub fn pinned_to(mut self, core: usize) -> Self {
        self.core = Some(core);
        self
    }
}

/// Platform backend that configures the calling thread
pub trait ThreadConfigurator: Send + Sync + fmt::Debug {
    /// Set the calling thread's priority class
    fn set_priority(&self, priority: ThreadPriority) -> Result<(), PlatformError>;

    /// Pin the calling thread to `core`
    fn set_affinity(&self, core: usize) -> Result<(), PlatformError>;
}

/// Backend for the current target OS
pub fn native() -> Arc<dyn ThreadConfigurator> {
    Arc::new(NativeThreads)
}

/// Apply `config` to the calling thread, logging (never propagating) failures
pub(crate) fn apply(configurator: &dyn ThreadConfigurator, thread: &str, config: &ThreadConfig) {
    if let Err(e) = configurator.set_priority(config.priority) {
        tracing::warn!(thread, priority = config.priority.name(), "could not set thread priority: {}", e);
    }
    if let Some(core) = config.core {
        if let Err(e) = configurator.set_affinity(core) {
            tracing::warn!(thread, core, "could not set thread affinity: {}", e);
        }
    }
}
