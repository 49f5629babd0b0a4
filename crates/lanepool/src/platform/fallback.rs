//! Fallback backend for targets without a native implementation

use super::{ThreadConfigurator, ThreadPriority};
use crate::error::PlatformError;

/// Accepts the default priority, rejects everything else
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedThreads;

impl ThreadConfigurator for UnsupportedThreads {
    fn set_priority(&self, priority: ThreadPriority) -> Result<(), PlatformError> {
        match priority {
            ThreadPriority::Normal => Ok(()),
            _ => Err(PlatformError::Unsupported),
        }
    }

    fn set_affinity(&self, _core: usize) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }
}
