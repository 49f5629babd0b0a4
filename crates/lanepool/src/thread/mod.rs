//! Threading Model
//!
//! Consumer threads of the hybrid pool.
//! - Dedicated lanes: one thread each, strict FIFO (render, input)
//! - Elastic workers: N threads sharing one queue
//! - Scaler: control loop resizing the elastic workers

mod lane;
mod scaler;
mod worker;

pub(crate) use lane::DedicatedLane;
pub(crate) use scaler::Scaler;
pub(crate) use worker::ElasticPool;
pub use scaler::{ScaleDecision, ScalingPolicy};

use std::sync::atomic::{AtomicU64, Ordering};

use crate::task::TaskOutcome;

/// Category of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneKind {
    /// Dedicated render lane
    Render,
    /// Dedicated input lane
    Input,
    /// Elastic worker pool
    Worker,
}

impl LaneKind {
    /// All lanes, in `wait_for_all` order
    pub const ALL: [LaneKind; 3] = [LaneKind::Render, LaneKind::Input, LaneKind::Worker];

    /// Get lane name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Input => "input",
            Self::Worker => "worker",
        }
    }

    /// Whether the lane is served by a single thread
    pub fn is_dedicated(&self) -> bool {
        !matches!(self, Self::Worker)
    }
}

/// Completed / panicked task totals of one queue
#[derive(Debug, Default)]
pub(crate) struct TaskCounters {
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl TaskCounters {
    pub(crate) fn record(&self, outcome: TaskOutcome) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if outcome == TaskOutcome::Panicked {
            self.panicked.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }
}

/// Snapshot of one lane's queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStats {
    /// Tasks waiting to be picked up
    pub pending: usize,
    /// Tasks currently executing
    pub in_flight: usize,
    /// Tasks finished, including panicked ones
    pub completed: u64,
    /// Tasks whose body panicked
    pub panicked: u64,
}

impl LaneStats {
    /// Nothing pending and nothing executing
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.in_flight == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_kinds() {
        assert!(LaneKind::Render.is_dedicated());
        assert!(LaneKind::Input.is_dedicated());
        assert!(!LaneKind::Worker.is_dedicated());
        assert_eq!(LaneKind::ALL.map(|k| k.name()), ["render", "input", "worker"]);
    }

    #[test]
    fn test_counters() {
        let counters = TaskCounters::default();
        counters.record(TaskOutcome::Completed);
        counters.record(TaskOutcome::Panicked);
        assert_eq!(counters.completed(), 2);
        assert_eq!(counters.panicked(), 1);
    }
}
