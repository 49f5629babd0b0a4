//! Dedicated Lane
//!
//! One background thread draining one private queue in submission order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{LaneKind, LaneStats, TaskCounters};
use crate::error::PoolError;
use crate::platform::{self, ThreadConfig, ThreadConfigurator};
use crate::queue::TaskQueue;
use crate::task::{Handle, Task};

/// Single-consumer lane (render or input)
pub(crate) struct DedicatedLane {
    kind: LaneKind,
    queue: Arc<TaskQueue>,
    counters: Arc<TaskCounters>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DedicatedLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedicatedLane")
            .field("kind", &self.kind)
            .field("pending", &self.queue.len())
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl DedicatedLane {
    /// Spawn the lane thread
    pub(crate) fn spawn(
        kind: LaneKind,
        config: ThreadConfig,
        configurator: Arc<dyn ThreadConfigurator>,
    ) -> Result<Self, PoolError> {
        let queue = Arc::new(TaskQueue::new());
        let counters = Arc::new(TaskCounters::default());
        let name = format!("lanepool-{}", kind.name());

        let thread = {
            let queue = Arc::clone(&queue);
            let counters = Arc::clone(&counters);
            let thread_name = name.clone();
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    platform::apply(configurator.as_ref(), &thread_name, &config);
                    tracing::debug!(lane = kind.name(), "lane thread started");

                    // A stopping lane still drains what was queued before the stop.
                    while let Some(task) = queue.pop_or_exit(|closed, empty| closed && empty) {
                        counters.record(task.run());
                        queue.complete();
                    }

                    tracing::debug!(lane = kind.name(), "lane thread exiting");
                })
                .map_err(|source| PoolError::Spawn { name, source })?
        };

        Ok(Self {
            kind,
            queue,
            counters,
            thread: Some(thread),
        })
    }

    /// Queue `work` behind everything already submitted to this lane
    pub(crate) fn submit<F, T>(&self, work: F) -> Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = Task::new(work);
        if let Err(task) = self.queue.push(task) {
            tracing::debug!(lane = self.kind.name(), task = task.id(), "lane stopped, task cancelled");
        }
        handle
    }

    /// Block until the queue is empty and no task is executing
    pub(crate) fn wait_idle(&self) {
        self.queue.wait_idle();
    }

    pub(crate) fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        self.queue.wait_idle_timeout(timeout)
    }

    /// A task is currently executing
    pub(crate) fn is_busy(&self) -> bool {
        self.queue.in_flight() > 0
    }

    pub(crate) fn stats(&self) -> LaneStats {
        LaneStats {
            pending: self.queue.len(),
            in_flight: self.queue.in_flight(),
            completed: self.counters.completed(),
            panicked: self.counters.panicked(),
        }
    }

    /// Request stop without waiting. Queued tasks still run.
    pub(crate) fn stop(&self) {
        self.queue.close();
    }

    /// Stop and join the lane thread
    pub(crate) fn shutdown(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(lane = self.kind.name(), "lane thread panicked");
            }
        }
    }
}

impl Drop for DedicatedLane {
    fn drop(&mut self) {
        self.shutdown();
    }
}
