//! Task Queue
//!
//! FIFO queue of tasks shared by one or more consumer threads. Besides the
//! pending tasks it tracks how many popped tasks are still executing, so the
//! barrier operations can wait for "empty and nothing in flight" under the
//! same lock that consumers use.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::task::Task;

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    /// Tasks popped but not yet reported complete
    in_flight: usize,
    /// No further pushes accepted
    closed: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.tasks.is_empty() && self.in_flight == 0
    }
}

/// Mutex/condvar guarded task queue
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    /// Signalled when a task is pushed or consumers must re-check their exit condition
    available: Condvar,
    /// Signalled when the queue becomes idle
    idle: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Push a task and wake one consumer. Hands the task back if the queue is closed.
    pub(crate) fn push(&self, task: Task) -> Result<(), Task> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(task);
        }
        state.tasks.push_back(task);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Block until a task is available or `should_exit` says to stop.
    ///
    /// `should_exit` receives `(closed, empty)` and is evaluated under the
    /// queue lock before every pop and after every wake-up. A popped task
    /// counts as in flight until [`complete`](Self::complete) is called.
    pub(crate) fn pop_or_exit<F>(&self, mut should_exit: F) -> Option<Task>
    where
        F: FnMut(bool, bool) -> bool,
    {
        let mut state = self.state.lock();
        loop {
            if should_exit(state.closed, state.tasks.is_empty()) {
                return None;
            }
            if let Some(task) = state.tasks.pop_front() {
                state.in_flight += 1;
                return Some(task);
            }
            self.available.wait(&mut state);
        }
    }

    /// Report that a popped task finished executing
    pub(crate) fn complete(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.in_flight > 0, "complete() without a popped task");
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.is_idle() {
            self.idle.notify_all();
        }
    }

    /// Wake every consumer so it re-evaluates its exit condition
    pub(crate) fn wake_all(&self) {
        // Taking the lock orders this wake-up after any flag the caller just set.
        let _state = self.state.lock();
        self.available.notify_all();
    }

    /// Reject further pushes and wake every consumer
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
    }

    /// Remove every pending task without running it
    pub(crate) fn drain(&self) -> Vec<Task> {
        let mut state = self.state.lock();
        let drained: Vec<Task> = state.tasks.drain(..).collect();
        if state.is_idle() {
            self.idle.notify_all();
        }
        drained
    }

    /// Block until no task is pending or in flight
    pub(crate) fn wait_idle(&self) {
        let mut state = self.state.lock();
        while !state.is_idle() {
            self.idle.wait(&mut state);
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) but gives up after `timeout`.
    /// Returns whether the queue was idle.
    pub(crate) fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        // A timeout past the clock's range never expires
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_idle();
            return true;
        };
        let mut state = self.state.lock();
        while !state.is_idle() {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    /// Number of pending (not yet popped) tasks
    pub(crate) fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Number of tasks currently executing
    pub(crate) fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::new();
        let (a, _) = Task::new(|| ());
        let (b, _) = Task::new(|| ());
        let (a_id, b_id) = (a.id(), b.id());
        queue.push(a).unwrap();
        queue.push(b).unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_or_exit(|_, _| false).unwrap().id(), a_id);
        assert_eq!(queue.pop_or_exit(|_, _| false).unwrap().id(), b_id);
        assert_eq!(queue.in_flight(), 2);
    }

    #[test]
    fn test_idle_tracks_in_flight() {
        let queue = TaskQueue::new();
        let (task, _) = Task::new(|| ());
        queue.push(task).unwrap();
        assert!(!queue.is_idle());

        let task = queue.pop_or_exit(|_, _| false).unwrap();
        assert_eq!(queue.len(), 0);
        // Popped but not finished: still not idle
        assert!(!queue.is_idle());

        task.run();
        queue.complete();
        assert!(queue.is_idle());
    }

    #[test]
    fn test_unbounded_timeout_waits_for_idle() {
        let queue = Arc::new(TaskQueue::new());
        assert!(queue.wait_idle_timeout(Duration::MAX));

        let (task, _) = Task::new(|| ());
        queue.push(task).unwrap();
        let task = queue.pop_or_exit(|_, _| false).unwrap();
        let finisher = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                task.run();
                queue.complete();
            })
        };
        assert!(queue.wait_idle_timeout(Duration::MAX));
        assert!(queue.is_idle());
        finisher.join().unwrap();
    }

    #[test]
    fn test_closed_queue_rejects_push() {
        let queue = TaskQueue::new();
        queue.close();
        let (task, handle) = Task::new(|| 1);
        let rejected = queue.push(task).unwrap_err();
        drop(rejected);
        assert_eq!(handle.wait(), Err(TaskError::Cancelled));
    }

    #[test]
    fn test_close_wakes_waiting_consumer() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_or_exit(|closed, empty| closed && empty).is_none())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn test_drain_cancels_pending() {
        let queue = TaskQueue::new();
        let (task, handle) = Task::new(|| 1);
        queue.push(task).unwrap();
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        drop(drained);
        assert!(queue.is_idle());
        assert_eq!(handle.wait(), Err(TaskError::Cancelled));
    }

    #[test]
    fn test_wait_idle_timeout() {
        let queue = TaskQueue::new();
        assert!(queue.wait_idle_timeout(Duration::from_millis(1)));

        let (task, _) = Task::new(|| ());
        queue.push(task).unwrap();
        assert!(!queue.wait_idle_timeout(Duration::from_millis(10)));
    }
}
