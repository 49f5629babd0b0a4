//! Tasks and result handles
//!
//! A [`Task`] is a boxed nullary closure that publishes its result (or the
//! panic it raised) into a one-shot channel. The caller keeps the receiving
//! end as a [`Handle`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};

use crate::error::TaskError;

/// Task ID counter
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// How a task body finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed,
    Panicked,
}

type Job = Box<dyn FnOnce() -> TaskOutcome + Send + 'static>;

/// Type-erased unit of work
pub(crate) struct Task {
    id: u64,
    job: Job,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish()
    }
}

impl Task {
    /// Wrap `work` into a task and the handle that will observe its result
    pub(crate) fn new<F, T>(work: F) -> (Self, Handle<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = next_task_id();
        let (tx, rx) = channel::bounded(1);

        let job: Job = Box::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(value) => {
                    // The caller may have dropped its handle; the result is then discarded.
                    let _ = tx.send(Ok(value));
                    TaskOutcome::Completed
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(task = id, "task panicked: {}", message);
                    let _ = tx.send(Err(TaskError::Panicked(message)));
                    TaskOutcome::Panicked
                }
            }
        });

        (Self { id, job }, Handle { id, rx })
    }

    /// Task ID
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Execute the task. Consumes it, so a task can never run twice.
    pub(crate) fn run(self) -> TaskOutcome {
        tracing::trace!(task = self.id, "running task");
        (self.job)()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Caller-side handle to a submitted task's eventual result
///
/// The result can be taken exactly once: every retrieval method consumes the
/// handle, and the non-blocking variants hand it back if the task has not
/// finished yet.
pub struct Handle<T> {
    id: u64,
    rx: Receiver<Result<T, TaskError>>,
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> Handle<T> {
    /// ID of the task behind this handle
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the result is ready to be taken without blocking
    pub fn is_finished(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Block until the task finishes
    pub fn wait(self) -> Result<T, TaskError> {
        // A disconnected channel means the task was dropped without running.
        self.rx.recv().unwrap_or(Err(TaskError::Cancelled))
    }

    /// Block for at most `timeout`; hands the handle back if the task is still pending
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<T, TaskError>, Self> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(TaskError::Cancelled)),
        }
    }

    /// Take the result if it is ready; hands the handle back otherwise
    pub fn try_wait(self) -> Result<Result<T, TaskError>, Self> {
        match self.rx.try_recv() {
            Ok(result) => Ok(result),
            Err(TryRecvError::Empty) => Err(self),
            Err(TryRecvError::Disconnected) => Ok(Err(TaskError::Cancelled)),
        }
    }
}
