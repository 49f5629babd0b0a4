//! Elastic Worker Pool
//!
//! Fungible worker threads pulling from one shared queue. Membership changes
//! (spawn, retire, reap, shutdown) all happen under one lock so the scaler
//! and shutdown can never interleave.
//!
//! Retirement is cooperative: the scaler parks a slot, the worker finishes
//! whatever it is running, stops pulling work, decrements the worker count
//! and reports its slot on the reap channel. The next scaler tick (or
//! shutdown) joins the thread.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::scaler::{ScaleDecision, ScalingPolicy};
use super::{LaneStats, TaskCounters};
use crate::error::PoolError;
use crate::platform::{self, ThreadConfig, ThreadConfigurator};
use crate::queue::TaskQueue;
use crate::task::{Handle, Task};

/// One elastic worker thread
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    id: usize,
    /// Excluded from pulling new work; set when the worker is being retired
    parked: AtomicBool,
    /// Currently executing a task
    active: AtomicBool,
}

impl WorkerSlot {
    fn new(id: usize) -> Self {
        Self {
            id,
            parked: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// State shared with every worker thread
#[derive(Debug)]
struct WorkerShared {
    queue: TaskQueue,
    current_workers: AtomicUsize,
    active_workers: AtomicUsize,
    /// Parked workers that have not exited yet
    retiring_workers: AtomicUsize,
    counters: TaskCounters,
    spawned: AtomicU64,
    retired: AtomicU64,
    reap_tx: Sender<usize>,
}

#[derive(Debug)]
struct Member {
    slot: Arc<WorkerSlot>,
    thread: JoinHandle<()>,
}

/// Thread handles and slot bookkeeping, guarded by one lock
#[derive(Debug, Default)]
struct Membership {
    members: BTreeMap<usize, Member>,
    /// Live, non-parked slots in spawn order
    available: VecDeque<usize>,
    next_id: usize,
    shut_down: bool,
}

/// Elastic pool of worker threads
#[derive(Debug)]
pub(crate) struct ElasticPool {
    shared: Arc<WorkerShared>,
    membership: Mutex<Membership>,
    reap_rx: Receiver<usize>,
    running: AtomicBool,
    policy: ScalingPolicy,
    thread_config: ThreadConfig,
    configurator: Arc<dyn ThreadConfigurator>,
}

impl ElasticPool {
    /// Create the pool and spawn `initial` workers
    pub(crate) fn start(
        initial: usize,
        policy: ScalingPolicy,
        thread_config: ThreadConfig,
        configurator: Arc<dyn ThreadConfigurator>,
    ) -> Result<Self, PoolError> {
        let (reap_tx, reap_rx) = channel::unbounded();
        let pool = Self {
            shared: Arc::new(WorkerShared {
                queue: TaskQueue::new(),
                current_workers: AtomicUsize::new(0),
                active_workers: AtomicUsize::new(0),
                retiring_workers: AtomicUsize::new(0),
                counters: TaskCounters::default(),
                spawned: AtomicU64::new(0),
                retired: AtomicU64::new(0),
                reap_tx,
            }),
            membership: Mutex::new(Membership::default()),
            reap_rx,
            running: AtomicBool::new(true),
            policy,
            thread_config,
            configurator,
        };

        {
            let mut membership = pool.membership.lock();
            for _ in 0..initial {
                // On error `pool` is dropped, which shuts down the workers spawned so far.
                pool.spawn_worker(&mut membership)?;
            }
        }

        Ok(pool)
    }

    fn spawn_worker(&self, membership: &mut Membership) -> Result<usize, PoolError> {
        let id = membership.next_id;
        let slot = Arc::new(WorkerSlot::new(id));
        let name = format!("lanepool-worker-{}", id);

        // Counted before the thread exists so its exit can never underflow the count.
        self.shared.current_workers.fetch_add(1, Ordering::SeqCst);

        let spawned = {
            let shared = Arc::clone(&self.shared);
            let slot = Arc::clone(&slot);
            let configurator = Arc::clone(&self.configurator);
            let config = self.thread_config;
            let thread_name = name.clone();
            thread::Builder::new().name(name.clone()).spawn(move || {
                platform::apply(configurator.as_ref(), &thread_name, &config);
                worker_loop(&shared, &slot);
            })
        };

        let thread = match spawned {
            Ok(thread) => thread,
            Err(source) => {
                self.shared.current_workers.fetch_sub(1, Ordering::SeqCst);
                return Err(PoolError::Spawn { name, source });
            }
        };

        membership.next_id += 1;
        membership.members.insert(id, Member { slot, thread });
        membership.available.push_back(id);
        self.shared.spawned.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(worker = id, "worker spawned");
        Ok(id)
    }

    /// Park one slot, preferring one that is not executing a task
    fn retire_worker(&self, membership: &mut Membership) -> Option<usize> {
        let position = membership
            .available
            .iter()
            .position(|id| {
                membership
                    .members
                    .get(id)
                    .is_some_and(|m| !m.slot.is_active())
            })
            .unwrap_or(0);
        let id = membership.available.remove(position)?;
        let member = membership.members.get(&id)?;

        self.shared.retiring_workers.fetch_add(1, Ordering::SeqCst);
        member.slot.parked.store(true, Ordering::SeqCst);
        self.shared.queue.wake_all();
        tracing::debug!(worker = id, active = member.slot.is_active(), "worker retiring");
        Some(id)
    }

    /// Join every worker that finished retiring
    fn reap(&self, membership: &mut Membership) -> usize {
        let mut reaped = 0;
        for id in self.reap_rx.try_iter() {
            if let Some(member) = membership.members.remove(&id) {
                if member.thread.join().is_err() {
                    tracing::warn!(worker = id, "worker thread panicked");
                }
                reaped += 1;
                tracing::debug!(worker = id, "worker reaped");
            }
        }
        reaped
    }

    /// One scaler iteration: reap, sample utilization, grow or shrink by one
    pub(crate) fn tick(&self) -> ScaleDecision {
        let mut membership = self.membership.lock();
        self.reap(&mut membership);

        if membership.shut_down || !self.running.load(Ordering::SeqCst) {
            return ScaleDecision::Hold;
        }

        let active = self.shared.active_workers.load(Ordering::Relaxed);
        // Retiring is read first: once it drops to zero the exiting worker
        // has already been subtracted from the current count.
        let retiring = self.shared.retiring_workers.load(Ordering::SeqCst);
        let current = self.shared.current_workers.load(Ordering::SeqCst);
        let decision = self.policy.decide(active, current, retiring);

        match decision {
            ScaleDecision::Grow => {
                if let Err(e) = self.spawn_worker(&mut membership) {
                    tracing::warn!("scale-up failed: {}", e);
                    return ScaleDecision::Hold;
                }
            }
            ScaleDecision::Shrink => {
                if self.retire_worker(&mut membership).is_none() {
                    return ScaleDecision::Hold;
                }
            }
            ScaleDecision::Hold => {}
        }

        if decision != ScaleDecision::Hold {
            tracing::debug!(
                ?decision,
                active,
                current,
                utilization = ScalingPolicy::utilization(active, current),
                "scaled worker pool"
            );
        }
        decision
    }

    pub(crate) fn submit<F, T>(&self, work: F) -> Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = Task::new(work);
        if let Err(task) = self.shared.queue.push(task) {
            tracing::debug!(task = task.id(), "worker pool stopped, task cancelled");
        }
        handle
    }

    /// Block until the shared queue is empty and no worker is executing
    pub(crate) fn wait_idle(&self) {
        self.shared.queue.wait_idle();
    }

    pub(crate) fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        self.shared.queue.wait_idle_timeout(timeout)
    }

    pub(crate) fn current_workers(&self) -> usize {
        self.shared.current_workers.load(Ordering::SeqCst)
    }

    pub(crate) fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::Relaxed)
    }

    pub(crate) fn retiring_workers(&self) -> usize {
        self.shared.retiring_workers.load(Ordering::SeqCst)
    }

    pub(crate) fn spawned_total(&self) -> u64 {
        self.shared.spawned.load(Ordering::Relaxed)
    }

    pub(crate) fn retired_total(&self) -> u64 {
        self.shared.retired.load(Ordering::Relaxed)
    }

    /// Available slots that are not executing a task
    pub(crate) fn idle_slots(&self) -> Vec<usize> {
        let membership = self.membership.lock();
        membership
            .available
            .iter()
            .copied()
            .filter(|id| {
                membership
                    .members
                    .get(id)
                    .is_some_and(|m| !m.slot.is_active())
            })
            .collect()
    }

    pub(crate) fn stats(&self) -> LaneStats {
        LaneStats {
            pending: self.shared.queue.len(),
            in_flight: self.shared.queue.in_flight(),
            completed: self.shared.counters.completed(),
            panicked: self.shared.counters.panicked(),
        }
    }

    /// Stop future dequeues without joining. Queued tasks are dropped and
    /// their handles report cancellation; running tasks finish.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shared.queue.close();
        let cancelled = self.shared.queue.drain();
        if !cancelled.is_empty() {
            tracing::debug!(count = cancelled.len(), "cancelled queued worker tasks");
        }
    }

    /// Stop and join every worker, including ones mid-retirement
    pub(crate) fn shutdown(&self) {
        self.stop();

        let mut membership = self.membership.lock();
        if membership.shut_down {
            return;
        }
        membership.shut_down = true;
        membership.available.clear();

        for (id, member) in std::mem::take(&mut membership.members) {
            if member.thread.join().is_err() {
                tracing::warn!(worker = id, "worker thread panicked");
            }
        }
        // Retirees already joined above
        self.reap_rx.try_iter().for_each(drop);
        tracing::debug!("worker pool shut down");
    }
}

impl Drop for ElasticPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &WorkerShared, slot: &WorkerSlot) {
    tracing::debug!(worker = slot.id, "worker started");

    while let Some(task) = shared
        .queue
        .pop_or_exit(|closed, _| closed || slot.parked.load(Ordering::SeqCst))
    {
        slot.active.store(true, Ordering::Relaxed);
        shared.active_workers.fetch_add(1, Ordering::Relaxed);

        let outcome = task.run();
        shared.counters.record(outcome);

        shared.active_workers.fetch_sub(1, Ordering::Relaxed);
        slot.active.store(false, Ordering::Relaxed);
        shared.queue.complete();
    }

    // Order matters: current first, then retiring (see ElasticPool::tick).
    shared.current_workers.fetch_sub(1, Ordering::SeqCst);
    if slot.parked.load(Ordering::SeqCst) {
        shared.retiring_workers.fetch_sub(1, Ordering::SeqCst);
        shared.retired.fetch_add(1, Ordering::Relaxed);
        // The receiver lives as long as the pool; a send error only means it is gone.
        let _ = shared.reap_tx.send(slot.id);
        tracing::debug!(worker = slot.id, "worker retired");
    } else {
        tracing::debug!(worker = slot.id, "worker exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use std::time::Instant;

    fn pool(initial: usize, min: usize, max: usize) -> ElasticPool {
        ElasticPool::start(
            initial,
            ScalingPolicy::new(min, max, 0.25, 0.75),
            ThreadConfig::default(),
            platform::native(),
        )
        .unwrap()
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_initial_workers() {
        let pool = pool(3, 1, 8);
        assert_eq!(pool.current_workers(), 3);
        assert_eq!(pool.spawned_total(), 3);
        assert_eq!(pool.idle_slots(), vec![0, 1, 2]);
    }

    #[test]
    fn test_tasks_return_results() {
        let pool = pool(2, 1, 4);
        let handles: Vec<_> = (0..20u64).map(|i| pool.submit(move || i * i)).collect();
        let sum: u64 = handles.into_iter().map(|h| h.wait().unwrap()).sum();
        assert_eq!(sum, (0..20u64).map(|i| i * i).sum());
        pool.wait_idle();
        assert_eq!(pool.stats().completed, 20);
    }

    #[test]
    fn test_wait_idle_covers_in_flight_task() {
        let pool = pool(1, 1, 2);
        let (started_tx, started_rx) = channel::bounded(1);
        let done = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&done);
        pool.submit(move || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        });

        started_rx.recv().unwrap();
        // Queue is already empty here; the barrier must still wait for the worker.
        pool.wait_idle();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(pool.active_workers(), 0);
    }

    #[test]
    fn test_tick_grows_when_saturated() {
        let pool = pool(1, 1, 4);
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let (started_tx, started_rx) = channel::bounded(1);

        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        started_rx.recv().unwrap();

        assert_eq!(pool.tick(), ScaleDecision::Grow);
        assert_eq!(pool.current_workers(), 2);
        drop(release_tx);
        pool.wait_idle();
    }

    #[test]
    fn test_tick_retires_idle_worker_and_reaps_it() {
        let pool = pool(3, 1, 4);

        assert_eq!(pool.tick(), ScaleDecision::Shrink);
        assert!(wait_until(Duration::from_secs(2), || pool.current_workers() == 2
            && pool.retiring_workers() == 0));
        assert_eq!(pool.retired_total(), 1);

        // Next tick joins the retiree, then retires another
        assert_eq!(pool.tick(), ScaleDecision::Shrink);
        assert!(wait_until(Duration::from_secs(2), || pool.current_workers() == 1
            && pool.retiring_workers() == 0));

        // At the floor
        assert_eq!(pool.tick(), ScaleDecision::Hold);
        assert_eq!(pool.current_workers(), 1);
        assert_eq!(pool.membership.lock().members.len(), 1);
    }

    #[test]
    fn test_retiring_worker_finishes_its_task() {
        let pool = pool(2, 1, 4);
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let (started_tx, started_rx) = channel::bounded(2);

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let started_tx = started_tx.clone();
                let release_rx = release_rx.clone();
                pool.submit(move || {
                    started_tx.send(()).unwrap();
                    let _ = release_rx.recv();
                    i
                })
            })
            .collect();
        started_rx.recv().unwrap();
        started_rx.recv().unwrap();

        // Both busy: no idle slot, so the first slot is parked while running.
        assert_eq!(pool.retire_worker(&mut pool.membership.lock()), Some(0));
        drop(release_tx);

        let results: Vec<_> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, vec![0, 1]);
        assert!(wait_until(Duration::from_secs(2), || pool.retiring_workers() == 0));
        assert_eq!(pool.current_workers(), 1);
    }

    #[test]
    fn test_shutdown_cancels_queued_tasks() {
        let pool = pool(1, 1, 1);
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let (started_tx, started_rx) = channel::bounded(1);

        let running = pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
            "finished"
        });
        started_rx.recv().unwrap();
        let queued = pool.submit(|| "never");

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(release_tx);
        });
        pool.shutdown();
        releaser.join().unwrap();

        assert_eq!(running.wait(), Ok("finished"));
        assert_eq!(queued.wait(), Err(TaskError::Cancelled));
        assert_eq!(pool.current_workers(), 0);
        assert_eq!(pool.tick(), ScaleDecision::Hold);
    }
}
