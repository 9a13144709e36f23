//! Task queue and trampolined continuation execution.
//!
//! Every continuation invocation in the engine goes through this queue, so
//! no user callback ever runs inside the stack frame that registered it or
//! the frame that settled its handler, and arbitrarily long promise chains
//! run in bounded stack depth.
//!
//! Two kinds of deferred work exist:
//! - queued tasks (`enqueue`), drained in FIFO order;
//! - after-queue callbacks (`after_queue`), fired once the queue that existed
//!   at arming time has fully drained. The unhandled-rejection monitor uses
//!   this window to give a fresh rejection one full tick to acquire a handler.
//!
//! Draining is delegated to a pluggable [`Executor`]: [`ManualExecutor`] is
//! pumped explicitly and is fully deterministic, [`ThreadExecutor`] drains on
//! a dedicated worker thread.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use serde::{Deserialize, Serialize};

/// One unit of deferred work.
pub type Work = Box<dyn FnOnce() + Send>;

// ---------------------------------------------------------------------------
// Executor — pluggable execution capability
// ---------------------------------------------------------------------------

/// Execution capability consumed by the scheduler. `execute` receives at most
/// one outstanding drain job at a time.
pub trait Executor: Send + Sync {
    fn execute(&self, work: Work);
}

/// Deterministic executor for tests: collects drain jobs and runs them only
/// when explicitly pumped.
#[derive(Default)]
pub struct ManualExecutor {
    pending: Mutex<VecDeque<Work>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every pending drain job, including jobs submitted while pumping.
    /// Returns the number of jobs run.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = {
                let mut pending = self.pending.lock().expect("executor lock");
                pending.pop_front()
            };
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// True when no drain job is waiting.
    pub fn is_idle(&self) -> bool {
        self.pending.lock().expect("executor lock").is_empty()
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, work: Work) {
        self.pending.lock().expect("executor lock").push_back(work);
    }
}

/// Production executor: a dedicated worker thread drains submitted jobs in
/// submission order. The worker exits when the executor is dropped.
pub struct ThreadExecutor {
    sender: Mutex<Option<mpsc::Sender<Work>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Work>();
        let worker = thread::Builder::new()
            .name("vow-engine-drain".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("spawn drain thread");
        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, work: Work) {
        let sender = self.sender.lock().expect("executor lock");
        if let Some(sender) = sender.as_ref() {
            // A send failure means the worker is gone; work submitted during
            // teardown is dropped.
            let _ = sender.send(work);
        }
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SchedulerMetrics — drain observability
// ---------------------------------------------------------------------------

/// Counters describing scheduler activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub tasks_enqueued: u64,
    pub tasks_drained: u64,
    pub after_callbacks_armed: u64,
    pub after_callbacks_run: u64,
}

// ---------------------------------------------------------------------------
// Scheduler — the shared task queue
// ---------------------------------------------------------------------------

struct QueueInner {
    tasks: VecDeque<Work>,
    after: VecDeque<Work>,
    draining: bool,
    metrics: SchedulerMetrics,
}

/// Shared FIFO task queue with after-drain callbacks.
pub struct Scheduler {
    executor: Arc<dyn Executor>,
    inner: Mutex<QueueInner>,
}

enum Next {
    Task(Work),
    After(Work),
    Idle,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            inner: Mutex::new(QueueInner {
                tasks: VecDeque::new(),
                after: VecDeque::new(),
                draining: false,
                metrics: SchedulerMetrics::default(),
            }),
        }
    }

    /// Appends one unit of work; it runs on a later drain, never inline.
    pub fn enqueue(self: &Arc<Self>, work: Work) {
        let start_drain = {
            let mut inner = self.inner.lock().expect("scheduler lock");
            inner.tasks.push_back(work);
            inner.metrics.tasks_enqueued += 1;
            Self::claim_drain(&mut inner)
        };
        if start_drain {
            self.submit_drain();
        }
    }

    /// Arms a callback that fires once the queue present at arming time has
    /// fully drained. After-callbacks may enqueue further work, which extends
    /// the same drain.
    pub fn after_queue(self: &Arc<Self>, callback: Work) {
        let start_drain = {
            let mut inner = self.inner.lock().expect("scheduler lock");
            inner.after.push_back(callback);
            inner.metrics.after_callbacks_armed += 1;
            Self::claim_drain(&mut inner)
        };
        if start_drain {
            self.submit_drain();
        }
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner.lock().expect("scheduler lock").metrics
    }

    fn claim_drain(inner: &mut QueueInner) -> bool {
        if inner.draining {
            false
        } else {
            inner.draining = true;
            true
        }
    }

    fn submit_drain(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        self.executor.execute(Box::new(move || scheduler.drain()));
    }

    /// Runs queued tasks to exhaustion, then after-callbacks, looping until
    /// both queues are empty. The drain claim is released under the lock so
    /// a concurrent enqueue is never stranded.
    fn drain(self: &Arc<Self>) {
        loop {
            let next = {
                let mut inner = self.inner.lock().expect("scheduler lock");
                if let Some(work) = inner.tasks.pop_front() {
                    inner.metrics.tasks_drained += 1;
                    Next::Task(work)
                } else if let Some(callback) = inner.after.pop_front() {
                    inner.metrics.after_callbacks_run += 1;
                    Next::After(callback)
                } else {
                    inner.draining = false;
                    Next::Idle
                }
            };
            match next {
                Next::Task(work) => work(),
                Next::After(callback) => callback(),
                Next::Idle => return,
            }
        }
    }
}
