//! Engine wiring and the public entry surface.
//!
//! An [`Engine`] owns the three capabilities every promise created through it
//! shares: the trampolining [`Scheduler`], the unhandled-rejection
//! [`RejectionMonitor`], and the diagnostic [`ContextTracker`]. Promises from
//! different engines never mix handlers, but an `Engine` handle itself is
//! cheap to clone and share across threads.

use std::sync::Arc;

use crate::combinators::{self, SequenceTask};
use crate::context::{ContextTracker, NoopContext};
use crate::handler::Handler;
use crate::monitor::{NullReporter, PromiseStatus, RejectionMonitor, Reporter};
use crate::promise::{Deferred, Promise, Snapshot};
use crate::rejection::Rejection;
use crate::resolve::Resolution;
use crate::scheduler::{Executor, Scheduler, SchedulerMetrics};

/// Capabilities shared by every handler created through one engine.
pub(crate) struct EngineShared {
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) monitor: Arc<RejectionMonitor>,
    pub(crate) context: Arc<dyn ContextTracker>,
}

/// Handle to one promise engine.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    /// Full wiring: caller supplies all three capabilities.
    pub fn new(
        executor: Arc<dyn Executor>,
        context: Arc<dyn ContextTracker>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                scheduler: Arc::new(Scheduler::new(executor)),
                monitor: Arc::new(RejectionMonitor::new(reporter)),
                context,
            }),
        }
    }

    /// Default wiring over the given executor: no context tracking, reports
    /// discarded, monitor still live so `unhandled_report` works.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self::new(executor, Arc::new(NoopContext), Arc::new(NullReporter))
    }

    /// Wiring with the monitoring cost removed entirely.
    pub fn unmonitored(executor: Arc<dyn Executor>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                scheduler: Arc::new(Scheduler::new(executor)),
                monitor: Arc::new(RejectionMonitor::disabled()),
                context: Arc::new(NoopContext),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Creation surface
    // -----------------------------------------------------------------------

    /// Producer/consumer pair over a fresh pending handler.
    pub fn defer<T: Clone + Send + 'static>(&self) -> Deferred<T> {
        Deferred::new(&self.shared)
    }

    /// Adopts any resolution input into a trusted promise.
    pub fn resolve<T: Clone + Send + 'static>(&self, resolution: Resolution<T>) -> Promise<T> {
        Promise::from_handler(Handler::from_resolution(&self.shared, resolution))
    }

    /// Promise already fulfilled with the given value.
    pub fn fulfilled<T: Clone + Send + 'static>(&self, value: T) -> Promise<T> {
        Promise::from_handler(Handler::fulfilled(&self.shared, value))
    }

    /// Promise already rejected with the given reason. The rejection gets one
    /// full queue drain to acquire a handler before it is reported.
    pub fn rejected<T: Clone + Send + 'static>(&self, reason: impl Into<Rejection>) -> Promise<T> {
        Promise::from_handler(Handler::rejected(&self.shared, reason.into()))
    }

    /// Promise that never settles.
    pub fn never<T: Clone + Send + 'static>(&self) -> Promise<T> {
        Promise::from_handler(Handler::pending(&self.shared))
    }

    // -----------------------------------------------------------------------
    // Combinators
    // -----------------------------------------------------------------------

    /// Fulfills with every input's value in input order, or rejects with the
    /// first rejection. Empty input fulfills with an empty vector.
    pub fn all<T: Clone + Send + 'static>(&self, inputs: Vec<Resolution<T>>) -> Promise<Vec<T>> {
        combinators::all(&self.shared, inputs)
    }

    /// Fulfills with the first fulfillment value, or rejects with the
    /// aggregate of every reason once all inputs have rejected. Empty input
    /// fulfills with `None`.
    pub fn any<T: Clone + Send + 'static>(&self, inputs: Vec<Resolution<T>>) -> Promise<Option<T>> {
        combinators::any(&self.shared, inputs)
    }

    /// Fulfills with the first `count` fulfillment values in settlement
    /// order, or rejects with an aggregate once too few inputs remain.
    pub fn some<T: Clone + Send + 'static>(
        &self,
        inputs: Vec<Resolution<T>>,
        count: usize,
    ) -> Promise<Vec<T>> {
        combinators::some(&self.shared, inputs, count)
    }

    /// Settles like the first input to settle, fulfillment or rejection.
    /// Empty input never settles.
    pub fn race<T: Clone + Send + 'static>(&self, inputs: Vec<Resolution<T>>) -> Promise<T> {
        combinators::race(&self.shared, inputs)
    }

    /// Applies the mapper to every input's value; fulfills with the mapped
    /// values in input order, or rejects with the first rejection.
    pub fn map<T, U, F>(&self, inputs: Vec<Resolution<T>>, mapper: F) -> Promise<Vec<U>>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + 'static,
        F: Fn(T) -> Resolution<U> + Send + Sync + 'static,
    {
        combinators::map(&self.shared, inputs, mapper)
    }

    /// Waits for every input to settle and fulfills with the per-input
    /// outcomes in input order. Never rejects.
    pub fn settle<T: Clone + Send + 'static>(
        &self,
        inputs: Vec<Resolution<T>>,
    ) -> Promise<Vec<Snapshot<T>>> {
        combinators::settle(&self.shared, inputs)
    }

    /// Left fold over the inputs, applied strictly in input order; each step
    /// waits for the previous accumulator and the current input's value.
    pub fn reduce<T, A, F>(
        &self,
        inputs: Vec<Resolution<T>>,
        combine: F,
        initial: Resolution<A>,
    ) -> Promise<A>
    where
        T: Clone + Send + 'static,
        A: Clone + Send + 'static,
        F: Fn(A, T, usize) -> Resolution<A> + Send + Sync + 'static,
    {
        combinators::reduce(&self.shared, inputs, combine, initial)
    }

    /// Fold seeded from the first input. Empty input rejects with the
    /// empty-reduction reason.
    pub fn reduce1<T, F>(&self, inputs: Vec<Resolution<T>>, combine: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: Fn(T, T, usize) -> Resolution<T> + Send + Sync + 'static,
    {
        combinators::reduce1(&self.shared, inputs, combine)
    }

    /// Runs the tasks strictly one after another, each receiving the shared
    /// argument; fulfills with the produced values in task order.
    pub fn sequence<A, T>(&self, tasks: Vec<SequenceTask<A, T>>, argument: A) -> Promise<Vec<T>>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + 'static,
    {
        combinators::sequence(&self.shared, tasks, argument)
    }

    /// `all` over already-created promises.
    pub fn join<T: Clone + Send + 'static>(&self, promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
        combinators::all(
            &self.shared,
            promises.into_iter().map(Resolution::Chain).collect(),
        )
    }

    // -----------------------------------------------------------------------
    // Observability
    // -----------------------------------------------------------------------

    /// Flushes the monitor: reports every live, not-yet-reported rejection
    /// and returns the live table snapshot.
    pub fn unhandled_report(&self) -> Vec<PromiseStatus> {
        self.shared.monitor.report()
    }

    /// Clears the monitor's live table; ids stay unique across resets.
    pub fn reset_monitor(&self) {
        self.shared.monitor.reset();
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared.scheduler.metrics()
    }
}
