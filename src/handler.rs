//! Handler state machine and resolution protocol.
//!
//! A handler is the node backing a promise's current resolution state:
//! pending (buffering consumers), fulfilled, rejected, or delegating to
//! another handler. The variants are one sum type dispatched through one
//! surface rather than an inheritance tree; `join` is an explicit iterative
//! walk with a visited check so delegate chains are bounded in both time and
//! stack, and a revisit is broken by splicing in a permanently
//! cycle-rejected handler.
//!
//! Correctness properties enforced here:
//! - PENDING moves to a terminal state at most once; later settle attempts
//!   are no-ops (check-and-commit under the per-handler mutex).
//! - A registered continuation runs exactly once, on a scheduler tick, never
//!   in the stack frame that registered it or settled the handler.
//! - Buffered consumers replay in registration order.
//! - Rejected handlers register with the monitor at construction and arm the
//!   after-drain unhandled report.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::EngineShared;
use crate::promise::Snapshot;
use crate::rejection::Rejection;
use crate::resolve::{FulfillSink, RejectSink, Resolution, Thenable};

// ---------------------------------------------------------------------------
// Continuation — one registered consumer
// ---------------------------------------------------------------------------

/// One registered consumer: a one-shot closure fed the settled outcome, plus
/// whether the consumer carries a rejection callback (which drives the
/// monitor's handled/transferred distinction).
pub(crate) struct Continuation<T> {
    pub(crate) handles_rejection: bool,
    pub(crate) run: Box<dyn FnOnce(Result<T, Rejection>) + Send>,
}

impl<T> Continuation<T> {
    pub(crate) fn new(
        handles_rejection: bool,
        run: impl FnOnce(Result<T, Rejection>) + Send + 'static,
    ) -> Self {
        Self {
            handles_rejection,
            run: Box::new(run),
        }
    }
}

// ---------------------------------------------------------------------------
// State — the tagged union
// ---------------------------------------------------------------------------

enum State<T> {
    Pending { consumers: Vec<Continuation<T>> },
    Fulfilled(T),
    Rejected(Rejection),
    Delegated(Handler<T>),
}

struct HandlerCell<T> {
    engine: Arc<EngineShared>,
    context: Option<String>,
    /// Monitor id; nonzero only for rejected handlers under an enabled
    /// monitor.
    status_id: u64,
    state: Mutex<State<T>>,
}

/// Shared reference to one handler cell.
pub(crate) struct Handler<T> {
    cell: Arc<HandlerCell<T>>,
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

enum Disposition<T> {
    Buffered,
    Settled(Result<T, Rejection>),
    Follow(Handler<T>),
}

impl<T: Clone + Send + 'static> Handler<T> {
    fn with_state(engine: &Arc<EngineShared>, status_id: u64, state: State<T>) -> Self {
        Self {
            cell: Arc::new(HandlerCell {
                engine: Arc::clone(engine),
                context: engine.context.create(None),
                status_id,
                state: Mutex::new(state),
            }),
        }
    }

    pub(crate) fn pending(engine: &Arc<EngineShared>) -> Self {
        Self::with_state(engine, 0, State::Pending { consumers: Vec::new() })
    }

    pub(crate) fn fulfilled(engine: &Arc<EngineShared>, value: T) -> Self {
        Self::with_state(engine, 0, State::Fulfilled(value))
    }

    /// Creates a rejected handler, registers its status with the monitor,
    /// and arms the after-drain "potentially unhandled" check: the rejection
    /// gets one full queue drain to acquire a handler before it is reported.
    pub(crate) fn rejected(engine: &Arc<EngineShared>, reason: Rejection) -> Self {
        let context = engine.context.create(None);
        let status_id = engine.monitor.register(context.clone(), &reason);
        let handler = Self {
            cell: Arc::new(HandlerCell {
                engine: Arc::clone(engine),
                context,
                status_id,
                state: Mutex::new(State::Rejected(reason)),
            }),
        };
        if status_id != 0 {
            let monitor = Arc::clone(&engine.monitor);
            engine
                .scheduler
                .after_queue(Box::new(move || monitor.report_unhandled_if_needed(status_id)));
        }
        handler
    }

    /// The trust boundary: decides what kind of handler backs a resolution
    /// input. A trusted promise contributes its own handler with no extra
    /// wrapping.
    pub(crate) fn from_resolution(engine: &Arc<EngineShared>, resolution: Resolution<T>) -> Self {
        match resolution {
            Resolution::Value(value) => Self::fulfilled(engine, value),
            Resolution::Reject(reason) => Self::rejected(engine, reason),
            Resolution::Chain(promise) => promise.into_handler(),
            Resolution::Thenable(thenable) => Self::assimilate(engine, thenable),
        }
    }

    /// Adopts a foreign thenable: its `then` is invoked exactly once, inside
    /// a call-wrapper, on a future scheduler tick. The foreign side may call
    /// back any number of times; a first-invocation latch ignores the rest.
    fn assimilate(engine: &Arc<EngineShared>, thenable: Box<dyn Thenable<T>>) -> Self {
        let adopted = Self::pending(engine);
        let sink = adopted.clone();
        let task_engine = Arc::clone(engine);
        engine.scheduler.enqueue(Box::new(move || {
            let first = Arc::new(AtomicBool::new(false));
            let on_fulfilled: FulfillSink<T> = {
                let first = Arc::clone(&first);
                let sink = sink.clone();
                let engine = Arc::clone(&task_engine);
                Box::new(move |resolution| {
                    if !first.swap(true, Ordering::SeqCst) {
                        sink.settle(Handler::from_resolution(&engine, resolution));
                    }
                })
            };
            let on_rejected: RejectSink = {
                let first = Arc::clone(&first);
                let sink = sink.clone();
                let engine = Arc::clone(&task_engine);
                Box::new(move |reason| {
                    if !first.swap(true, Ordering::SeqCst) {
                        sink.settle(Handler::rejected(&engine, reason));
                    }
                })
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
                thenable.then(on_fulfilled, on_rejected);
            }));
            if let Err(payload) = outcome {
                if !first.swap(true, Ordering::SeqCst) {
                    sink.settle(Handler::rejected(
                        &task_engine,
                        Rejection::from_panic_payload(payload),
                    ));
                }
            }
        }));
        adopted
    }

    /// The become operation: first resolution wins. Buffered consumers are
    /// taken under the lock and replayed against the new handler through the
    /// scheduler, in registration order.
    pub(crate) fn settle(&self, next: Handler<T>) {
        let consumers = {
            let mut state = self.cell.state.lock().expect("handler state lock");
            match &mut *state {
                State::Pending { consumers } => {
                    let taken = std::mem::take(consumers);
                    *state = State::Delegated(next.clone());
                    taken
                }
                _ => return,
            }
        };
        for continuation in consumers {
            let target = next.clone();
            self.cell
                .engine
                .scheduler
                .enqueue(Box::new(move || target.when(continuation)));
        }
    }

    /// Registers a consumer. Buffers on a pending terminal, otherwise
    /// enqueues the continuation against the settled outcome. On a rejected
    /// terminal the monitor learns about the attach: a rejection-handling
    /// consumer marks the status handled and arms the report retraction, a
    /// pass-through consumer transfers responsibility downstream.
    pub(crate) fn when(&self, continuation: Continuation<T>) {
        let mut pending = Some(continuation);
        let mut target = self.join();
        loop {
            let disposition = {
                let mut state = target.cell.state.lock().expect("handler state lock");
                match &mut *state {
                    State::Pending { consumers } => {
                        if let Some(c) = pending.take() {
                            consumers.push(c);
                        }
                        Disposition::Buffered
                    }
                    State::Fulfilled(value) => Disposition::Settled(Ok(value.clone())),
                    State::Rejected(reason) => Disposition::Settled(Err(reason.clone())),
                    // Settled into a delegation between our join and this
                    // lock; follow the new link.
                    State::Delegated(next) => Disposition::Follow(next.clone()),
                }
            };
            match disposition {
                Disposition::Buffered => return,
                Disposition::Follow(next) => target = next.join(),
                Disposition::Settled(outcome) => {
                    let Some(continuation) = pending.take() else {
                        return;
                    };
                    if outcome.is_err() {
                        let status_id = target.cell.status_id;
                        let monitor = Arc::clone(&target.cell.engine.monitor);
                        if continuation.handles_rejection {
                            monitor.mark_handled(status_id);
                            target
                                .cell
                                .engine
                                .scheduler
                                .after_queue(Box::new(move || {
                                    monitor.retract_if_reported(status_id);
                                }));
                        } else {
                            monitor.transfer(status_id);
                        }
                    }
                    let tracker = Arc::clone(&target.cell.engine.context);
                    let context = target.cell.context.clone();
                    let run = continuation.run;
                    target.cell.engine.scheduler.enqueue(Box::new(move || {
                        tracker.enter(context.as_deref());
                        run(outcome);
                        tracker.exit();
                    }));
                    return;
                }
            }
        }
    }

    /// Follows delegate links to the first non-delegating handler. A revisit
    /// means a resolution cycle: the offending link is replaced with a
    /// cycle-rejected handler, which breaks the cycle for all existing and
    /// future consumers. Re-run lazily on every registration — links can
    /// still be extended while a chain is being built, so the result is
    /// never cached.
    pub(crate) fn join(&self) -> Handler<T> {
        let mut visited: Vec<Handler<T>> = vec![self.clone()];
        let mut current = self.clone();
        loop {
            let next = {
                let state = current.cell.state.lock().expect("handler state lock");
                match &*state {
                    State::Delegated(next) => Some(next.clone()),
                    _ => None,
                }
            };
            let Some(next) = next else {
                return current;
            };
            if visited
                .iter()
                .any(|seen| Arc::ptr_eq(&seen.cell, &next.cell))
            {
                let broken = Handler::rejected(&current.cell.engine, Rejection::Cycle);
                let mut state = current.cell.state.lock().expect("handler state lock");
                if let State::Delegated(link) = &mut *state {
                    *link = broken.clone();
                }
                return broken;
            }
            visited.push(next.clone());
            current = next;
        }
    }

    /// Derives an immutable snapshot by walking to the terminal handler.
    pub(crate) fn snapshot(&self) -> Snapshot<T> {
        let mut target = self.join();
        loop {
            let next = {
                let state = target.cell.state.lock().expect("handler state lock");
                match &*state {
                    State::Pending { .. } => return Snapshot::Pending,
                    State::Fulfilled(value) => return Snapshot::Fulfilled(value.clone()),
                    State::Rejected(reason) => return Snapshot::Rejected(reason.clone()),
                    State::Delegated(next) => next.clone(),
                }
            };
            target = next.join();
        }
    }

    pub(crate) fn engine(&self) -> &Arc<EngineShared> {
        &self.cell.engine
    }
}
