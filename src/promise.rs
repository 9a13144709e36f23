//! Trusted promise / deferred pair and the chaining surface.
//!
//! A [`Promise`] is a read-only consumer view over a handler chain; a
//! [`Deferred`] pairs it with the one-shot producer capability. All chaining
//! operations register a continuation and hand back a child promise resolved
//! with whatever the callback returns; callbacks run inside the call-wrapper,
//! so a panic becomes the child's rejection. Nothing here ever runs a user
//! callback inside the caller's stack frame.

use std::sync::Arc;

use crate::engine::EngineShared;
use crate::handler::{Continuation, Handler};
use crate::rejection::Rejection;
use crate::resolve::{self, Resolution};

// ---------------------------------------------------------------------------
// Snapshot — immutable inspection result
// ---------------------------------------------------------------------------

/// Point-in-time view of a promise's state, re-derived on every
/// [`Promise::inspect`] by walking to the terminal handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot<T> {
    Pending,
    Fulfilled(T),
    Rejected(Rejection),
}

impl<T> Snapshot<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// The fulfillment value, when fulfilled.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fulfilled(value) => Some(value),
            _ => None,
        }
    }

    /// The rejection reason, when rejected.
    pub fn reason(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Promise — the consumer view
// ---------------------------------------------------------------------------

/// Read-only view over a handler's eventual outcome.
pub struct Promise<T> {
    handler: Handler<T>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub(crate) fn from_handler(handler: Handler<T>) -> Self {
        Self { handler }
    }

    pub(crate) fn handler(&self) -> &Handler<T> {
        &self.handler
    }

    pub(crate) fn into_handler(self) -> Handler<T> {
        self.handler
    }

    /// Builds the child promise for one chaining operation: registers a
    /// continuation whose result resolves the child.
    fn chain<U, F>(&self, handles_rejection: bool, apply: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T, Rejection>) -> Resolution<U> + Send + 'static,
    {
        let engine = Arc::clone(self.handler.engine());
        let child = Handler::pending(&engine);
        let sink = child.clone();
        self.handler.when(Continuation::new(
            handles_rejection,
            move |outcome: Result<T, Rejection>| {
                let resolution = apply(outcome);
                sink.settle(Handler::from_resolution(&engine, resolution));
            },
        ));
        Promise::from_handler(child)
    }

    /// Chains a fulfillment callback; rejections propagate unchanged.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Resolution<U> + Send + 'static,
    {
        self.chain(false, move |outcome| match outcome {
            Ok(value) => resolve::attempt(on_fulfilled, value),
            Err(reason) => Resolution::Reject(reason),
        })
    }

    /// Chains both callbacks; whichever side settles feeds the child.
    pub fn then_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Resolution<U> + Send + 'static,
        R: FnOnce(Rejection) -> Resolution<U> + Send + 'static,
    {
        self.chain(true, move |outcome| match outcome {
            Ok(value) => resolve::attempt(on_fulfilled, value),
            Err(reason) => resolve::attempt(on_rejected, reason),
        })
    }

    /// Recovers from rejection; fulfillments pass through unchanged.
    pub fn otherwise<R>(&self, on_rejected: R) -> Promise<T>
    where
        R: FnOnce(Rejection) -> Resolution<T> + Send + 'static,
    {
        self.chain(true, move |outcome| match outcome {
            Ok(value) => Resolution::Value(value),
            Err(reason) => resolve::attempt(on_rejected, reason),
        })
    }

    /// Recovers only from rejections matching the predicate; everything else
    /// passes through.
    pub fn otherwise_if<P, R>(&self, predicate: P, on_rejected: R) -> Promise<T>
    where
        P: FnOnce(&Rejection) -> bool + Send + 'static,
        R: FnOnce(Rejection) -> Resolution<T> + Send + 'static,
    {
        self.chain(true, move |outcome| match outcome {
            Ok(value) => Resolution::Value(value),
            Err(reason) => resolve::attempt(
                move |reason: Rejection| {
                    if predicate(&reason) {
                        on_rejected(reason)
                    } else {
                        Resolution::Reject(reason)
                    }
                },
                reason,
            ),
        })
    }

    /// On rejection, settles like the fallback promise instead.
    pub fn or_else(&self, fallback: Promise<T>) -> Promise<T> {
        self.chain(true, move |outcome| match outcome {
            Ok(value) => Resolution::Value(value),
            Err(_) => Resolution::Chain(fallback),
        })
    }

    /// Runs a side effect once settled, then passes the outcome through. A
    /// panicking side effect replaces the outcome with its rejection.
    pub fn ensure<F>(&self, side_effect: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.chain(true, move |outcome| match resolve::attempt_unit(side_effect) {
            Err(panic_reason) => Resolution::Reject(panic_reason),
            Ok(()) => match outcome {
                Ok(value) => Resolution::Value(value),
                Err(reason) => Resolution::Reject(reason),
            },
        })
    }

    /// Once fulfilled, settles like `other`; rejections propagate unchanged.
    pub fn yield_<U>(&self, other: Promise<U>) -> Promise<U>
    where
        U: Clone + Send + 'static,
    {
        self.chain(false, move |outcome| match outcome {
            Ok(_) => Resolution::Chain(other),
            Err(reason) => Resolution::Reject(reason),
        })
    }

    /// Observes the fulfillment value without replacing it. A panicking
    /// observer rejects the child.
    pub fn tap<F>(&self, observer: F) -> Promise<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.chain(false, move |outcome| match outcome {
            Ok(value) => resolve::attempt(
                move |value: T| {
                    observer(&value);
                    Resolution::Value(value)
                },
                value,
            ),
            Err(reason) => Resolution::Reject(reason),
        })
    }

    /// Combines this promise's value with `other`'s once both settle. Either
    /// side's rejection settles the result without invoking `combine`; a
    /// panicking or rejecting `combine` rejects the result.
    pub fn fold<U, V, F>(&self, combine: F, other: Promise<U>) -> Promise<V>
    where
        U: Clone + Send + 'static,
        V: Clone + Send + 'static,
        F: FnOnce(T, U) -> Resolution<V> + Send + 'static,
    {
        let engine = Arc::clone(self.handler.engine());
        let child: Handler<V> = Handler::pending(&engine);

        // A rejection on the other side settles the child as soon as it is
        // seen, without waiting for this side.
        {
            let sink = child.clone();
            let engine = Arc::clone(&engine);
            other.handler().when(Continuation::new(
                true,
                move |outcome: Result<U, Rejection>| {
                    if let Err(reason) = outcome {
                        sink.settle(Handler::rejected(&engine, reason));
                    }
                },
            ));
        }

        let sink = child.clone();
        let other_handler = other.handler().clone();
        let inner_engine = Arc::clone(&engine);
        self.handler.when(Continuation::new(
            true,
            move |outcome: Result<T, Rejection>| match outcome {
                Err(reason) => sink.settle(Handler::rejected(&inner_engine, reason)),
                Ok(first) => {
                    let engine = Arc::clone(&inner_engine);
                    other_handler.when(Continuation::new(
                        true,
                        move |outcome: Result<U, Rejection>| match outcome {
                            Err(reason) => sink.settle(Handler::rejected(&engine, reason)),
                            Ok(second) => {
                                let resolution = resolve::attempt(
                                    move |(a, b)| combine(a, b),
                                    (first, second),
                                );
                                sink.settle(Handler::from_resolution(&engine, resolution));
                            }
                        },
                    ));
                }
            },
        ));
        Promise::from_handler(child)
    }

    /// Terminal consumer: consumes the fulfillment value; a rejection
    /// reaching here is reported fatal, never retracted.
    pub fn done<F>(&self, on_fulfilled: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.terminal(Some(Box::new(on_fulfilled)), None);
    }

    /// Terminal consumer with a last-resort rejection callback. A rejection
    /// is still reported fatal when that callback itself panics.
    pub fn done_or<F, G>(&self, on_fulfilled: F, on_fatal: G)
    where
        F: FnOnce(T) + Send + 'static,
        G: FnOnce(Rejection) + Send + 'static,
    {
        self.terminal(Some(Box::new(on_fulfilled)), Some(Box::new(on_fatal)));
    }

    fn terminal(
        &self,
        on_fulfilled: Option<Box<dyn FnOnce(T) + Send>>,
        on_fatal: Option<Box<dyn FnOnce(Rejection) + Send>>,
    ) {
        let engine = Arc::clone(self.handler.engine());
        self.handler.when(Continuation::new(
            true,
            move |outcome: Result<T, Rejection>| match outcome {
                Ok(value) => {
                    if let Some(consume) = on_fulfilled {
                        if let Err(panic_reason) = resolve::attempt_unit(move || consume(value)) {
                            engine.monitor.fatal(0, None, &panic_reason);
                        }
                    }
                }
                Err(reason) => match on_fatal {
                    Some(handle) => {
                        let handed = reason.clone();
                        if let Err(panic_reason) =
                            resolve::attempt_unit(move || handle(handed))
                        {
                            engine.monitor.fatal(0, None, &panic_reason);
                        }
                    }
                    None => engine.monitor.fatal(0, None, &reason),
                },
            },
        ));
    }

    /// Re-derives the current state by walking to the terminal handler.
    pub fn inspect(&self) -> Snapshot<T> {
        self.handler.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Deferred / Resolver — the producer capability
// ---------------------------------------------------------------------------

/// One-shot producer capability paired with a promise. The first resolution
/// wins; every later call is a no-op.
pub struct Resolver<T> {
    handler: Handler<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Resolves with any resolution input: value, rejection, trusted
    /// promise, or foreign thenable.
    pub fn resolve(&self, resolution: Resolution<T>) {
        let engine = Arc::clone(self.handler.engine());
        self.handler
            .settle(Handler::from_resolution(&engine, resolution));
    }

    pub fn fulfill(&self, value: T) {
        self.resolve(Resolution::Value(value));
    }

    pub fn reject(&self, reason: impl Into<Rejection>) {
        self.resolve(Resolution::Reject(reason.into()));
    }
}

/// Producer/consumer pair sharing one handler.
pub struct Deferred<T> {
    pub resolver: Resolver<T>,
    pub promise: Promise<T>,
}

impl<T: Clone + Send + 'static> Deferred<T> {
    pub(crate) fn new(engine: &Arc<EngineShared>) -> Self {
        let handler = Handler::pending(engine);
        Self {
            resolver: Resolver {
                handler: handler.clone(),
            },
            promise: Promise::from_handler(handler),
        }
    }
}
