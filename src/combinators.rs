//! Aggregation combinators over collections of resolution inputs.
//!
//! Every combinator adopts its inputs through the resolution protocol first,
//! so any mix of plain values, rejections, promises, and foreign thenables is
//! accepted. Output ordering is part of each contract: `all`, `any`, `map`,
//! and `settle` preserve input order, `some` reports values in settlement
//! order, `reduce` and `sequence` are strictly sequential.

use std::sync::{Arc, Mutex};

use crate::engine::EngineShared;
use crate::handler::{Continuation, Handler};
use crate::promise::{Promise, Snapshot};
use crate::rejection::Rejection;
use crate::resolve::Resolution;

/// One step of a [`sequence`] run: invoked with the shared argument once the
/// previous step's value has been collected.
pub type SequenceTask<A, T> = Box<dyn FnOnce(&A) -> Resolution<T> + Send>;

// ---------------------------------------------------------------------------
// all
// ---------------------------------------------------------------------------

struct AllGather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

pub(crate) fn all<T: Clone + Send + 'static>(
    engine: &Arc<EngineShared>,
    inputs: Vec<Resolution<T>>,
) -> Promise<Vec<T>> {
    let child: Handler<Vec<T>> = Handler::pending(engine);
    let total = inputs.len();
    if total == 0 {
        child.settle(Handler::fulfilled(engine, Vec::new()));
        return Promise::from_handler(child);
    }
    let gather = Arc::new(Mutex::new(AllGather {
        slots: vec![None; total],
        remaining: total,
    }));
    for (index, input) in inputs.into_iter().enumerate() {
        let handler = Handler::from_resolution(engine, input);
        let sink = child.clone();
        let gather = Arc::clone(&gather);
        let engine = Arc::clone(engine);
        handler.when(Continuation::new(
            true,
            move |outcome: Result<T, Rejection>| match outcome {
                Err(reason) => sink.settle(Handler::rejected(&engine, reason)),
                Ok(value) => {
                    let finished = {
                        let mut gather = gather.lock().expect("gather lock");
                        gather.slots[index] = Some(value);
                        gather.remaining -= 1;
                        gather.remaining == 0
                    };
                    if finished {
                        let values = gather
                            .lock()
                            .expect("gather lock")
                            .slots
                            .drain(..)
                            .flatten()
                            .collect();
                        sink.settle(Handler::fulfilled(&engine, values));
                    }
                }
            },
        ));
    }
    Promise::from_handler(child)
}

// ---------------------------------------------------------------------------
// any / some
// ---------------------------------------------------------------------------

struct AnyGather {
    reasons: Vec<Option<Rejection>>,
    remaining: usize,
}

pub(crate) fn any<T: Clone + Send + 'static>(
    engine: &Arc<EngineShared>,
    inputs: Vec<Resolution<T>>,
) -> Promise<Option<T>> {
    let child: Handler<Option<T>> = Handler::pending(engine);
    let total = inputs.len();
    if total == 0 {
        child.settle(Handler::fulfilled(engine, None));
        return Promise::from_handler(child);
    }
    let gather = Arc::new(Mutex::new(AnyGather {
        reasons: vec![None; total],
        remaining: total,
    }));
    for (index, input) in inputs.into_iter().enumerate() {
        let handler = Handler::from_resolution(engine, input);
        let sink = child.clone();
        let gather = Arc::clone(&gather);
        let engine = Arc::clone(engine);
        handler.when(Continuation::new(
            true,
            move |outcome: Result<T, Rejection>| match outcome {
                Ok(value) => sink.settle(Handler::fulfilled(&engine, Some(value))),
                Err(reason) => {
                    let finished = {
                        let mut gather = gather.lock().expect("gather lock");
                        gather.reasons[index] = Some(reason);
                        gather.remaining -= 1;
                        gather.remaining == 0
                    };
                    if finished {
                        // Reasons aggregate in input order, not settlement
                        // order.
                        let reasons = gather
                            .lock()
                            .expect("gather lock")
                            .reasons
                            .drain(..)
                            .flatten()
                            .collect();
                        sink.settle(Handler::rejected(&engine, Rejection::Aggregate(reasons)));
                    }
                }
            },
        ));
    }
    Promise::from_handler(child)
}

struct SomeGather<T> {
    values: Vec<T>,
    reasons: Vec<Option<Rejection>>,
    needed: usize,
    rejections_left: usize,
}

pub(crate) fn some<T: Clone + Send + 'static>(
    engine: &Arc<EngineShared>,
    inputs: Vec<Resolution<T>>,
    count: usize,
) -> Promise<Vec<T>> {
    let child: Handler<Vec<T>> = Handler::pending(engine);
    let total = inputs.len();
    if count == 0 {
        child.settle(Handler::fulfilled(engine, Vec::new()));
        return Promise::from_handler(child);
    }
    if count > total {
        child.settle(Handler::rejected(engine, Rejection::Aggregate(Vec::new())));
        return Promise::from_handler(child);
    }
    let gather = Arc::new(Mutex::new(SomeGather {
        values: Vec::with_capacity(count),
        reasons: vec![None; total],
        needed: count,
        rejections_left: total - count,
    }));
    for (index, input) in inputs.into_iter().enumerate() {
        let handler = Handler::from_resolution(engine, input);
        let sink = child.clone();
        let gather = Arc::clone(&gather);
        let engine = Arc::clone(engine);
        handler.when(Continuation::new(
            true,
            move |outcome: Result<T, Rejection>| match outcome {
                Ok(value) => {
                    let done = {
                        let mut gather = gather.lock().expect("gather lock");
                        // Values accumulate in settlement order.
                        gather.values.push(value);
                        (gather.values.len() == gather.needed).then(|| gather.values.clone())
                    };
                    if let Some(values) = done {
                        sink.settle(Handler::fulfilled(&engine, values));
                    }
                }
                Err(reason) => {
                    let failed = {
                        let mut gather = gather.lock().expect("gather lock");
                        gather.reasons[index] = Some(reason);
                        if gather.rejections_left == 0 {
                            Some(gather.reasons.drain(..).flatten().collect())
                        } else {
                            gather.rejections_left -= 1;
                            None
                        }
                    };
                    if let Some(reasons) = failed {
                        sink.settle(Handler::rejected(&engine, Rejection::Aggregate(reasons)));
                    }
                }
            },
        ));
    }
    Promise::from_handler(child)
}

// ---------------------------------------------------------------------------
// race
// ---------------------------------------------------------------------------

pub(crate) fn race<T: Clone + Send + 'static>(
    engine: &Arc<EngineShared>,
    inputs: Vec<Resolution<T>>,
) -> Promise<T> {
    // Empty input stays pending forever; there is nothing to settle like.
    let child: Handler<T> = Handler::pending(engine);
    for input in inputs {
        let handler = Handler::from_resolution(engine, input);
        let sink = child.clone();
        let engine = Arc::clone(engine);
        handler.when(Continuation::new(
            true,
            move |outcome: Result<T, Rejection>| match outcome {
                Ok(value) => sink.settle(Handler::fulfilled(&engine, value)),
                Err(reason) => sink.settle(Handler::rejected(&engine, reason)),
            },
        ));
    }
    Promise::from_handler(child)
}

// ---------------------------------------------------------------------------
// map / settle
// ---------------------------------------------------------------------------

pub(crate) fn map<T, U, F>(
    engine: &Arc<EngineShared>,
    inputs: Vec<Resolution<T>>,
    mapper: F,
) -> Promise<Vec<U>>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: Fn(T) -> Resolution<U> + Send + Sync + 'static,
{
    let mapper = Arc::new(mapper);
    let mapped = inputs
        .into_iter()
        .map(|input| {
            let source = Promise::from_handler(Handler::from_resolution(engine, input));
            let mapper = Arc::clone(&mapper);
            Resolution::Chain(source.then(move |value| mapper(value)))
        })
        .collect();
    all(engine, mapped)
}

pub(crate) fn settle<T: Clone + Send + 'static>(
    engine: &Arc<EngineShared>,
    inputs: Vec<Resolution<T>>,
) -> Promise<Vec<Snapshot<T>>> {
    let outcomes = inputs
        .into_iter()
        .map(|input| {
            let source = Promise::from_handler(Handler::from_resolution(engine, input));
            Resolution::Chain(source.then_else(
                |value| Resolution::Value(Snapshot::Fulfilled(value)),
                |reason| Resolution::Value(Snapshot::Rejected(reason)),
            ))
        })
        .collect();
    all(engine, outcomes)
}

// ---------------------------------------------------------------------------
// reduce / reduce1 / sequence
// ---------------------------------------------------------------------------

pub(crate) fn reduce<T, A, F>(
    engine: &Arc<EngineShared>,
    inputs: Vec<Resolution<T>>,
    combine: F,
    initial: Resolution<A>,
) -> Promise<A>
where
    T: Clone + Send + 'static,
    A: Clone + Send + 'static,
    F: Fn(A, T, usize) -> Resolution<A> + Send + Sync + 'static,
{
    let combine = Arc::new(combine);
    let accumulator = Promise::from_handler(Handler::from_resolution(engine, initial));
    fold_inputs(engine, accumulator, inputs, combine, 0)
}

pub(crate) fn reduce1<T, F>(
    engine: &Arc<EngineShared>,
    inputs: Vec<Resolution<T>>,
    combine: F,
) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: Fn(T, T, usize) -> Resolution<T> + Send + Sync + 'static,
{
    let mut inputs = inputs.into_iter();
    let Some(seed) = inputs.next() else {
        return Promise::from_handler(Handler::rejected(engine, Rejection::EmptyReduction));
    };
    let combine = Arc::new(combine);
    let accumulator = Promise::from_handler(Handler::from_resolution(engine, seed));
    fold_inputs(engine, accumulator, inputs.collect(), combine, 1)
}

/// Shared fold body: each step waits for the previous accumulator, then for
/// the step's input value, then applies the combiner inside a call-wrapper.
fn fold_inputs<T, A, F>(
    engine: &Arc<EngineShared>,
    accumulator: Promise<A>,
    inputs: Vec<Resolution<T>>,
    combine: Arc<F>,
    first_index: usize,
) -> Promise<A>
where
    T: Clone + Send + 'static,
    A: Clone + Send + 'static,
    F: Fn(A, T, usize) -> Resolution<A> + Send + Sync + 'static,
{
    let mut accumulator = accumulator;
    for (offset, input) in inputs.into_iter().enumerate() {
        let index = first_index + offset;
        // Inputs are adopted eagerly; the combiner alone runs sequentially.
        let item = Promise::from_handler(Handler::from_resolution(engine, input));
        let combine = Arc::clone(&combine);
        accumulator = accumulator.then(move |acc| {
            Resolution::Chain(item.then(move |value| combine(acc, value, index)))
        });
    }
    accumulator
}

pub(crate) fn sequence<A, T>(
    engine: &Arc<EngineShared>,
    tasks: Vec<SequenceTask<A, T>>,
    argument: A,
) -> Promise<Vec<T>>
where
    A: Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    let argument = Arc::new(argument);
    let mut accumulator =
        Promise::from_handler(Handler::fulfilled(engine, Vec::with_capacity(tasks.len())));
    for task in tasks {
        let argument = Arc::clone(&argument);
        let engine = Arc::clone(engine);
        accumulator = accumulator.then(move |results: Vec<T>| {
            // The task itself runs inside the caller's call-wrapper; a panic
            // here rejects the whole sequence.
            let produced = Promise::from_handler(Handler::from_resolution(&engine, task(&argument)));
            Resolution::Chain(produced.then(move |value| {
                let mut results = results;
                results.push(value);
                Resolution::Value(results)
            }))
        });
    }
    accumulator
}
