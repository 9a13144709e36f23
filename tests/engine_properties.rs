//! End-to-end behavioral properties exercised through the public API only.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use vow_engine::context::NoopContext;
use vow_engine::monitor::{CollectingReporter, ReportEvent};
use vow_engine::scheduler::{ManualExecutor, ThreadExecutor};
use vow_engine::{
    Engine, FulfillSink, Promise, RejectSink, Rejection, Resolution, Snapshot, Thenable,
};

fn rig() -> (Engine, Arc<ManualExecutor>, Arc<CollectingReporter>) {
    let executor = Arc::new(ManualExecutor::new());
    let reporter = Arc::new(CollectingReporter::new());
    let engine = Engine::new(executor.clone(), Arc::new(NoopContext), reporter.clone());
    (engine, executor, reporter)
}

#[test]
fn continuations_on_a_settled_promise_run_asynchronously_in_order() {
    let (engine, executor, _) = rig();
    let log = Arc::new(Mutex::new(Vec::new()));
    let promise = engine.fulfilled("ready");
    for tag in [1, 2, 3] {
        let log = log.clone();
        promise.done(move |_| log.lock().expect("log lock").push(tag));
    }
    log.lock().expect("log lock").push(0);
    executor.run_all();
    assert_eq!(*log.lock().expect("log lock"), vec![0, 1, 2, 3]);
}

#[test]
fn a_long_then_chain_completes_without_deep_stacks() {
    let (engine, executor, _) = rig();
    let mut promise = engine.fulfilled(0u64);
    for _ in 0..5_000 {
        promise = promise.then(|v| Resolution::value(v + 1));
    }
    executor.run_all();
    assert_eq!(promise.inspect(), Snapshot::Fulfilled(5_000));
}

#[test]
fn resolving_a_promise_with_itself_rejects_with_a_cycle() {
    let (engine, executor, _) = rig();
    let deferred = engine.defer::<i32>();
    deferred
        .resolver
        .resolve(Resolution::Chain(deferred.promise.clone()));
    executor.run_all();
    assert_eq!(
        deferred.promise.inspect(),
        Snapshot::Rejected(Rejection::Cycle)
    );
}

#[test]
fn a_three_promise_cycle_rejects_everywhere() {
    let (engine, executor, _) = rig();
    let a = engine.defer::<i32>();
    let b = engine.defer::<i32>();
    let c = engine.defer::<i32>();
    a.resolver.resolve(Resolution::Chain(b.promise.clone()));
    b.resolver.resolve(Resolution::Chain(c.promise.clone()));
    c.resolver.resolve(Resolution::Chain(a.promise.clone()));
    executor.run_all();
    for promise in [&a.promise, &b.promise, &c.promise] {
        assert_eq!(promise.inspect(), Snapshot::Rejected(Rejection::Cycle));
    }
}

#[test]
fn a_then_callback_returning_its_own_promise_rejects_with_a_cycle() {
    let (engine, executor, _) = rig();
    let deferred = engine.defer::<i32>();
    let slot: Arc<Mutex<Option<Promise<i32>>>> = Arc::new(Mutex::new(None));
    let child = {
        let slot = slot.clone();
        deferred.promise.then(move |_| {
            Resolution::Chain(slot.lock().expect("slot lock").take().expect("child set"))
        })
    };
    *slot.lock().expect("slot lock") = Some(child.clone());
    deferred.resolver.fulfill(1);
    executor.run_all();
    assert_eq!(child.inspect(), Snapshot::Rejected(Rejection::Cycle));
}

#[test]
fn an_unobserved_rejection_is_reported_after_one_drain() {
    let (engine, executor, reporter) = rig();
    let _orphan = engine.rejected::<i32>(Rejection::message("nobody looked"));
    assert!(reporter.events().is_empty());
    executor.run_all();
    let events = reporter.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ReportEvent::PotentiallyUnhandled(_)));
    assert_eq!(events[0].info().reason, "nobody looked");
}

#[test]
fn a_rejection_observed_within_its_tick_is_never_reported() {
    let (engine, executor, reporter) = rig();
    let recovered = engine
        .rejected::<i32>(Rejection::message("caught in time"))
        .otherwise(|_| Resolution::value(0));
    executor.run_all();
    assert_eq!(recovered.inspect(), Snapshot::Fulfilled(0));
    assert!(reporter.events().is_empty());
}

#[test]
fn a_late_handler_retracts_the_earlier_report() {
    let (engine, executor, reporter) = rig();
    let orphan = engine.rejected::<i32>(Rejection::message("slow observer"));
    executor.run_all();
    assert_eq!(reporter.events().len(), 1);
    let recovered = orphan.otherwise(|_| Resolution::value(0));
    executor.run_all();
    assert_eq!(recovered.inspect(), Snapshot::Fulfilled(0));
    let events = reporter.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], ReportEvent::Handled(_)));
}

#[test]
fn a_pass_through_chain_reports_only_the_tail() {
    let (engine, executor, reporter) = rig();
    // then() carries no rejection callback, so responsibility moves down the
    // chain; only the unobserved tail reports.
    let _tail = engine
        .rejected::<i32>(Rejection::message("travels"))
        .then(|v| Resolution::value(v + 1))
        .then(|v| Resolution::value(v + 1));
    executor.run_all();
    let unhandled: Vec<_> = reporter
        .events()
        .into_iter()
        .filter(|e| matches!(e, ReportEvent::PotentiallyUnhandled(_)))
        .collect();
    assert_eq!(unhandled.len(), 1);
    assert_eq!(unhandled[0].info().reason, "travels");
}

struct EventualValue {
    value: i32,
}

impl Thenable<i32> for EventualValue {
    fn then(self: Box<Self>, mut on_fulfilled: FulfillSink<i32>, _on_rejected: RejectSink) {
        on_fulfilled(Resolution::value(self.value));
        // A misbehaving foreign object keeps calling back; only the first
        // invocation counts.
        on_fulfilled(Resolution::value(self.value + 1));
    }
}

#[test]
fn foreign_thenables_are_assimilated_once() {
    let (engine, executor, _) = rig();
    let adopted = engine.resolve(Resolution::thenable(EventualValue { value: 11 }));
    executor.run_all();
    assert_eq!(adopted.inspect(), Snapshot::Fulfilled(11));
}

#[test]
fn combinators_compose_over_mixed_inputs() {
    let (engine, executor, _) = rig();
    let pending = engine.defer::<i32>();
    let all = engine.all(vec![
        Resolution::value(1),
        Resolution::Chain(pending.promise.clone()),
        Resolution::Chain(engine.fulfilled(3)),
    ]);
    let summed = all.then(|values| Resolution::value(values.iter().sum::<i32>()));
    executor.run_all();
    assert!(summed.inspect().is_pending());
    pending.resolver.fulfill(2);
    executor.run_all();
    assert_eq!(summed.inspect(), Snapshot::Fulfilled(6));
}

#[test]
fn settle_never_rejects_and_keeps_positions() {
    let (engine, executor, reporter) = rig();
    let outcomes = engine.settle(vec![
        Resolution::<i32>::reject("first broke"),
        Resolution::value(2),
    ]);
    executor.run_all();
    assert_eq!(
        outcomes.inspect(),
        Snapshot::Fulfilled(vec![
            Snapshot::Rejected(Rejection::message("first broke")),
            Snapshot::Fulfilled(2),
        ])
    );
    // Observed through settle, the rejection is handled.
    assert!(reporter
        .events()
        .iter()
        .all(|e| !matches!(e, ReportEvent::PotentiallyUnhandled(_))));
}

#[test]
fn reduce_chains_asynchronous_accumulators() {
    let (engine, executor, _) = rig();
    let inner_engine = engine.clone();
    let result = engine.reduce(
        vec![
            Resolution::value(1),
            Resolution::value(2),
            Resolution::value(3),
        ],
        move |acc, item, _| Resolution::Chain(inner_engine.fulfilled(acc + item)),
        Resolution::value(0),
    );
    executor.run_all();
    assert_eq!(result.inspect(), Snapshot::Fulfilled(6));
}

#[test]
fn reduce1_of_nothing_is_a_usage_error() {
    let (engine, executor, _) = rig();
    let result = engine.reduce1(Vec::<Resolution<i32>>::new(), |a, b, _| {
        Resolution::value(a + b)
    });
    executor.run_all();
    assert_eq!(
        result.inspect(),
        Snapshot::Rejected(Rejection::EmptyReduction)
    );
}

#[test]
fn the_thread_executor_drives_promises_to_completion() {
    let executor = Arc::new(ThreadExecutor::new());
    let engine = Engine::with_executor(executor);
    let (tx, rx) = mpsc::channel();
    engine
        .fulfilled(20)
        .then(|v| Resolution::value(v * 2))
        .then(|v| Resolution::value(v + 2))
        .done(move |v| tx.send(v).expect("send result"));
    let value = rx.recv_timeout(Duration::from_secs(5)).expect("settled");
    assert_eq!(value, 42);
}
