#![forbid(unsafe_code)]

//! In-process asynchronous value-resolution engine.
//!
//! The crate is organized around an [`Engine`] whose promises share three
//! capabilities: a trampolining [`Scheduler`](scheduler::Scheduler) (no user
//! callback ever runs in the stack frame that registered it), an
//! unhandled-rejection [`RejectionMonitor`](monitor::RejectionMonitor) that
//! gives each rejection one full queue drain to acquire a handler before
//! reporting it, and a pluggable [`ContextTracker`](context::ContextTracker)
//! for diagnostic correlation.
//!
//! [`Promise`] is the read-only consumer view; [`Deferred`] pairs it with the
//! one-shot producer capability. Resolution inputs are expressed as
//! [`Resolution`] values: plain values, [`Rejection`] reasons, other trusted
//! promises, or foreign [`Thenable`]s assimilated defensively. Aggregation
//! over collections lives on the engine: `all`, `any`, `some`, `race`, `map`,
//! `settle`, `reduce`, and `sequence`.

mod combinators;
pub mod context;
mod engine;
mod handler;
pub mod monitor;
mod promise;
mod rejection;
mod resolve;
pub mod scheduler;

pub use combinators::SequenceTask;
pub use engine::Engine;
pub use promise::{Deferred, Promise, Resolver, Snapshot};
pub use rejection::Rejection;
pub use resolve::{FulfillSink, RejectSink, Resolution, Thenable};
