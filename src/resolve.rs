//! Resolution inputs and the call-wrapping trust boundary.
//!
//! [`Resolution`] is the union of everything a promise can be resolved with:
//! a plain value, a rejection, another trusted promise, or a foreign
//! [`Thenable`]. The engine converts each into a handler — plain values and
//! rejections become settled handlers, a trusted promise contributes its own
//! handler with no extra wrapping, and a foreign thenable is assimilated
//! defensively (its `then` runs exactly once, on a later scheduler tick, and
//! only the first callback invocation counts).
//!
//! [`attempt`] and [`attempt_unit`] are the call-wrappers: a panic inside a
//! user callback becomes a [`Rejection::Panic`] for the handler that would
//! have received the callback's return value. This is the single mechanism
//! by which synchronous failure turns into asynchronous rejection.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::promise::Promise;
use crate::rejection::Rejection;

// ---------------------------------------------------------------------------
// Thenable — foreign chaining protocol
// ---------------------------------------------------------------------------

/// Callback handed to a foreign thenable's `then`. The thenable may invoke
/// it any number of times; the engine honors only the first invocation
/// across both callbacks.
pub type FulfillSink<T> = Box<dyn FnMut(Resolution<T>) + Send>;

/// Rejection-side callback handed to a foreign thenable's `then`.
pub type RejectSink = Box<dyn FnMut(Rejection) + Send>;

/// A foreign object exposing a `then`-shaped chaining method, not created by
/// this engine. Assimilation adopts its eventual outcome into a trusted
/// handler.
pub trait Thenable<T>: Send {
    fn then(self: Box<Self>, on_fulfilled: FulfillSink<T>, on_rejected: RejectSink);
}

// ---------------------------------------------------------------------------
// Resolution — what a promise can be resolved with
// ---------------------------------------------------------------------------

/// Input to the resolution protocol: a plain value, a rejection reason,
/// another trusted promise, or a foreign thenable.
pub enum Resolution<T> {
    Value(T),
    Reject(Rejection),
    Chain(Promise<T>),
    Thenable(Box<dyn Thenable<T>>),
}

impl<T> Resolution<T> {
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    pub fn reject(reason: impl Into<Rejection>) -> Self {
        Self::Reject(reason.into())
    }

    pub fn chain(promise: Promise<T>) -> Self {
        Self::Chain(promise)
    }

    pub fn thenable(thenable: impl Thenable<T> + 'static) -> Self {
        Self::Thenable(Box::new(thenable))
    }
}

impl<T> fmt::Debug for Resolution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Resolution::Value"),
            Self::Reject(reason) => write!(f, "Resolution::Reject({reason})"),
            Self::Chain(_) => f.write_str("Resolution::Chain"),
            Self::Thenable(_) => f.write_str("Resolution::Thenable"),
        }
    }
}

impl<T> From<Rejection> for Resolution<T> {
    fn from(reason: Rejection) -> Self {
        Self::Reject(reason)
    }
}

impl<T> From<Promise<T>> for Resolution<T> {
    fn from(promise: Promise<T>) -> Self {
        Self::Chain(promise)
    }
}

// ---------------------------------------------------------------------------
// Call-wrappers
// ---------------------------------------------------------------------------

/// Invokes a user callback, converting a panic into a rejection of whatever
/// would have received the callback's return value.
pub fn attempt<T, U, F>(callback: F, value: T) -> Resolution<U>
where
    F: FnOnce(T) -> Resolution<U>,
{
    match panic::catch_unwind(AssertUnwindSafe(move || callback(value))) {
        Ok(resolution) => resolution,
        Err(payload) => Resolution::Reject(Rejection::from_panic_payload(payload)),
    }
}

/// Invokes a side-effecting user callback, reporting a panic as a rejection.
pub fn attempt_unit<F>(callback: F) -> Result<(), Rejection>
where
    F: FnOnce(),
{
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => Ok(()),
        Err(payload) => Err(Rejection::from_panic_payload(payload)),
    }
}
