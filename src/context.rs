//! Diagnostic correlation capability.
//!
//! Continuations created by user code can be correlated back to the promise
//! that produced them: the engine asks the tracker for a context label when a
//! trackable handler is created, and brackets every user-callback invocation
//! with `enter`/`exit`. The engine itself attaches no meaning to the label;
//! a no-op implementation is the default wiring.

use std::sync::Mutex;

/// Context capability consumed by the engine.
pub trait ContextTracker: Send + Sync {
    /// Produces a correlation label for a newly created handler, optionally
    /// derived from the context active at creation time.
    fn create(&self, parent: Option<&str>) -> Option<String>;

    /// Marks the given context as active for the duration of one callback.
    fn enter(&self, context: Option<&str>);

    /// Clears the active context after a callback completes.
    fn exit(&self);
}

/// Default wiring: produces no labels and tracks nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopContext;

impl ContextTracker for NoopContext {
    fn create(&self, _parent: Option<&str>) -> Option<String> {
        None
    }

    fn enter(&self, _context: Option<&str>) {}

    fn exit(&self) {}
}

/// Numbers handlers sequentially and records the enter/exit bracket depth.
/// Useful when a test or a diagnostic build needs observable correlation.
#[derive(Debug, Default)]
pub struct CountingContext {
    state: Mutex<CountingState>,
}

#[derive(Debug, Default)]
struct CountingState {
    created: u64,
    depth: u64,
    entered: u64,
}

impl CountingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of contexts handed out so far.
    pub fn created(&self) -> u64 {
        self.state.lock().expect("context lock").created
    }

    /// Number of enter calls observed so far.
    pub fn entered(&self) -> u64 {
        self.state.lock().expect("context lock").entered
    }

    /// Current enter/exit bracket depth; zero when no callback is running.
    pub fn depth(&self) -> u64 {
        self.state.lock().expect("context lock").depth
    }
}

impl ContextTracker for CountingContext {
    fn create(&self, parent: Option<&str>) -> Option<String> {
        let mut state = self.state.lock().expect("context lock");
        state.created += 1;
        Some(match parent {
            Some(parent) => format!("{parent}/{}", state.created),
            None => format!("promise-{}", state.created),
        })
    }

    fn enter(&self, _context: Option<&str>) {
        let mut state = self.state.lock().expect("context lock");
        state.depth += 1;
        state.entered += 1;
    }

    fn exit(&self) {
        let mut state = self.state.lock().expect("context lock");
        state.depth = state.depth.saturating_sub(1);
    }
}
