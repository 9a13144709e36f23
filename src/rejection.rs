//! Rejection reason taxonomy.
//!
//! Every failure the engine can surface is a `Rejection`: ordinary
//! user-supplied reasons, recovered callback panics, resolution cycles,
//! aggregates from `any`/`some`, and the empty-reduction usage error.
//! Reasons are cheap to clone because a single rejection fans out to every
//! consumer registered on the same handler.

use std::any::Any;

use serde::{Deserialize, Serialize};

/// A rejection reason flowing through promise chains.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Ordinary rejection carrying a user-supplied message.
    #[error("{0}")]
    Message(String),
    /// A user callback panicked; the payload text is recovered when the
    /// panic carried a `&str` or `String`.
    #[error("callback panicked: {0}")]
    Panic(String),
    /// A promise was resolved, directly or transitively, with itself.
    #[error("promise resolution cycle detected")]
    Cycle,
    /// Every contributing input rejected; reasons appear in input order.
    #[error("all inputs rejected ({} reasons)", .0.len())]
    Aggregate(Vec<Rejection>),
    /// `reduce` over an empty input with no initial value.
    #[error("cannot reduce an empty input without an initial value")]
    EmptyReduction,
}

impl Rejection {
    /// Ordinary rejection from any displayable reason.
    pub fn message(reason: impl Into<String>) -> Self {
        Self::Message(reason.into())
    }

    /// Recovers a `Rejection` from a caught panic payload.
    pub fn from_panic_payload(payload: Box<dyn Any + Send>) -> Self {
        if let Some(text) = payload.downcast_ref::<&str>() {
            return Self::Panic((*text).to_string());
        }
        if let Some(text) = payload.downcast_ref::<String>() {
            return Self::Panic(text.clone());
        }
        Self::Panic("non-string panic payload".to_string())
    }

    /// The contributing reasons of an aggregate, or a single-element view
    /// of any other reason.
    pub fn reasons(&self) -> Vec<&Rejection> {
        match self {
            Self::Aggregate(inner) => inner.iter().collect(),
            other => vec![other],
        }
    }
}

impl From<String> for Rejection {
    fn from(reason: String) -> Self {
        Self::Message(reason)
    }
}

impl From<&str> for Rejection {
    fn from(reason: &str) -> Self {
        Self::Message(reason.to_string())
    }
}
