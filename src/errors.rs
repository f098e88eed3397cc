use std::time::Duration;

use crate::context::Context;
use crate::driver::DriverFault;
use crate::locator::Locator;

/// Errors surfaced by the engine.
///
/// Transient driver faults (stale references, one-off modals) are absorbed
/// internally up to the configured budgets and only appear here once those
/// budgets are exhausted. Structural and fatal conditions propagate
/// immediately. Every variant names the locator/context involved so a
/// failing test is diagnosable without re-running it.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Recovery exhausted its attempt budget; the handle is permanently unusable
    #[error("element can no longer be recovered after {attempts} attempts: {locator} in {context}")]
    ElementLost {
        locator: Locator,
        context: Context,
        attempts: u32,
    },

    /// A poll deadline elapsed with zero matches
    #[error("timed out after {elapsed:?} (timeout {timeout:?}) waiting for {locator} in {context}")]
    Timeout {
        locator: Locator,
        context: Context,
        timeout: Duration,
        elapsed: Duration,
    },

    /// More than one element matched where exactly one was required
    #[error(
        "expected exactly one element matching {locator} in {context}, but found {count}: [{joined}]",
        joined = .candidates.join(", ")
    )]
    MultipleMatches {
        locator: Locator,
        context: Context,
        count: usize,
        candidates: Vec<String>,
    },

    /// A modal dialog reappeared after the engine already dismissed one
    #[error("modal dialog persisted during {operation}: {message}")]
    ModalPersisted { operation: String, message: String },

    /// The frame chain of a context could not be selected
    #[error("cannot select context {context}: {fault}")]
    ContextUnavailable { context: Context, fault: DriverFault },

    /// Driver-level fault propagated without retry
    #[error(transparent)]
    Driver(#[from] DriverFault),
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }

    pub fn is_element_lost(&self) -> bool {
        matches!(self, EngineError::ElementLost { .. })
    }
}
