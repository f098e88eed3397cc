use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::driver::{Driver, DriverFault};
use crate::errors::EngineError;
use crate::locator::Locator;

/// A document context: the root document, or a frame addressed by the chain
/// of locators that reaches it from the top.
///
/// Identity is structural. Two contexts are equal iff their full frame chains
/// are equal; no live handle takes part in the comparison, so a context stays
/// meaningful across page re-renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    frames: Vec<Locator>,
}

impl Context {
    /// The top-level document
    pub fn root() -> Self {
        Context { frames: Vec::new() }
    }

    /// The frame located by `frame` inside this context
    pub fn child(&self, frame: Locator) -> Self {
        let mut frames = self.frames.clone();
        frames.push(frame);
        Context { frames }
    }

    /// The enclosing context, or `None` for the root document
    pub fn parent(&self) -> Option<Context> {
        if self.frames.is_empty() {
            return None;
        }
        Some(Context {
            frames: self.frames[..self.frames.len() - 1].to_vec(),
        })
    }

    pub fn is_root(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Locator] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return write!(f, "document");
        }
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                write!(f, " > ")?;
            }
            write!(f, "frame({frame})")?;
        }
        Ok(())
    }
}

/// Tracks the context currently selected on the driver and scopes driver
/// calls to a declared context.
///
/// The tracker caches the active context so repeated operations in the same
/// frame cost no extra driver round-trips, and it remembers every context it
/// has ever selected; handle recovery sweeps that list when an element
/// vanished from its own context.
pub struct ContextTracker {
    driver: Arc<dyn Driver>,
    current: Mutex<Context>,
    known: Mutex<Vec<Context>>,
}

impl ContextTracker {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        ContextTracker {
            driver,
            current: Mutex::new(Context::root()),
            known: Mutex::new(vec![Context::root()]),
        }
    }

    /// The context the driver currently has selected, as last observed
    pub async fn current(&self) -> Context {
        self.current.lock().await.clone()
    }

    /// Every context this session has selected so far
    pub async fn known_contexts(&self) -> Vec<Context> {
        self.known.lock().await.clone()
    }

    /// Select `target` on the driver. No-op when it is already active.
    pub async fn select(&self, target: &Context) -> Result<(), EngineError> {
        let mut current = self.current.lock().await;
        if *current == *target {
            return Ok(());
        }
        debug!(from = %current, to = %target, "switching context");
        match self.driver.select_context(target.frames()).await {
            Ok(()) => {
                *current = target.clone();
                drop(current);
                self.record(target).await;
                Ok(())
            }
            Err(fault @ DriverFault::Fatal(_)) => Err(EngineError::Driver(fault)),
            Err(fault) => Err(EngineError::ContextUnavailable {
                context: target.clone(),
                fault,
            }),
        }
    }

    /// Run `op` with `target` selected, then restore whatever context was
    /// active before the call.
    ///
    /// Restoration happens on every exit path, including when `op` returns an
    /// error and when `op` itself moved the driver to yet another context. A
    /// failed restore after a successful `op` is surfaced; after a failed
    /// `op` it is only logged so the original error stays visible.
    pub async fn with_context<F, Fut, R>(&self, target: &Context, op: F) -> Result<R, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, EngineError>>,
    {
        let prior = self.current().await;
        self.select(target).await?;
        let result = op().await;
        let after = self.current().await;
        if after != prior {
            if let Err(restore_err) = self.select(&prior).await {
                if result.is_ok() {
                    return Err(restore_err);
                }
                warn!(context = %prior, error = %restore_err, "failed to restore context after error");
            }
        }
        result
    }

    async fn record(&self, context: &Context) {
        let mut known = self.known.lock().await;
        if !known.contains(context) {
            known.push(context.clone());
        }
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod context_test;
