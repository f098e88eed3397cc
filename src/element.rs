use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::driver::{Driver, DriverFault, ElementRect, RemoteRef};
use crate::errors::EngineError;
use crate::locator::Locator;
use crate::session::SessionCore;

/// Where a handle sat inside a multi-element search result at discovery time.
///
/// Only present when the handle was one of several matches from the same
/// locate-all call; a handle from a single-match search carries `None` and is
/// recovered by re-running the locator directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiblingPosition {
    /// Index of this element within the result list
    pub index: usize,
    /// Total number of matches the list held
    pub count: usize,
}

struct Binding {
    remote: RemoteRef,
    context: Context,
}

/// A durable reference to one located element.
///
/// A handle keeps enough provenance — context, locator, optional parent
/// handle, sibling position — to re-locate the element after the driver
/// reports the underlying reference stale. The remote reference is replaced
/// in place on recovery, so collaborators holding the handle keep working
/// across benign re-renders. When recovery exhausts its attempt budget the
/// handle is permanently unusable and every further operation raises
/// [`EngineError::ElementLost`].
///
/// A handle created under a parent handle shares that parent's context;
/// elements cannot span a context boundary.
pub struct ElementHandle {
    core: Arc<SessionCore>,
    locator: Locator,
    search_root: Option<Arc<ElementHandle>>,
    position: Option<SiblingPosition>,
    binding: Mutex<Binding>,
    lost: AtomicBool,
}

impl fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementHandle")
            .field("locator", &self.locator)
            .field("position", &self.position)
            .field("has_root", &self.search_root.is_some())
            .field("lost", &self.lost.load(Ordering::SeqCst))
            .finish()
    }
}

impl ElementHandle {
    pub(crate) fn bind(
        core: Arc<SessionCore>,
        remote: RemoteRef,
        context: Context,
        locator: Locator,
        search_root: Option<Arc<ElementHandle>>,
        position: Option<SiblingPosition>,
    ) -> Self {
        ElementHandle {
            core,
            locator,
            search_root,
            position,
            binding: Mutex::new(Binding { remote, context }),
            lost: AtomicBool::new(false),
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// The context this handle currently belongs to
    pub async fn context(&self) -> Context {
        self.binding.lock().await.context.clone()
    }

    pub fn position(&self) -> Option<SiblingPosition> {
        self.position
    }

    pub(crate) async fn remote(&self) -> RemoteRef {
        self.binding.lock().await.remote.clone()
    }

    /// Whether recovery has given up on this handle for good
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    // --- element operations -------------------------------------------------

    pub async fn click(&self) -> Result<(), EngineError> {
        self.run("click", |driver, remote| async move {
            driver.click(&remote).await
        })
        .await
    }

    /// Click, then pause for the configured settle delay. For actions that
    /// open dialogs or panels which need a moment to render.
    pub async fn click_and_settle(&self) -> Result<(), EngineError> {
        self.click().await?;
        tokio::time::sleep(self.core.config.settle_delay).await;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), EngineError> {
        self.run("clear", |driver, remote| async move {
            driver.clear(&remote).await
        })
        .await
    }

    pub async fn type_text(&self, text: &str) -> Result<(), EngineError> {
        self.run("type", move |driver, remote| {
            let text = text.to_owned();
            async move { driver.send_keys(&remote, &text).await }
        })
        .await
    }

    pub async fn submit(&self) -> Result<(), EngineError> {
        self.run("submit", |driver, remote| async move {
            driver.submit(&remote).await
        })
        .await
    }

    pub async fn text(&self) -> Result<String, EngineError> {
        self.run("text", |driver, remote| async move {
            driver.text(&remote).await
        })
        .await
    }

    pub async fn attribute(&self, name: &str) -> Result<Option<String>, EngineError> {
        self.run("attribute", move |driver, remote| {
            let name = name.to_owned();
            async move { driver.attribute(&remote, &name).await }
        })
        .await
    }

    pub async fn property(&self, name: &str) -> Result<Option<String>, EngineError> {
        self.run("property", move |driver, remote| {
            let name = name.to_owned();
            async move { driver.property(&remote, &name).await }
        })
        .await
    }

    pub async fn rectangle(&self) -> Result<ElementRect, EngineError> {
        self.run("rectangle", |driver, remote| async move {
            driver.rectangle(&remote).await
        })
        .await
    }

    pub async fn is_displayed(&self) -> Result<bool, EngineError> {
        self.run("is_displayed", |driver, remote| async move {
            driver.is_displayed(&remote).await
        })
        .await
    }

    pub async fn is_enabled(&self) -> Result<bool, EngineError> {
        self.run("is_enabled", |driver, remote| async move {
            driver.is_enabled(&remote).await
        })
        .await
    }

    pub async fn is_selected(&self) -> Result<bool, EngineError> {
        self.run("is_selected", |driver, remote| async move {
            driver.is_selected(&remote).await
        })
        .await
    }

    // --- operation template -------------------------------------------------

    /// Run one driver operation against the current remote reference,
    /// absorbing transient faults.
    ///
    /// Stale references trigger the recovery loop and a retry; one unexpected
    /// modal is dismissed and the operation retried once; every other fault
    /// propagates. Whatever context switching happened along the way, the
    /// tracker is left on the context that was active before the call.
    async fn run<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, EngineError>
    where
        F: Fn(Arc<dyn Driver>, RemoteRef) -> Fut,
        Fut: Future<Output = Result<T, DriverFault>>,
    {
        self.ensure_usable().await?;
        let prior = self.core.tracker.current().await;
        let result = self.run_in_context(operation, op).await;
        let after = self.core.tracker.current().await;
        if after != prior {
            if let Err(restore_err) = self.core.tracker.select(&prior).await {
                if result.is_ok() {
                    return Err(restore_err);
                }
                warn!(context = %prior, operation, error = %restore_err,
                    "failed to restore context after error");
            }
        }
        result
    }

    async fn run_in_context<T, F, Fut>(
        &self,
        operation: &'static str,
        op: F,
    ) -> Result<T, EngineError>
    where
        F: Fn(Arc<dyn Driver>, RemoteRef) -> Fut,
        Fut: Future<Output = Result<T, DriverFault>>,
    {
        let mut attempts_used: u32 = 0;
        let mut dismissed_modal = false;
        loop {
            let (remote, context) = {
                let binding = self.binding.lock().await;
                (binding.remote.clone(), binding.context.clone())
            };
            self.core.tracker.select(&context).await?;
            match op(self.core.driver.clone(), remote).await {
                Ok(value) => return Ok(value),
                Err(DriverFault::Stale) => {
                    debug!(locator = %self.locator, operation, "stale reference, recovering");
                    self.recover_with_budget(&mut attempts_used, operation)
                        .await?;
                }
                Err(DriverFault::UnhandledModal(message)) => {
                    if dismissed_modal {
                        return Err(EngineError::ModalPersisted {
                            operation: operation.to_string(),
                            message,
                        });
                    }
                    warn!(operation, %message, "dismissing unexpected modal and retrying");
                    self.core
                        .driver
                        .dismiss_modal()
                        .await
                        .map_err(EngineError::Driver)?;
                    dismissed_modal = true;
                }
                Err(fault) => return Err(EngineError::Driver(fault)),
            }
        }
    }

    async fn ensure_usable(&self) -> Result<(), EngineError> {
        if self.is_lost() {
            let binding = self.binding.lock().await;
            return Err(EngineError::ElementLost {
                locator: self.locator.clone(),
                context: binding.context.clone(),
                attempts: self.core.config.max_recovery_attempts,
            });
        }
        Ok(())
    }

    // --- recovery -----------------------------------------------------------

    /// Drive recovery attempts until the handle is rebound or the budget for
    /// the current operation runs out. The counter is shared across all stale
    /// faults one operation encounters.
    async fn recover_with_budget(
        &self,
        attempts_used: &mut u32,
        operation: &'static str,
    ) -> Result<(), EngineError> {
        let max = self.core.config.max_recovery_attempts;
        while *attempts_used < max {
            *attempts_used += 1;
            match self.try_recover(*attempts_used, max).await {
                Ok(true) => {
                    info!(locator = %self.locator, attempt = *attempts_used, operation,
                        "handle recovered");
                    return Ok(());
                }
                Ok(false) => {
                    debug!(locator = %self.locator, attempt = *attempts_used,
                        "recovery attempt failed");
                    tokio::time::sleep(self.core.config.poll_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
        self.lost.store(true, Ordering::SeqCst);
        let context = self.binding.lock().await.context.clone();
        warn!(locator = %self.locator, %context, "recovery budget exhausted, handle is lost");
        Err(EngineError::ElementLost {
            locator: self.locator.clone(),
            context,
            attempts: max,
        })
    }

    /// One recovery attempt. Returns `Ok(false)` when this attempt could not
    /// rebind and the caller may retry; errors are terminal.
    async fn try_recover(&self, attempt: u32, max: u32) -> Result<bool, EngineError> {
        let is_final = attempt >= max;

        if let Some(parent) = &self.search_root {
            if parent.is_lost() {
                debug!(parent = %parent.locator, "parent handle is lost");
                return Ok(false);
            }
            if !Box::pin(parent.try_recover(attempt, max)).await? {
                debug!(parent = %parent.locator, "parent handle could not be recovered");
                return Ok(false);
            }
        }

        let context = self.binding.lock().await.context.clone();
        match self.core.tracker.select(&context).await {
            Ok(()) => {}
            Err(err @ EngineError::Driver(_)) => return Err(err),
            Err(err) => {
                debug!(context = %context, error = %err, "context unavailable during recovery");
                return Ok(false);
            }
        }

        match self.position {
            None => self.recover_single(&context, is_final).await,
            Some(position) => self.recover_multi(position, is_final).await,
        }
    }

    async fn recover_single(&self, context: &Context, is_final: bool) -> Result<bool, EngineError> {
        let root = self.root_remote().await;
        match self.core.driver.locate(root.as_ref(), &self.locator).await {
            Ok(remote) => {
                self.rebind(remote, None).await;
                Ok(true)
            }
            Err(DriverFault::NotFound) | Err(DriverFault::Stale) => {
                // Last resort for top-level handles: the element may have
                // moved into a different frame since discovery.
                if is_final && self.search_root.is_none() {
                    self.sweep_contexts(context).await
                } else {
                    Ok(false)
                }
            }
            Err(DriverFault::UnhandledModal(message)) => {
                warn!(%message, "dismissing modal during recovery");
                self.core
                    .driver
                    .dismiss_modal()
                    .await
                    .map_err(EngineError::Driver)?;
                Ok(false)
            }
            Err(fault @ DriverFault::Fatal(_)) => Err(EngineError::Driver(fault)),
        }
    }

    /// Search every context this session has seen for the locator.
    async fn sweep_contexts(&self, home: &Context) -> Result<bool, EngineError> {
        debug!(locator = %self.locator, "sweeping other contexts for lost element");
        for candidate in self.core.tracker.known_contexts().await {
            if candidate == *home {
                continue;
            }
            match self.core.tracker.select(&candidate).await {
                Ok(()) => {}
                Err(err @ EngineError::Driver(_)) => return Err(err),
                Err(_) => continue,
            }
            match self.core.driver.locate(None, &self.locator).await {
                Ok(remote) => {
                    info!(locator = %self.locator, context = %candidate,
                        "element re-found in another context");
                    self.rebind(remote, Some(candidate)).await;
                    return Ok(true);
                }
                Err(fault @ DriverFault::Fatal(_)) => return Err(EngineError::Driver(fault)),
                Err(_) => continue,
            }
        }
        Ok(false)
    }

    /// Re-run the original locate-all and pick which candidate to bind to.
    ///
    /// An element that is displayed, at the original index, with the result
    /// count unchanged is bound immediately. Anything less exact is only
    /// accepted on the final attempt, in order of trust: a lone displayed
    /// candidate elsewhere in the list, the hidden element still at the
    /// original index, then the first displayed candidate regardless of
    /// ambiguity. Earlier attempts fail so a transient re-render gets a
    /// chance to settle instead of being guessed at.
    async fn recover_multi(
        &self,
        position: SiblingPosition,
        is_final: bool,
    ) -> Result<bool, EngineError> {
        let root = self.root_remote().await;
        let results = match self.core.driver.locate_all(root.as_ref(), &self.locator).await {
            Ok(results) => results,
            Err(DriverFault::NotFound) => Vec::new(),
            Err(DriverFault::Stale) => return Ok(false),
            Err(DriverFault::UnhandledModal(message)) => {
                warn!(%message, "dismissing modal during recovery");
                self.core
                    .driver
                    .dismiss_modal()
                    .await
                    .map_err(EngineError::Driver)?;
                return Ok(false);
            }
            Err(fault @ DriverFault::Fatal(_)) => return Err(EngineError::Driver(fault)),
        };

        if results.is_empty() {
            debug!(locator = %self.locator, "no candidates to disambiguate");
            return Ok(false);
        }

        let count_matches = results.len() == position.count;
        let mut displayed_fallback: Option<RemoteRef> = None;
        let mut displaced_displayed = 0usize;
        let mut hidden_at_index: Option<RemoteRef> = None;

        for (index, remote) in results.iter().enumerate() {
            let displayed = match self.core.driver.is_displayed(remote).await {
                Ok(displayed) => displayed,
                Err(fault @ DriverFault::Fatal(_)) => return Err(EngineError::Driver(fault)),
                Err(_) => false,
            };
            if displayed && index == position.index && count_matches {
                self.rebind(remote.clone(), None).await;
                return Ok(true);
            }
            if displayed {
                if index != position.index {
                    displaced_displayed += 1;
                }
                if displayed_fallback.is_none() {
                    displayed_fallback = Some(remote.clone());
                }
            } else if index == position.index {
                hidden_at_index = Some(remote.clone());
            }
        }

        if !is_final {
            debug!(locator = %self.locator, displaced = displaced_displayed,
                "no exact positional match, retrying");
            return Ok(false);
        }

        // A lone displayed candidate at another index is a plausible
        // re-render of the same element. Two or more displayed candidates
        // make that guess unsafe, and the hidden element still sitting at
        // the original index is the better bet.
        if displaced_displayed <= 1
            && let Some(remote) = displayed_fallback.clone()
        {
            warn!(locator = %self.locator,
                "binding to a displaced displayed candidate on the final attempt");
            self.rebind(remote, None).await;
            return Ok(true);
        }
        if let Some(remote) = hidden_at_index {
            warn!(locator = %self.locator, index = position.index,
                "binding to the hidden element at the original index on the final attempt");
            self.rebind(remote, None).await;
            return Ok(true);
        }
        if let Some(remote) = displayed_fallback {
            warn!(locator = %self.locator, displaced = displaced_displayed,
                "ambiguous candidates and nothing at the original index, binding to the first displayed");
            self.rebind(remote, None).await;
            return Ok(true);
        }
        Ok(false)
    }

    async fn rebind(&self, remote: RemoteRef, context: Option<Context>) {
        let old = {
            let mut binding = self.binding.lock().await;
            let old = std::mem::replace(&mut binding.remote, remote);
            if let Some(context) = context {
                binding.context = context;
            }
            old
        };
        if let Err(fault) = self.core.driver.release(&old).await {
            debug!(error = %fault, "failed to release stale reference");
        }
    }

    async fn root_remote(&self) -> Option<RemoteRef> {
        match &self.search_root {
            Some(parent) => Some(parent.binding.lock().await.remote.clone()),
            None => None,
        }
    }

    // --- raw probes for condition waits ------------------------------------

    /// One displayed check without recovery; `None` means the element is gone.
    pub(crate) async fn probe_displayed(&self) -> Result<Option<bool>, EngineError> {
        self.probe(|driver, remote| async move { driver.is_displayed(&remote).await })
            .await
    }

    pub(crate) async fn probe_enabled(&self) -> Result<Option<bool>, EngineError> {
        self.probe(|driver, remote| async move { driver.is_enabled(&remote).await })
            .await
    }

    pub(crate) async fn probe_text(&self) -> Result<Option<String>, EngineError> {
        self.probe(|driver, remote| async move { driver.text(&remote).await })
            .await
    }

    async fn probe<T, F, Fut>(&self, op: F) -> Result<Option<T>, EngineError>
    where
        F: FnOnce(Arc<dyn Driver>, RemoteRef) -> Fut,
        Fut: Future<Output = Result<T, DriverFault>>,
    {
        let (remote, context) = {
            let binding = self.binding.lock().await;
            (binding.remote.clone(), binding.context.clone())
        };
        self.core
            .tracker
            .with_context(&context, || async {
                match op(self.core.driver.clone(), remote).await {
                    Ok(value) => Ok(Some(value)),
                    Err(DriverFault::Stale) | Err(DriverFault::NotFound) => Ok(None),
                    Err(fault) => Err(EngineError::Driver(fault)),
                }
            })
            .await
    }
}
