use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::context::Context;
use crate::driver::{DriverFault, RemoteRef};
use crate::element::{ElementHandle, SiblingPosition};
use crate::errors::EngineError;
use crate::locator::Locator;
use crate::session::Session;

/// One element search: what to look for, where, for how long, and what to do
/// about visibility and multiple matches.
///
/// Requests are built per call and never stored. When a search root handle is
/// set, the search runs in that handle's context; otherwise in the request's
/// context (root document by default).
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub(crate) locator: Locator,
    pub(crate) context: Context,
    pub(crate) root: Option<Arc<ElementHandle>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) displayed_only: bool,
    pub(crate) hidden_fallback: bool,
    pub(crate) single: bool,
    pub(crate) fail: bool,
}

impl PollRequest {
    pub fn new(locator: Locator) -> Self {
        PollRequest {
            locator,
            context: Context::root(),
            root: None,
            timeout: None,
            displayed_only: true,
            hidden_fallback: false,
            single: false,
            fail: true,
        }
    }

    /// Search inside a frame instead of the root document
    pub fn in_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Search under another handle. The search also runs in that handle's
    /// context, overriding `in_context`.
    pub fn under(mut self, root: Arc<ElementHandle>) -> Self {
        self.root = Some(root);
        self
    }

    /// Override the session's default timeout for this search
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Accept elements regardless of visibility
    pub fn any_visibility(mut self) -> Self {
        self.displayed_only = false;
        self
    }

    /// Keep the displayed filter, but fall back to hidden matches when no
    /// visible ones exist. Used by dialog-detection paths.
    pub fn allow_hidden(mut self) -> Self {
        self.hidden_fallback = true;
        self
    }

    /// Raise `MultipleMatches` instead of silently taking the first of many
    pub fn expect_single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Return empty/`None` on timeout instead of raising
    pub fn allow_missing(mut self) -> Self {
        self.fail = false;
        self
    }
}

/// One raw match from a locate-all call. Index and count are positions in the
/// unfiltered result list, which is what recovery later re-runs and compares
/// against.
struct Candidate {
    index: usize,
    count: usize,
    remote: RemoteRef,
    displayed: bool,
}

impl Session {
    /// Poll until the locator yields a match, then return one handle.
    ///
    /// Returns `Ok(None)` only when the request opted out of failure and the
    /// deadline elapsed. With `expect_single`, two or more matches at the
    /// moment of success raise [`EngineError::MultipleMatches`] naming every
    /// candidate; otherwise the first match wins under a logged warning.
    pub async fn poll_for_one(
        &self,
        request: PollRequest,
    ) -> Result<Option<ElementHandle>, EngineError> {
        let context = self.resolve_context(&request).await;
        let handles = self.poll_matches(&request, &context).await?;
        if handles.is_empty() {
            return Ok(None);
        }
        if handles.len() > 1 {
            if request.single {
                let candidates = self.describe_handles(&context, &handles).await;
                return Err(EngineError::MultipleMatches {
                    locator: request.locator.clone(),
                    context,
                    count: handles.len(),
                    candidates,
                });
            }
            warn!(locator = %request.locator, count = handles.len(),
                "multiple elements match, returning the first");
        }
        Ok(handles.into_iter().next())
    }

    /// Poll until the locator yields at least one match and return them all.
    /// An empty vec on timeout unless the request keeps `fail` set.
    pub async fn poll_for_many(
        &self,
        request: PollRequest,
    ) -> Result<Vec<ElementHandle>, EngineError> {
        let context = self.resolve_context(&request).await;
        self.poll_matches(&request, &context).await
    }

    /// Probe whether the locator matches right now, with the session's short
    /// presence-check budget. Never raises on absence.
    pub async fn exists(&self, locator: Locator, context: &Context) -> Result<bool, EngineError> {
        let found = self
            .poll_for_one(
                PollRequest::new(locator)
                    .in_context(context.clone())
                    .timeout(self.core.config.tiny_timeout)
                    .allow_missing(),
            )
            .await?;
        Ok(found.is_some())
    }

    /// Poll several candidate locators at once and stop as soon as any one of
    /// them matches. Returns one slot per locator, filled from the iteration
    /// that first produced a match, so the caller can branch on which locator
    /// won. Hidden matches are accepted when no visible ones exist.
    ///
    /// The default budget is the open timeout: this is the call dialog
    /// detection runs right after an opening action.
    pub async fn poll_for_first_of(
        &self,
        locators: &[Locator],
        context: &Context,
        timeout: Option<Duration>,
        fail: bool,
    ) -> Result<Vec<Option<ElementHandle>>, EngineError> {
        if locators.is_empty() {
            return Ok(Vec::new());
        }
        let timeout = timeout.unwrap_or(self.core.config.open_timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let mut slots: Vec<Option<ElementHandle>> = Vec::with_capacity(locators.len());
            let mut any = false;
            for locator in locators {
                let request = PollRequest::new(locator.clone())
                    .in_context(context.clone())
                    .allow_hidden();
                let candidates = self.locate_once(&request, context).await?;
                let selected = select_candidates(&request, candidates);
                let handle = self
                    .wrap(&request, context, selected)
                    .into_iter()
                    .next();
                if handle.is_some() {
                    any = true;
                }
                slots.push(handle);
            }
            if any {
                return Ok(slots);
            }
            if Instant::now() >= deadline {
                if fail {
                    return Err(EngineError::Timeout {
                        locator: locators[0].clone(),
                        context: context.clone(),
                        timeout,
                        elapsed: started.elapsed(),
                    });
                }
                debug!(count = locators.len(), "no candidate locator matched before the deadline");
                return Ok(slots);
            }
            tokio::time::sleep(self.core.config.poll_interval).await;
        }
    }

    /// Wait until the element is no longer displayed (a vanished element
    /// counts). Returns `false` on timeout unless `fail` is set; the default
    /// budget is the close timeout.
    pub async fn wait_while_displayed(
        &self,
        handle: &ElementHandle,
        timeout: Option<Duration>,
        fail: bool,
    ) -> Result<bool, EngineError> {
        let timeout = timeout.unwrap_or(self.core.config.close_timeout);
        self.wait_while(handle, timeout, fail, |state: Option<bool>| {
            !matches!(state, Some(true))
        })
        .await
    }

    /// Wait until the element reports enabled. A transiently vanished element
    /// keeps the wait going; the deadline bounds it either way. The default
    /// budget is the open timeout.
    pub async fn wait_while_disabled(
        &self,
        handle: &ElementHandle,
        timeout: Option<Duration>,
        fail: bool,
    ) -> Result<bool, EngineError> {
        let timeout = timeout.unwrap_or(self.core.config.open_timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            match handle.probe_enabled().await {
                Ok(Some(true)) => return Ok(true),
                Ok(Some(false)) | Ok(None) => {}
                Err(EngineError::Driver(DriverFault::UnhandledModal(message))) => {
                    self.dismiss_modal_while_waiting(&message).await?;
                }
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return self.wait_expired(handle, timeout, started, fail).await;
            }
            tokio::time::sleep(self.core.config.poll_interval).await;
        }
    }

    /// Wait until the element's text contains `needle`
    pub async fn wait_for_text(
        &self,
        handle: &ElementHandle,
        needle: &str,
        timeout: Option<Duration>,
        fail: bool,
    ) -> Result<bool, EngineError> {
        let timeout = timeout.unwrap_or(self.core.config.default_timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            match handle.probe_text().await {
                Ok(Some(text)) if text.contains(needle) => return Ok(true),
                Ok(_) => {}
                Err(EngineError::Driver(DriverFault::UnhandledModal(message))) => {
                    self.dismiss_modal_while_waiting(&message).await?;
                }
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return self.wait_expired(handle, timeout, started, fail).await;
            }
            tokio::time::sleep(self.core.config.poll_interval).await;
        }
    }

    async fn wait_while<P>(
        &self,
        handle: &ElementHandle,
        timeout: Duration,
        fail: bool,
        done: P,
    ) -> Result<bool, EngineError>
    where
        P: Fn(Option<bool>) -> bool,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            match handle.probe_displayed().await {
                Ok(state) if done(state) => return Ok(true),
                Ok(_) => {}
                Err(EngineError::Driver(DriverFault::UnhandledModal(message))) => {
                    self.dismiss_modal_while_waiting(&message).await?;
                }
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return self.wait_expired(handle, timeout, started, fail).await;
            }
            tokio::time::sleep(self.core.config.poll_interval).await;
        }
    }

    async fn wait_expired(
        &self,
        handle: &ElementHandle,
        timeout: Duration,
        started: Instant,
        fail: bool,
    ) -> Result<bool, EngineError> {
        if fail {
            return Err(EngineError::Timeout {
                locator: handle.locator().clone(),
                context: handle.context().await,
                timeout,
                elapsed: started.elapsed(),
            });
        }
        Ok(false)
    }

    async fn dismiss_modal_while_waiting(&self, message: &str) -> Result<(), EngineError> {
        warn!(%message, "dismissing modal while waiting");
        self.core
            .driver
            .dismiss_modal()
            .await
            .map_err(EngineError::Driver)
    }

    // --- the deadline loop --------------------------------------------------

    async fn poll_matches(
        &self,
        request: &PollRequest,
        context: &Context,
    ) -> Result<Vec<ElementHandle>, EngineError> {
        let timeout = self.core.config.effective_timeout(request.timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let candidates = self.locate_once(request, context).await?;
            let selected = select_candidates(request, candidates);
            if !selected.is_empty() {
                debug!(locator = %request.locator, count = selected.len(),
                    elapsed = ?started.elapsed(), "poll matched");
                return Ok(self.wrap(request, context, selected));
            }
            if Instant::now() >= deadline {
                if request.fail {
                    return Err(EngineError::Timeout {
                        locator: request.locator.clone(),
                        context: context.clone(),
                        timeout,
                        elapsed: started.elapsed(),
                    });
                }
                debug!(locator = %request.locator, "poll expired without matches");
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.core.config.poll_interval).await;
        }
    }

    /// One locate-all pass in the request's context. Transient faults yield
    /// an empty iteration; fatal faults propagate.
    async fn locate_once(
        &self,
        request: &PollRequest,
        context: &Context,
    ) -> Result<Vec<Candidate>, EngineError> {
        self.core
            .tracker
            .with_context(context, || async {
                let root_remote = match &request.root {
                    Some(root) => Some(root.remote().await),
                    None => None,
                };
                let raw = match self
                    .core
                    .driver
                    .locate_all(root_remote.as_ref(), &request.locator)
                    .await
                {
                    Ok(raw) => raw,
                    Err(DriverFault::NotFound) => Vec::new(),
                    Err(DriverFault::Stale) => {
                        debug!(locator = %request.locator, "search root went stale mid-poll");
                        Vec::new()
                    }
                    Err(DriverFault::UnhandledModal(message)) => {
                        warn!(%message, "dismissing modal during poll");
                        self.core
                            .driver
                            .dismiss_modal()
                            .await
                            .map_err(EngineError::Driver)?;
                        Vec::new()
                    }
                    Err(fault) => return Err(EngineError::Driver(fault)),
                };
                let count = raw.len();
                let mut candidates = Vec::with_capacity(count);
                for (index, remote) in raw.into_iter().enumerate() {
                    let displayed = if request.displayed_only {
                        match self.core.driver.is_displayed(&remote).await {
                            Ok(displayed) => displayed,
                            Err(fault @ DriverFault::Fatal(_)) => {
                                return Err(EngineError::Driver(fault));
                            }
                            Err(_) => false,
                        }
                    } else {
                        true
                    };
                    candidates.push(Candidate {
                        index,
                        count,
                        remote,
                        displayed,
                    });
                }
                Ok(candidates)
            })
            .await
    }

    async fn resolve_context(&self, request: &PollRequest) -> Context {
        match &request.root {
            Some(root) => root.context().await,
            None => request.context.clone(),
        }
    }

    fn wrap(
        &self,
        request: &PollRequest,
        context: &Context,
        selected: Vec<Candidate>,
    ) -> Vec<ElementHandle> {
        selected
            .into_iter()
            .map(|candidate| {
                let position = (candidate.count > 1).then_some(SiblingPosition {
                    index: candidate.index,
                    count: candidate.count,
                });
                ElementHandle::bind(
                    self.core.clone(),
                    candidate.remote,
                    context.clone(),
                    request.locator.clone(),
                    request.root.clone(),
                    position,
                )
            })
            .collect()
    }

    async fn describe_handles(&self, context: &Context, handles: &[ElementHandle]) -> Vec<String> {
        let mut described = Vec::with_capacity(handles.len());
        for handle in handles {
            let remote = handle.remote().await;
            let result = self
                .core
                .tracker
                .with_context(context, || async {
                    self.core
                        .driver
                        .describe(&remote)
                        .await
                        .map_err(EngineError::Driver)
                })
                .await;
            described.push(match result {
                Ok(description) => description,
                Err(_) => format!(
                    "{}[{}]",
                    handle.locator(),
                    handle.position().map(|p| p.index).unwrap_or(0)
                ),
            });
        }
        described
    }
}

fn select_candidates(request: &PollRequest, candidates: Vec<Candidate>) -> Vec<Candidate> {
    if !request.displayed_only {
        return candidates;
    }
    let any_displayed = candidates.iter().any(|c| c.displayed);
    if any_displayed {
        candidates.into_iter().filter(|c| c.displayed).collect()
    } else if request.hidden_fallback {
        candidates
    } else {
        Vec::new()
    }
}
