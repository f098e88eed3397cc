use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::locator::Locator;

/// Opaque reference to one live element on the driver side.
///
/// The engine never looks inside the id; it only hands it back to the driver
/// that issued it. A `RemoteRef` is a plain value and never wraps another
/// engine type, so handles cannot nest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteRef {
    id: String,
}

impl RemoteRef {
    pub fn new(id: impl Into<String>) -> Self {
        RemoteRef { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Element geometry as reported by the driver, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Fault categories a driver call can raise.
///
/// `Stale` and `UnhandledModal` are transient and absorbed by the engine up
/// to its budgets; `NotFound` feeds the poll loop; `Fatal` is never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverFault {
    /// The remote reference no longer corresponds to live DOM content
    #[error("stale element reference")]
    Stale,
    /// The locator matched nothing under the given root
    #[error("no such element")]
    NotFound,
    /// An unexpected alert/confirmation is blocking the session
    #[error("unexpected modal dialog: {0}")]
    UnhandledModal(String),
    /// Session/connection-level failure; retrying cannot help
    #[error("unrecoverable driver fault: {0}")]
    Fatal(String),
}

impl DriverFault {
    /// Faults the engine may absorb and retry within its budgets
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverFault::Stale | DriverFault::UnhandledModal(_))
    }
}

/// The WebDriver-style primitives the engine consumes.
///
/// `locate`/`locate_all` resolve a locator under an optional root element in
/// the currently selected context. `select_context` walks a frame chain from
/// the top-level document; an empty chain selects the document itself.
///
/// Implementations map their native error types onto [`DriverFault`]; the
/// engine's retry and recovery policy keys entirely off those categories.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn locate(
        &self,
        root: Option<&RemoteRef>,
        locator: &Locator,
    ) -> Result<RemoteRef, DriverFault>;

    async fn locate_all(
        &self,
        root: Option<&RemoteRef>,
        locator: &Locator,
    ) -> Result<Vec<RemoteRef>, DriverFault>;

    async fn is_displayed(&self, element: &RemoteRef) -> Result<bool, DriverFault>;

    async fn is_enabled(&self, element: &RemoteRef) -> Result<bool, DriverFault>;

    async fn is_selected(&self, element: &RemoteRef) -> Result<bool, DriverFault>;

    async fn attribute(
        &self,
        element: &RemoteRef,
        name: &str,
    ) -> Result<Option<String>, DriverFault>;

    async fn property(
        &self,
        element: &RemoteRef,
        name: &str,
    ) -> Result<Option<String>, DriverFault>;

    async fn text(&self, element: &RemoteRef) -> Result<String, DriverFault>;

    async fn rectangle(&self, element: &RemoteRef) -> Result<ElementRect, DriverFault>;

    async fn click(&self, element: &RemoteRef) -> Result<(), DriverFault>;

    async fn clear(&self, element: &RemoteRef) -> Result<(), DriverFault>;

    async fn send_keys(&self, element: &RemoteRef, text: &str) -> Result<(), DriverFault>;

    async fn submit(&self, element: &RemoteRef) -> Result<(), DriverFault>;

    /// Select the document context addressed by a frame chain (empty = top document)
    async fn select_context(&self, frames: &[Locator]) -> Result<(), DriverFault>;

    /// Dismiss whatever modal dialog is currently blocking the session
    async fn dismiss_modal(&self) -> Result<(), DriverFault>;

    /// Short human-readable description of an element, for error messages
    async fn describe(&self, element: &RemoteRef) -> Result<String, DriverFault>;

    /// Drop any driver-side bookkeeping for a reference the engine no longer uses
    async fn release(&self, _element: &RemoteRef) -> Result<(), DriverFault> {
        Ok(())
    }
}
