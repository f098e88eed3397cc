//! # webgrip
//!
//! Resilient element handles and bounded polling for WebDriver-based UI
//! tests.
//!
//! Live browser DOMs are unreliable collaborators: pages render
//! asynchronously, element references go stale when a framework re-renders a
//! list, frames steal the active context, and alerts appear where no alert
//! was expected. webgrip absorbs that unreliability behind two ideas:
//!
//! - an [`ElementHandle`] is a durable reference that remembers how it was
//!   found (locator, context, search root, sibling position) and re-locates
//!   itself when the driver reports the underlying reference stale;
//! - a poll API with honest deadlines, so "wait for this element" never
//!   returns early and never hangs past its budget.
//!
//! Page objects, dialogs and tables are expected to be written *on top* of
//! these primitives — they hold handles and call the poll API; none of that
//! composition lives here.
//!
//! ## Finding and using elements
//!
//! ```no_run
//! use std::sync::Arc;
//! use webgrip::{EngineConfig, Locator, PollRequest, Session, WebDriverSession};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let driver = Arc::new(WebDriverSession::connect("http://localhost:4444").await?);
//! driver.goto("https://example.com/login").await?;
//!
//! let session = Session::new(driver, EngineConfig::default());
//!
//! let user = session
//!     .poll_for_one(PollRequest::new(Locator::css("input[name='user']")).expect_single())
//!     .await?
//!     .expect("poll_for_one with fail on never returns None");
//! user.type_text("admin").await?;
//!
//! let submit = session
//!     .poll_for_one(PollRequest::new(Locator::css("button[type='submit']")))
//!     .await?
//!     .unwrap();
//! submit.click_and_settle().await?;
//! # Ok(())
//! # }
//! ```
//!
//! If the login form re-renders between the two calls and the driver reports
//! the button stale, the click transparently re-runs the original locator,
//! rebinds the handle and retries — up to the configured attempt budget.
//!
//! ## Frames
//!
//! ```no_run
//! use webgrip::{Context, Locator, PollRequest};
//! # async fn example(session: webgrip::Session) -> Result<(), webgrip::EngineError> {
//! let editor = Context::root().child(Locator::css("iframe#editor"));
//! let body = session
//!     .poll_for_one(PollRequest::new(Locator::css("body")).in_context(editor))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Every handle operation selects its own context and restores the previous
//! one afterwards, so callers never track frame state by hand.
//!
//! ## Bring your own driver
//!
//! The engine talks to the browser exclusively through the [`Driver`] trait.
//! [`WebDriverSession`] is the fantoccini-backed implementation; tests (and
//! other transports) implement the same trait.

/// Engine configuration with named timeouts
pub mod config;

/// Document contexts (frame chains) and the active-context tracker
pub mod context;

/// The consumed driver abstraction and its fault taxonomy
pub mod driver;

/// Element handles and stale-reference recovery
pub mod element;

/// The engine's error taxonomy
pub mod errors;

/// Element query expressions
pub mod locator;

/// Bounded-deadline polling and condition waits
pub mod poll;

/// The session façade tying driver, tracker and config together
pub mod session;

/// fantoccini-backed driver implementation
pub mod webdriver;

pub use config::EngineConfig;
pub use context::{Context, ContextTracker};
pub use driver::{Driver, DriverFault, ElementRect, RemoteRef};
pub use element::{ElementHandle, SiblingPosition};
pub use errors::EngineError;
pub use locator::{Locator, LocatorKind};
pub use poll::PollRequest;
pub use session::Session;
pub use webdriver::WebDriverSession;
