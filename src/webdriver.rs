use anyhow::{Context as _, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use fantoccini::{Client, ClientBuilder, Locator as WdLocator};
use fantoccini::elements::Element;
use tracing::{debug, info};

use crate::driver::{Driver, DriverFault, ElementRect, RemoteRef};
use crate::locator::{Locator, LocatorKind};

/// WebDriver key code for Enter
const ENTER_KEY: &str = "\u{E007}";

/// The real [`Driver`] implementation, backed by a fantoccini WebDriver
/// session.
///
/// Located elements are kept in an internal registry keyed by opaque uuid
/// ids, so the engine only ever sees [`RemoteRef`] values. Faults coming back
/// from the driver are classified into the engine's categories by their W3C
/// error strings.
pub struct WebDriverSession {
    client: Client,
    elements: DashMap<String, Element>,
}

impl WebDriverSession {
    /// Connect to a running WebDriver endpoint (e.g. geckodriver on
    /// `http://localhost:4444`).
    pub async fn connect(webdriver_url: &str) -> Result<Self> {
        let url = url::Url::parse(webdriver_url).context("invalid WebDriver URL")?;

        if !Self::is_webdriver_running(url.as_str()).await {
            anyhow::bail!(
                "Cannot connect to WebDriver at {}.\n\
                Please ensure a driver is running:\n\
                  For Firefox: geckodriver --port 4444\n\
                  For Chrome: chromedriver --port 9515",
                url
            );
        }

        debug!("Connecting to WebDriver at {}", url);
        let client = ClientBuilder::rustls()
            .connect(webdriver_url)
            .await
            .context("Failed to connect to WebDriver")?;

        info!("WebDriver session established at {}", url);
        Ok(WebDriverSession {
            client,
            elements: DashMap::new(),
        })
    }

    async fn is_webdriver_running(url: &str) -> bool {
        let status_url = format!("{}/status", url.trim_end_matches('/'));
        match reqwest::get(&status_url).await {
            Ok(response) => {
                if !response.status().is_success() {
                    return false;
                }
                // A driver that answers but reports ready: false already has
                // a session open and will reject ours.
                match response.json::<serde_json::Value>().await {
                    Ok(body) => body["value"]["ready"].as_bool().unwrap_or(true),
                    Err(_) => true,
                }
            }
            Err(_) => false,
        }
    }

    /// Navigate the session to a URL
    pub async fn goto(&self, url: &str) -> Result<(), DriverFault> {
        info!("Navigating to {}", url);
        self.client.goto(url).await.map_err(classify)
    }

    /// End the session and close the browser window
    pub async fn close(self) -> Result<()> {
        self.client.close().await?;
        Ok(())
    }

    fn register(&self, element: Element) -> RemoteRef {
        let id = uuid::Uuid::new_v4().to_string();
        self.elements.insert(id.clone(), element);
        RemoteRef::new(id)
    }

    /// A reference the registry no longer knows is indistinguishable from a
    /// stale one; the engine's recovery handles both the same way.
    fn resolve(&self, remote: &RemoteRef) -> Result<Element, DriverFault> {
        self.elements
            .get(remote.id())
            .map(|entry| entry.value().clone())
            .ok_or(DriverFault::Stale)
    }
}

fn to_wd(locator: &Locator) -> WdLocator<'_> {
    match locator.kind() {
        LocatorKind::Css => WdLocator::Css(locator.expression()),
        LocatorKind::XPath => WdLocator::XPath(locator.expression()),
    }
}

/// Classify a fantoccini error into the engine's fault categories by its W3C
/// error string.
fn classify(err: fantoccini::error::CmdError) -> DriverFault {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("stale element reference") {
        DriverFault::Stale
    } else if lower.contains("no such element") || lower.contains("unable to locate element") {
        DriverFault::NotFound
    } else if lower.contains("unexpected alert") {
        DriverFault::UnhandledModal(message)
    } else {
        DriverFault::Fatal(message)
    }
}

#[async_trait]
impl Driver for WebDriverSession {
    async fn locate(
        &self,
        root: Option<&RemoteRef>,
        locator: &Locator,
    ) -> Result<RemoteRef, DriverFault> {
        let found = match root {
            Some(root) => {
                let parent = self.resolve(root)?;
                parent.find(to_wd(locator)).await
            }
            None => self.client.find(to_wd(locator)).await,
        }
        .map_err(classify)?;
        Ok(self.register(found))
    }

    async fn locate_all(
        &self,
        root: Option<&RemoteRef>,
        locator: &Locator,
    ) -> Result<Vec<RemoteRef>, DriverFault> {
        let found = match root {
            Some(root) => {
                let parent = self.resolve(root)?;
                parent.find_all(to_wd(locator)).await
            }
            None => self.client.find_all(to_wd(locator)).await,
        }
        .map_err(classify)?;
        Ok(found.into_iter().map(|el| self.register(el)).collect())
    }

    async fn is_displayed(&self, element: &RemoteRef) -> Result<bool, DriverFault> {
        self.resolve(element)?
            .is_displayed()
            .await
            .map_err(classify)
    }

    async fn is_enabled(&self, element: &RemoteRef) -> Result<bool, DriverFault> {
        self.resolve(element)?.is_enabled().await.map_err(classify)
    }

    async fn is_selected(&self, element: &RemoteRef) -> Result<bool, DriverFault> {
        self.resolve(element)?.is_selected().await.map_err(classify)
    }

    async fn attribute(
        &self,
        element: &RemoteRef,
        name: &str,
    ) -> Result<Option<String>, DriverFault> {
        self.resolve(element)?.attr(name).await.map_err(classify)
    }

    async fn property(
        &self,
        element: &RemoteRef,
        name: &str,
    ) -> Result<Option<String>, DriverFault> {
        self.resolve(element)?.prop(name).await.map_err(classify)
    }

    async fn text(&self, element: &RemoteRef) -> Result<String, DriverFault> {
        self.resolve(element)?.text().await.map_err(classify)
    }

    async fn rectangle(&self, element: &RemoteRef) -> Result<ElementRect, DriverFault> {
        let (x, y, width, height) = self
            .resolve(element)?
            .rectangle()
            .await
            .map_err(classify)?;
        Ok(ElementRect {
            x,
            y,
            width,
            height,
        })
    }

    async fn click(&self, element: &RemoteRef) -> Result<(), DriverFault> {
        self.resolve(element)?.click().await.map_err(classify)?;
        Ok(())
    }

    async fn clear(&self, element: &RemoteRef) -> Result<(), DriverFault> {
        self.resolve(element)?.clear().await.map_err(classify)
    }

    async fn send_keys(&self, element: &RemoteRef, text: &str) -> Result<(), DriverFault> {
        self.resolve(element)?
            .send_keys(text)
            .await
            .map_err(classify)
    }

    async fn submit(&self, element: &RemoteRef) -> Result<(), DriverFault> {
        // W3C WebDriver has no element-level submit endpoint; Enter on the
        // element triggers form submission the way a user would.
        self.resolve(element)?
            .send_keys(ENTER_KEY)
            .await
            .map_err(classify)
    }

    async fn select_context(&self, frames: &[Locator]) -> Result<(), DriverFault> {
        self.client.enter_frame(None).await.map_err(classify)?;
        for frame in frames {
            let element = self.client.find(to_wd(frame)).await.map_err(classify)?;
            element.enter_frame().await.map_err(classify)?;
        }
        Ok(())
    }

    async fn dismiss_modal(&self) -> Result<(), DriverFault> {
        self.client.dismiss_alert().await.map_err(classify)
    }

    async fn describe(&self, element: &RemoteRef) -> Result<String, DriverFault> {
        let el = self.resolve(element)?;
        let tag = el.tag_name().await.map_err(classify)?;
        let id = el.attr("id").await.map_err(classify)?;
        Ok(match id {
            Some(id) if !id.is_empty() => format!("<{tag} id=\"{id}\">"),
            _ => format!("<{tag}>"),
        })
    }

    async fn release(&self, element: &RemoteRef) -> Result<(), DriverFault> {
        self.elements.remove(element.id());
        Ok(())
    }
}
