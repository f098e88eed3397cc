// Shared test fixtures: a scripted in-memory driver the engine runs against.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use webgrip::{Driver, DriverFault, ElementRect, EngineConfig, Locator, RemoteRef};

/// Opt into engine logs while debugging a test: `RUST_LOG=webgrip=debug`
#[allow(dead_code)]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine configuration with short budgets so the suites run fast
#[allow(dead_code)]
pub fn test_config() -> EngineConfig {
    EngineConfig {
        default_timeout: Duration::from_millis(300),
        tiny_timeout: Duration::from_millis(100),
        open_timeout: Duration::from_millis(300),
        close_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(10),
        settle_delay: Duration::from_millis(10),
        max_recovery_attempts: 5,
    }
}

/// One element in the scripted DOM
#[derive(Debug, Clone)]
pub struct MockElement {
    pub displayed: bool,
    pub enabled: bool,
    pub selected: bool,
    pub text: String,
    pub attrs: HashMap<String, String>,
}

#[allow(dead_code)]
impl MockElement {
    pub fn visible(text: &str) -> Self {
        MockElement {
            displayed: true,
            enabled: true,
            selected: false,
            text: text.to_string(),
            attrs: HashMap::new(),
        }
    }

    pub fn hidden(text: &str) -> Self {
        MockElement {
            displayed: false,
            ..Self::visible(text)
        }
    }

    pub fn disabled(text: &str) -> Self {
        MockElement {
            enabled: false,
            ..Self::visible(text)
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }
}

type MatchKey = (String, String, String); // (context, root element id, locator)

#[derive(Default)]
struct Inner {
    elements: HashMap<String, MockElement>,
    matches: HashMap<MatchKey, Vec<String>>,
    appear_after: HashMap<MatchKey, usize>,
    key_calls: HashMap<MatchKey, usize>,
    handles: HashMap<String, String>, // remote id -> element id
    revoked: HashSet<String>,
    contexts: HashSet<String>,
    current_context: String,
    select_log: Vec<String>,
    fault_queue: HashMap<String, VecDeque<DriverFault>>,
    op_calls: HashMap<String, usize>,
    clicks: HashMap<String, usize>,
    typed: Vec<(String, String)>,
    dismissals: usize,
}

/// Scripted [`Driver`] for the integration suites.
///
/// Tests script a DOM per context (`set_matches`, `set_element`), mutate it
/// mid-test (`set_displayed`, `revoke_all_handles`) and inject faults per
/// operation (`queue_fault`). Every locate/select/click is counted so a test
/// can assert how hard the engine worked.
pub struct MockDriver {
    inner: Mutex<Inner>,
    next_handle: AtomicUsize,
}

#[allow(dead_code)]
impl MockDriver {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.contexts.insert(String::new()); // root document
        MockDriver {
            inner: Mutex::new(inner),
            next_handle: AtomicUsize::new(1),
        }
    }

    pub fn ctx_key(frames: &[Locator]) -> String {
        frames
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(">")
    }

    /// Make a frame chain selectable
    pub fn add_context(&self, frames: &[Locator]) {
        let mut inner = self.inner.lock().unwrap();
        inner.contexts.insert(Self::ctx_key(frames));
    }

    pub fn set_element(&self, id: &str, element: MockElement) {
        let mut inner = self.inner.lock().unwrap();
        inner.elements.insert(id.to_string(), element);
    }

    pub fn set_displayed(&self, id: &str, displayed: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(element) = inner.elements.get_mut(id) {
            element.displayed = displayed;
        }
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(element) = inner.elements.get_mut(id) {
            element.enabled = enabled;
        }
    }

    pub fn set_text(&self, id: &str, text: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(element) = inner.elements.get_mut(id) {
            element.text = text.to_string();
        }
    }

    /// Script what a locate-all for `locator` under `root` returns in the
    /// context addressed by `frames`
    pub fn set_matches(
        &self,
        frames: &[Locator],
        root: Option<&str>,
        locator: &Locator,
        ids: &[&str],
    ) {
        let key = (
            Self::ctx_key(frames),
            root.unwrap_or("").to_string(),
            locator.to_string(),
        );
        let mut inner = self.inner.lock().unwrap();
        inner
            .matches
            .insert(key, ids.iter().map(|s| s.to_string()).collect());
    }

    /// As `set_matches`, but the result stays empty for the first
    /// `after_calls` locate calls against that key
    pub fn set_matches_after(
        &self,
        frames: &[Locator],
        root: Option<&str>,
        locator: &Locator,
        ids: &[&str],
        after_calls: usize,
    ) {
        let key = (
            Self::ctx_key(frames),
            root.unwrap_or("").to_string(),
            locator.to_string(),
        );
        let mut inner = self.inner.lock().unwrap();
        inner
            .matches
            .insert(key.clone(), ids.iter().map(|s| s.to_string()).collect());
        inner.appear_after.insert(key, after_calls);
    }

    pub fn remove_matches(&self, frames: &[Locator], root: Option<&str>, locator: &Locator) {
        let key = (
            Self::ctx_key(frames),
            root.unwrap_or("").to_string(),
            locator.to_string(),
        );
        let mut inner = self.inner.lock().unwrap();
        inner.matches.remove(&key);
    }

    /// Invalidate every outstanding remote reference, as a re-render would
    pub fn revoke_all_handles(&self) {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<String> = inner.handles.keys().cloned().collect();
        inner.revoked.extend(ids);
    }

    /// The next call of `op` fails with `fault` instead of running
    pub fn queue_fault(&self, op: &str, fault: DriverFault) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fault_queue
            .entry(op.to_string())
            .or_default()
            .push_back(fault);
    }

    pub fn op_calls(&self, op: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.op_calls.get(op).copied().unwrap_or(0)
    }

    pub fn locate_calls(&self, frames: &[Locator], root: Option<&str>, locator: &Locator) -> usize {
        let key = (
            Self::ctx_key(frames),
            root.unwrap_or("").to_string(),
            locator.to_string(),
        );
        let inner = self.inner.lock().unwrap();
        inner.key_calls.get(&key).copied().unwrap_or(0)
    }

    pub fn clicks(&self, id: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.clicks.get(id).copied().unwrap_or(0)
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().typed.clone()
    }

    pub fn select_log(&self) -> Vec<String> {
        self.inner.lock().unwrap().select_log.clone()
    }

    pub fn dismissals(&self) -> usize {
        self.inner.lock().unwrap().dismissals
    }

    /// The element id a remote reference currently points at
    pub fn element_of(&self, remote: &RemoteRef) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.handles.get(remote.id()).cloned()
    }

    fn count_op(inner: &mut Inner, op: &str) {
        *inner.op_calls.entry(op.to_string()).or_insert(0) += 1;
    }

    fn take_fault(inner: &mut Inner, op: &str) -> Option<DriverFault> {
        inner.fault_queue.get_mut(op).and_then(VecDeque::pop_front)
    }

    fn resolve(inner: &Inner, remote: &RemoteRef) -> Result<String, DriverFault> {
        if inner.revoked.contains(remote.id()) {
            return Err(DriverFault::Stale);
        }
        inner
            .handles
            .get(remote.id())
            .cloned()
            .ok_or(DriverFault::Stale)
    }

    fn issue_handle(&self, inner: &mut Inner, element_id: &str) -> RemoteRef {
        let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let remote = format!("h{n}");
        inner.handles.insert(remote.clone(), element_id.to_string());
        RemoteRef::new(remote)
    }

    fn lookup(
        &self,
        inner: &mut Inner,
        root: Option<&RemoteRef>,
        locator: &Locator,
    ) -> Result<Vec<RemoteRef>, DriverFault> {
        let root_id = match root {
            Some(remote) => Self::resolve(inner, remote)?,
            None => String::new(),
        };
        let key = (inner.current_context.clone(), root_id, locator.to_string());
        let calls = inner.key_calls.entry(key.clone()).or_insert(0);
        *calls += 1;
        let calls = *calls;
        if let Some(after) = inner.appear_after.get(&key)
            && calls <= *after
        {
            return Ok(Vec::new());
        }
        let ids = inner.matches.get(&key).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .map(|id| self.issue_handle(inner, id))
            .collect())
    }

    fn element_field<T>(
        &self,
        op: &str,
        remote: &RemoteRef,
        read: impl FnOnce(&MockElement) -> T,
    ) -> Result<T, DriverFault> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_op(&mut inner, op);
        if let Some(fault) = Self::take_fault(&mut inner, op) {
            return Err(fault);
        }
        let element_id = Self::resolve(&inner, remote)?;
        let element = inner
            .elements
            .get(&element_id)
            .ok_or(DriverFault::NotFound)?;
        Ok(read(element))
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn locate(
        &self,
        root: Option<&RemoteRef>,
        locator: &Locator,
    ) -> Result<RemoteRef, DriverFault> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_op(&mut inner, "locate");
        if let Some(fault) = Self::take_fault(&mut inner, "locate") {
            return Err(fault);
        }
        let found = self.lookup(&mut inner, root, locator)?;
        found.into_iter().next().ok_or(DriverFault::NotFound)
    }

    async fn locate_all(
        &self,
        root: Option<&RemoteRef>,
        locator: &Locator,
    ) -> Result<Vec<RemoteRef>, DriverFault> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_op(&mut inner, "locate_all");
        if let Some(fault) = Self::take_fault(&mut inner, "locate_all") {
            return Err(fault);
        }
        self.lookup(&mut inner, root, locator)
    }

    async fn is_displayed(&self, element: &RemoteRef) -> Result<bool, DriverFault> {
        self.element_field("is_displayed", element, |e| e.displayed)
    }

    async fn is_enabled(&self, element: &RemoteRef) -> Result<bool, DriverFault> {
        self.element_field("is_enabled", element, |e| e.enabled)
    }

    async fn is_selected(&self, element: &RemoteRef) -> Result<bool, DriverFault> {
        self.element_field("is_selected", element, |e| e.selected)
    }

    async fn attribute(
        &self,
        element: &RemoteRef,
        name: &str,
    ) -> Result<Option<String>, DriverFault> {
        self.element_field("attribute", element, |e| e.attrs.get(name).cloned())
    }

    async fn property(
        &self,
        element: &RemoteRef,
        name: &str,
    ) -> Result<Option<String>, DriverFault> {
        self.element_field("property", element, |e| e.attrs.get(name).cloned())
    }

    async fn text(&self, element: &RemoteRef) -> Result<String, DriverFault> {
        self.element_field("text", element, |e| e.text.clone())
    }

    async fn rectangle(&self, element: &RemoteRef) -> Result<ElementRect, DriverFault> {
        self.element_field("rectangle", element, |e| ElementRect {
            x: 0.0,
            y: 0.0,
            width: if e.displayed { 100.0 } else { 0.0 },
            height: if e.displayed { 20.0 } else { 0.0 },
        })
    }

    async fn click(&self, element: &RemoteRef) -> Result<(), DriverFault> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_op(&mut inner, "click");
        if let Some(fault) = Self::take_fault(&mut inner, "click") {
            return Err(fault);
        }
        let element_id = Self::resolve(&inner, element)?;
        *inner.clicks.entry(element_id).or_insert(0) += 1;
        Ok(())
    }

    async fn clear(&self, element: &RemoteRef) -> Result<(), DriverFault> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_op(&mut inner, "clear");
        if let Some(fault) = Self::take_fault(&mut inner, "clear") {
            return Err(fault);
        }
        let element_id = Self::resolve(&inner, element)?;
        if let Some(e) = inner.elements.get_mut(&element_id) {
            e.text.clear();
        }
        Ok(())
    }

    async fn send_keys(&self, element: &RemoteRef, text: &str) -> Result<(), DriverFault> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_op(&mut inner, "send_keys");
        if let Some(fault) = Self::take_fault(&mut inner, "send_keys") {
            return Err(fault);
        }
        let element_id = Self::resolve(&inner, element)?;
        inner.typed.push((element_id, text.to_string()));
        Ok(())
    }

    async fn submit(&self, element: &RemoteRef) -> Result<(), DriverFault> {
        let mut inner = self.inner.lock().unwrap();
        Self::count_op(&mut inner, "submit");
        if let Some(fault) = Self::take_fault(&mut inner, "submit") {
            return Err(fault);
        }
        Self::resolve(&inner, element)?;
        Ok(())
    }

    async fn select_context(&self, frames: &[Locator]) -> Result<(), DriverFault> {
        let key = Self::ctx_key(frames);
        let mut inner = self.inner.lock().unwrap();
        Self::count_op(&mut inner, "select_context");
        if let Some(fault) = Self::take_fault(&mut inner, "select_context") {
            return Err(fault);
        }
        if !inner.contexts.contains(&key) {
            return Err(DriverFault::NotFound);
        }
        inner.current_context = key.clone();
        inner.select_log.push(key);
        Ok(())
    }

    async fn dismiss_modal(&self) -> Result<(), DriverFault> {
        let mut inner = self.inner.lock().unwrap();
        inner.dismissals += 1;
        Ok(())
    }

    async fn describe(&self, element: &RemoteRef) -> Result<String, DriverFault> {
        let inner = self.inner.lock().unwrap();
        let element_id = Self::resolve(&inner, element)?;
        Ok(format!("#{element_id}"))
    }

    async fn release(&self, element: &RemoteRef) -> Result<(), DriverFault> {
        let mut inner = self.inner.lock().unwrap();
        inner.handles.remove(element.id());
        inner.revoked.remove(element.id());
        Ok(())
    }
}
