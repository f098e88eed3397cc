use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::ContextTracker;
use crate::driver::Driver;

pub(crate) struct SessionCore {
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) tracker: ContextTracker,
    pub(crate) config: EngineConfig,
}

/// One test execution's connection to a driver.
///
/// A `Session` owns the driver, the context tracker and the engine
/// configuration; element handles and poll calls are issued from it. Cloning
/// is cheap and clones share all state, but a session is never shared across
/// test executions.
#[derive(Clone)]
pub struct Session {
    pub(crate) core: Arc<SessionCore>,
}

impl Session {
    pub fn new(driver: Arc<dyn Driver>, config: EngineConfig) -> Self {
        let tracker = ContextTracker::new(driver.clone());
        Session {
            core: Arc::new(SessionCore {
                driver,
                tracker,
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn tracker(&self) -> &ContextTracker {
        &self.core.tracker
    }

    /// Fixed pause used after click-to-open actions, before inspecting the page again
    pub async fn settle(&self) {
        tokio::time::sleep(self.core.config.settle_delay).await;
    }
}
