use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration, passed explicitly at `Session` construction.
///
/// All timeouts are per-purpose rather than one global knob: callers that
/// need a different budget for a single call pass it on the request instead
/// of mutating shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Budget for ordinary element searches when the request does not set one
    pub default_timeout: Duration,
    /// Budget for probes that should fail fast (presence checks, dialog sniffing)
    pub tiny_timeout: Duration,
    /// Budget for waiting on something to appear after an opening action
    pub open_timeout: Duration,
    /// Budget for waiting on something to disappear after a closing action
    pub close_timeout: Duration,
    /// Pause between poll iterations
    pub poll_interval: Duration,
    /// Fixed pause after click-to-open actions, before the page is inspected again
    pub settle_delay: Duration,
    /// Maximum recovery attempts before a handle is declared lost
    pub max_recovery_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_timeout: Duration::from_secs(20),
            tiny_timeout: Duration::from_secs(2),
            open_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            settle_delay: Duration::from_secs(1),
            max_recovery_attempts: 5,
        }
    }
}

impl EngineConfig {
    /// Resolve a per-call timeout against the configured default
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.default_timeout)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
