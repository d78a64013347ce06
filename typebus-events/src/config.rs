//! Controller configuration

use crate::dispatch::HandlerFailure;
use crate::error::BusResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default name of the registry worker thread.
pub const DEFAULT_WORKER_THREAD_NAME: &str = "typebus-registry";

/// Callback invoked for every failed handler invocation.
pub type FailureHook = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;

/// Event bus configuration
///
/// Every field has a default, so partial JSON documents are accepted:
///
/// ```
/// use typebus_events::BusConfig;
///
/// let config = BusConfig::from_json(r#"{ "max_pending_events": 1024 }"#).unwrap();
/// assert_eq!(config.max_pending_events, Some(1024));
/// assert!(config.enable_logging);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Enable event logging
    pub enable_logging: bool,

    /// Catch handler panics instead of unwinding out of `deliver()`
    pub catch_panics: bool,

    /// Reject `publish` once this many events are waiting (unbounded if `None`)
    pub max_pending_events: Option<usize>,

    /// Reject `subscribe` once this many handlers are registered (unbounded if `None`)
    pub max_subscribers: Option<usize>,

    /// Name given to the registry worker thread
    pub worker_thread_name: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enable_logging: true,
            catch_panics: true,
            max_pending_events: None,
            max_subscribers: None,
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

impl BusConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> BusResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Configuration plus the runtime-only failure hook.
#[derive(Clone, Default)]
pub(crate) struct ControllerOptions {
    pub(crate) config: BusConfig,
    pub(crate) on_failure: Option<FailureHook>,
}

impl fmt::Debug for ControllerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerOptions")
            .field("config", &self.config)
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}
