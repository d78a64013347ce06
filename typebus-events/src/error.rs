//! Error types for bus operations.

use thiserror::Error;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Errors raised by the controller, the registry protocol and the event queue.
#[derive(Debug, Error)]
pub enum BusError {
    /// The registry worker has stopped (or is stopping) and rejected the request
    #[error("Event bus is stopped")]
    Stopped,

    /// A configured capacity limit was hit
    #[error("Capacity exceeded for {resource}: limit is {limit}")]
    CapacityExceeded {
        /// Which resource overflowed ("pending events" or "subscribers")
        resource: &'static str,
        /// The configured limit
        limit: usize,
    },

    /// Another delivery pass is already running
    #[error("A delivery pass is already in progress")]
    DeliveryInProgress,

    /// A handler running under `deliver_async` made a blocking registry call
    #[error("Blocking registry call from a handler inside deliver_async; use the async variant")]
    BlockingInAsyncDelivery,

    /// The registry worker thread could not be spawned
    #[error("Failed to spawn registry worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The registry worker exited before signalling readiness
    #[error("Registry worker exited before becoming ready")]
    WorkerStartup,

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Failure reported by a single handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler returned an error
    #[error("Handler failed: {0}")]
    Failed(String),

    /// The handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Create a failure from any displayable error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Whether this failure came from a panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// The failure message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Failed(m) | Self::Panicked(m) => m,
        }
    }
}
