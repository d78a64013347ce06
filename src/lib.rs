// typebus - A type-keyed in-process event bus for Rust
//
// Publish values of any type and deliver them to the handlers subscribed for
// that type. The subscriber registry is owned by a single worker thread and
// reached only through request/reply messages.

// Re-export the bus
pub use typebus_events::*;

/// Prelude for common imports
pub mod prelude {
    pub use typebus_events::{
        BusConfig, BusError, BusResult, Controller, ControllerBuilder, DeliveryReport,
        EventHandler, HandlerError, HandlerFailure, Qualifier, Subscription, SubscriptionHandle,
    };
}
