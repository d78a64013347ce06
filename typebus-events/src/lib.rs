//! Type-keyed in-process event bus
//!
//! Producers publish values of any type; consumers subscribe closures for a
//! specific event type; [`Controller::deliver`] replays everything queued so
//! far against the matching handlers. Events and handlers never need to
//! share a base type.
//!
//! ## Features
//!
//! - **Single-owner registry** - Handlers live on a dedicated worker thread
//!   and are reached only through request/reply messages, never a shared map
//! - **Deferred delivery** - `publish` only queues; `deliver` dispatches in
//!   FIFO order and leaves later publishes for the next pass
//! - **Qualified subscriptions** - By value, by `&mut` and by `&` are
//!   separate buckets
//! - **Failure isolation** - A failing or panicking handler is reported and
//!   skipped, it never aborts delivery
//! - **Clean shutdown** - Dropping the controller drains queued registry
//!   requests and joins the worker; later requests fail fast
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use typebus_events::Controller;
//!
//! #[derive(Debug, Clone)]
//! struct UserCreated {
//!     email: String,
//! }
//!
//! let controller = Controller::new().unwrap();
//! let outbox = Arc::new(Mutex::new(Vec::new()));
//!
//! let sink = outbox.clone();
//! controller
//!     .subscribe(move |event: UserCreated| sink.lock().unwrap().push(event.email))
//!     .unwrap();
//!
//! controller
//!     .publish(UserCreated { email: "alice@example.com".to_string() })
//!     .unwrap();
//! controller.deliver().unwrap();
//!
//! assert_eq!(*outbox.lock().unwrap(), vec!["alice@example.com".to_string()]);
//! ```
//!
//! ## Qualifiers
//!
//! ```rust
//! use typebus_events::{Controller, Qualifier};
//!
//! let controller = Controller::new().unwrap();
//! controller.subscribe_mut(|n: &mut u32| *n += 1).unwrap();
//! controller.subscribe_ref(|n: &u32| println!("saw {n}")).unwrap();
//!
//! // reaches only the `&mut` handler
//! controller.publish_mut(1u32).unwrap();
//! // reaches only the `&` handler
//! controller.publish_ref(2u32).unwrap();
//!
//! let report = controller.deliver().unwrap();
//! assert_eq!(report.invocations, 2);
//! assert_eq!(controller.handler_count::<u32>(Qualifier::Value).unwrap(), 0);
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use typebus_events::Controller;
//!
//! let controller = Controller::builder()
//!     .on_handler_error(|failure| eprintln!("handler failed: {}", failure.message))
//!     .build()
//!     .unwrap();
//!
//! controller
//!     .subscribe(|n: i32| if n < 0 { Err("negative") } else { Ok(()) })
//!     .unwrap();
//! controller.publish(-1).unwrap();
//!
//! let report = controller.deliver().unwrap();
//! assert_eq!(report.failures.len(), 1);
//! ```

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod key;
pub mod protocol;

mod queue;
mod registry;

pub use config::{BusConfig, DEFAULT_WORKER_THREAD_NAME, FailureHook};
pub use controller::{Controller, ControllerBuilder};
pub use dispatch::{DeliveryReport, HandlerFailure};
pub use error::{BusError, BusResult, HandlerError};
pub use handler::{EventHandler, HandlerOutcome, Subscription, SubscriptionHandle, SubscriptionId};
pub use key::{Qualifier, TypeKey};
pub use protocol::WorkerState;
