//! Controller: the public face of the bus

use crate::config::{BusConfig, ControllerOptions, FailureHook};
use crate::dispatch::{DeliveryReport, Dispatcher, HandlerFailure};
use crate::error::BusResult;
use crate::handler::{HandlerOutcome, Subscription, SubscriptionHandle};
use crate::key::{Qualifier, TypeKey};
use crate::protocol::{RegistryClient, WorkerState};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Type-keyed publish/subscribe controller.
///
/// Construction starts the registry worker and returns once it is ready;
/// dropping the controller stops and joins it. All methods take `&self`,
/// so a controller can be shared across threads behind an `Arc`.
///
/// The blocking methods (`subscribe*`, `unsubscribe`, `deliver`,
/// `handler_count`) park the calling thread on the worker's reply and must
/// not be called from an async runtime worker; use the `*_async` variants
/// there. Called from ordinary async code they panic inside tokio. Called
/// from a handler that is running under
/// [`deliver_async`](Self::deliver_async) they are refused with
/// [`BusError::BlockingInAsyncDelivery`](crate::BusError::BlockingInAsyncDelivery)
/// and have no effect; such a handler may still publish.
pub struct Controller {
    registry: RegistryClient,
    dispatcher: Dispatcher,
    worker: Mutex<Option<JoinHandle<()>>>,
    enable_logging: bool,
}

impl Controller {
    /// Create a controller with the default configuration.
    pub fn new() -> BusResult<Self> {
        Self::with_config(BusConfig::default())
    }

    /// Create a controller with a custom configuration.
    pub fn with_config(config: BusConfig) -> BusResult<Self> {
        Self::with_options(ControllerOptions {
            config,
            on_failure: None,
        })
    }

    /// Start building a controller.
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    fn with_options(options: ControllerOptions) -> BusResult<Self> {
        let (registry, worker) = RegistryClient::spawn(&options.config)?;
        let enable_logging = options.config.enable_logging;
        if enable_logging {
            debug!(
                worker = %options.config.worker_thread_name,
                "Event controller ready"
            );
        }

        Ok(Self {
            registry,
            dispatcher: Dispatcher::new(options),
            worker: Mutex::new(Some(worker)),
            enable_logging,
        })
    }

    /// Subscribe a handler that receives its own clone of each event.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicI32, Ordering};
    /// use typebus_events::Controller;
    ///
    /// let controller = Controller::new().unwrap();
    /// let last = Arc::new(AtomicI32::new(0));
    /// let seen = last.clone();
    /// controller
    ///     .subscribe(move |n: i32| seen.store(n, Ordering::SeqCst))
    ///     .unwrap();
    ///
    /// controller.publish(4).unwrap();
    /// controller.deliver().unwrap();
    /// assert_eq!(last.load(Ordering::SeqCst), 4);
    /// ```
    pub fn subscribe<E, F, R>(&self, handler: F) -> BusResult<SubscriptionHandle>
    where
        E: Clone + Send + 'static,
        F: Fn(E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        self.subscribe_with(Subscription::by_value(handler))
    }

    /// Subscribe a handler that receives `&mut E` for events sent with
    /// [`publish_mut`](Self::publish_mut).
    pub fn subscribe_mut<E, F, R>(&self, handler: F) -> BusResult<SubscriptionHandle>
    where
        E: Send + 'static,
        F: Fn(&mut E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        self.subscribe_with(Subscription::by_mut(handler))
    }

    /// Subscribe a handler that receives `&E` for events sent with
    /// [`publish_ref`](Self::publish_ref).
    pub fn subscribe_ref<E, F, R>(&self, handler: F) -> BusResult<SubscriptionHandle>
    where
        E: Send + 'static,
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        self.subscribe_with(Subscription::by_ref(handler))
    }

    /// Subscribe a prepared [`Subscription`].
    pub fn subscribe_with<E: Send + 'static>(
        &self,
        subscription: Subscription<E>,
    ) -> BusResult<SubscriptionHandle> {
        let (key, handler) = subscription.into_erased();
        self.registry.push(key, handler)
    }

    /// Async form of [`subscribe_with`](Self::subscribe_with).
    pub async fn subscribe_async<E: Send + 'static>(
        &self,
        subscription: Subscription<E>,
    ) -> BusResult<SubscriptionHandle> {
        let (key, handler) = subscription.into_erased();
        self.registry.push_async(key, handler).await
    }

    /// Remove a handler so later deliveries skip it.
    ///
    /// Returns `false` if the handle is unknown or was issued for another
    /// bucket. A delivery pass already holding a snapshot may still call
    /// the handler once.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> BusResult<bool> {
        self.registry.remove(*handle)
    }

    /// Async form of [`unsubscribe`](Self::unsubscribe).
    pub async fn unsubscribe_async(&self, handle: &SubscriptionHandle) -> BusResult<bool> {
        self.registry.remove_async(*handle).await
    }

    /// Queue an event for handlers subscribed with [`subscribe`](Self::subscribe).
    pub fn publish<E: Send + 'static>(&self, event: E) -> BusResult<()> {
        self.enqueue(Qualifier::Value, event)
    }

    /// Queue an event for handlers subscribed with [`subscribe_mut`](Self::subscribe_mut).
    pub fn publish_mut<E: Send + 'static>(&self, event: E) -> BusResult<()> {
        self.enqueue(Qualifier::Mut, event)
    }

    /// Queue an event for handlers subscribed with [`subscribe_ref`](Self::subscribe_ref).
    pub fn publish_ref<E: Send + 'static>(&self, event: E) -> BusResult<()> {
        self.enqueue(Qualifier::Ref, event)
    }

    fn enqueue<E: Send + 'static>(&self, qualifier: Qualifier, event: E) -> BusResult<()> {
        let sequence = self.dispatcher.queue().push(qualifier, event)?;
        if self.enable_logging {
            trace!(key = %TypeKey::of::<E>(qualifier), sequence, "Event published");
        }
        Ok(())
    }

    /// Dispatch every event queued before this call, in publish order.
    ///
    /// Events published while the pass runs are left for the next call.
    /// Handler failures do not abort the pass; they are reported in the
    /// returned [`DeliveryReport`]. Only one pass runs at a time: a
    /// concurrent or re-entrant call gets
    /// [`BusError::DeliveryInProgress`](crate::BusError::DeliveryInProgress).
    pub fn deliver(&self) -> BusResult<DeliveryReport> {
        let report = self.dispatcher.deliver(&self.registry)?;
        self.log_report(&report);
        Ok(report)
    }

    /// Async form of [`deliver`](Self::deliver). Handlers still run inline.
    pub async fn deliver_async(&self) -> BusResult<DeliveryReport> {
        let report = self.dispatcher.deliver_async(&self.registry).await?;
        self.log_report(&report);
        Ok(report)
    }

    fn log_report(&self, report: &DeliveryReport) {
        if self.enable_logging && report.events > 0 {
            debug!(
                events = report.events,
                invocations = report.invocations,
                failures = report.failures.len(),
                "Delivery pass complete"
            );
        }
    }

    /// Number of handlers subscribed for `E` under `qualifier`.
    pub fn handler_count<E: 'static>(&self, qualifier: Qualifier) -> BusResult<usize> {
        self.registry.count(TypeKey::of::<E>(qualifier))
    }

    /// Number of events waiting for the next delivery pass.
    pub fn pending_events(&self) -> usize {
        self.dispatcher.queue().len()
    }

    /// Current state of the registry worker.
    pub fn worker_state(&self) -> WorkerState {
        self.registry.state()
    }

    /// Stop the registry worker and wait for it to exit.
    ///
    /// Publishing is closed first, so every publish either lands before
    /// this call returns or fails with
    /// [`BusError::Stopped`](crate::BusError::Stopped). Registry requests
    /// already queued are completed; later ones fail the same way.
    /// Concurrent callers all return only after the worker has exited.
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        self.dispatcher.queue().close();

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let stopping = self.registry.stop();
        if let Some(handle) = worker.take() {
            if handle.join().is_err() && self.enable_logging {
                warn!("Registry worker panicked during shutdown");
            }
        }
        drop(worker);

        if stopping && self.enable_logging {
            info!(
                undelivered = self.pending_events(),
                "Event controller shut down"
            );
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("worker_state", &self.worker_state())
            .field("pending_events", &self.pending_events())
            .finish()
    }
}

/// Controller builder
pub struct ControllerBuilder {
    options: ControllerOptions,
}

impl ControllerBuilder {
    /// Create new controller builder
    pub fn new() -> Self {
        Self {
            options: ControllerOptions::default(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: BusConfig) -> Self {
        self.options.config = config;
        self
    }

    /// Enable/disable logging
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.options.config.enable_logging = enabled;
        self
    }

    /// Enable/disable panic isolation for handlers
    pub fn catch_panics(mut self, enabled: bool) -> Self {
        self.options.config.catch_panics = enabled;
        self
    }

    /// Limit the number of queued events
    pub fn max_pending_events(mut self, limit: usize) -> Self {
        self.options.config.max_pending_events = Some(limit);
        self
    }

    /// Limit the number of registered handlers
    pub fn max_subscribers(mut self, limit: usize) -> Self {
        self.options.config.max_subscribers = Some(limit);
        self
    }

    /// Name the registry worker thread
    pub fn worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.options.config.worker_thread_name = name.into();
        self
    }

    /// Callback for every failed handler invocation
    pub fn on_handler_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandlerFailure) + Send + Sync + 'static,
    {
        let hook: FailureHook = Arc::new(hook);
        self.options.on_failure = Some(hook);
        self
    }

    /// Build the controller, starting its registry worker
    pub fn build(self) -> BusResult<Controller> {
        Controller::with_options(self.options)
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
