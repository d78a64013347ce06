//! Delivery passes
//!
//! A pass takes the whole event queue at once, then for each event fetches
//! a snapshot of its bucket from the registry worker and calls every handler
//! in subscription order. Handler failures, panics included, are isolated:
//! they are logged, handed to the failure hook and collected in the
//! [`DeliveryReport`], and the pass moves on.

use crate::config::ControllerOptions;
use crate::error::{BusError, BusResult, HandlerError};
use crate::handler::{Subscriber, SubscriptionId};
use crate::key::{Qualifier, TypeKey};
use crate::protocol::{AsyncDeliveryScope, RegistryClient};
use crate::queue::{Batch, EventQueue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, trace, warn};

/// One failed handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerFailure {
    /// Handler that failed
    pub subscription: SubscriptionId,
    /// Event type name
    pub event_type: &'static str,
    /// Bucket qualifier
    pub qualifier: Qualifier,
    /// Publish sequence number of the event
    pub sequence: u64,
    /// What went wrong
    pub message: String,
    /// Whether the handler panicked rather than returning an error
    pub panicked: bool,
    /// When the failure was observed
    pub occurred_at: DateTime<Utc>,
}

impl HandlerFailure {
    fn new(subscription: SubscriptionId, key: TypeKey, sequence: u64, error: HandlerError) -> Self {
        Self {
            subscription,
            event_type: key.type_name(),
            qualifier: key.qualifier(),
            sequence,
            message: error.message().to_string(),
            panicked: error.is_panic(),
            occurred_at: Utc::now(),
        }
    }
}

/// Outcome of one `deliver()` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    /// Events taken off the queue and dispatched
    pub events: usize,
    /// Handler invocations attempted
    pub invocations: usize,
    /// Invocations that failed
    pub failures: Vec<HandlerFailure>,
}

impl DeliveryReport {
    /// True if every handler succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns the event queue and runs delivery passes against the registry.
pub(crate) struct Dispatcher {
    queue: EventQueue,
    delivering: AtomicBool,
    options: ControllerOptions,
}

impl Dispatcher {
    pub(crate) fn new(options: ControllerOptions) -> Self {
        Self {
            queue: EventQueue::new(options.config.max_pending_events),
            delivering: AtomicBool::new(false),
            options,
        }
    }

    pub(crate) fn queue(&self) -> &EventQueue {
        &self.queue
    }

    fn begin(&self) -> BusResult<DeliveryPass<'_>> {
        if self
            .delivering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BusError::DeliveryInProgress);
        }

        let batch = self.queue.take_all();
        if self.options.config.enable_logging && !batch.is_empty() {
            debug!(events = batch.len(), "Starting delivery pass");
        }
        Ok(DeliveryPass {
            dispatcher: self,
            batch,
            report: DeliveryReport::default(),
        })
    }

    /// Run one pass, blocking on each registry fetch.
    pub(crate) fn deliver(&self, registry: &RegistryClient) -> BusResult<DeliveryReport> {
        let mut pass = self.begin()?;
        while let Some(key) = pass.next_key() {
            let snapshot = registry.fetch(key)?;
            pass.dispatch_next(&snapshot);
        }
        Ok(pass.finish())
    }

    /// Run one pass, awaiting each registry fetch.
    pub(crate) async fn deliver_async(
        &self,
        registry: &RegistryClient,
    ) -> BusResult<DeliveryReport> {
        let mut pass = self.begin()?;
        while let Some(key) = pass.next_key() {
            let snapshot = registry.fetch_async(key).await?;
            let _scope = AsyncDeliveryScope::enter();
            pass.dispatch_next(&snapshot);
        }
        Ok(pass.finish())
    }

    fn report_failure(&self, failure: &HandlerFailure) {
        if self.options.config.enable_logging {
            error!(
                subscription = %failure.subscription,
                event_type = failure.event_type,
                qualifier = %failure.qualifier,
                sequence = failure.sequence,
                panicked = failure.panicked,
                "Handler failed: {}",
                failure.message
            );
        }
        let Some(hook) = &self.options.on_failure else {
            return;
        };
        if !self.options.config.catch_panics {
            hook(failure);
            return;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(failure))) {
            if self.options.config.enable_logging {
                warn!(
                    subscription = %failure.subscription,
                    sequence = failure.sequence,
                    "Failure hook panicked: {}",
                    panic_message(&*payload)
                );
            }
        }
    }
}

/// In-flight pass. Dropping it, whether finished, aborted by an error or
/// unwound by a panic, puts undelivered events back at the front of the
/// queue and releases the delivery flag.
struct DeliveryPass<'a> {
    dispatcher: &'a Dispatcher,
    batch: Batch,
    report: DeliveryReport,
}

impl DeliveryPass<'_> {
    fn next_key(&self) -> Option<TypeKey> {
        self.batch.front().map(|event| event.key())
    }

    fn dispatch_next(&mut self, snapshot: &[Subscriber]) {
        let Some(mut event) = self.batch.pop_front() else {
            return;
        };
        let key = event.key();
        let sequence = event.sequence();
        let logging = self.dispatcher.options.config.enable_logging;
        let catch_panics = self.dispatcher.options.config.catch_panics;

        if logging {
            if snapshot.is_empty() {
                debug!(%key, sequence, "No handlers registered for event");
            } else {
                trace!(%key, sequence, handlers = snapshot.len(), "Delivering event");
            }
        }

        for subscriber in snapshot {
            self.report.invocations += 1;

            let outcome = if catch_panics {
                panic::catch_unwind(AssertUnwindSafe(|| event.invoke(subscriber))).unwrap_or_else(
                    |payload| Some(Err(HandlerError::Panicked(panic_message(&*payload)))),
                )
            } else {
                event.invoke(subscriber)
            };

            let error = match outcome {
                Some(Ok(())) => continue,
                Some(Err(error)) => error,
                None => HandlerError::failed(format!("handler is not registered for {key}")),
            };

            let failure = HandlerFailure::new(subscriber.id, key, sequence, error);
            self.dispatcher.report_failure(&failure);
            self.report.failures.push(failure);
        }

        self.report.events += 1;
    }

    fn finish(mut self) -> DeliveryReport {
        std::mem::take(&mut self.report)
    }
}

impl Drop for DeliveryPass<'_> {
    fn drop(&mut self) {
        let remaining = std::mem::take(&mut self.batch);
        if !remaining.is_empty() && self.dispatcher.options.config.enable_logging {
            debug!(
                events = remaining.len(),
                "Delivery pass interrupted, requeueing"
            );
        }
        self.dispatcher.queue.requeue_front(remaining);
        self.dispatcher.delivering.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
