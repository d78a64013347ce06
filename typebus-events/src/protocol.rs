//! Registry access protocol
//!
//! The [`SubscriberRegistry`] lives on a dedicated worker thread and is
//! never shared. Every other thread reaches it by sending a
//! [`RegistryCommand`] and waiting on the command's one-shot reply.
//!
//! ```text
//! caller A ──┐
//!            │  push / fetch / remove / count
//! caller B ──┼──► mpsc::UnboundedSender<RegistryCommand> ──► RegistryWorker
//!            │                                                   │
//! caller C ──┘  ◄── oneshot reply (one per request) ─────────────┘
//! ```
//!
//! Commands are applied strictly one at a time in arrival order, so a push
//! that has returned is visible to every fetch issued afterwards.
//!
//! # Shutdown
//!
//! Stopping is two-phase. [`RegistryClient::stop`] first refuses new
//! requests, then enqueues `Stop`. When the worker sees it, it closes its
//! receiver (later sends fail), runs whatever was queued ahead of the
//! close, and exits. A caller whose request never ran gets
//! [`BusError::Stopped`] because its reply sender is dropped; nobody is
//! left waiting.
//!
//! # Blocking inside async delivery
//!
//! Handlers run inline on the thread driving `deliver_async`, which is an
//! async runtime worker where `blocking_recv` would panic. While such a
//! handler runs, blocking requests are refused up front with
//! [`BusError::BlockingInAsyncDelivery`] and never reach the worker.

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::handler::{ErasedHandler, Subscriber, SubscriptionHandle};
use crate::key::TypeKey;
use crate::registry::SubscriberRegistry;
use serde::Serialize;
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// What the registry worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for the next command
    Idle = 0,
    /// Appending a handler
    HandlingPush = 1,
    /// Reading a bucket: a snapshot for delivery or a handler count
    HandlingFetch = 2,
    /// Erasing a handler
    HandlingRemove = 3,
    /// Exited; all further requests fail
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::HandlingPush,
            2 => WorkerState::HandlingFetch,
            3 => WorkerState::HandlingRemove,
            _ => WorkerState::Stopped,
        }
    }
}

#[derive(Debug)]
struct WorkerStateCell(AtomicU8);

impl WorkerStateCell {
    fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Idle as u8))
    }

    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

thread_local! {
    static IN_ASYNC_DELIVERY: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running handlers for `deliver_async` until
/// dropped. Nests; the previous mark is restored on drop.
pub(crate) struct AsyncDeliveryScope {
    previous: bool,
}

impl AsyncDeliveryScope {
    pub(crate) fn enter() -> Self {
        Self {
            previous: IN_ASYNC_DELIVERY.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for AsyncDeliveryScope {
    fn drop(&mut self) {
        IN_ASYNC_DELIVERY.with(|flag| flag.set(self.previous));
    }
}

fn in_async_delivery() -> bool {
    IN_ASYNC_DELIVERY.with(Cell::get)
}

/// Requests understood by the registry worker.
pub(crate) enum RegistryCommand {
    /// Append a handler to a bucket.
    Push {
        key: TypeKey,
        handler: ErasedHandler,
        reply: oneshot::Sender<BusResult<SubscriptionHandle>>,
    },

    /// Copy a bucket.
    Fetch {
        key: TypeKey,
        reply: oneshot::Sender<Vec<Subscriber>>,
    },

    /// Erase a handler; replies whether it existed.
    Remove {
        handle: SubscriptionHandle,
        reply: oneshot::Sender<bool>,
    },

    /// Number of handlers in a bucket.
    Count {
        key: TypeKey,
        reply: oneshot::Sender<usize>,
    },

    /// Begin shutdown.
    Stop,
}

/// Owner of the registry. Runs on its own thread until stopped.
struct RegistryWorker {
    registry: SubscriberRegistry,
    commands: mpsc::UnboundedReceiver<RegistryCommand>,
    state: Arc<WorkerStateCell>,
    enable_logging: bool,
}

impl RegistryWorker {
    fn run(mut self, ready: std::sync::mpsc::Sender<()>) {
        self.state.set(WorkerState::Idle);
        let _ = ready.send(());

        if self.enable_logging {
            info!("Registry worker started");
        }

        while let Some(command) = self.commands.blocking_recv() {
            if matches!(command, RegistryCommand::Stop) {
                break;
            }
            self.apply(command);
        }

        self.commands.close();
        let mut drained = 0usize;
        while let Some(command) = self.commands.blocking_recv() {
            if !matches!(command, RegistryCommand::Stop) {
                self.apply(command);
                drained += 1;
            }
        }

        self.state.set(WorkerState::Stopped);
        if self.enable_logging {
            info!(
                drained,
                subscribers = self.registry.len(),
                "Registry worker stopped"
            );
        }
    }

    fn apply(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Push {
                key,
                handler,
                reply,
            } => {
                self.state.set(WorkerState::HandlingPush);
                let result = self.registry.push(key, handler);
                if self.enable_logging {
                    match &result {
                        Ok(handle) => debug!(%key, subscription = %handle.id(), "Handler subscribed"),
                        Err(e) => warn!(%key, "Subscribe rejected: {}", e),
                    }
                }
                if reply.send(result).is_err() && self.enable_logging {
                    trace!(%key, "Subscriber went away before push completed");
                }
            }

            RegistryCommand::Fetch { key, reply } => {
                self.state.set(WorkerState::HandlingFetch);
                let _ = reply.send(self.registry.snapshot(&key));
            }

            RegistryCommand::Remove { handle, reply } => {
                self.state.set(WorkerState::HandlingRemove);
                let removed = self.registry.remove(&handle);
                if self.enable_logging {
                    debug!(
                        key = %handle.key(),
                        subscription = %handle.id(),
                        removed,
                        "Unsubscribe processed"
                    );
                }
                let _ = reply.send(removed);
            }

            RegistryCommand::Count { key, reply } => {
                self.state.set(WorkerState::HandlingFetch);
                let _ = reply.send(self.registry.count(&key));
            }

            RegistryCommand::Stop => {}
        }
        self.state.set(WorkerState::Idle);
    }
}

/// Caller side of the protocol. Safe to use from any number of threads.
pub(crate) struct RegistryClient {
    commands: mpsc::UnboundedSender<RegistryCommand>,
    accepting: AtomicBool,
    state: Arc<WorkerStateCell>,
}

impl RegistryClient {
    /// Spawn the registry worker and wait until it is ready for requests.
    pub(crate) fn spawn(config: &BusConfig) -> BusResult<(Self, JoinHandle<()>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(WorkerStateCell::new());
        let worker = RegistryWorker {
            registry: SubscriberRegistry::new(config.max_subscribers),
            commands: rx,
            state: state.clone(),
            enable_logging: config.enable_logging,
        };

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let handle = thread::Builder::new()
            .name(config.worker_thread_name.clone())
            .spawn(move || worker.run(ready_tx))?;

        if ready_rx.recv().is_err() {
            let _ = handle.join();
            return Err(BusError::WorkerStartup);
        }

        let client = Self {
            commands: tx,
            accepting: AtomicBool::new(true),
            state,
        };
        Ok((client, handle))
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Refuse new requests and ask the worker to drain and exit.
    ///
    /// Returns `false` if the client was already stopped.
    pub(crate) fn stop(&self) -> bool {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return false;
        }
        let _ = self.commands.send(RegistryCommand::Stop);
        true
    }

    fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> BusResult<oneshot::Receiver<T>> {
        if !self.is_accepting() {
            return Err(BusError::Stopped);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| BusError::Stopped)?;
        Ok(response)
    }

    // Blocks the calling thread; must not run on an async runtime worker.
    fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> BusResult<T> {
        if in_async_delivery() {
            return Err(BusError::BlockingInAsyncDelivery);
        }
        self.request(command)?
            .blocking_recv()
            .map_err(|_| BusError::Stopped)
    }

    async fn call_async<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> BusResult<T> {
        self.request(command)?.await.map_err(|_| BusError::Stopped)
    }

    pub(crate) fn push(
        &self,
        key: TypeKey,
        handler: ErasedHandler,
    ) -> BusResult<SubscriptionHandle> {
        self.call(|reply| RegistryCommand::Push {
            key,
            handler,
            reply,
        })?
    }

    pub(crate) async fn push_async(
        &self,
        key: TypeKey,
        handler: ErasedHandler,
    ) -> BusResult<SubscriptionHandle> {
        self.call_async(|reply| RegistryCommand::Push {
            key,
            handler,
            reply,
        })
        .await?
    }

    pub(crate) fn fetch(&self, key: TypeKey) -> BusResult<Vec<Subscriber>> {
        self.call(|reply| RegistryCommand::Fetch { key, reply })
    }

    pub(crate) async fn fetch_async(&self, key: TypeKey) -> BusResult<Vec<Subscriber>> {
        self.call_async(|reply| RegistryCommand::Fetch { key, reply })
            .await
    }

    pub(crate) fn remove(&self, handle: SubscriptionHandle) -> BusResult<bool> {
        self.call(|reply| RegistryCommand::Remove { handle, reply })
    }

    pub(crate) async fn remove_async(&self, handle: SubscriptionHandle) -> BusResult<bool> {
        self.call_async(|reply| RegistryCommand::Remove { handle, reply })
            .await
    }

    pub(crate) fn count(&self, key: TypeKey) -> BusResult<usize> {
        self.call(|reply| RegistryCommand::Count { key, reply })
    }
}
