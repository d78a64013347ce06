//! Handlers, subscriptions and their type-erased registry form

use crate::error::HandlerError;
use crate::key::{Qualifier, TypeKey};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier of one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque handle returned by subscribe.
///
/// Only valid for the bucket it was issued for: unsubscribing with a
/// handle whose key disagrees with the registered one is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    key: TypeKey,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, key: TypeKey) -> Self {
        Self { id, key }
    }

    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Bucket the handler lives in.
    pub fn key(&self) -> TypeKey {
        self.key
    }
}

/// Handler trait for struct-based handlers.
///
/// Registered through [`Subscription::handler`], which files it in the
/// by-reference bucket.
pub trait EventHandler<E>: Send + Sync + 'static {
    /// Handle the event
    fn handle(&self, event: &E) -> Result<(), HandlerError>;
}

/// Return types a handler closure may produce.
pub trait HandlerOutcome {
    /// Normalize into a handler result
    fn into_result(self) -> Result<(), HandlerError>;
}

impl HandlerOutcome for () {
    fn into_result(self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<D: fmt::Display> HandlerOutcome for Result<(), D> {
    fn into_result(self) -> Result<(), HandlerError> {
        self.map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

/// Uniform callable every qualifier is lowered to.
pub(crate) type HandlerFn<E> = Box<dyn Fn(&mut E) -> Result<(), HandlerError> + Send + Sync>;

/// A `HandlerFn<E>` with `E` erased.
pub(crate) type ErasedHandler = Arc<dyn Any + Send + Sync>;

/// A handler ready to be pushed into the registry.
pub struct Subscription<E> {
    qualifier: Qualifier,
    handler: HandlerFn<E>,
}

impl<E: Send + 'static> Subscription<E> {
    /// Handler receiving its own clone of each event.
    pub fn by_value<F, R>(handler: F) -> Self
    where
        E: Clone,
        F: Fn(E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        Self {
            qualifier: Qualifier::Value,
            handler: Box::new(move |event: &mut E| handler(event.clone()).into_result()),
        }
    }

    /// Handler receiving `&mut E`; later handlers observe its changes.
    pub fn by_mut<F, R>(handler: F) -> Self
    where
        F: Fn(&mut E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        Self {
            qualifier: Qualifier::Mut,
            handler: Box::new(move |event: &mut E| handler(event).into_result()),
        }
    }

    /// Handler receiving `&E`.
    pub fn by_ref<F, R>(handler: F) -> Self
    where
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        Self {
            qualifier: Qualifier::Ref,
            handler: Box::new(move |event: &mut E| handler(&*event).into_result()),
        }
    }

    /// Struct-based handler, filed under [`Qualifier::Ref`].
    pub fn handler<H: EventHandler<E>>(handler: H) -> Self {
        Self {
            qualifier: Qualifier::Ref,
            handler: Box::new(move |event: &mut E| handler.handle(event)),
        }
    }

    /// Bucket this subscription targets.
    pub fn key(&self) -> TypeKey {
        TypeKey::of::<E>(self.qualifier)
    }

    pub(crate) fn into_erased(self) -> (TypeKey, ErasedHandler) {
        let key = self.key();
        (key, Arc::new(self.handler))
    }
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &std::any::type_name::<E>())
            .field("qualifier", &self.qualifier)
            .finish()
    }
}

/// One registry entry. Cloning shares the handler, so snapshots stay
/// valid after the entry is removed from the registry.
#[derive(Clone)]
pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    handler: ErasedHandler,
}

impl Subscriber {
    pub(crate) fn new(id: SubscriptionId, handler: ErasedHandler) -> Self {
        Self { id, handler }
    }

    /// Invoke with a typed event. `None` if the stored handler is not for `E`.
    pub(crate) fn invoke<E: 'static>(&self, event: &mut E) -> Option<Result<(), HandlerError>> {
        self.handler
            .downcast_ref::<HandlerFn<E>>()
            .map(|handler| handler(event))
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}
