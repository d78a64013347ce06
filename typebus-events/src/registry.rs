//! Subscriber registry
//!
//! Plain single-threaded storage. It is owned by the registry worker and is
//! never shared, so it carries no locks; see [`crate::protocol`] for how
//! other threads reach it.

use crate::error::{BusError, BusResult};
use crate::handler::{ErasedHandler, Subscriber, SubscriptionHandle, SubscriptionId};
use crate::key::TypeKey;
use std::collections::HashMap;

/// Per-key ordered handler collections.
#[derive(Debug, Default)]
pub(crate) struct SubscriberRegistry {
    buckets: HashMap<TypeKey, Vec<Subscriber>>,
    index: HashMap<SubscriptionId, TypeKey>,
    max_subscribers: Option<usize>,
}

impl SubscriberRegistry {
    pub(crate) fn new(max_subscribers: Option<usize>) -> Self {
        Self {
            buckets: HashMap::new(),
            index: HashMap::new(),
            max_subscribers,
        }
    }

    /// Append a handler to the end of its bucket.
    pub(crate) fn push(
        &mut self,
        key: TypeKey,
        handler: ErasedHandler,
    ) -> BusResult<SubscriptionHandle> {
        if let Some(limit) = self.max_subscribers {
            if self.index.len() >= limit {
                return Err(BusError::CapacityExceeded {
                    resource: "subscribers",
                    limit,
                });
            }
        }

        let id = SubscriptionId::new();
        self.buckets
            .entry(key)
            .or_default()
            .push(Subscriber::new(id, handler));
        self.index.insert(id, key);

        Ok(SubscriptionHandle::new(id, key))
    }

    /// Copy of the bucket in insertion order.
    pub(crate) fn snapshot(&self, key: &TypeKey) -> Vec<Subscriber> {
        self.buckets.get(key).cloned().unwrap_or_default()
    }

    /// Erase the handler behind `handle`.
    ///
    /// Returns `false` if it is unknown or the handle names another bucket.
    pub(crate) fn remove(&mut self, handle: &SubscriptionHandle) -> bool {
        match self.index.get(&handle.id()) {
            Some(key) if *key == handle.key() => {}
            _ => return false,
        }
        self.index.remove(&handle.id());

        let key = handle.key();
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|s| s.id != handle.id());
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        true
    }

    pub(crate) fn count(&self, key: &TypeKey) -> usize {
        self.buckets.get(key).map(Vec::len).unwrap_or(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }
}
