//! Per-resource locking
//!
//! Each wallet set, shop, investment and request lives behind its own mutex.
//! Acquisition is bounded; a timeout becomes [`Error::ConcurrencyConflict`].
//!
//! Lock order across resources: request → investment → wallet → shop.

use dashmap::DashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};

/// Map of independently lockable records
pub struct LockTable<K, V> {
    label: &'static str,
    items: DashMap<K, Arc<Mutex<V>>>,
    timeout: Duration,
}

impl<K, V> LockTable<K, V>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new(label: &'static str, timeout: Duration) -> Self {
        Self {
            label,
            items: DashMap::new(),
            timeout,
        }
    }

    /// Insert a new record; returns false if the key is taken
    pub fn insert(&self, key: K, value: V) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.items.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(value)));
                true
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.items.iter().map(|e| e.key().clone()).collect()
    }

    /// Lock an existing record
    pub async fn lock(&self, key: &K) -> Result<OwnedMutexGuard<V>> {
        // Clone the handle out so no map shard is held across the await
        let handle = self
            .items
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::NotFound(format!("{} {}", self.label, key)))?;
        self.acquire(handle, key).await
    }

    /// Lock a record, creating it first if absent
    pub async fn lock_or_insert_with<F>(&self, key: &K, init: F) -> Result<OwnedMutexGuard<V>>
    where
        F: FnOnce() -> V,
    {
        let handle = Arc::clone(
            self.items
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(init())))
                .value(),
        );
        self.acquire(handle, key).await
    }

    /// Clone out the current value of a record
    pub async fn read(&self, key: &K) -> Result<V>
    where
        V: Clone,
    {
        Ok(self.lock(key).await?.clone())
    }

    /// Clone out every record, locking each in turn
    pub async fn values(&self) -> Result<Vec<V>>
    where
        V: Clone,
    {
        let mut out = Vec::with_capacity(self.items.len());
        for key in self.keys() {
            out.push(self.read(&key).await?);
        }
        Ok(out)
    }

    async fn acquire(&self, handle: Arc<Mutex<V>>, key: &K) -> Result<OwnedMutexGuard<V>> {
        tokio::time::timeout(self.timeout, handle.lock_owned())
            .await
            .map_err(|_| {
                Error::ConcurrencyConflict(format!(
                    "timed out after {}ms waiting for {} {}",
                    self.timeout.as_millis(),
                    self.label,
                    key
                ))
            })
    }
}
