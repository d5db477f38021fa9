use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use redis::RedisError;
use tokio::task::{self, JoinError};

/* Store is the key-value gateway used by handlers that need durable state.
 * Data lives in named namespaces ("buckets") of string keys to string values.
 * Values are opaque here; interpreting them is the caller's job.
 * Namespaces must be created with ensure_namespace before use. Creating one twice is a no-op.
 * Every call blocks the calling thread. Async code goes through run_blocking.
 */

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Redis operation error: {0}")]
    RedisError(RedisError),
    #[error("No such namespace: {0}")]
    NoSuchNamespace(String),
    #[error("Store is closed")]
    Closed,
    #[error("Store task failed: {0}")]
    TaskError(JoinError),
}

impl From<RedisError> for StoreError {
    fn from(redis_error: RedisError) -> StoreError {
        StoreError::RedisError(redis_error)
    }
}

pub trait KeyValueStore: Send + Sync {
    // Creates the namespace if it does not exist yet.
    fn ensure_namespace(&self, name: &str) -> Result<(), StoreError>;

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;

    // Removes every entry, the namespace itself stays.
    fn clear(&self, namespace: &str) -> Result<(), StoreError>;

    // Visits every entry once, in the store's own order.
    fn for_each(
        &self,
        namespace: &str,
        visit: &mut dyn FnMut(&str, &str),
    ) -> Result<(), StoreError>;

    // Releases the store. Every later call fails with StoreError::Closed.
    fn close(&self) -> Result<(), StoreError>;
}

/* Utility functions */

// Ensures all namespaces exist. Called once at start-up, failure is fatal.
pub fn ensure_namespaces(store: &dyn KeyValueStore, names: &[&str]) -> Result<(), StoreError> {
    for name in names {
        store.ensure_namespace(name)?;
    }
    Ok(())
}

// Runs store calls on tokio's blocking pool so they never stall a runtime worker.
pub async fn run_blocking<T, E, F>(store: Arc<dyn KeyValueStore>, f: F) -> Result<T, E>
where
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
    F: FnOnce(&dyn KeyValueStore) -> Result<T, E> + Send + 'static,
{
    match task::spawn_blocking(move || f(store.as_ref())).await {
        Ok(result) => result,
        Err(join_error) => Err(StoreError::TaskError(join_error).into()),
    }
}

pub fn is_empty(store: &dyn KeyValueStore, namespace: &str) -> Result<bool, StoreError> {
    let mut count = 0;
    store.for_each(namespace, &mut |_, _| count += 1)?;
    Ok(count == 0)
}

/// Store kept entirely in memory. Nothing survives the process.
pub struct MemoryStore {
    namespaces: Mutex<Option<HashMap<String, BTreeMap<String, String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            namespaces: Mutex::new(Some(HashMap::new())),
        }
    }

    fn with_namespaces<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, BTreeMap<String, String>>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(namespaces) => f(namespaces),
            None => Err(StoreError::Closed),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn ensure_namespace(&self, name: &str) -> Result<(), StoreError> {
        self.with_namespaces(|namespaces| {
            namespaces.entry(name.to_string()).or_default();
            Ok(())
        })
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        self.with_namespaces(|namespaces| {
            let bucket = namespaces
                .get(namespace)
                .ok_or_else(|| StoreError::NoSuchNamespace(namespace.to_string()))?;
            Ok(bucket.get(key).cloned())
        })
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_namespaces(|namespaces| {
            let bucket = namespaces
                .get_mut(namespace)
                .ok_or_else(|| StoreError::NoSuchNamespace(namespace.to_string()))?;
            bucket.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn clear(&self, namespace: &str) -> Result<(), StoreError> {
        self.with_namespaces(|namespaces| {
            let bucket = namespaces
                .get_mut(namespace)
                .ok_or_else(|| StoreError::NoSuchNamespace(namespace.to_string()))?;
            bucket.clear();
            Ok(())
        })
    }

    fn for_each(
        &self,
        namespace: &str,
        visit: &mut dyn FnMut(&str, &str),
    ) -> Result<(), StoreError> {
        // Copy out first so the visitor may call back into the store
        let entries: Vec<(String, String)> = self.with_namespaces(|namespaces| {
            let bucket = namespaces
                .get(namespace)
                .ok_or_else(|| StoreError::NoSuchNamespace(namespace.to_string()))?;
            Ok(bucket
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })?;

        for (key, value) in &entries {
            visit(key, value);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        Ok(())
    }
}
