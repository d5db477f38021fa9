use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use redis::{Commands, Connection};

use super::connect::connect;
use crate::bot::store::{KeyValueStore, StoreError};

/* Bucket operations on Redis
 * Each namespace is a Redis hash under "bucket:<name>".
 * A hash with no fields does not exist in Redis, so known namespaces are also kept
 * in the "namespaces" set. That set is what ensure_namespace writes to.
 */

const NAMESPACES_KEY: &str = "namespaces";
const BUCKET_KEY: &str = "bucket";

pub struct RedisStore {
    con: Mutex<Option<Connection>>,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let con = connect(url)?;
        Ok(RedisStore {
            con: Mutex::new(Some(con)),
        })
    }

    // Blocks on Redis I/O while holding the lock. Async callers go through store::run_blocking.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.con.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(con) => f(con),
            None => Err(StoreError::Closed),
        }
    }
}

// Fails unless the namespace was created with ensure_namespace.
fn assert_namespace(con: &mut Connection, namespace: &str) -> Result<(), StoreError> {
    let exists: bool = con.sismember(NAMESPACES_KEY, namespace)?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NoSuchNamespace(namespace.to_string()))
    }
}

fn bucket_key(namespace: &str) -> String {
    format!("{BUCKET_KEY}:{namespace}")
}

impl KeyValueStore for RedisStore {
    fn ensure_namespace(&self, name: &str) -> Result<(), StoreError> {
        self.with_connection(|con| {
            let _: () = con.sadd(NAMESPACES_KEY, name)?;
            Ok(())
        })
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        self.with_connection(|con| {
            assert_namespace(con, namespace)?;
            let value: Option<String> = con.hget(bucket_key(namespace), key)?;
            Ok(value)
        })
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_connection(|con| {
            assert_namespace(con, namespace)?;
            let _: () = con.hset(bucket_key(namespace), key, value)?;
            Ok(())
        })
    }

    // Deleting the hash leaves the namespace in the set, so it stays usable.
    fn clear(&self, namespace: &str) -> Result<(), StoreError> {
        self.with_connection(|con| {
            assert_namespace(con, namespace)?;
            let _: () = con.del(bucket_key(namespace))?;
            Ok(())
        })
    }

    fn for_each(
        &self,
        namespace: &str,
        visit: &mut dyn FnMut(&str, &str),
    ) -> Result<(), StoreError> {
        let entries: HashMap<String, String> = self.with_connection(|con| {
            assert_namespace(con, namespace)?;
            let entries: HashMap<String, String> = con.hgetall(bucket_key(namespace))?;
            Ok(entries)
        })?;

        for (key, value) in &entries {
            visit(key, value);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.con.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropping the connection closes it
        guard.take();
        Ok(())
    }
}
