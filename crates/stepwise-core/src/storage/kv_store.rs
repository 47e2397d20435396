//! Key-value store trait and the process-local implementation.
//!
//! Backs the `memory` tool. One store is shared by every step of every
//! execution on the same executor instance; each operation is atomic with
//! respect to the others.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from key-value operations.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for JSON key-value storage.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait KvStore: Send + Sync {
    /// Get a value by key. Returns None if the key does not exist.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Value>, KvError>> + Send;

    /// Set a value for a key (upsert).
    fn set(
        &self,
        key: &str,
        value: Value,
    ) -> impl std::future::Future<Output = Result<(), KvError>> + Send;

    /// Delete a key, returning the previous value.
    fn delete(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Value>, KvError>> + Send;

    /// Append to the value at `key` and return the new value.
    ///
    /// Strings concatenate, arrays gain an element, a missing key is set to
    /// `value`. Any other combination concatenates the string forms.
    fn append(
        &self,
        key: &str,
        value: Value,
    ) -> impl std::future::Future<Output = Result<Value, KvError>> + Send;

    /// All keys, sorted.
    fn keys(&self) -> impl std::future::Future<Output = Result<Vec<String>, KvError>> + Send;
}

/// Combine an existing value with an appended one.
pub fn append_values(existing: Option<Value>, value: Value) -> Value {
    match (existing, value) {
        (None, value) => value,
        (Some(Value::Array(mut items)), value) => {
            items.push(value);
            Value::Array(items)
        }
        (Some(current), value) => {
            let mut joined = crate::template::value_to_string(&current);
            joined.push_str(&crate::template::value_to_string(&value));
            Value::String(joined)
        }
    }
}

/// Process-local KV store behind a single async mutex.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), KvError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<Option<Value>, KvError> {
        Ok(self.entries.lock().await.remove(key))
    }

    async fn append(&self, key: &str, value: Value) -> Result<Value, KvError> {
        let mut entries = self.entries.lock().await;
        let combined = append_values(entries.remove(key), value);
        entries.insert(key.to_string(), combined.clone());
        Ok(combined)
    }

    async fn keys(&self) -> Result<Vec<String>, KvError> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryKvStore::new();
        store.set("k", json!("v")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));
        assert_eq!(store.delete("k").await.unwrap(), Some(json!("v")));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.delete("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_append_semantics() {
        let store = InMemoryKvStore::new();
        assert_eq!(store.append("s", json!("ab")).await.unwrap(), json!("ab"));
        assert_eq!(store.append("s", json!("cd")).await.unwrap(), json!("abcd"));

        store.set("list", json!([1])).await.unwrap();
        assert_eq!(store.append("list", json!(2)).await.unwrap(), json!([1, 2]));

        store.set("n", json!(1)).await.unwrap();
        assert_eq!(store.append("n", json!("x")).await.unwrap(), json!("1x"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_serialized() {
        let store = Arc::new(InMemoryKvStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append("log", json!("x")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let value = store.get("log").await.unwrap().unwrap();
        assert_eq!(value.as_str().unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let store = InMemoryKvStore::new();
        store.set("b", json!(1)).await.unwrap();
        store.set("a", json!(2)).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["a", "b"]);
    }
}
