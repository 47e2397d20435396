//! Per-execution variable store.
//!
//! One mapping per run, seeded before the first batch (workflow `variables`,
//! then caller inputs, then any further layers) and written by step output
//! mappings. Renders read a snapshot under the shared lock; output writes
//! take the exclusive lock.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Bindings {
    values: Map<String, Value>,
    /// Names written by step outputs, as opposed to seeded.
    written: BTreeSet<String>,
}

/// Reader-writer guarded bindings for one execution.
#[derive(Debug, Default)]
pub struct VariableStore {
    inner: RwLock<Bindings>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from layers applied in order; later layers override earlier ones.
    pub fn seeded<'a>(layers: impl IntoIterator<Item = &'a Map<String, Value>>) -> Self {
        let mut values = Map::new();
        for layer in layers {
            for (key, value) in layer {
                values.insert(key.clone(), value.clone());
            }
        }
        Self {
            inner: RwLock::new(Bindings {
                values,
                written: BTreeSet::new(),
            }),
        }
    }

    /// Copy of every binding, taken under the shared lock.
    pub async fn snapshot(&self) -> Map<String, Value> {
        self.inner.read().await.values.clone()
    }

    pub async fn get(&self, name: &str) -> Option<Value> {
        self.inner.read().await.values.get(name).cloned()
    }

    /// Write step outputs under the exclusive lock. Existing bindings are
    /// overwritten, never removed.
    pub async fn bind(&self, outputs: &Map<String, Value>) {
        if outputs.is_empty() {
            return;
        }
        let mut guard = self.inner.write().await;
        for (name, value) in outputs {
            guard.values.insert(name.clone(), value.clone());
            guard.written.insert(name.clone());
        }
    }

    /// Final values of every binding written by a step.
    pub async fn outputs(&self) -> Map<String, Value> {
        let guard = self.inner.read().await;
        guard
            .written
            .iter()
            .filter_map(|name| {
                guard
                    .values
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }
}
