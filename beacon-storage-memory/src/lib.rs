#![deny(missing_docs)]
//! In-memory implementation of `beacon-core`'s [`Storage`] trait.
//!
//! Uses a `HashMap` behind a `RwLock`, keyed per scope, extended with
//! per-record etags so optimistic concurrency (§6.3) and the SSO
//! dedupe sentinel (§4.4.4) work without an external service. Suitable
//! for testing, prototyping, and single-process deployments — not
//! durable across restarts.

use async_trait::async_trait;
use beacon_core::{BeaconError, Storage, StorageRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// In-memory [`Storage`] backed by a `HashMap` behind a `RwLock`.
///
/// Keys are composed as `"{scope}\0{key}"` for full scope isolation,
/// a separator-based composite key scoped per record. Etags are a
/// monotonically increasing counter shared across the whole store —
/// simple, and sufficient since callers only ever compare an etag
/// against the record it was read from.
pub struct MemoryStorage {
    data: RwLock<HashMap<String, StorageRecord>>,
    counter: AtomicU64,
}

impl MemoryStorage {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    fn next_etag(&self) -> String {
        self.counter.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn composite_key(scope: &str, key: &str) -> String {
    format!("{scope}\0{key}")
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, scope: &str, key: &str) -> Result<Option<StorageRecord>, BeaconError> {
        let ck = composite_key(scope, key);
        Ok(self.data.read().await.get(&ck).cloned())
    }

    async fn write(
        &self,
        scope: &str,
        key: &str,
        value: serde_json::Value,
        expected_etag: Option<&str>,
    ) -> Result<StorageRecord, BeaconError> {
        let ck = composite_key(scope, key);
        let mut data = self.data.write().await;
        let current = data.get(&ck);

        // §6.3: `expected_etag: None` means "create, do not overwrite" —
        // it succeeds only if the key is absent. `Some(tag)` succeeds
        // only if the stored record's current etag matches `tag`.
        let collides = match (expected_etag, current) {
            (None, Some(_)) => true,
            (Some(expected), Some(record)) => record.etag != expected,
            (Some(_), None) => true,
            (None, None) => false,
        };
        if collides {
            return Err(BeaconError::EtagMismatch {
                scope: scope.to_owned(),
                key: key.to_owned(),
            });
        }

        let record = StorageRecord {
            value,
            etag: self.next_etag(),
        };
        data.insert(ck, record.clone());
        Ok(record)
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<(), BeaconError> {
        let ck = composite_key(scope, key);
        self.data.write().await.remove(&ck);
        Ok(())
    }

    async fn list(&self, scope: &str) -> Result<Vec<String>, BeaconError> {
        let prefix = format!("{scope}\0");
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter_map(|ck| ck.strip_prefix(&prefix).map(str::to_owned))
            .collect())
    }
}
