//! The storage contract: scoped key/value records with optimistic
//! concurrency via an opaque etag.

use crate::error::BeaconError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A stored value plus the etag it was read or written with.
///
/// The etag is opaque to callers — it exists only to be handed back on
/// the next write as `expected_etag` (§6.3). Backends are free to use a
/// monotonic counter, a hash of the value, or anything else that
/// changes on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    /// The stored JSON value.
    pub value: serde_json::Value,
    /// The etag this value was stored with.
    pub etag: String,
}

/// Scoped key/value storage for conversation state, sign-in flow
/// state, and dedupe sentinels.
///
/// A "scope" groups related keys (e.g. `"conversation"`, `"auth-flow"`)
/// by namespace; a "key" identifies one record within a scope.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a record, or `None` if the key doesn't exist.
    async fn read(&self, scope: &str, key: &str) -> Result<Option<StorageRecord>, BeaconError>;

    /// Write a value, returning the new record's etag.
    ///
    /// `expected_etag: Some(tag)` succeeds only if the stored record's
    /// current etag equals `tag`. `expected_etag: None` succeeds only
    /// if the key does not currently exist — this is the "create, do
    /// not overwrite" mode the dedupe sentinel (§4.4.4) relies on to
    /// let exactly one of several concurrent writers win. Either way,
    /// a failed precondition returns [`BeaconError::EtagMismatch`] and
    /// writes nothing.
    async fn write(
        &self,
        scope: &str,
        key: &str,
        value: serde_json::Value,
        expected_etag: Option<&str>,
    ) -> Result<StorageRecord, BeaconError>;

    /// Delete a record. Deleting a missing key is not an error.
    async fn delete(&self, scope: &str, key: &str) -> Result<(), BeaconError>;

    /// List the keys present in a scope.
    async fn list(&self, scope: &str) -> Result<Vec<String>, BeaconError>;
}

/// Read-only narrowing of [`Storage`], for code that should not be
/// able to write (e.g. a handler given read access to another
/// component's scope). Blanket-implemented for every `Storage`.
#[async_trait]
pub trait StorageReader: Send + Sync {
    /// Read a record, or `None` if the key doesn't exist.
    async fn read(&self, scope: &str, key: &str) -> Result<Option<StorageRecord>, BeaconError>;

    /// List the keys present in a scope.
    async fn list(&self, scope: &str) -> Result<Vec<String>, BeaconError>;
}

#[async_trait]
impl<T: Storage + ?Sized> StorageReader for T {
    async fn read(&self, scope: &str, key: &str) -> Result<Option<StorageRecord>, BeaconError> {
        Storage::read(self, scope, key).await
    }

    async fn list(&self, scope: &str) -> Result<Vec<String>, BeaconError> {
        Storage::list(self, scope).await
    }
}
