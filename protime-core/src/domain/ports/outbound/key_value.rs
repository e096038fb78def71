//! Local persistence port (outbound).
//!
//! Opaque string blobs under stable keys, the way a browser's local storage
//! works. Typed access lives in `LocalTimerStore`.

use async_trait::async_trait;

use crate::domain::StoreError;

/// Outbound port for durable local key-value storage.
///
/// Implementations are process-local; there is no cross-process locking.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read the blob stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the blob stored under `key`.
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
