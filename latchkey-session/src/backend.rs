//! Key-value backend contract.

use crate::error::SessionResult;
use async_trait::async_trait;
use std::time::Duration;

/// A value as the backing store returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// A string or binary payload.
    Bytes(Vec<u8>),
    /// An integer reply.
    Int(i64),
    /// Any other reply shape (list, set, map, status), described for diagnostics.
    Other(String),
}

impl StoredValue {
    /// Short name of the reply shape.
    pub fn kind(&self) -> String {
        match self {
            StoredValue::Bytes(_) => "bytes".to_string(),
            StoredValue::Int(i) => format!("integer {}", i),
            StoredValue::Other(desc) => desc.clone(),
        }
    }
}

/// Key-value store the session lock and records live in.
///
/// `set_if_absent_with_expiry` and `compare_and_delete` must each be a single
/// atomic operation on the store. Implementations must not emulate them with
/// a read followed by a write.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read the value at `key`; `None` when absent.
    async fn get(&self, key: &str) -> SessionResult<Option<StoredValue>>;

    /// Store `value` at `key` with no expiry.
    async fn set(&self, key: &str, value: &[u8]) -> SessionResult<()>;

    /// Store `value` at `key`, expiring after `ttl` (whole seconds, at least one).
    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> SessionResult<()>;

    /// Atomically store `value` at `key` only if `key` is absent, expiring
    /// after `ttl` (millisecond precision).
    ///
    /// Returns `true` when this call created the key.
    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> SessionResult<bool>;

    /// Delete `key`. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> SessionResult<bool>;

    /// Atomically delete `key` only if it currently holds `expected`.
    ///
    /// Returns `true` when the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> SessionResult<bool>;
}
