//! Session record persistence.

use crate::backend::{KvBackend, StoredValue};
use crate::error::{SessionError, SessionResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Reads and writes opaque session payloads.
pub struct RecordStore {
    backend: Arc<dyn KvBackend>,
    ttl: Option<Duration>,
}

impl RecordStore {
    /// Create a store; a zero `ttl` is treated as no expiry.
    pub fn new(backend: Arc<dyn KvBackend>, ttl: Option<Duration>) -> Self {
        Self {
            backend,
            ttl: ttl.filter(|t| !t.is_zero()),
        }
    }

    /// Expiry applied on write.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Change the expiry applied to subsequent writes.
    pub fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.ttl = ttl.filter(|t| !t.is_zero());
    }

    /// Read the payload at `key`.
    ///
    /// A missing key is an empty session. A value that is not a string/binary
    /// payload is [`SessionError::MalformedRecord`].
    pub async fn read(&self, key: &str) -> SessionResult<Vec<u8>> {
        match self.backend.get(key).await? {
            None => {
                debug!(key = %key, "No session record, starting empty");
                Ok(Vec::new())
            }
            Some(StoredValue::Bytes(data)) => {
                debug!(key = %key, bytes = data.len(), "Read session record");
                Ok(data)
            }
            Some(other) => Err(SessionError::MalformedRecord {
                key: key.to_string(),
                found: other.kind(),
            }),
        }
    }

    /// Whether a record exists at `key`.
    pub async fn exists(&self, key: &str) -> SessionResult<bool> {
        Ok(self.backend.get(key).await?.is_some())
    }

    /// Store `data` at `key`, with the configured expiry if any.
    pub async fn write(&self, key: &str, data: &[u8]) -> SessionResult<()> {
        match self.ttl {
            Some(ttl) => self.backend.set_with_expiry(key, data, ttl).await?,
            None => self.backend.set(key, data).await?,
        }
        debug!(key = %key, bytes = data.len(), ttl = ?self.ttl, "Wrote session record");
        Ok(())
    }

    /// Delete the record at `key`.
    pub async fn delete(&self, key: &str) -> SessionResult<bool> {
        self.backend.delete(key).await
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").field("ttl", &self.ttl).finish()
    }
}
