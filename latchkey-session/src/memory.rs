//! In-memory key-value backend (for testing/development).

use crate::backend::{KvBackend, StoredValue};
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local [`KvBackend`].
///
/// Expiry follows the tokio clock, so tests running with paused time can step
/// past a TTL with `tokio::time::advance`. Clones share the same key space,
/// which lets several handlers contend for one session.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    claims: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an arbitrary reply shape at `key`, bypassing the byte-oriented API.
    pub async fn insert_raw(&self, key: &str, value: StoredValue) {
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    /// Whether `key` currently holds an unexpired value.
    pub async fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .get(key)
            .is_some_and(|e| e.is_live(now))
    }

    /// Number of unexpired keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Whether no unexpired keys remain.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total `set_if_absent_with_expiry` calls made so far, successful or not.
    pub fn claim_attempts(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    /// Simulate an outage: while offline every operation fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> SessionResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SessionError::Backend("in-memory backend is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> SessionResult<Option<StoredValue>> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> SessionResult<()> {
        self.check_online()?;
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Bytes(value.to_vec()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> SessionResult<()> {
        self.check_online()?;
        let ttl = Duration::from_secs(ttl.as_secs().max(1));
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Bytes(value.to_vec()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> SessionResult<bool> {
        self.check_online()?;
        self.claims.fetch_add(1, Ordering::SeqCst);

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Bytes(value.to_vec()),
                expires_at: Some(now + ttl.max(Duration::from_millis(1))),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> SessionResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let removed = self.entries.lock().await.remove(key);
        Ok(removed.is_some_and(|e| e.is_live(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> SessionResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let matches = entries.get(key).is_some_and(|e| {
            e.is_live(now) && matches!(&e.value, StoredValue::Bytes(b) if b.as_slice() == expected)
        });

        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = InMemoryBackend::new();

        backend.set("k", b"v").await.unwrap();
        assert_eq!(
            backend.get("k").await.unwrap(),
            Some(StoredValue::Bytes(b"v".to_vec()))
        );

        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_follows_tokio_clock() {
        let backend = InMemoryBackend::new();
        backend
            .set_with_expiry("k", b"v", Duration::from_secs(2))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(backend.contains("k").await);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!backend.contains("k").await);
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_only_when_absent_or_expired() {
        let backend = InMemoryBackend::new();
        let ttl = Duration::from_millis(500);

        assert!(backend.set_if_absent_with_expiry("l", b"a", ttl).await.unwrap());
        assert!(!backend.set_if_absent_with_expiry("l", b"b", ttl).await.unwrap());

        tokio::time::advance(ttl).await;
        assert!(backend.set_if_absent_with_expiry("l", b"b", ttl).await.unwrap());
        assert_eq!(backend.claim_attempts(), 3);
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let backend = InMemoryBackend::new();
        backend.set("l", b"mine").await.unwrap();

        assert!(!backend.compare_and_delete("l", b"theirs").await.unwrap());
        assert!(backend.contains("l").await);

        assert!(backend.compare_and_delete("l", b"mine").await.unwrap());
        assert!(!backend.contains("l").await);
    }

    #[tokio::test]
    async fn test_offline_fails_every_operation() {
        let backend = InMemoryBackend::new();
        backend.set_offline(true);

        assert!(backend.get("k").await.is_err());
        assert!(backend.set("k", b"v").await.is_err());
        assert!(backend.delete("k").await.is_err());

        backend.set_offline(false);
        assert!(backend.set("k", b"v").await.is_ok());
    }
}
