//! Locking session handler.

use crate::backend::KvBackend;
use crate::config::{LOCK_SUFFIX, SessionConfig};
use crate::error::{SessionError, SessionResult};
use crate::lock::SessionLock;
use crate::store::RecordStore;
use crate::traits::SessionLifecycle;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Session handler that serialises access to a session across processes.
///
/// With locking enabled, `read` claims the session's lock key before loading
/// the record, and the lock is held until `close` or `destroy`. Another
/// handler reading the same session meanwhile waits up to `lock_max_wait`
/// and then fails with [`SessionError::LockTimeout`].
///
/// A handler serves one session at a time. Dropping it while the lock is
/// still held releases the lock in the background.
///
/// # Examples
///
/// ```
/// use latchkey_session::{InMemoryBackend, SessionConfig, SessionHandler, SessionLifecycle};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> latchkey_session::SessionResult<()> {
/// let config = SessionConfig::default()
///     .with_prefix("app:sess:")
///     .with_ttl(Duration::from_secs(1800));
/// let mut handler = SessionHandler::new(Arc::new(InMemoryBackend::new()), config)?;
///
/// let data = handler.read("f00d").await?;
/// assert!(handler.is_locked());
/// handler.write("f00d", &[data, b"seen|b:1;".to_vec()].concat()).await?;
/// handler.close().await?;
/// assert!(!handler.is_locked());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SessionHandler {
    config: SessionConfig,
    lock: SessionLock,
    records: RecordStore,
}

impl SessionHandler {
    /// Create a handler over `backend`.
    ///
    /// Fails if the lock timings in `config` are unusable.
    pub fn new(backend: Arc<dyn KvBackend>, config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;

        Ok(Self {
            lock: SessionLock::new(Arc::clone(&backend), &config),
            records: RecordStore::new(backend, config.ttl),
            config,
        })
    }

    /// Connect to Redis and create a handler over it.
    #[cfg(feature = "redis")]
    pub async fn redis(
        redis_config: latchkey_redis::RedisConfig,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        let backend = crate::redis_backend::RedisBackend::connect(redis_config).await?;
        Self::new(Arc::new(backend), config)
    }

    /// Get the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Change the record expiry for subsequent writes; `None` disables it.
    pub fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.config.ttl = ttl;
        self.records.set_ttl(ttl);
    }

    /// Whether this handler currently holds a session lock.
    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    /// Lock key held by this handler, if any.
    pub fn locked_key(&self) -> Option<&str> {
        self.lock.held_key()
    }

    /// Whether a record exists for `session_id`. Does not lock.
    pub async fn validate_id(&self, session_id: &str) -> SessionResult<bool> {
        check_session_id(session_id)?;
        self.records.exists(&self.config.record_key(session_id)).await
    }
}

#[async_trait]
impl SessionLifecycle for SessionHandler {
    async fn open(&mut self) -> SessionResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.lock.release().await?;
        Ok(())
    }

    async fn read(&mut self, session_id: &str) -> SessionResult<Vec<u8>> {
        check_session_id(session_id)?;

        if self.config.locking {
            let lock_key = self.config.lock_key(session_id);
            if self.lock.held_key() == Some(lock_key.as_str()) {
                debug!(key = %lock_key, "Session lock already held");
            } else {
                self.lock.acquire(&lock_key).await?;
            }
        }

        self.records.read(&self.config.record_key(session_id)).await
    }

    async fn write(&mut self, session_id: &str, data: &[u8]) -> SessionResult<()> {
        check_session_id(session_id)?;
        self.records
            .write(&self.config.record_key(session_id), data)
            .await
    }

    async fn destroy(&mut self, session_id: &str) -> SessionResult<()> {
        check_session_id(session_id)?;

        let deleted = self
            .records
            .delete(&self.config.record_key(session_id))
            .await;
        // Release even if the delete failed
        self.close().await?;
        deleted?;
        Ok(())
    }

    async fn gc(&mut self, _max_lifetime: Duration) -> SessionResult<usize> {
        // Records expire through the backend TTL
        Ok(0)
    }
}

/// Reject ids that would make a record key collide with a lock key.
fn check_session_id(session_id: &str) -> SessionResult<()> {
    if session_id.is_empty() {
        return Err(SessionError::InvalidSessionId("empty session id".to_string()));
    }
    if session_id.ends_with(LOCK_SUFFIX) {
        return Err(SessionError::InvalidSessionId(format!(
            "{:?} ends with the reserved {:?} suffix",
            session_id, LOCK_SUFFIX
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    fn handler(backend: &InMemoryBackend, config: SessionConfig) -> SessionHandler {
        SessionHandler::new(Arc::new(backend.clone()), config).unwrap()
    }

    fn fast_config() -> SessionConfig {
        SessionConfig::default()
            .with_spin_lock_wait(Duration::from_millis(150))
            .with_lock_max_wait(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_open_does_no_backend_work() {
        let backend = InMemoryBackend::new();
        backend.set_offline(true);
        let mut handler = handler(&backend, fast_config());

        handler.open().await.unwrap();
        assert!(!handler.is_locked());
    }

    #[tokio::test]
    async fn test_read_locks_and_close_unlocks() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config());

        assert!(handler.read("abc").await.unwrap().is_empty());
        assert!(handler.is_locked());
        assert_eq!(handler.locked_key(), Some("sessionabc.lock"));
        assert!(backend.contains("sessionabc.lock").await);

        handler.close().await.unwrap();
        assert!(!handler.is_locked());
        assert!(!backend.contains("sessionabc.lock").await);
    }

    #[tokio::test]
    async fn test_repeated_reads_claim_once() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config());

        handler.read("abc").await.unwrap();
        handler.read("abc").await.unwrap();

        assert_eq!(backend.claim_attempts(), 1);
    }

    #[tokio::test]
    async fn test_locking_disabled_skips_lock() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config().with_locking(false));

        handler.write("abc", b"payload").await.unwrap();
        assert_eq!(handler.read("abc").await.unwrap(), b"payload");

        assert!(!handler.is_locked());
        assert_eq!(backend.claim_attempts(), 0);
    }

    #[tokio::test]
    async fn test_write_does_not_touch_lock() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config());

        handler.write("abc", b"x").await.unwrap();
        assert!(!handler.is_locked());
        assert_eq!(backend.claim_attempts(), 0);
    }

    #[tokio::test]
    async fn test_destroy_removes_record_and_lock() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config());

        handler.read("abc").await.unwrap();
        handler.write("abc", b"x").await.unwrap();
        handler.destroy("abc").await.unwrap();

        assert!(!handler.is_locked());
        assert!(!backend.contains("sessionabc").await);
        assert!(!backend.contains("sessionabc.lock").await);
    }

    #[tokio::test]
    async fn test_destroy_releases_lock_when_delete_fails() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config());
        handler.read("abc").await.unwrap();

        backend.set_offline(true);
        let err = handler.destroy("abc").await.unwrap_err();
        assert!(err.is_backend_error());
        assert!(!handler.is_locked());
    }

    #[tokio::test]
    async fn test_reading_another_session_swaps_lock() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config());

        handler.read("one").await.unwrap();
        handler.read("two").await.unwrap();

        assert!(!backend.contains("sessionone.lock").await);
        assert!(backend.contains("sessiontwo.lock").await);
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config());

        assert!(matches!(
            handler.read("").await,
            Err(SessionError::InvalidSessionId(_))
        ));
        assert!(matches!(
            handler.write("abc.lock", b"x").await,
            Err(SessionError::InvalidSessionId(_))
        ));
        assert_eq!(backend.claim_attempts(), 0);
    }

    #[tokio::test]
    async fn test_gc_is_noop() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config().with_locking(false));
        handler.write("abc", b"x").await.unwrap();

        assert_eq!(handler.gc(Duration::from_secs(0)).await.unwrap(), 0);
        assert!(backend.contains("sessionabc").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_ttl_applies_to_next_write() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config().with_locking(false));

        handler.set_ttl(Some(Duration::from_secs(10)));
        handler.write("abc", b"x").await.unwrap();
        assert_eq!(handler.config().ttl, Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(handler.read("abc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_id() {
        let backend = InMemoryBackend::new();
        let mut handler = handler(&backend, fast_config());

        assert!(!handler.validate_id("abc").await.unwrap());
        handler.write("abc", b"x").await.unwrap();
        assert!(handler.validate_id("abc").await.unwrap());
        assert!(!handler.is_locked());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SessionConfig::default().with_spin_lock_wait(Duration::ZERO);
        let result = SessionHandler::new(Arc::new(InMemoryBackend::new()), config);
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
