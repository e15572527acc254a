//! Per-session spin lock stored as a key in the backend.

use crate::backend::KvBackend;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ownership of a session lock as seen by one holder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LockState {
    /// No lock held.
    #[default]
    Unlocked,
    /// Holding `key`, proven by `token`.
    Locked {
        /// Backend key of the lock
        key: String,
        /// Value written at `key` when the lock was claimed
        token: String,
    },
}

/// Bounded-wait mutual exclusion over a lock key.
///
/// A claim is `SET key token NX` with an expiry of `lock_max_wait` plus one
/// millisecond, so a holder that crashes cannot wedge the session past that
/// window. Release deletes the key only while it still holds this holder's
/// token.
///
/// Dropping a `SessionLock` that is still held schedules the release on the
/// current tokio runtime.
pub struct SessionLock {
    backend: Arc<dyn KvBackend>,
    spin_wait: Duration,
    expiry: Duration,
    attempts: u32,
    state: LockState,
}

impl SessionLock {
    /// Create an unlocked lock using the timings from `config`.
    pub fn new(backend: Arc<dyn KvBackend>, config: &SessionConfig) -> Self {
        Self {
            backend,
            spin_wait: config.spin_lock_wait,
            expiry: config.lock_max_wait + Duration::from_millis(1),
            attempts: config.lock_attempts(),
            state: LockState::Unlocked,
        }
    }

    /// Current ownership state.
    pub fn state(&self) -> &LockState {
        &self.state
    }

    /// Whether a lock is held.
    pub fn is_held(&self) -> bool {
        matches!(self.state, LockState::Locked { .. })
    }

    /// Key of the held lock, if any.
    pub fn held_key(&self) -> Option<&str> {
        match &self.state {
            LockState::Locked { key, .. } => Some(key),
            LockState::Unlocked => None,
        }
    }

    /// Claim `key`, retrying every `spin_lock_wait` until `lock_max_wait` is spent.
    ///
    /// Already holding `key` is a no-op. Holding a different key releases it
    /// first. Running out of attempts returns [`SessionError::LockTimeout`] and
    /// leaves the lock unlocked; backend failures are returned as-is and are
    /// not retried.
    pub async fn acquire(&mut self, key: &str) -> SessionResult<()> {
        if self.held_key() == Some(key) {
            return Ok(());
        }
        if self.is_held() {
            self.release().await?;
        }

        let token = Uuid::new_v4().to_string();

        for attempt in 1..=self.attempts {
            let claimed = self
                .backend
                .set_if_absent_with_expiry(key, token.as_bytes(), self.expiry)
                .await?;

            if claimed {
                info!(key = %key, attempt, "Acquired session lock");
                self.state = LockState::Locked {
                    key: key.to_string(),
                    token,
                };
                return Ok(());
            }

            if attempt < self.attempts {
                debug!(key = %key, attempt, "Session lock held elsewhere, retrying");
                tokio::time::sleep(self.spin_wait).await;
            }
        }

        self.state = LockState::Unlocked;
        warn!(key = %key, attempts = self.attempts, "Timed out waiting for session lock");
        Err(SessionError::LockTimeout {
            key: key.to_string(),
            attempts: self.attempts,
        })
    }

    /// Release the held lock.
    ///
    /// Not holding a lock is a no-op. Local state is cleared whatever the
    /// backend reports. Returns whether the backend key was deleted; `false`
    /// means the lock had already expired and possibly passed to someone else.
    pub async fn release(&mut self) -> SessionResult<bool> {
        let LockState::Locked { key, token } = std::mem::take(&mut self.state) else {
            return Ok(false);
        };

        let deleted = self
            .backend
            .compare_and_delete(&key, token.as_bytes())
            .await?;

        if deleted {
            debug!(key = %key, "Released session lock");
        } else {
            warn!(key = %key, "Session lock expired before release (not held or taken over)");
        }

        Ok(deleted)
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let LockState::Locked { key, token } = std::mem::take(&mut self.state) else {
            return;
        };

        let backend = Arc::clone(&self.backend);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                // Best effort release on drop
                handle.spawn(async move {
                    if let Err(e) = backend.compare_and_delete(&key, token.as_bytes()).await {
                        warn!(key = %key, error = %e, "Failed to release dropped session lock");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "Session lock dropped outside a runtime, leaving it to expire");
            }
        }
    }
}

impl std::fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLock")
            .field("state", &self.state)
            .field("spin_wait", &self.spin_wait)
            .field("attempts", &self.attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StoredValue;
    use crate::memory::InMemoryBackend;

    fn config(max_wait: Duration) -> SessionConfig {
        SessionConfig::default()
            .with_spin_lock_wait(Duration::from_micros(150_000))
            .with_lock_max_wait(max_wait)
    }

    fn lock(backend: &InMemoryBackend) -> SessionLock {
        SessionLock::new(Arc::new(backend.clone()), &config(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_acquire_records_token() {
        let backend = InMemoryBackend::new();
        let mut lock = lock(&backend);

        lock.acquire("s1.lock").await.unwrap();

        let LockState::Locked { key, token } = lock.state().clone() else {
            panic!("expected lock to be held");
        };
        assert_eq!(key, "s1.lock");
        assert_eq!(
            backend.get("s1.lock").await.unwrap(),
            Some(StoredValue::Bytes(token.into_bytes()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_contended_acquire_times_out_after_max_wait() {
        let backend = InMemoryBackend::new();
        let mut holder = lock(&backend);
        let mut waiter = lock(&backend);

        holder.acquire("s1.lock").await.unwrap();

        let start = tokio::time::Instant::now();
        let err = waiter.acquire("s1.lock").await.unwrap_err();
        let waited = start.elapsed();

        assert!(err.is_lock_timeout());
        assert!(!waiter.is_held());
        assert_eq!(backend.claim_attempts(), 1 + 7);
        assert!(waited >= Duration::from_millis(900));
        assert!(waited <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_lock_once_released() {
        let backend = InMemoryBackend::new();
        let mut holder = lock(&backend);
        holder.acquire("s1.lock").await.unwrap();

        let waiter_backend = backend.clone();
        let waiter = tokio::spawn(async move {
            let mut waiter = lock(&waiter_backend);
            waiter.acquire("s1.lock").await.map(|_| waiter.is_held())
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(holder.release().await.unwrap());

        assert!(waiter.await.unwrap().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_lock_expires() {
        let backend = InMemoryBackend::new();
        backend
            .set_if_absent_with_expiry("s1.lock", b"crashed", Duration::from_millis(1001))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1001)).await;

        let mut lock = lock(&backend);
        lock.acquire("s1.lock").await.unwrap();
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let backend = InMemoryBackend::new();
        backend.set("s1.lock", b"someone-else").await.unwrap();
        let mut lock = lock(&backend);

        assert!(!lock.release().await.unwrap());
        assert!(!lock.release().await.unwrap());
        assert!(backend.contains("s1.lock").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_release_keeps_new_holders_lock() {
        let backend = InMemoryBackend::new();
        let mut first = lock(&backend);
        let mut second = lock(&backend);

        first.acquire("s1.lock").await.unwrap();
        tokio::time::advance(Duration::from_millis(1001)).await;
        second.acquire("s1.lock").await.unwrap();

        assert!(!first.release().await.unwrap());
        assert!(!first.is_held());
        assert!(backend.contains("s1.lock").await);

        assert!(second.release().await.unwrap());
        assert!(!backend.contains("s1.lock").await);
    }

    #[tokio::test]
    async fn test_reacquire_same_key_is_noop() {
        let backend = InMemoryBackend::new();
        let mut lock = lock(&backend);

        lock.acquire("s1.lock").await.unwrap();
        lock.acquire("s1.lock").await.unwrap();

        assert_eq!(backend.claim_attempts(), 1);
    }

    #[tokio::test]
    async fn test_acquire_other_key_releases_previous() {
        let backend = InMemoryBackend::new();
        let mut lock = lock(&backend);

        lock.acquire("s1.lock").await.unwrap();
        lock.acquire("s2.lock").await.unwrap();

        assert!(!backend.contains("s1.lock").await);
        assert!(backend.contains("s2.lock").await);
        assert_eq!(lock.held_key(), Some("s2.lock"));
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_a_timeout() {
        let backend = InMemoryBackend::new();
        backend.set_offline(true);
        let mut lock = lock(&backend);

        let err = lock.acquire("s1.lock").await.unwrap_err();
        assert!(err.is_backend_error());
        assert!(!lock.is_held());
        assert_eq!(backend.claim_attempts(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        let backend = InMemoryBackend::new();
        {
            let mut lock = lock(&backend);
            lock.acquire("s1.lock").await.unwrap();
        }

        for _ in 0..10 {
            if !backend.contains("s1.lock").await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!backend.contains("s1.lock").await);
    }
}
