//! Session lifecycle trait definition.

use crate::error::SessionResult;
use async_trait::async_trait;
use std::time::Duration;

/// Operations a web framework drives over one request's session.
///
/// A framework calls `open`, then `read` once the session id is known,
/// `write` before the response goes out, and `close` (or `destroy` on
/// logout). Implementations hold whatever per-request state they need, so
/// one instance serves one request at a time.
///
/// # Examples
///
/// ```
/// use latchkey_session::{InMemoryBackend, SessionConfig, SessionHandler, SessionLifecycle};
/// use std::sync::Arc;
///
/// # async fn example() -> latchkey_session::SessionResult<()> {
/// let backend = Arc::new(InMemoryBackend::new());
/// let mut handler: Box<dyn SessionLifecycle> =
///     Box::new(SessionHandler::new(backend, SessionConfig::default())?);
///
/// handler.open().await?;
/// let data = handler.read("a1b2c3").await?;
/// assert!(data.is_empty());
/// handler.write("a1b2c3", b"visits|i:1;").await?;
/// handler.close().await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait SessionLifecycle: Send {
    /// Prepare for a request. Does no backend work.
    async fn open(&mut self) -> SessionResult<()>;

    /// Finish the request, releasing any session lock.
    async fn close(&mut self) -> SessionResult<()>;

    /// Load the session payload, taking the session lock first when locking is on.
    ///
    /// An unknown session reads as an empty payload.
    async fn read(&mut self, session_id: &str) -> SessionResult<Vec<u8>>;

    /// Store the session payload.
    async fn write(&mut self, session_id: &str, data: &[u8]) -> SessionResult<()>;

    /// Delete the session and release its lock.
    async fn destroy(&mut self, session_id: &str) -> SessionResult<()>;

    /// Garbage-collect sessions older than `max_lifetime`.
    ///
    /// Returns the number of sessions removed.
    async fn gc(&mut self, max_lifetime: Duration) -> SessionResult<usize>;
}
