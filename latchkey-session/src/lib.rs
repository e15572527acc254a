//! Locked session storage for Latchkey.
//!
//! Sessions live as opaque payloads in a shared key-value store. Each request
//! that reads a session first claims a per-session lock key, so concurrent
//! requests for the same session take turns instead of overwriting each
//! other's changes.
//!
//! # How the lock works
//!
//! - **Claim**: `SET <prefix><id>.lock <token> NX PX <lock_max_wait + 1ms>`, retried
//!   every `spin_lock_wait` until `lock_max_wait` is used up.
//! - **Release**: a server-side script deletes the lock key only while it
//!   still holds this holder's token, so a late release never removes a lock
//!   that has since passed to another request.
//! - **Crash safety**: the claim's expiry frees the session if the holder dies.
//!
//! Running out of wait time is reported as [`SessionError::LockTimeout`], which
//! callers can tell apart from backend failures with
//! [`SessionError::is_lock_timeout`].
//!
//! # Features
//!
//! - `redis` - Redis backend via `latchkey-redis` (enabled by default)
//!
//! # Examples
//!
//! ```no_run
//! use latchkey_session::*;
//! use latchkey_redis::RedisConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let config = SessionConfig::default()
//!         .with_prefix("myapp:session:")
//!         .with_ttl(Duration::from_secs(3600));
//!
//!     let mut handler =
//!         SessionHandler::redis(RedisConfig::new("redis://localhost:6379"), config).await?;
//!
//!     handler.open().await?;
//!
//!     // Blocks other requests for this session until close()
//!     let data = handler.read("9f86d081884c7d65").await?;
//!
//!     let mut updated = data.clone();
//!     updated.extend_from_slice(b"last_seen|i:1718000000;");
//!     handler.write("9f86d081884c7d65", &updated).await?;
//!
//!     handler.close().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod handler;
pub mod lock;
pub mod memory;
pub mod store;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_backend;

pub use backend::{KvBackend, StoredValue};
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use handler::SessionHandler;
pub use lock::{LockState, SessionLock};
pub use memory::InMemoryBackend;
pub use store::RecordStore;
pub use traits::SessionLifecycle;

#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{KvBackend, StoredValue};
    pub use crate::config::SessionConfig;
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::handler::SessionHandler;
    pub use crate::memory::InMemoryBackend;
    pub use crate::traits::SessionLifecycle;

    #[cfg(feature = "redis")]
    pub use crate::redis_backend::RedisBackend;
}
