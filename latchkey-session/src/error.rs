//! Error types for session operations.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Another holder kept the session lock for the whole wait budget.
    ///
    /// This is the normal outcome of contention, not a store failure.
    #[error("Could not acquire session lock {key} after {attempts} attempts")]
    LockTimeout {
        /// The lock key that stayed held.
        key: String,
        /// How many claims were attempted.
        attempts: u32,
    },

    /// The stored record is not a string/binary payload.
    #[error("Malformed session record at {key}: found {found}")]
    MalformedRecord {
        /// The record key that was read.
        key: String,
        /// Description of what the store returned.
        found: String,
    },

    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] latchkey_redis::RedisError),

    /// Failure reported by a non-Redis backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid session ID
    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),
}

impl SessionError {
    /// Whether this is lock contention rather than a failure.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Whether the backing store itself failed (unreachable, timed out, rejected a command).
    pub fn is_backend_error(&self) -> bool {
        match self {
            Self::Backend(_) => true,
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            _ => false,
        }
    }
}
