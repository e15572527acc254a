//! # Latchkey Redis
//!
//! Redis client integration for Latchkey session storage.
//!
//! ## Features
//!
//! - **Connection Pooling**: Efficient connection management with bb8
//! - **Lock Primitives**: `SET NX PX` claims and a scripted compare-and-delete
//! - **Bounded Commands**: every command honours a configurable timeout
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use latchkey_redis::{RedisConfig, RedisService};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .url("redis://localhost:6379")
//!         .pool_size(10)
//!         .build();
//!
//!     let redis = RedisService::new(config).await?;
//!
//!     if redis.set_nx_px("job.lock", b"token-1", Duration::from_secs(5)).await? {
//!         // ... critical section ...
//!         redis.compare_and_delete("job.lock", b"token-1").await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use service::RedisService;

// Re-export redis crate for convenience
pub use redis;
pub use redis::Value;

/// Prelude for common imports.
///
/// ```
/// use latchkey_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::service::RedisService;
}
