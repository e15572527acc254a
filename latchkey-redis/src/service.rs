//! Redis service exposing the primitives the session store is built on.

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::info;

use crate::{RedisConfig, RedisError, Result};

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
///
/// Runs server side so the comparison and the delete cannot interleave with
/// another client's `SET NX`.
static COMPARE_AND_DELETE: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
        "#,
    )
});

/// Pooled Redis client exposing the key-value operations session storage
/// is built on.
///
/// Every command is bounded by [`RedisConfig::command_timeout`].
pub struct RedisService {
    command_timeout: Duration,
    pool: Pool<RedisConnectionManager>,
}

impl RedisService {
    /// Connect, build the pool and check it answers `PING`.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(RedisError::Config("pool_size must be at least 1".to_string()));
        }

        let manager = RedisConnectionManager::new(config.connection_url())
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        let service = Self {
            command_timeout: config.command_timeout,
            pool,
        };
        service.health_check().await?;

        info!(pool_size = config.pool_size, url = %config.url, "Connected to Redis");
        Ok(service)
    }

    /// Check that a pooled connection answers `PING`.
    pub async fn health_check(&self) -> Result<()> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .map_err(|e| RedisError::Connection(e.to_string()))?;
            Ok::<_, RedisError>(())
        })
        .await
    }

    /// Fetch the raw reply stored at `key`.
    ///
    /// Returns [`redis::Value::Nil`] when the key does not exist.
    pub async fn get_raw(&self, key: &str) -> Result<redis::Value> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let value: redis::Value = conn.get(key).await?;
            Ok::<_, RedisError>(value)
        })
        .await
    }

    /// Set a value without expiry.
    pub async fn set_value(&self, key: &str, value: &[u8]) -> Result<()> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let _: () = conn.set(key, value).await?;
            Ok::<_, RedisError>(())
        })
        .await
    }

    /// Set a value with an expiry in whole seconds (minimum one second).
    pub async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs().max(1);
        self.timed(async {
            let mut conn = self.conn().await?;
            let _: () = conn.set_ex(key, value, secs).await?;
            Ok::<_, RedisError>(())
        })
        .await
    }

    /// `SET key value NX PX ttl`: store only when the key is absent.
    ///
    /// Returns `true` when this call created the key.
    pub async fn set_nx_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        self.timed(async {
            let mut conn = self.conn().await?;
            let result: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut *conn)
                .await?;
            Ok::<_, RedisError>(result.is_some())
        })
        .await
    }

    /// Delete a key.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let deleted: u32 = conn.del(key).await?;
            Ok::<_, RedisError>(deleted > 0)
        })
        .await
    }

    /// Delete `key` only if it currently holds `expected`.
    ///
    /// Returns `true` when the key was deleted.
    pub async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let deleted: i32 = COMPARE_AND_DELETE
                .key(key)
                .arg(expected)
                .invoke_async(&mut *conn)
                .await?;
            Ok::<_, RedisError>(deleted == 1)
        })
        .await
    }

    async fn conn(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        Ok(self.pool.get().await?)
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.command_timeout, fut)
            .await
            .map_err(|_| RedisError::Timeout)?
    }
}
