//! Redis-backed key-value backend.

use crate::backend::{KvBackend, StoredValue};
use crate::error::SessionResult;
use async_trait::async_trait;
use latchkey_redis::{RedisConfig, RedisError, RedisService, Value};
use std::sync::Arc;
use std::time::Duration;

/// [`KvBackend`] over a pooled [`RedisService`].
///
/// Lock claims use `SET NX PX` and releases run a Lua compare-and-delete, so
/// both are single atomic steps on the server.
///
/// # Examples
///
/// ```no_run
/// use latchkey_session::{RedisBackend, SessionConfig, SessionHandler};
/// use latchkey_redis::RedisConfig;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = RedisBackend::connect(RedisConfig::new("redis://localhost:6379")).await?;
/// let handler = SessionHandler::new(Arc::new(backend), SessionConfig::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    service: Arc<RedisService>,
}

impl RedisBackend {
    /// Wrap an existing service, sharing its pool.
    pub fn new(service: Arc<RedisService>) -> Self {
        Self { service }
    }

    /// Connect to Redis and build a pool.
    pub async fn connect(config: RedisConfig) -> SessionResult<Self> {
        let service = RedisService::new(config).await?;
        Ok(Self::new(Arc::new(service)))
    }

    /// The underlying service.
    pub fn service(&self) -> &Arc<RedisService> {
        &self.service
    }
}

/// Map a raw reply onto the shapes a session read distinguishes.
fn to_stored(value: Value) -> Option<StoredValue> {
    match value {
        Value::Nil => None,
        Value::BulkString(bytes) => Some(StoredValue::Bytes(bytes)),
        Value::SimpleString(s) => Some(StoredValue::Bytes(s.into_bytes())),
        Value::Int(i) => Some(StoredValue::Int(i)),
        other => Some(StoredValue::Other(format!("{:?}", other))),
    }
}

/// Map the outcome of a `GET`.
///
/// Redis rejects `GET` on a list, hash or other non-string key with
/// `WRONGTYPE`. That is a record of the wrong shape, not a store failure.
fn read_reply(reply: latchkey_redis::Result<Value>) -> SessionResult<Option<StoredValue>> {
    match reply {
        Ok(value) => Ok(to_stored(value)),
        Err(RedisError::Redis(e)) if e.code() == Some("WRONGTYPE") => {
            Ok(Some(StoredValue::Other("wrong type".to_string())))
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> SessionResult<Option<StoredValue>> {
        read_reply(self.service.get_raw(key).await)
    }

    async fn set(&self, key: &str, value: &[u8]) -> SessionResult<()> {
        Ok(self.service.set_value(key, value).await?)
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> SessionResult<()> {
        Ok(self.service.set_ex(key, value, ttl).await?)
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> SessionResult<bool> {
        Ok(self.service.set_nx_px(key, value, ttl).await?)
    }

    async fn delete(&self, key: &str) -> SessionResult<bool> {
        Ok(self.service.delete(key).await?)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> SessionResult<bool> {
        Ok(self.service.compare_and_delete(key, expected).await?)
    }
}
