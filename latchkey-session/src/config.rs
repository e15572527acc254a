//! Session configuration.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Environment variable holding the host's maximum request execution time, in seconds.
pub const MAX_EXECUTION_TIME_ENV: &str = "LATCHKEY_MAX_EXECUTION_TIME";

/// Lock wait used when no execution time limit is configured.
pub const DEFAULT_LOCK_MAX_WAIT: Duration = Duration::from_secs(30);

/// Default pause between lock claims.
pub const DEFAULT_SPIN_LOCK_WAIT: Duration = Duration::from_micros(150_000);

/// Suffix appended to a record key to form its lock key.
pub const LOCK_SUFFIX: &str = ".lock";

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefix prepended verbatim to every session id
    pub prefix: String,
    /// Whether reads take the session lock
    pub locking: bool,
    /// Pause between lock claims
    #[serde(with = "duration_micros")]
    pub spin_lock_wait: Duration,
    /// How long to keep trying for a lock; also the lock key's expiry
    #[serde(with = "duration_secs")]
    pub lock_max_wait: Duration,
    /// Record expiry, `None` keeps records until destroyed
    #[serde(with = "option_duration_secs")]
    pub ttl: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefix: "session".to_string(),
            locking: true,
            spin_lock_wait: DEFAULT_SPIN_LOCK_WAIT,
            lock_max_wait: default_lock_max_wait(),
            ttl: None,
        }
    }
}

/// The host's execution time limit, or [`DEFAULT_LOCK_MAX_WAIT`].
fn default_lock_max_wait() -> Duration {
    std::env::var(MAX_EXECUTION_TIME_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_LOCK_MAX_WAIT)
}

impl SessionConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from framework-style options.
    ///
    /// Recognised keys: `prefix`, `locking`, `spin_lock_wait` (microseconds),
    /// `lock_max_wait` (seconds), `max-lifetime` and `cookie-lifetime`
    /// (seconds). The TTL is the larger of the two lifetimes; unknown keys are
    /// ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use latchkey_session::SessionConfig;
    /// use std::collections::HashMap;
    /// use std::time::Duration;
    ///
    /// let options = HashMap::from([
    ///     ("prefix".to_string(), "app:".to_string()),
    ///     ("max-lifetime".to_string(), "1440".to_string()),
    ///     ("cookie-lifetime".to_string(), "3600".to_string()),
    /// ]);
    ///
    /// let config = SessionConfig::from_options(&options).unwrap();
    /// assert_eq!(config.prefix, "app:");
    /// assert_eq!(config.ttl, Some(Duration::from_secs(3600)));
    /// ```
    pub fn from_options(options: &HashMap<String, String>) -> SessionResult<Self> {
        let mut config = Self::default();

        if let Some(prefix) = options.get("prefix") {
            config.prefix = prefix.clone();
        }

        if let Some(locking) = options.get("locking") {
            config.locking = parse_bool("locking", locking)?;
        }

        if let Some(wait) = options.get("spin_lock_wait") {
            config.spin_lock_wait = Duration::from_micros(parse_u64("spin_lock_wait", wait)?);
        }

        if let Some(wait) = options.get("lock_max_wait") {
            config.lock_max_wait = Duration::from_secs(parse_u64("lock_max_wait", wait)?);
        }

        let max_lifetime = options
            .get("max-lifetime")
            .map(|v| parse_u64("max-lifetime", v))
            .transpose()?
            .unwrap_or(0);
        let cookie_lifetime = options
            .get("cookie-lifetime")
            .map(|v| parse_u64("cookie-lifetime", v))
            .transpose()?
            .unwrap_or(0);

        let lifetime = max_lifetime.max(cookie_lifetime);
        if lifetime > 0 {
            config.ttl = Some(Duration::from_secs(lifetime));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `LATCHKEY_SESSION_*` environment variables.
    ///
    /// `LATCHKEY_SESSION_PREFIX`, `_LOCKING`, `_SPIN_LOCK_WAIT`, `_LOCK_MAX_WAIT`,
    /// `_MAX_LIFETIME` and `_COOKIE_LIFETIME` map onto the keys accepted by
    /// [`SessionConfig::from_options`].
    pub fn from_env() -> SessionResult<Self> {
        const VARS: [(&str, &str); 6] = [
            ("LATCHKEY_SESSION_PREFIX", "prefix"),
            ("LATCHKEY_SESSION_LOCKING", "locking"),
            ("LATCHKEY_SESSION_SPIN_LOCK_WAIT", "spin_lock_wait"),
            ("LATCHKEY_SESSION_LOCK_MAX_WAIT", "lock_max_wait"),
            ("LATCHKEY_SESSION_MAX_LIFETIME", "max-lifetime"),
            ("LATCHKEY_SESSION_COOKIE_LIFETIME", "cookie-lifetime"),
        ];

        let options: HashMap<String, String> = VARS
            .iter()
            .filter_map(|(var, key)| std::env::var(var).ok().map(|v| (key.to_string(), v)))
            .collect();

        Self::from_options(&options)
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Enable or disable locking on read.
    pub fn with_locking(mut self, locking: bool) -> Self {
        self.locking = locking;
        self
    }

    /// Set the pause between lock claims.
    pub fn with_spin_lock_wait(mut self, wait: Duration) -> Self {
        self.spin_lock_wait = wait;
        self
    }

    /// Set the maximum time spent waiting for a lock.
    pub fn with_lock_max_wait(mut self, wait: Duration) -> Self {
        self.lock_max_wait = wait;
        self
    }

    /// Set the record TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Check that the lock timings are usable.
    pub fn validate(&self) -> SessionResult<()> {
        if self.spin_lock_wait.is_zero() {
            return Err(SessionError::Config(
                "spin_lock_wait must be greater than zero".to_string(),
            ));
        }
        if self.lock_max_wait.is_zero() {
            return Err(SessionError::Config(
                "lock_max_wait must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Key under which the record for `session_id` is stored.
    pub fn record_key(&self, session_id: &str) -> String {
        format!("{}{}", self.prefix, session_id)
    }

    /// Key under which the lock for `session_id` is stored.
    pub fn lock_key(&self, session_id: &str) -> String {
        format!("{}{}{}", self.prefix, session_id, LOCK_SUFFIX)
    }

    /// Number of claims made before giving up on a lock.
    ///
    /// Spread over `lock_max_wait` at `spin_lock_wait` intervals, never fewer than one.
    pub fn lock_attempts(&self) -> u32 {
        let spin = self.spin_lock_wait.as_micros().max(1);
        let attempts = self.lock_max_wait.as_micros().div_ceil(spin);
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }
}

fn parse_u64(key: &str, value: &str) -> SessionResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            SessionError::Config(format!(
                "{} must be a non-negative integer, got {:?}",
                key, value
            ))
        })
}

fn parse_bool(key: &str, value: &str) -> SessionResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" | "" => Ok(false),
        _ => Err(SessionError::Config(format!(
            "{} must be a boolean, got {:?}",
            key, value
        ))),
    }
}

mod duration_micros {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_micros())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(deserializer)?))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs))
    }
}
