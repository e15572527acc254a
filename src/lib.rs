// Latchkey - locked session storage over a shared key-value store
//
// This library lets many request handlers read-modify-write the same session
// record without trampling each other, using a per-session lock key with
// token-checked release.

// Re-export the session core
pub use latchkey_session::*;

// Re-export optional crates
#[cfg(feature = "redis")]
pub use latchkey_redis;

// Prelude for common imports
pub mod prelude {
    pub use latchkey_session::prelude::*;

    #[cfg(feature = "redis")]
    pub use latchkey_redis::RedisConfig;
}
