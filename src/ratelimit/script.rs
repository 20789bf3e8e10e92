//! The atomic fixed-window counting transaction run inside Redis.
//!
//! Redis executes a Lua script as a single command: no other client can
//! observe or act on the key between the script's `INCR` and its reply.

use redis::aio::ConnectionLike;
use redis::{RedisResult, Script};
use tracing::info;

use super::backend::Decision;

/// `KEYS[1]` is the counter key, `ARGV[1]` the limit, `ARGV[2]` the window in
/// milliseconds. Replies `{allowed, count}` with `allowed` as 1 or 0.
const FIXED_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end

if count <= tonumber(ARGV[1]) then
    return {1, count}
end

return {0, count}
"#;

/// Handle on the fixed-window script.
///
/// Construct it once per process and register it with
/// [`LimiterScript::register`] before the first call.
#[derive(Debug, Clone)]
pub struct LimiterScript {
    script: Script,
}

impl LimiterScript {
    /// Build the script handle. This does not contact the store.
    pub fn new() -> Self {
        Self {
            script: Script::new(FIXED_WINDOW_SCRIPT),
        }
    }

    /// SHA1 digest the store knows the script by.
    pub fn sha(&self) -> &str {
        self.script.get_hash()
    }

    /// Load the script into the store's script cache.
    pub async fn register<C: ConnectionLike>(&self, connection: &mut C) -> RedisResult<String> {
        let sha = self.script.prepare_invoke().load_async(connection).await?;
        info!(sha = %sha, "Limiter script registered");
        Ok(sha)
    }

    /// Run one check-and-increment for `key`.
    pub async fn invoke<C: ConnectionLike>(
        &self,
        connection: &mut C,
        key: &str,
        limit: u64,
        window_ms: u64,
    ) -> RedisResult<Decision> {
        let (allowed, current_count): (i64, u64) = self
            .script
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .invoke_async(connection)
            .await?;

        Ok(Decision {
            allowed: allowed == 1,
            current_count,
        })
    }
}

impl Default for LimiterScript {
    fn default() -> Self {
        Self::new()
    }
}
