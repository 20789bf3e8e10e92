//! Shared counter store backed by Redis.
//!
//! Every process pointing at the same Redis deployment and key prefix shares
//! one counter per policy key. Admission decisions are made by the
//! [`LimiterScript`] inside Redis, so correctness does not depend on any lock
//! held by the callers.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info, trace, warn};

use super::backend::{CounterStore, Decision};
use super::script::LimiterScript;
use crate::config::StoreConfig;
use crate::error::{Result, TurnstileError};

/// Redis-backed counter store.
///
/// Construct with [`RedisStore::connect`] once at startup and share it (for
/// example behind an `Arc`) for the life of the process.
pub struct RedisStore {
    connection: ConnectionManager,
    script: LimiterScript,
    key_prefix: String,
    command_timeout: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .field("command_timeout", &self.command_timeout)
            .field("script_sha", &self.script.sha())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis and register the limiter script.
    ///
    /// Fails with `StoreUnavailable` if no connection can be established
    /// within the connect timeout, and with `ScriptRegistration` if the
    /// script cannot be loaded. Either is fatal to startup.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| TurnstileError::Config(format!("Invalid Redis URL: {}", e)))?;

        let connect_timeout = config.connect_timeout();
        let mut connection = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                TurnstileError::StoreUnavailable(format!(
                    "timed out connecting to Redis after {:?}",
                    connect_timeout
                ))
            })?
            .map_err(|e| TurnstileError::StoreUnavailable(e.to_string()))?;

        let script = LimiterScript::new();
        tokio::time::timeout(connect_timeout, script.register(&mut connection))
            .await
            .map_err(|_| {
                TurnstileError::ScriptRegistration(format!(
                    "timed out after {:?}",
                    connect_timeout
                ))
            })?
            .map_err(|e| TurnstileError::ScriptRegistration(e.to_string()))?;

        info!(
            url = %config.url,
            key_prefix = %config.key_prefix,
            "Connected to Redis counter store"
        );

        Ok(Self {
            connection,
            script,
            key_prefix: config.key_prefix.clone(),
            command_timeout: config.command_timeout(),
        })
    }

    /// The prefix prepended to every policy key.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Release the connection. No further calls can be made.
    pub async fn shutdown(self) {
        info!(key_prefix = %self.key_prefix, "Closing Redis counter store");
        drop(self.connection);
    }
}

/// The Redis key holding the counter for a policy key.
pub(crate) fn counter_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<Decision> {
        let redis_key = counter_key(&self.key_prefix, key);
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let mut connection = self.connection.clone();

        trace!(key = %redis_key, limit = limit, window_ms = window_ms, "Invoking limiter script");

        let invocation = self
            .script
            .invoke(&mut connection, &redis_key, limit, window_ms);

        match tokio::time::timeout(self.command_timeout, invocation).await {
            Ok(Ok(decision)) => {
                debug!(
                    key = %redis_key,
                    count = decision.current_count,
                    allowed = decision.allowed,
                    "Limiter script completed"
                );
                Ok(decision)
            }
            Ok(Err(e)) => {
                warn!(key = %redis_key, error = %e, "Limiter script failed");
                Err(TurnstileError::StoreUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!(
                    key = %redis_key,
                    timeout = ?self.command_timeout,
                    "Limiter script timed out"
                );
                Err(TurnstileError::StoreUnavailable(format!(
                    "limiter script timed out after {:?}",
                    self.command_timeout
                )))
            }
        }
    }
}
