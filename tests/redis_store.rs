//! Integration tests for the Redis counter store.
//!
//! These tests require a Redis instance, at `REDIS_URL` or
//! `redis://127.0.0.1:6379/`. They are ignored by default - run with
//! `cargo test --test redis_store -- --ignored`

use std::env;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use turnstile::config::StoreConfig;
use turnstile::ratelimit::{Admission, CounterStore, Gate, Policy, RedisStore};

const MESSAGE: &str = "too many requests";

fn redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
}

/// Each test gets its own key prefix so runs never share counters.
fn test_config(test_name: &str) -> StoreConfig {
    StoreConfig {
        url: redis_url(),
        key_prefix: format!("turnstile_test:{}:{}:", test_name, uuid::Uuid::new_v4()),
        ..StoreConfig::default()
    }
}

async fn connect(config: &StoreConfig) -> RedisStore {
    RedisStore::connect(config)
        .await
        .expect("Failed to connect to Redis")
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_limit_enforced_and_denials_counted() {
    let store = connect(&test_config("limit")).await;

    for i in 1..=5 {
        let decision = store
            .check_and_increment("A", 5, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(decision.allowed, "call {} should be allowed", i);
        assert_eq!(decision.current_count, i);
    }

    let decision = store
        .check_and_increment("A", 5, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.current_count, 6);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_window_expiry_restarts_count() {
    let store = connect(&test_config("expiry")).await;
    let window = Duration::from_millis(300);

    for _ in 0..3 {
        store.check_and_increment("A", 2, window).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(400)).await;

    let decision = store.check_and_increment("A", 2, window).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.current_count, 1);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_ttl_not_extended_by_later_calls() {
    let config = test_config("ttl");
    let store = connect(&config).await;

    store
        .check_and_increment("A", 10, Duration::from_secs(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    store
        .check_and_increment("A", 10, Duration::from_secs(10))
        .await
        .unwrap();

    let client = redis::Client::open(config.url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let pttl: i64 = redis::cmd("PTTL")
        .arg(format!("{}A", config.key_prefix))
        .query_async(&mut conn)
        .await
        .unwrap();

    assert!(pttl > 0 && pttl <= 9_850, "unexpected PTTL {}", pttl);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_keys_are_independent() {
    let store = connect(&test_config("independent")).await;
    let window = Duration::from_secs(10);

    for _ in 0..4 {
        assert!(store.check_and_increment("A", 4, window).await.unwrap().allowed);
        assert!(store.check_and_increment("B", 4, window).await.unwrap().allowed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore] // Requires Redis
async fn test_two_processes_share_one_budget() {
    // Two independent handles stand in for two server processes
    let config = test_config("shared");
    let first = Gate::new(Arc::new(connect(&config).await));
    let second = Gate::new(Arc::new(connect(&config).await));
    let policy = Arc::new(Policy::new("A", 25, Duration::from_secs(10), MESSAGE));

    let handles: Vec<_> = (0..200)
        .map(|i| {
            let gate = if i % 2 == 0 { first.clone() } else { second.clone() };
            let policy = policy.clone();
            tokio::spawn(async move { gate.guard(&policy, || async {}).await })
        })
        .collect();

    let admitted = join_all(handles)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(Ok(Admission::Proceeded(())))))
        .count();

    assert_eq!(admitted, 25);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_gate_returns_rejection_message() {
    let gate = Gate::new(Arc::new(connect(&test_config("gate")).await));
    let policy = Policy::new("A", 1, Duration::from_secs(10), MESSAGE);

    let first = gate.guard(&policy, || async { "ok" }).await.unwrap();
    assert_eq!(first, Admission::Proceeded("ok"));

    let second = gate.guard(&policy, || async { "ok" }).await.unwrap();
    assert_eq!(
        second,
        Admission::Rejected {
            message: MESSAGE.to_string(),
            current_count: 2,
        }
    );
}
