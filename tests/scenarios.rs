//! End-to-end admission scenarios against the in-process counter store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use turnstile::error::{Result, TurnstileError};
use turnstile::ratelimit::{
    Admission, CounterStore, Decision, Gate, MemoryStore, MockClock, Policy, PolicySet,
};

const MESSAGE: &str = "Request rejected: too many calls from this address";
const OK: &str = "request accepted";

fn policy(key: &str, limit: u64) -> Policy {
    Policy::new(key, limit, Duration::from_secs(10), MESSAGE)
}

fn mock_gate() -> (Gate<MemoryStore<MockClock>>, MockClock) {
    let clock = MockClock::default();
    let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
    (Gate::new(store), clock)
}

/// Wraps a store and can be switched off to simulate losing the connection.
struct FlakyStore {
    inner: MemoryStore,
    reachable: AtomicBool,
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<Decision> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(TurnstileError::StoreUnavailable(
                "connection reset by peer".to_string(),
            ));
        }
        self.inner.check_and_increment(key, limit, window).await
    }
}

#[tokio::test]
async fn test_scenario_a_sixth_call_rejected() {
    let (gate, _clock) = mock_gate();
    let policy = policy("A", 5);

    for i in 1..=5 {
        let admission = gate.guard(&policy, || async { OK }).await.unwrap();
        assert_eq!(admission, Admission::Proceeded(OK), "call {} should pass", i);
    }

    let admission = gate.guard(&policy, || async { OK }).await.unwrap();
    assert_eq!(
        admission,
        Admission::Rejected {
            message: MESSAGE.to_string(),
            current_count: 6,
        }
    );
}

#[tokio::test]
async fn test_scenario_b_window_reset() {
    let (gate, clock) = mock_gate();
    let policy = policy("A", 5);

    for _ in 0..6 {
        gate.guard(&policy, || async { OK }).await.unwrap();
    }

    clock.advance(Duration::from_secs(11));

    let admission = gate.guard(&policy, || async { OK }).await.unwrap();
    assert_eq!(admission, Admission::Proceeded(OK));
    assert_eq!(gate.store().count("A"), Some(1));
}

#[tokio::test]
async fn test_scenario_c_independent_keys() {
    let (gate, _clock) = mock_gate();
    let a = policy("A", 4);
    let b = policy("B", 4);

    for i in 0..8 {
        let policy = if i % 2 == 0 { &a } else { &b };
        let admission = gate.guard(policy, || async { OK }).await.unwrap();
        assert!(admission.is_proceeded(), "call {} should pass", i + 1);
    }

    assert_eq!(gate.store().count("A"), Some(4));
    assert_eq!(gate.store().count("B"), Some(4));
}

#[tokio::test]
async fn test_scenario_d_store_unreachable() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        reachable: AtomicBool::new(true),
    });
    let gate = Gate::new(store.clone());
    let policy = policy("A", 5);

    assert_ok!(gate.guard(&policy, || async { OK }).await);

    store.reachable.store(false, Ordering::SeqCst);

    let err = assert_err!(gate.guard(&policy, || async { OK }).await);
    assert!(matches!(err, TurnstileError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_sequential_calls_admit_exactly_limit_in_order() {
    let (gate, _clock) = mock_gate();
    let policy = policy("seq", 3);

    let mut outcomes = Vec::new();
    for _ in 0..7 {
        outcomes.push(gate.guard(&policy, || async {}).await.unwrap().is_proceeded());
    }

    assert_eq!(outcomes, vec![true, true, true, false, false, false, false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_calls_admit_exactly_limit() {
    let gate = Gate::new(Arc::new(MemoryStore::new()));
    let policy = Arc::new(policy("burst", 10));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let gate = gate.clone();
            let policy = policy.clone();
            tokio::spawn(async move { gate.guard(&policy, || async {}).await })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for result in join_all(handles).await {
        match result.unwrap().unwrap() {
            Admission::Proceeded(()) => admitted += 1,
            Admission::Rejected { .. } => rejected += 1,
        }
    }

    assert_eq!(admitted, 10);
    assert_eq!(rejected, 90);
}

#[tokio::test]
async fn test_denied_call_has_no_side_effects() {
    let (gate, _clock) = mock_gate();
    let policy = policy("side-effects", 2);
    let writes = AtomicUsize::new(0);

    for _ in 0..5 {
        gate.guard(&policy, || async {
            writes.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    }

    assert_eq!(writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_named_operations_from_yaml() {
    let yaml = r#"
policies:
  payment:
    key: "196.168.0.22"
    limit: 5
    window: 10
    message: "Request rejected: too many calls from this address"
  payment_secondary:
    key: "196.168.0.54"
    limit: 4
    window: 10
"#;
    let policies = PolicySet::from_yaml(yaml).unwrap();
    let gate = Gate::with_policies(Arc::new(MemoryStore::new()), policies);

    let mut admitted = 0;
    for _ in 0..6 {
        if gate.guard_named("payment", || async { OK }).await.unwrap().is_proceeded() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);

    let secondary = gate.guard_named("payment_secondary", || async { OK }).await.unwrap();
    assert_eq!(secondary, Admission::Proceeded(OK));
}

#[tokio::test]
async fn test_invalid_policy_rejected_on_every_call() {
    let (gate, _clock) = mock_gate();
    let policy = Policy::new("A", 0, Duration::from_secs(10), MESSAGE);

    for _ in 0..2 {
        let err = assert_err!(gate.guard(&policy, || async { OK }).await);
        assert!(matches!(err, TurnstileError::InvalidPolicy(_)));
    }
    assert_eq!(gate.store().count("A"), None);
}
