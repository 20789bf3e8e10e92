//! The admission gate wrapped around guarded operations.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

use super::backend::{CounterStore, Decision};
use super::policy::Policy;
use super::rules::PolicySet;
use crate::error::Result;

/// Result of passing a call through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<T> {
    /// The call was admitted; holds the operation's own result, untouched
    Proceeded(T),
    /// The call was denied and the operation never ran
    Rejected {
        /// The policy's rejection message
        message: String,
        /// The key's count including this call
        current_count: u64,
    },
}

impl<T> Admission<T> {
    /// Whether the operation ran.
    pub fn is_proceeded(&self) -> bool {
        matches!(self, Admission::Proceeded(_))
    }

    /// Whether the call was denied.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected { .. })
    }

    /// The operation's result, if it ran.
    pub fn into_proceeded(self) -> Option<T> {
        match self {
            Admission::Proceeded(value) => Some(value),
            Admission::Rejected { .. } => None,
        }
    }
}

/// Wraps guarded operations with a shared admission decision.
///
/// The gate holds no per-call state and no lock of its own: every decision is
/// made by the counter store in one atomic step. Clone it freely; clones share
/// the store handle.
pub struct Gate<S: CounterStore + ?Sized> {
    /// The shared counter store
    store: Arc<S>,
    /// Policies for `guard_named`
    policies: Arc<PolicySet>,
}

impl<S: CounterStore + ?Sized> Clone for Gate<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policies: self.policies.clone(),
        }
    }
}

impl<S: CounterStore + ?Sized> Gate<S> {
    /// Create a gate with no named policies.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_policies(store, PolicySet::new())
    }

    /// Create a gate that resolves operation names through `policies`.
    pub fn with_policies(store: Arc<S>, policies: PolicySet) -> Self {
        Self {
            store,
            policies: Arc::new(policies),
        }
    }

    /// The counter store behind this gate.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The named policies this gate resolves.
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Validate `policy` and count one call against its key.
    ///
    /// Returns `InvalidPolicy` without touching the store if the policy is
    /// malformed, and `StoreUnavailable` if the store cannot decide.
    pub async fn check(&self, policy: &Policy) -> Result<Decision> {
        policy.validate()?;

        let decision = self
            .store
            .check_and_increment(&policy.key, policy.limit, policy.window)
            .await
            .map_err(|e| {
                warn!(key = %policy.key, error = %e, "Admission check failed");
                e
            })?;

        trace!(
            key = %policy.key,
            count = decision.current_count,
            limit = policy.limit,
            allowed = decision.allowed,
            "Admission decision made"
        );

        Ok(decision)
    }

    /// Run `operation` only if `policy` admits this call.
    ///
    /// On denial the operation is never invoked, so none of its side effects
    /// happen, and the policy's rejection message is returned instead. On
    /// admission the operation's output is returned as is, errors included.
    #[instrument(skip_all, fields(key = %policy.key, limit = policy.limit))]
    pub async fn guard<F, Fut, T>(&self, policy: &Policy, operation: F) -> Result<Admission<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let decision = self.check(policy).await?;

        if !decision.allowed {
            debug!(
                key = %policy.key,
                count = decision.current_count,
                limit = policy.limit,
                window = ?policy.window,
                "Rate limit exceeded"
            );
            return Ok(Admission::Rejected {
                message: policy.rejection_message.clone(),
                current_count: decision.current_count,
            });
        }

        Ok(Admission::Proceeded(operation().await))
    }

    /// Like [`Gate::guard`], resolving the policy by operation name.
    ///
    /// An operation without a registered policy is an `InvalidPolicy` error.
    pub async fn guard_named<F, Fut, T>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> Result<Admission<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let policy = self.policies.resolve(operation_name)?;
        self.guard(policy, operation).await
    }
}
