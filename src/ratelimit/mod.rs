//! Admission control: policies, counter stores and the gate.

mod backend;
mod clock;
mod counter;
mod limiter;
mod policy;
mod redis_store;
mod rules;
mod script;

pub use backend::{CounterStore, Decision};
pub use clock::{Clock, MockClock, SystemClock};
pub use counter::{CounterRecord, MemoryStore};
pub use limiter::{Admission, Gate};
pub use policy::Policy;
pub use redis_store::RedisStore;
pub(crate) use rules::rules_from_yaml;
pub use rules::{PolicyRule, PolicySet, TimeUnit, DEFAULT_REJECTION_MESSAGE};
pub use script::LimiterScript;
