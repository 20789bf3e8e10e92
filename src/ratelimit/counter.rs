//! In-process fixed-window counter store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::{CounterStore, Decision};
use super::clock::{Clock, SystemClock};
use crate::error::Result;

/// Expired records are swept roughly once per this many increments.
const EVICTION_INTERVAL: u64 = 256;

/// Expiry horizon for windows too long to add to an `Instant`.
const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 86400);

/// The state kept for one key within its active window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Calls observed in the active window
    pub count: u64,
    /// When the record stops counting
    pub expires_at: Instant,
}

impl CounterRecord {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            expires_at: now
                .checked_add(window)
                .unwrap_or_else(|| now + MAX_WINDOW),
        }
    }

    /// Whether the record's window has elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A counter store local to one process.
///
/// Each key's record lives in a sharded map; the read, increment and compare
/// for a key all happen under that key's shard lock, so concurrent callers in
/// this process never both take the last slot. It does not share state with
/// other processes: use `RedisStore` for that.
pub struct MemoryStore<C: Clock = SystemClock> {
    records: DashMap<String, CounterRecord>,
    clock: Arc<C>,
    ops: AtomicU64,
}

impl MemoryStore<SystemClock> {
    /// Create a new store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    /// Create a new store driven by a custom clock.
    pub fn with_clock(clock: Arc<C>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
            ops: AtomicU64::new(0),
        }
    }

    /// The live count for a key, or `None` if it has no unexpired record.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        self.records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.count)
    }

    /// Time left before the key's window resets.
    pub fn time_to_reset(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.expires_at - now)
    }

    /// Number of records held, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record whose window has elapsed.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.records.retain(|_, record| !record.is_expired(now));
    }

    fn maybe_purge_expired(&self) {
        let ops = self.ops.fetch_add(1, Ordering::Relaxed);
        if ops % EVICTION_INTERVAL == EVICTION_INTERVAL - 1 {
            self.purge_expired();
        }
    }

    fn increment(&self, key: &str, window: Duration) -> u64 {
        let now = self.clock.now();

        match self.records.entry(key.to_owned()) {
            Entry::Occupied(mut entry) if !entry.get().is_expired(now) => {
                let record = entry.get_mut();
                record.count += 1;
                record.count
            }
            Entry::Occupied(mut entry) => {
                entry.insert(CounterRecord::fresh(now, window));
                debug!(key = %key, window = ?window, "Counter window expired, starting a new one");
                1
            }
            Entry::Vacant(entry) => {
                entry.insert(CounterRecord::fresh(now, window));
                debug!(key = %key, window = ?window, "Creating new counter");
                1
            }
        }
    }
}

#[async_trait]
impl<C: Clock + 'static> CounterStore for MemoryStore<C> {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<Decision> {
        // Sweep before taking the entry lock; retain locks every shard.
        self.maybe_purge_expired();

        let count = self.increment(key, window);
        trace!(key = %key, count = count, limit = limit, "Counted call");

        Ok(Decision::from_count(count, limit))
    }
}
