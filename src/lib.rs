//! Turnstile - Distributed Per-Key Admission Control
//!
//! This crate admits at most a configured number of calls per key within a
//! fixed time window, across every process sharing the same counter store.
//! The check and the increment for a key happen in one atomic transaction
//! inside the store (a Lua script for Redis), so concurrent callers never
//! both claim the last slot.
//!
//! The fixed window admits up to twice the limit across a window boundary.

pub mod config;
pub mod error;
pub mod ratelimit;
