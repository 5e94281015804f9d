//! PAL operation counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and
//! never used as synchronization. The registry's own atomics provide the
//! ordering guarantees for correctness; these exist purely for monitoring.
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! each atomic but not globally consistent with one another.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    /// Reservation requests (any tier).
    pub reserve_count: AtomicU64,
    /// Bytes requested across all reservations.
    pub reserve_bytes: AtomicU64,
    /// Calls to the commit path.
    pub commit_count: AtomicU64,
    /// Bytes committed.
    pub commit_bytes: AtomicU64,
    /// Calls to the decommit path.
    pub decommit_count: AtomicU64,
    /// Bytes decommitted.
    pub decommit_bytes: AtomicU64,
    /// Zero requests served by the decommit/recommit trick.
    pub zero_recommit_count: AtomicU64,
    /// Zero requests served by direct byte fill.
    pub zero_fill_count: AtomicU64,
    /// Low-memory notifications delivered to the fan-out list.
    pub low_memory_events: AtomicU64,
    /// Synchronous pressure polls.
    pub pressure_checks: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            reserve_count: AtomicU64::new(0),
            reserve_bytes: AtomicU64::new(0),
            commit_count: AtomicU64::new(0),
            commit_bytes: AtomicU64::new(0),
            decommit_count: AtomicU64::new(0),
            decommit_bytes: AtomicU64::new(0),
            zero_recommit_count: AtomicU64::new(0),
            zero_fill_count: AtomicU64::new(0),
            low_memory_events: AtomicU64::new(0),
            pressure_checks: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all PAL counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    /// Reservation requests (any tier).
    pub reserve_count: u64,
    /// Bytes requested across all reservations.
    pub reserve_bytes: u64,
    /// Calls to the commit path.
    pub commit_count: u64,
    /// Bytes committed.
    pub commit_bytes: u64,
    /// Calls to the decommit path.
    pub decommit_count: u64,
    /// Bytes decommitted.
    pub decommit_bytes: u64,
    /// Zero requests served by the decommit/recommit trick.
    pub zero_recommit_count: u64,
    /// Zero requests served by direct byte fill.
    pub zero_fill_count: u64,
    /// Low-memory notifications delivered to the fan-out list.
    pub low_memory_events: u64,
    /// Synchronous pressure polls.
    pub pressure_checks: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        reserve_count: s.reserve_count.load(Ordering::Relaxed),
        reserve_bytes: s.reserve_bytes.load(Ordering::Relaxed),
        commit_count: s.commit_count.load(Ordering::Relaxed),
        commit_bytes: s.commit_bytes.load(Ordering::Relaxed),
        decommit_count: s.decommit_count.load(Ordering::Relaxed),
        decommit_bytes: s.decommit_bytes.load(Ordering::Relaxed),
        zero_recommit_count: s.zero_recommit_count.load(Ordering::Relaxed),
        zero_fill_count: s.zero_fill_count.load(Ordering::Relaxed),
        low_memory_events: s.low_memory_events.load(Ordering::Relaxed),
        pressure_checks: s.pressure_checks.load(Ordering::Relaxed),
    }
}
