use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility.
#[derive(Clone, Default, Debug)]
pub struct Counters {
    pub reservations_acquired: Arc<AtomicU64>,
    pub reservations_released: Arc<AtomicU64>,
    pub reservations_committed: Arc<AtomicU64>,

    // failure / degradation reasons
    pub release_failures: Arc<AtomicU64>,
    pub stock_conflicts: Arc<AtomicU64>,
    pub adjust_fallbacks: Arc<AtomicU64>,
    pub promotion_warnings: Arc<AtomicU64>,
    pub orphans_released: Arc<AtomicU64>,

    pub orders_committed: Arc<AtomicU64>,
    pub commit_failures: Arc<AtomicU64>,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
