use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub allocations: Arc<AtomicU64>,
    pub allocation_store_errors: Arc<AtomicU64>,
    pub releases: Arc<AtomicU64>,
    pub release_failures: Arc<AtomicU64>,

    pub submissions: Arc<AtomicU64>,
    pub transport_retries: Arc<AtomicU64>,

    // carrier verdicts
    pub accepted: Arc<AtomicU64>,
    pub conflicts: Arc<AtomicU64>,
    pub reconcile_failures: Arc<AtomicU64>,
    pub skipped_defects: Arc<AtomicU64>,
    pub terminal_errors: Arc<AtomicU64>,
    pub safety_limit_hits: Arc<AtomicU64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub allocations: u64,
    pub allocation_store_errors: u64,
    pub releases: u64,
    pub release_failures: u64,
    pub submissions: u64,
    pub transport_retries: u64,
    pub accepted: u64,
    pub conflicts: u64,
    pub reconcile_failures: u64,
    pub skipped_defects: u64,
    pub terminal_errors: u64,
    pub safety_limit_hits: u64,
}

pub(crate) fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);
        CountersSnapshot {
            allocations: get(&self.allocations),
            allocation_store_errors: get(&self.allocation_store_errors),
            releases: get(&self.releases),
            release_failures: get(&self.release_failures),
            submissions: get(&self.submissions),
            transport_retries: get(&self.transport_retries),
            accepted: get(&self.accepted),
            conflicts: get(&self.conflicts),
            reconcile_failures: get(&self.reconcile_failures),
            skipped_defects: get(&self.skipped_defects),
            terminal_errors: get(&self.terminal_errors),
            safety_limit_hits: get(&self.safety_limit_hits),
        }
    }
}
