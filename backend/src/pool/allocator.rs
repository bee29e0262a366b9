use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::logger::warn_if_slow;
use tracing::{debug, info, instrument, warn};

use crate::error::PoolError;
use crate::pool::model::{
    Allocation, Availability, NewWaybill, PoolKey, PoolStats, ReleaseOutcome, TakeOutcome,
};
use crate::pool::repository::WaybillRepository;
use crate::time::now_ms;

/// Caller-facing pool manager: hands out and takes back waybills.
///
/// All atomicity lives in the repository's `take_next`; this layer adds
/// typed errors, logging and latency warnings.
pub struct Allocator {
    repo: Arc<dyn WaybillRepository>,
}

impl Allocator {
    pub fn new(repo: Arc<dyn WaybillRepository>) -> Self {
        Self { repo }
    }

    /// Takes the lowest available waybill of the sub-pool and marks it used.
    ///
    /// Exhaustion and an unconfigured sub-pool are returned as distinct errors
    /// and are never retried here.
    #[instrument(skip(self), target = "allocator", fields(pool = %key))]
    pub async fn take(&self, key: &PoolKey) -> Result<Allocation, PoolError> {
        let outcome = warn_if_slow("db_take_next", Duration::from_millis(100), async {
            self.repo.take_next(key, now_ms()).await
        })
        .await
        .context("repository take failed")?;

        match outcome {
            TakeOutcome::Taken(a) => {
                info!(waybill = %a.code, id = a.id, "allocated waybill");
                Ok(a)
            }
            TakeOutcome::Exhausted { total, used } => {
                warn!(total, used, "waybill pool exhausted");
                Err(PoolError::Exhausted {
                    vendor: key.vendor.clone(),
                    series: key.series.clone(),
                    total,
                    used,
                })
            }
            TakeOutcome::NotConfigured => {
                warn!("no waybills configured for pool");
                Err(PoolError::NotConfigured {
                    vendor: key.vendor.clone(),
                    series: key.series.clone(),
                })
            }
        }
    }

    /// Returns a waybill to the pool. Idempotent; reconciled waybills stay consumed.
    #[instrument(skip(self), target = "allocator", fields(waybill = %code, vendor = %vendor))]
    pub async fn release(&self, code: &str, vendor: &str) -> Result<ReleaseOutcome, PoolError> {
        let outcome = warn_if_slow("db_release", Duration::from_millis(50), async {
            self.repo.release(code, vendor, now_ms()).await
        })
        .await
        .context("repository release failed")?;

        match outcome {
            ReleaseOutcome::Released => info!("waybill released back to pool"),
            ReleaseOutcome::Pinned => warn!("refusing to release a reconciled waybill"),
            ReleaseOutcome::Unknown => warn!("release requested for unknown waybill"),
        }

        Ok(outcome)
    }

    /// Read-only lookup; unknown codes are reported, not raised.
    #[instrument(skip(self), target = "allocator", fields(waybill = %code, vendor = %vendor))]
    pub async fn check_availability(
        &self,
        code: &str,
        vendor: &str,
    ) -> Result<Availability, PoolError> {
        let record = self
            .repo
            .find(code, vendor)
            .await
            .context("repository lookup failed")?;

        let availability = match record {
            Some(r) => Availability::from_record(&r),
            None => Availability::unknown(code),
        };

        debug!(
            exists = availability.exists,
            available = availability.available,
            "waybill availability checked"
        );
        Ok(availability)
    }

    #[instrument(skip(self), target = "allocator", fields(pool = %key))]
    pub async fn stats(&self, key: &PoolKey) -> Result<PoolStats, PoolError> {
        let stats = warn_if_slow("db_stats", Duration::from_millis(200), async {
            self.repo.stats(key).await
        })
        .await
        .context("repository stats failed")?;

        debug!(
            total = stats.total,
            used = stats.used,
            available = stats.available,
            "pool stats fetched"
        );
        Ok(stats)
    }

    /// Out-of-band provisioning of new waybills; existing codes are skipped.
    #[instrument(skip(self, codes), target = "allocator", fields(pool = %key, requested = codes.len()))]
    pub async fn provision(&self, key: &PoolKey, codes: &[NewWaybill]) -> Result<u64, PoolError> {
        let inserted = self
            .repo
            .provision(key, codes, now_ms())
            .await
            .context("repository provisioning failed")?;

        info!(inserted, "waybills provisioned");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::task::JoinSet;

    use crate::pool::memory::MemoryWaybillRepository;

    fn key() -> PoolKey {
        PoolKey::new("NAQUEL", "PRIME")
    }

    fn allocator_with(codes: impl IntoIterator<Item = String>) -> Allocator {
        Allocator::new(Arc::new(MemoryWaybillRepository::with_codes(&key(), codes)))
    }

    #[tokio::test]
    async fn concurrent_takes_never_share_a_waybill() {
        let codes: Vec<String> = (0..64).map(|i| format!("{:010}", 4_000_000 + i)).collect();
        let allocator = Arc::new(allocator_with(codes));

        let mut set = JoinSet::new();
        for _ in 0..50 {
            let a = Arc::clone(&allocator);
            set.spawn(async move { a.take(&key()).await });
        }

        let mut seen = HashSet::new();
        while let Some(res) = set.join_next().await {
            let alloc = res.expect("task panicked").expect("take failed");
            assert!(seen.insert(alloc.code.clone()), "duplicate waybill {}", alloc.code);
        }

        assert_eq!(seen.len(), 50);
        assert_eq!(allocator.stats(&key()).await.unwrap().used, 50);
    }

    #[tokio::test]
    async fn take_then_release_makes_waybill_available_again() {
        let allocator = allocator_with(["A1".to_string()]);

        let a = allocator.take(&key()).await.unwrap();
        assert!(!allocator.check_availability(&a.code, "NAQUEL").await.unwrap().available);

        let out = allocator.release(&a.code, "NAQUEL").await.unwrap();
        assert_eq!(out, ReleaseOutcome::Released);
        assert!(allocator.check_availability(&a.code, "NAQUEL").await.unwrap().available);

        // Idempotent.
        assert_eq!(
            allocator.release(&a.code, "NAQUEL").await.unwrap(),
            ReleaseOutcome::Released
        );
    }

    #[tokio::test]
    async fn exhausted_pool_reports_counts() {
        let allocator = allocator_with(["A1".to_string(), "A2".to_string()]);
        allocator.take(&key()).await.unwrap();
        allocator.take(&key()).await.unwrap();

        match allocator.take(&key()).await {
            Err(PoolError::Exhausted { total, used, .. }) => {
                assert_eq!(total, 2);
                assert_eq!(total, used);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_pool_is_not_configured() {
        let allocator = Allocator::new(Arc::new(MemoryWaybillRepository::new()));

        let err = allocator.take(&key()).await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::NotConfigured { ref vendor, ref series } if vendor == "NAQUEL" && series == "PRIME"
        ));
    }

    #[tokio::test]
    async fn unknown_code_check_does_not_fail() {
        let allocator = allocator_with(["A1".to_string()]);

        let status = allocator.check_availability("nope", "NAQUEL").await.unwrap();
        assert!(!status.exists);
        assert!(!status.available);
    }

    #[tokio::test]
    async fn test_records_are_never_reported_available() {
        let allocator = allocator_with(["A1".to_string()]);
        allocator
            .provision(&key(), &[NewWaybill::test("T1")])
            .await
            .unwrap();

        let status = allocator.check_availability("T1", "NAQUEL").await.unwrap();
        assert!(status.exists);
        assert!(!status.available);

        // Agrees with take: only the live code is handed out.
        assert_eq!(allocator.take(&key()).await.unwrap().code, "A1");
        assert!(allocator.take(&key()).await.is_err());
    }

    #[tokio::test]
    async fn stats_track_lowest_available_and_highest_used() {
        let allocator = allocator_with(["A1", "A2", "A3"].map(String::from));
        allocator.take(&key()).await.unwrap();
        allocator.take(&key()).await.unwrap();

        let s = allocator.stats(&key()).await.unwrap();
        assert_eq!((s.total, s.used, s.available), (3, 2, 1));
        assert_eq!(s.next_available.as_deref(), Some("A3"));
        assert_eq!(s.last_used.as_deref(), Some("A2"));
    }
}
