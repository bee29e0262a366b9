use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::pool::model::{
    Allocation, MarkOutcome, NewWaybill, PoolKey, PoolStats, ReleaseOutcome, TakeOutcome,
    WaybillRecord,
};
use crate::pool::repository::WaybillRepository;
use crate::time::from_ms;

/// In-process pool store.
///
/// A single mutex guards the whole pool, which makes `take_next` trivially
/// atomic. Codes within a sub-pool are kept ordered so the lowest code is
/// always handed out first, matching the SQL store.
#[derive(Default)]
pub struct MemoryWaybillRepository {
    inner: Mutex<MemoryPool>,
}

#[derive(Default)]
struct MemoryPool {
    next_id: i64,
    pools: BTreeMap<PoolKey, BTreeMap<String, WaybillRecord>>,
}

impl MemoryPool {
    fn by_vendor<'a>(
        &'a mut self,
        code: &'a str,
        vendor: &'a str,
    ) -> impl Iterator<Item = &'a mut WaybillRecord> + 'a {
        self.pools
            .iter_mut()
            .filter(move |(key, _)| key.vendor == vendor)
            .filter_map(move |(_, rows)| rows.get_mut(code))
    }
}

impl MemoryWaybillRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor: one sub-pool seeded with live codes.
    pub fn with_codes<I, S>(key: &PoolKey, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let repo = Self::new();
        {
            let mut pool = repo.inner.lock();
            for code in codes {
                insert(&mut pool, key, NewWaybill::live(code), 0);
            }
        }
        repo
    }

    /// Snapshot of one record, bypassing the vendor-only lookup of `find`.
    pub fn record(&self, key: &PoolKey, code: &str) -> Option<WaybillRecord> {
        self.inner
            .lock()
            .pools
            .get(key)
            .and_then(|rows| rows.get(code))
            .cloned()
    }
}

fn insert(pool: &mut MemoryPool, key: &PoolKey, new: NewWaybill, now_ms: i64) -> bool {
    let rows = pool.pools.entry(key.clone()).or_default();
    if rows.contains_key(&new.code) {
        return false;
    }

    pool.next_id += 1;
    rows.insert(
        new.code.clone(),
        WaybillRecord {
            id: pool.next_id,
            code: new.code,
            vendor: key.vendor.clone(),
            series: key.series.clone(),
            is_used: false,
            is_test: new.is_test,
            reconciled: false,
            used_at: None,
            modified_at: from_ms(now_ms),
        },
    );
    true
}

#[async_trait]
impl WaybillRepository for MemoryWaybillRepository {
    async fn take_next(&self, key: &PoolKey, now_ms: i64) -> Result<TakeOutcome> {
        let mut pool = self.inner.lock();

        let Some(rows) = pool.pools.get_mut(key) else {
            return Ok(TakeOutcome::NotConfigured);
        };

        if let Some(rec) = rows.values_mut().find(|r| !r.is_used && !r.is_test) {
            rec.is_used = true;
            rec.used_at = from_ms(now_ms);
            rec.modified_at = from_ms(now_ms);
            return Ok(TakeOutcome::Taken(Allocation {
                code: rec.code.clone(),
                id: rec.id,
                vendor: rec.vendor.clone(),
                series: rec.series.clone(),
            }));
        }

        let live = rows.values().filter(|r| !r.is_test);
        let total = live.clone().count() as u64;
        let used = live.filter(|r| r.is_used).count() as u64;

        if total == 0 {
            Ok(TakeOutcome::NotConfigured)
        } else {
            Ok(TakeOutcome::Exhausted { total, used })
        }
    }

    async fn release(&self, code: &str, vendor: &str, now_ms: i64) -> Result<ReleaseOutcome> {
        let mut pool = self.inner.lock();

        let mut seen = false;
        let mut released = false;
        for rec in pool.by_vendor(code, vendor) {
            seen = true;
            if rec.reconciled {
                continue;
            }
            rec.is_used = false;
            rec.modified_at = from_ms(now_ms);
            released = true;
        }

        Ok(match (seen, released) {
            (_, true) => ReleaseOutcome::Released,
            (true, false) => ReleaseOutcome::Pinned,
            (false, _) => ReleaseOutcome::Unknown,
        })
    }

    async fn mark_consumed(&self, code: &str, vendor: &str, now_ms: i64) -> Result<MarkOutcome> {
        let mut pool = self.inner.lock();

        let mut outcome = MarkOutcome::Unknown;
        for rec in pool.by_vendor(code, vendor) {
            if !rec.is_used {
                rec.is_used = true;
                rec.used_at = from_ms(now_ms);
                outcome = MarkOutcome::Consumed;
            } else if outcome == MarkOutcome::Unknown {
                outcome = MarkOutcome::AlreadyConsumed;
            }
            rec.reconciled = true;
            rec.modified_at = from_ms(now_ms);
        }

        Ok(outcome)
    }

    async fn find(&self, code: &str, vendor: &str) -> Result<Option<WaybillRecord>> {
        let pool = self.inner.lock();
        Ok(pool
            .pools
            .iter()
            .filter(|(key, _)| key.vendor == vendor)
            .filter_map(|(_, rows)| rows.get(code))
            .min_by_key(|r| r.id)
            .cloned())
    }

    async fn stats(&self, key: &PoolKey) -> Result<PoolStats> {
        let pool = self.inner.lock();

        let mut stats = PoolStats {
            vendor: key.vendor.clone(),
            series: key.series.clone(),
            total: 0,
            used: 0,
            available: 0,
            next_available: None,
            last_used: None,
        };

        // Ordered by code, so the first available is the lowest and the last used the highest.
        for rec in pool.pools.get(key).into_iter().flat_map(|r| r.values()) {
            if rec.is_test {
                continue;
            }
            stats.total += 1;
            if rec.is_used {
                stats.used += 1;
                stats.last_used = Some(rec.code.clone());
            } else {
                stats.available += 1;
                if stats.next_available.is_none() {
                    stats.next_available = Some(rec.code.clone());
                }
            }
        }

        Ok(stats)
    }

    async fn provision(&self, key: &PoolKey, codes: &[NewWaybill], now_ms: i64) -> Result<u64> {
        let mut pool = self.inner.lock();
        let inserted = codes
            .iter()
            .filter(|c| insert(&mut pool, key, (*c).clone(), now_ms))
            .count();
        Ok(inserted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PoolKey {
        PoolKey::new("NAQUEL", "PRIME")
    }

    #[tokio::test]
    async fn take_hands_out_lowest_code_first() {
        let repo = MemoryWaybillRepository::with_codes(&key(), ["300", "100", "200"]);

        let mut order = Vec::new();
        for _ in 0..3 {
            match repo.take_next(&key(), 1).await.unwrap() {
                TakeOutcome::Taken(a) => order.push(a.code),
                other => panic!("unexpected {other:?}"),
            }
        }

        assert_eq!(order, vec!["100", "200", "300"]);
    }

    #[tokio::test]
    async fn test_records_are_never_allocated() {
        let repo = MemoryWaybillRepository::new();
        repo.provision(&key(), &[NewWaybill::test("001"), NewWaybill::live("002")], 0)
            .await
            .unwrap();

        let first = repo.take_next(&key(), 1).await.unwrap();
        assert!(matches!(first, TakeOutcome::Taken(ref a) if a.code == "002"));

        let second = repo.take_next(&key(), 1).await.unwrap();
        assert_eq!(second, TakeOutcome::Exhausted { total: 1, used: 1 });
    }

    #[tokio::test]
    async fn pool_of_only_test_records_is_not_configured() {
        let repo = MemoryWaybillRepository::new();
        repo.provision(&key(), &[NewWaybill::test("001")], 0)
            .await
            .unwrap();

        assert_eq!(
            repo.take_next(&key(), 1).await.unwrap(),
            TakeOutcome::NotConfigured
        );
    }

    #[tokio::test]
    async fn provision_skips_existing_codes() {
        let repo = MemoryWaybillRepository::with_codes(&key(), ["A1"]);
        let inserted = repo
            .provision(&key(), &[NewWaybill::live("A1"), NewWaybill::live("A2")], 5)
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(repo.stats(&key()).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn mark_consumed_pins_an_issued_code() {
        let repo = MemoryWaybillRepository::with_codes(&key(), ["A1"]);
        repo.take_next(&key(), 1).await.unwrap();

        let outcome = repo.mark_consumed("A1", "NAQUEL", 2).await.unwrap();
        assert_eq!(outcome, MarkOutcome::AlreadyConsumed);

        let released = repo.release("A1", "NAQUEL", 3).await.unwrap();
        assert_eq!(released, ReleaseOutcome::Pinned);
        assert!(repo.record(&key(), "A1").unwrap().is_used);
    }

    #[tokio::test]
    async fn unknown_codes_are_reported_not_created() {
        let repo = MemoryWaybillRepository::with_codes(&key(), ["A1"]);

        assert_eq!(
            repo.mark_consumed("ZZ", "NAQUEL", 1).await.unwrap(),
            MarkOutcome::Unknown
        );
        assert_eq!(
            repo.release("ZZ", "NAQUEL", 1).await.unwrap(),
            ReleaseOutcome::Unknown
        );
        assert!(repo.find("ZZ", "NAQUEL").await.unwrap().is_none());
    }
}
