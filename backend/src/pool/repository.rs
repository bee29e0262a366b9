use anyhow::Result;
use async_trait::async_trait;

use crate::pool::model::{
    MarkOutcome, NewWaybill, PoolKey, PoolStats, ReleaseOutcome, TakeOutcome, WaybillRecord,
};

/// Persistence boundary for the waybill pool.
///
/// Every mutation of pool state goes through this trait; callers never read-then-write.
///
/// Contract for implementors:
/// - `take_next` is one serializable unit: selecting the lowest available,
///   non-test code of the sub-pool and marking it used must be indivisible, so
///   two concurrent callers can never receive the same record. A store that
///   cannot lock rows must compare-and-set and retry on a lost race.
/// - `release` must refuse to reopen a reconciled record.
/// - `mark_consumed` never creates records.
#[async_trait]
pub trait WaybillRepository: Send + Sync {
    async fn take_next(&self, key: &PoolKey, now_ms: i64) -> Result<TakeOutcome>;

    async fn release(&self, code: &str, vendor: &str, now_ms: i64) -> Result<ReleaseOutcome>;

    async fn mark_consumed(&self, code: &str, vendor: &str, now_ms: i64) -> Result<MarkOutcome>;

    async fn find(&self, code: &str, vendor: &str) -> Result<Option<WaybillRecord>>;

    async fn stats(&self, key: &PoolKey) -> Result<PoolStats>;

    /// Inserts codes that are not yet present; existing rows are left untouched.
    /// Returns the number of rows actually inserted.
    async fn provision(&self, key: &PoolKey, codes: &[NewWaybill], now_ms: i64) -> Result<u64>;
}
