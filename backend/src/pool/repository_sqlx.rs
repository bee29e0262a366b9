use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use crate::pool::model::{
    Allocation, MarkOutcome, NewWaybill, PoolKey, PoolStats, ReleaseOutcome, TakeOutcome,
    WaybillRecord,
};
use crate::pool::repository::WaybillRepository;
use crate::time::from_ms;

/// How often `take_next` re-runs its compare-and-set after losing the row to a
/// concurrent writer before giving up.
const MAX_TAKE_ROUNDS: usize = 16;

/// SQLx-backed implementation of WaybillRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxWaybillRepository {
    pool: AnyPool,
}

impl SqlxWaybillRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn live_counts(&self, key: &PoolKey) -> anyhow::Result<(u64, u64)> {
        let row = sqlx::query(
            r#"
SELECT
  COUNT(*) AS total,
  CAST(COALESCE(SUM(CASE WHEN is_used = 1 THEN 1 ELSE 0 END), 0) AS BIGINT) AS used
FROM awb_pool
WHERE vendor = ? AND series = ? AND is_test = 0;
"#,
        )
        .bind(&key.vendor)
        .bind(&key.series)
        .fetch_one(&self.pool)
        .await
        .context("count live waybills")?;

        Ok((
            i64_to_u64(row.get("total"))?,
            i64_to_u64(row.get("used"))?,
        ))
    }
}

#[async_trait]
impl WaybillRepository for SqlxWaybillRepository {
    async fn take_next(&self, key: &PoolKey, now_ms: i64) -> anyhow::Result<TakeOutcome> {
        for _ in 0..MAX_TAKE_ROUNDS {
            // Select and mark in one statement. The outer `is_used = 0` re-check makes
            // the update a compare-and-set: if another writer took the row first, no
            // row is returned and we go round again.
            let row = sqlx::query(
                r#"
UPDATE awb_pool
SET is_used = 1, used_at_ms = ?, modified_at_ms = ?
WHERE id = (
  SELECT id FROM awb_pool
  WHERE vendor = ? AND series = ? AND is_used = 0 AND is_test = 0
  ORDER BY code ASC
  LIMIT 1
)
AND is_used = 0
RETURNING id, code;
"#,
            )
            .bind(now_ms)
            .bind(now_ms)
            .bind(&key.vendor)
            .bind(&key.series)
            .fetch_optional(&self.pool)
            .await
            .context("take next waybill")?;

            if let Some(r) = row {
                return Ok(TakeOutcome::Taken(Allocation {
                    id: r.get("id"),
                    code: r.get("code"),
                    vendor: key.vendor.clone(),
                    series: key.series.clone(),
                }));
            }

            let (total, used) = self.live_counts(key).await?;
            if total == 0 {
                return Ok(TakeOutcome::NotConfigured);
            }
            if used >= total {
                return Ok(TakeOutcome::Exhausted { total, used });
            }
            tracing::debug!(pool = %key, total, used, "lost waybill row to a concurrent take; retrying");
        }

        Err(anyhow!(
            "waybill take for {key} lost {MAX_TAKE_ROUNDS} consecutive races"
        ))
    }

    async fn release(&self, code: &str, vendor: &str, now_ms: i64) -> anyhow::Result<ReleaseOutcome> {
        let done = sqlx::query(
            r#"
UPDATE awb_pool
SET is_used = 0, modified_at_ms = ?
WHERE code = ? AND vendor = ? AND reconciled = 0;
"#,
        )
        .bind(now_ms)
        .bind(code)
        .bind(vendor)
        .execute(&self.pool)
        .await
        .context("release waybill")?;

        if done.rows_affected() > 0 {
            return Ok(ReleaseOutcome::Released);
        }

        Ok(match self.find(code, vendor).await? {
            Some(_) => ReleaseOutcome::Pinned,
            None => ReleaseOutcome::Unknown,
        })
    }

    async fn mark_consumed(&self, code: &str, vendor: &str, now_ms: i64) -> anyhow::Result<MarkOutcome> {
        let flipped = sqlx::query(
            r#"
UPDATE awb_pool
SET is_used = 1, reconciled = 1, used_at_ms = ?, modified_at_ms = ?
WHERE code = ? AND vendor = ? AND is_used = 0;
"#,
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(code)
        .bind(vendor)
        .execute(&self.pool)
        .await
        .context("mark waybill consumed")?;

        // Pin any rows that were already used (issued by a take) as well.
        let pinned = sqlx::query(
            r#"
UPDATE awb_pool
SET reconciled = 1, modified_at_ms = ?
WHERE code = ? AND vendor = ? AND reconciled = 0;
"#,
        )
        .bind(now_ms)
        .bind(code)
        .bind(vendor)
        .execute(&self.pool)
        .await
        .context("pin consumed waybill")?;

        if flipped.rows_affected() > 0 {
            return Ok(MarkOutcome::Consumed);
        }
        if pinned.rows_affected() > 0 {
            return Ok(MarkOutcome::AlreadyConsumed);
        }

        Ok(match self.find(code, vendor).await? {
            Some(_) => MarkOutcome::AlreadyConsumed,
            None => MarkOutcome::Unknown,
        })
    }

    async fn find(&self, code: &str, vendor: &str) -> anyhow::Result<Option<WaybillRecord>> {
        let row = sqlx::query(
            r#"
SELECT id, code, vendor, series, is_used, is_test, reconciled, used_at_ms, modified_at_ms
FROM awb_pool
WHERE code = ? AND vendor = ?
ORDER BY id ASC
LIMIT 1;
"#,
        )
        .bind(code)
        .bind(vendor)
        .fetch_optional(&self.pool)
        .await
        .context("find waybill")?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn stats(&self, key: &PoolKey) -> anyhow::Result<PoolStats> {
        let row = sqlx::query(
            r#"
SELECT
  COUNT(*) AS total,
  CAST(COALESCE(SUM(CASE WHEN is_used = 1 THEN 1 ELSE 0 END), 0) AS BIGINT) AS used,
  CAST(COALESCE(SUM(CASE WHEN is_used = 0 THEN 1 ELSE 0 END), 0) AS BIGINT) AS available,
  MIN(CASE WHEN is_used = 0 THEN code END) AS next_available,
  MAX(CASE WHEN is_used = 1 THEN code END) AS last_used
FROM awb_pool
WHERE vendor = ? AND series = ? AND is_test = 0;
"#,
        )
        .bind(&key.vendor)
        .bind(&key.series)
        .fetch_one(&self.pool)
        .await
        .context("waybill stats")?;

        Ok(PoolStats {
            vendor: key.vendor.clone(),
            series: key.series.clone(),
            total: i64_to_u64(row.get("total"))?,
            used: i64_to_u64(row.get("used"))?,
            available: i64_to_u64(row.get("available"))?,
            next_available: row.try_get::<Option<String>, _>("next_available")?,
            last_used: row.try_get::<Option<String>, _>("last_used")?,
        })
    }

    async fn provision(
        &self,
        key: &PoolKey,
        codes: &[NewWaybill],
        now_ms: i64,
    ) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await.context("begin provisioning")?;
        let mut inserted = 0;

        for new in codes {
            let done = sqlx::query(
                r#"
INSERT INTO awb_pool (code, vendor, series, is_used, is_test, reconciled, created_at_ms, modified_at_ms)
VALUES (?, ?, ?, 0, ?, 0, ?, ?)
ON CONFLICT (vendor, series, code) DO NOTHING;
"#,
            )
            .bind(&new.code)
            .bind(&key.vendor)
            .bind(&key.series)
            .bind(i64::from(new.is_test))
            .bind(now_ms)
            .bind(now_ms)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("provision waybill {}", new.code))?;

            inserted += done.rows_affected();
        }

        tx.commit().await.context("commit provisioning")?;
        Ok(inserted)
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_record(r: &sqlx::any::AnyRow) -> anyhow::Result<WaybillRecord> {
    let used_at_ms: Option<i64> = r.try_get("used_at_ms")?;
    let modified_at_ms: Option<i64> = r.try_get("modified_at_ms")?;

    Ok(WaybillRecord {
        id: r.get("id"),
        code: r.get("code"),
        vendor: r.get("vendor"),
        series: r.get("series"),
        is_used: i64_to_flag(r.get("is_used"))?,
        is_test: i64_to_flag(r.get("is_test"))?,
        reconciled: i64_to_flag(r.get("reconciled"))?,
        used_at: used_at_ms.and_then(from_ms),
        modified_at: modified_at_ms.and_then(from_ms),
    })
}

/* =========================
Numeric safety helpers
========================= */

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

fn i64_to_flag(v: i64) -> anyhow::Result<bool> {
    match v {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(anyhow!("flag column out of range: {other}")),
    }
}
