use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Waybill pool
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS awb_pool (
  id INTEGER PRIMARY KEY,
  code TEXT NOT NULL,
  vendor TEXT NOT NULL,
  series TEXT NOT NULL,
  is_used INTEGER NOT NULL DEFAULT 0 CHECK (is_used IN (0,1)),
  is_test INTEGER NOT NULL DEFAULT 0 CHECK (is_test IN (0,1)),
  reconciled INTEGER NOT NULL DEFAULT 0 CHECK (reconciled IN (0,1)),
  used_at_ms BIGINT,
  modified_at_ms BIGINT,
  created_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Submission journal
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS waybill_submissions (
  submission_id TEXT PRIMARY KEY,
  trace_id TEXT NOT NULL,
  reference TEXT NOT NULL,
  vendor TEXT NOT NULL,
  waybill TEXT,
  booking_reference TEXT,
  outcome TEXT NOT NULL,
  message TEXT NOT NULL,
  attempts BIGINT NOT NULL,
  recorded_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_awb_pool_key ON awb_pool(vendor, series, code);"#,
    )
    .execute(pool)
    .await?;

    // Serves the available-code scan of take_next.
    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_awb_pool_free ON awb_pool(vendor, series, is_used, is_test, code);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_submissions_reference ON waybill_submissions(reference);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
