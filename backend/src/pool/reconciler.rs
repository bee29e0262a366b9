use std::sync::Arc;

use anyhow::Context;
use tracing::{info, instrument, warn};

use crate::error::PoolError;
use crate::pool::model::MarkOutcome;
use crate::pool::repository::WaybillRepository;
use crate::time::now_ms;

/// Aligns the pool with carrier-side truth after a conflict verdict.
pub struct Reconciler {
    repo: Arc<dyn WaybillRepository>,
}

impl Reconciler {
    pub fn new(repo: Arc<dyn WaybillRepository>) -> Self {
        Self { repo }
    }

    /// Records that the carrier already knows `code`.
    ///
    /// The record ends up used and reconciled, so a later release cannot
    /// return it to the pool. Calling it for a code the caller still holds
    /// reports `AlreadyConsumed`; that is the normal case after a conflict.
    #[instrument(skip(self), target = "reconciler", fields(waybill = %code, vendor = %vendor))]
    pub async fn mark_consumed(&self, code: &str, vendor: &str) -> Result<MarkOutcome, PoolError> {
        let outcome = self
            .repo
            .mark_consumed(code, vendor, now_ms())
            .await
            .with_context(|| format!("mark waybill {code} consumed"))?;

        match outcome {
            MarkOutcome::Consumed => info!("waybill reconciled as consumed"),
            MarkOutcome::AlreadyConsumed => info!("waybill already used; pinned as consumed"),
            MarkOutcome::Unknown => warn!("carrier conflict for a waybill the pool does not hold"),
        }

        Ok(outcome)
    }
}
