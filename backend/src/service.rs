//! Caller-facing entry point. Wires the pool store, carrier gateway and
//! journal together and exposes the allocation operations alongside `submit`.

use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::db::Db;
use crate::error::{PoolError, SubmitError};
use crate::metrics::counters::{Counters, CountersSnapshot, bump};
use crate::pool::model::{
    Allocation, Availability, MarkOutcome, NewWaybill, PoolKey, PoolStats, ReleaseOutcome,
};
use crate::pool::repository::WaybillRepository;
use crate::pool::repository_sqlx::SqlxWaybillRepository;
use crate::pool::{Allocator, Reconciler};
use crate::submission::carrier::{CarrierGateway, HttpCarrierGateway};
use crate::submission::journal::{SqlxSubmissionJournal, SubmissionJournal};
use crate::submission::orchestrator::SubmissionOrchestrator;
use crate::submission::types::{Manifest, SubmissionReceipt, SubmitOptions};

pub struct WaybillService<C: CarrierGateway> {
    allocator: Allocator,
    reconciler: Reconciler,
    orchestrator: SubmissionOrchestrator<C>,
    counters: Counters,
}

impl<C: CarrierGateway> WaybillService<C> {
    pub fn new(
        repo: Arc<dyn WaybillRepository>,
        carrier: Arc<C>,
        journal: Arc<dyn SubmissionJournal>,
        cfg: &AppConfig,
    ) -> Self {
        let counters = Counters::default();
        let orchestrator =
            SubmissionOrchestrator::new(repo.clone(), carrier, cfg.pool.clone(), cfg.submission.clone())
                .with_journal(journal)
                .with_counters(counters.clone());

        Self {
            allocator: Allocator::new(repo.clone()),
            reconciler: Reconciler::new(repo),
            orchestrator,
            counters,
        }
    }

    pub async fn allocate(&self, vendor: &str, series: &str) -> Result<Allocation, PoolError> {
        let allocation = self.allocator.take(&PoolKey::new(vendor, series)).await?;
        bump(&self.counters.allocations);
        Ok(allocation)
    }

    pub async fn release(&self, code: &str, vendor: &str) -> Result<ReleaseOutcome, PoolError> {
        let outcome = self.allocator.release(code, vendor).await;
        match &outcome {
            Ok(ReleaseOutcome::Released) => bump(&self.counters.releases),
            Err(_) => bump(&self.counters.release_failures),
            Ok(_) => {}
        }
        outcome
    }

    pub async fn mark_consumed(&self, code: &str, vendor: &str) -> Result<MarkOutcome, PoolError> {
        self.reconciler.mark_consumed(code, vendor).await
    }

    pub async fn check_availability(
        &self,
        code: &str,
        vendor: &str,
    ) -> Result<Availability, PoolError> {
        self.allocator.check_availability(code, vendor).await
    }

    pub async fn stats(&self, vendor: &str, series: &str) -> Result<PoolStats, PoolError> {
        self.allocator.stats(&PoolKey::new(vendor, series)).await
    }

    pub async fn provision(
        &self,
        vendor: &str,
        series: &str,
        codes: &[NewWaybill],
    ) -> Result<u64, PoolError> {
        self.allocator
            .provision(&PoolKey::new(vendor, series), codes)
            .await
    }

    pub async fn submit(
        &self,
        manifest: &Manifest,
        opts: SubmitOptions,
    ) -> Result<SubmissionReceipt, SubmitError> {
        self.orchestrator.submit(manifest, opts).await
    }

    /// Sub-pool used by `submit`.
    pub fn default_pool(&self) -> &PoolKey {
        self.orchestrator.pool()
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }
}

impl WaybillService<HttpCarrierGateway> {
    /// Production wiring: SQL pool store and journal on `db`, HTTP carrier
    /// from the configured endpoint.
    pub fn from_config(db: &Db, cfg: &AppConfig) -> anyhow::Result<Self> {
        let carrier = HttpCarrierGateway::new(cfg.carrier_endpoint.clone(), cfg.carrier_timeout)
            .context("build carrier gateway")?;

        Ok(Self::new(
            Arc::new(SqlxWaybillRepository::new(db.pool.clone())),
            Arc::new(carrier),
            Arc::new(SqlxSubmissionJournal::new(db.pool.clone())),
            cfg,
        ))
    }
}
