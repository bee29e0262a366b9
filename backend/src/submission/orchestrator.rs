//! Submission orchestrator: one manifest in, one carrier-registered waybill out.
//!
//! States:
//! - `Allocating`: take the next waybill from the pool.
//! - `Submitting`: hand the manifest to the carrier with the held waybill.
//! - `ConflictRetry`: carrier already knows the waybill; it was reconciled as consumed.
//! - `SkipRetry`: carrier hit its save defect; the waybill is abandoned as used.
//! - success and hard failures end the run.
//!
//! Invariants:
//! - a held waybill is released only on a hard failure, never after a conflict
//! - carrier submissions per request never exceed `SubmissionPolicy::max_attempts`
//! - custom waybills never touch pool state
//!
//! Every outcome is journalled best-effort before it is returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::logger::{TraceId, annotate_span, child_span, root_span};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::config::SubmissionPolicy;
use crate::error::{PoolError, SubmitError};
use crate::metrics::counters::{Counters, bump};
use crate::pool::model::{Allocation, PoolKey, ReleaseOutcome};
use crate::pool::repository::WaybillRepository;
use crate::pool::{Allocator, Reconciler};
use crate::submission::carrier::CarrierGateway;
use crate::submission::classify::{CarrierVerdict, classify};
use crate::submission::journal::{JournalEntry, NoopJournal, SubmissionJournal};
use crate::submission::types::{
    CarrierRequest, CarrierResponse, Manifest, SubmissionReceipt, SubmitOptions,
};

#[derive(Debug)]
enum State {
    Allocating,
    Submitting(Allocation),
    ConflictRetry,
    SkipRetry,
}

/// Progress of one pooled submission.
#[derive(Default)]
struct Progress {
    attempts: u32,
    conflicted: Vec<String>,
    skipped: Vec<String>,
}

pub struct SubmissionOrchestrator<C: CarrierGateway> {
    allocator: Allocator,
    reconciler: Reconciler,
    carrier: Arc<C>,
    journal: Arc<dyn SubmissionJournal>,
    pool: PoolKey,
    policy: SubmissionPolicy,
    counters: Counters,
}

impl<C: CarrierGateway> SubmissionOrchestrator<C> {
    pub fn new(
        repo: Arc<dyn WaybillRepository>,
        carrier: Arc<C>,
        pool: PoolKey,
        policy: SubmissionPolicy,
    ) -> Self {
        Self {
            allocator: Allocator::new(repo.clone()),
            reconciler: Reconciler::new(repo),
            carrier,
            journal: Arc::new(NoopJournal),
            pool,
            policy,
            counters: Counters::default(),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn SubmissionJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_counters(mut self, counters: Counters) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn pool(&self) -> &PoolKey {
        &self.pool
    }

    /// Submits `manifest`, allocating waybills from the configured pool until
    /// the carrier accepts one or a hard failure occurs.
    ///
    /// With `opts.custom_waybill` set the pool is bypassed and any carrier
    /// rejection is final.
    pub async fn submit(
        &self,
        manifest: &Manifest,
        opts: SubmitOptions,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let trace_id = TraceId::default();
        let span = root_span("submit", &trace_id);

        async {
            annotate_span(&self.pool.vendor, opts.custom_waybill.as_deref());
            bump(&self.counters.submissions);

            info!(
                component = "orchestrator",
                event = "start",
                reference = %manifest.reference,
                custom = opts.custom_waybill.is_some(),
                "submission started"
            );

            let result = match opts.custom_waybill.as_deref() {
                Some(code) => self.submit_custom(manifest, code, &trace_id).await,
                None => self.submit_pooled(manifest, &trace_id).await,
            };

            match &result {
                Ok(r) => info!(
                    component = "orchestrator",
                    event = "success",
                    waybill = %r.waybill,
                    attempts = r.attempts,
                    "submission accepted by carrier"
                ),
                Err(e) => error!(
                    component = "orchestrator",
                    event = "hard_fail",
                    kind = e.kind(),
                    error = %e,
                    "submission failed"
                ),
            }

            self.journal_outcome(manifest, &trace_id, &result).await;
            result
        }
        .instrument(span)
        .await
    }

    async fn submit_pooled(
        &self,
        manifest: &Manifest,
        trace_id: &TraceId,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let mut progress = Progress::default();
        let mut state = State::Allocating;

        loop {
            state = match state {
                State::Allocating => State::Submitting(self.allocate(progress.attempts).await?),

                State::Submitting(held) => {
                    annotate_span(&held.vendor, Some(held.code.as_str()));
                    progress.attempts += 1;

                    let request = CarrierRequest::new(&held.code, manifest);
                    let response = match self
                        .deliver(&request)
                        .instrument(child_span("carrier_submit"))
                        .await
                    {
                        Ok(r) => r,
                        Err(e) => {
                            let released = self.release_quietly(&held).await;
                            return Err(SubmitError::TransportFailure {
                                waybill: held.code,
                                attempts: progress.attempts,
                                transport_attempts: self.policy.transport_max_attempts.max(1),
                                reason: format!("{e:#}"),
                                released,
                            });
                        }
                    };

                    match classify(&response) {
                        CarrierVerdict::Accepted => {
                            bump(&self.counters.accepted);
                            return Ok(receipt(trace_id, Some(held), response, progress));
                        }
                        CarrierVerdict::Conflict => {
                            bump(&self.counters.conflicts);
                            warn!(
                                component = "orchestrator",
                                event = "conflict",
                                waybill = %held.code,
                                attempt = progress.attempts,
                                carrier_message = %response.message,
                                "carrier already holds waybill; reconciling"
                            );

                            if let Err(e) =
                                self.reconciler.mark_consumed(&held.code, &held.vendor).await
                            {
                                // Still used from the take, so it is not re-issued.
                                bump(&self.counters.reconcile_failures);
                                error!(waybill = %held.code, error = %e, "reconcile failed; continuing");
                            }

                            progress.conflicted.push(held.code);
                            State::ConflictRetry
                        }
                        CarrierVerdict::TransientDefect => {
                            bump(&self.counters.skipped_defects);
                            warn!(
                                component = "orchestrator",
                                event = "skip",
                                waybill = %held.code,
                                attempt = progress.attempts,
                                carrier_message = %response.message,
                                "carrier save defect; abandoning waybill"
                            );

                            progress.skipped.push(held.code);
                            State::SkipRetry
                        }
                        CarrierVerdict::Terminal => {
                            bump(&self.counters.terminal_errors);
                            let released = self.release_quietly(&held).await;
                            return Err(SubmitError::CarrierTerminal {
                                waybill: held.code,
                                message: response.message,
                                released,
                                attempts: progress.attempts,
                            });
                        }
                    }
                }

                State::ConflictRetry => {
                    self.before_retry(progress.attempts, CarrierVerdict::Conflict)
                        .await?;
                    State::Allocating
                }

                State::SkipRetry => {
                    self.before_retry(progress.attempts, CarrierVerdict::TransientDefect)
                        .await?;
                    State::Allocating
                }
            };
        }
    }

    async fn submit_custom(
        &self,
        manifest: &Manifest,
        code: &str,
        trace_id: &TraceId,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let request = CarrierRequest::new(code, manifest);
        let response = self
            .deliver(&request)
            .instrument(child_span("carrier_submit"))
            .await
            .map_err(|e| SubmitError::TransportFailure {
                waybill: code.to_string(),
                attempts: 1,
                transport_attempts: self.policy.transport_max_attempts.max(1),
                reason: format!("{e:#}"),
                released: false,
            })?;

        match classify(&response) {
            CarrierVerdict::Accepted => {
                bump(&self.counters.accepted);
                let progress = Progress {
                    attempts: 1,
                    ..Progress::default()
                };
                let mut r = receipt(trace_id, None, response, progress);
                r.waybill = code.to_string();
                Ok(r)
            }
            verdict @ (CarrierVerdict::Conflict | CarrierVerdict::TransientDefect) => {
                bump(&self.counters.terminal_errors);
                Err(SubmitError::CustomIdentifierRejected {
                    waybill: code.to_string(),
                    verdict,
                    message: response.message,
                })
            }
            CarrierVerdict::Terminal => {
                bump(&self.counters.terminal_errors);
                Err(SubmitError::CarrierTerminal {
                    waybill: code.to_string(),
                    message: response.message,
                    released: false,
                    attempts: 1,
                })
            }
        }
    }

    /// Take with bounded retries on store errors. Exhaustion and a missing
    /// pool are returned immediately. `submitted` is the number of carrier
    /// submissions already made for this request.
    async fn allocate(&self, submitted: u32) -> Result<Allocation, SubmitError> {
        let max = self.policy.allocation_max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.allocator.take(&self.pool).await {
                Ok(a) => {
                    bump(&self.counters.allocations);
                    return Ok(a);
                }
                Err(PoolError::Exhausted {
                    vendor,
                    series,
                    total,
                    used,
                }) => {
                    return Err(SubmitError::PoolExhausted {
                        vendor,
                        series,
                        total,
                        used,
                        attempts: submitted,
                    });
                }
                Err(PoolError::NotConfigured { vendor, series }) => {
                    return Err(SubmitError::PoolNotConfigured {
                        vendor,
                        series,
                        attempts: submitted,
                    });
                }
                Err(PoolError::Store(e)) => {
                    bump(&self.counters.allocation_store_errors);

                    if attempt >= max {
                        return Err(SubmitError::StoreUnavailable {
                            store_attempts: attempt,
                            attempts: submitted,
                            reason: format!("{e:#}"),
                        });
                    }

                    warn!(
                        component = "orchestrator",
                        event = "allocation_retry",
                        attempt,
                        max,
                        error = %e,
                        "waybill store error; retrying take"
                    );
                    pause(self.policy.allocation_backoff).await;
                }
            }
        }
    }

    /// Sends one request, retrying transport failures with a fixed back-off.
    /// The held waybill stays held across these attempts.
    async fn deliver(&self, request: &CarrierRequest) -> anyhow::Result<CarrierResponse> {
        let max = self.policy.transport_max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.carrier.submit(request).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < max => {
                    bump(&self.counters.transport_retries);
                    warn!(
                        component = "orchestrator",
                        event = "transport_retry",
                        waybill = %request.waybill,
                        attempt,
                        max,
                        error = ?e,
                        "carrier unreachable; retrying"
                    );
                    pause(self.policy.transport_backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.context(format!("gave up after {attempt} attempts"))),
            }
        }
    }

    /// Checks the safety ceiling, then waits before the next allocation.
    async fn before_retry(&self, attempts: u32, last_verdict: CarrierVerdict) -> Result<(), SubmitError> {
        if attempts >= self.policy.max_attempts {
            bump(&self.counters.safety_limit_hits);
            error!(
                component = "orchestrator",
                event = "safety_limit",
                attempts,
                limit = self.policy.max_attempts,
                last_verdict = %last_verdict,
                "retry safety limit reached"
            );
            return Err(SubmitError::RetrySafetyLimitExceeded {
                attempts,
                limit: self.policy.max_attempts,
                last_verdict,
            });
        }

        pause(self.policy.retry_delay).await;
        Ok(())
    }

    /// Best-effort release on a hard failure. Never masks the failure itself.
    async fn release_quietly(&self, held: &Allocation) -> bool {
        match self.allocator.release(&held.code, &held.vendor).await {
            Ok(ReleaseOutcome::Released) => {
                bump(&self.counters.releases);
                true
            }
            Ok(outcome) => {
                warn!(waybill = %held.code, ?outcome, "waybill not returned to pool");
                false
            }
            Err(e) => {
                bump(&self.counters.release_failures);
                error!(waybill = %held.code, error = %e, "release failed; waybill orphaned");
                false
            }
        }
    }

    async fn journal_outcome(
        &self,
        manifest: &Manifest,
        trace_id: &TraceId,
        result: &Result<SubmissionReceipt, SubmitError>,
    ) {
        let (waybill, booking_reference, outcome, message, attempts) = match result {
            Ok(r) => (
                Some(r.waybill.clone()),
                r.booking_reference.clone(),
                "SUCCESS".to_string(),
                r.message.clone(),
                r.attempts,
            ),
            Err(e) => (
                e.waybill().map(str::to_string),
                None,
                e.kind().to_string(),
                e.to_string(),
                e.attempts(),
            ),
        };

        let entry = JournalEntry {
            submission_id: Uuid::new_v4(),
            trace_id: trace_id.to_string(),
            reference: manifest.reference.clone(),
            vendor: self.pool.vendor.clone(),
            waybill,
            booking_reference,
            outcome,
            message,
            attempts,
            recorded_at: Utc::now(),
        };

        if let Err(e) = self.journal.record(&entry).await {
            error!(submission_id = %entry.submission_id, error = ?e, "journal write failed");
        }
    }
}

fn receipt(
    trace_id: &TraceId,
    allocation: Option<Allocation>,
    response: CarrierResponse,
    progress: Progress,
) -> SubmissionReceipt {
    SubmissionReceipt {
        trace_id: trace_id.to_string(),
        waybill: allocation
            .as_ref()
            .map(|a| a.code.clone())
            .unwrap_or_default(),
        allocation,
        carrier_waybill: response.identifier_echo,
        booking_reference: response.booking_reference,
        message: response.message,
        attempts: progress.attempts,
        conflicted: progress.conflicted,
        skipped: progress.skipped,
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}
