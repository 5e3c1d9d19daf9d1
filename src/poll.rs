//! Poller: resolve in-flight units by asking the service for their status.
//!
//! One status query per in-flight unit per sweep, through the same limiter
//! and retry policy as submission. A completed unit's content and assets are
//! written to its result slot before the unit is marked complete, so a
//! `complete` unit always has a readable result.
//!
//! A query that still fails after its retries does not fail the unit at
//! once: the unit stays in flight and the failure is counted. Only after
//! `max_poll_failures` consecutive failed sweeps is the unit given up on.
//! "Not found" and service-reported failures are definitive immediately.

use crate::error::{ChunkmarkError, ServiceError};
use crate::job::{Job, JobState, Unit};
use crate::limiter::RateLimiter;
use crate::pipeline::encode::write_assets;
use crate::progress::JobProgressCallback;
use crate::retry::RetryPolicy;
use crate::service::{ConversionService, RemoteOutput, RemoteStatus};
use crate::store::{save_with_retry, JobStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Message recorded on a unit whose completed result carried no content.
pub const NO_CONTENT: &str = "No content in result";

/// What one poll did to a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Still processing remotely; nothing changed.
    Pending,
    /// Result stored; unit is complete.
    Complete,
    /// Unit failed with this reason.
    Failed(String),
    /// Query failed transiently; unit stays in flight.
    Deferred,
}

/// Queries unit status through the shared limiter with bounded retry.
#[derive(Clone)]
pub struct Poller {
    service: Arc<dyn ConversionService>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    max_poll_failures: u32,
}

impl Poller {
    pub fn new(
        service: Arc<dyn ConversionService>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        let max_poll_failures = policy.max_attempts.max(1);
        Self {
            service,
            limiter,
            policy,
            max_poll_failures,
        }
    }

    /// Query the service once (with retries) for `request_id`.
    pub async fn query(&self, request_id: &str) -> Result<RemoteStatus, ServiceError> {
        let service = self.service.as_ref();
        let limiter = self.limiter.as_ref();
        let label = format!("status {request_id}");
        self.policy
            .run(&label, move || async move {
                limiter.acquire().await?;
                service.status(request_id).await
            })
            .await
    }

    /// Poll one in-flight unit and apply the resulting transition.
    pub async fn poll_unit(&self, unit: &mut Unit, workspace: &Path) -> PollOutcome {
        if unit.state != JobState::InFlight {
            return PollOutcome::Pending;
        }
        let Some(request_id) = unit.remote_id.clone() else {
            return fail(unit, "in flight without a request id".to_string());
        };

        match self.query(&request_id).await {
            Ok(RemoteStatus::Pending) => {
                unit.poll_failures = 0;
                debug!("Unit {} ({}) still processing", unit.index, request_id);
                PollOutcome::Pending
            }
            Ok(RemoteStatus::Complete(output)) => match store_result(unit, workspace, &output) {
                Ok(()) => {
                    unit.mark_complete();
                    PollOutcome::Complete
                }
                Err(reason) => fail(unit, reason),
            },
            Ok(RemoteStatus::Failed(reason)) => fail(unit, reason),
            Err(ServiceError::LimiterClosed) => PollOutcome::Deferred,
            Err(e) if e.is_transient() => {
                unit.poll_failures += 1;
                if unit.poll_failures >= self.max_poll_failures {
                    fail(
                        unit,
                        format!("status check failed {} times: {}", unit.poll_failures, e),
                    )
                } else {
                    warn!(
                        "Unit {} ({}): status check failed ({}/{}), will retry next cycle: {}",
                        unit.index, request_id, unit.poll_failures, self.max_poll_failures, e
                    );
                    PollOutcome::Deferred
                }
            }
            Err(e) => fail(unit, e.to_string()),
        }
    }

    /// Poll every in-flight unit of `job`, persisting after each change.
    ///
    /// Stops early once a unit fails: the job cannot complete, so polling the
    /// rest would only spend rate-limit budget. Only persistence failures are
    /// returned as `Err`.
    pub async fn poll_job(
        &self,
        job: &mut Job,
        store: &dyn JobStore,
        progress: &dyn JobProgressCallback,
    ) -> Result<(), ChunkmarkError> {
        let total = job.units.len();
        for index in job.unit_indices(JobState::InFlight) {
            let workspace = job.workspace.clone();
            let Some(unit) = job.unit_mut(index) else {
                continue;
            };
            let failures_before = unit.poll_failures;
            let outcome = self.poll_unit(unit, &workspace).await;
            let failures_changed = unit.poll_failures != failures_before;

            match outcome {
                PollOutcome::Pending | PollOutcome::Deferred => {
                    if failures_changed {
                        save_with_retry(store, job)?;
                    }
                }
                PollOutcome::Complete => {
                    save_with_retry(store, job)?;
                    info!("Job {}: unit {}/{} complete", job.id, index + 1, total);
                    progress.on_unit_complete(&job.id, index, total);
                }
                PollOutcome::Failed(reason) => {
                    save_with_retry(store, job)?;
                    error!("Job {}: unit {} failed: {}", job.id, index, reason);
                    progress.on_unit_failed(&job.id, index, &reason);
                    break;
                }
            }
        }
        Ok(())
    }
}

fn fail(unit: &mut Unit, reason: String) -> PollOutcome {
    unit.mark_failed(&reason);
    PollOutcome::Failed(reason)
}

/// Write `output` into `unit`'s result slot.
fn store_result(unit: &Unit, workspace: &Path, output: &RemoteOutput) -> Result<(), String> {
    let content = output.content().ok_or_else(|| NO_CONTENT.to_string())?;

    let path = unit.result_path(workspace);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ChunkmarkError::storage(parent, e).to_string())?;
    }
    std::fs::write(&path, content).map_err(|e| ChunkmarkError::storage(&path, e).to_string())?;
    write_assets(&output.images, &unit.assets_dir(workspace)).map_err(|e| e.to_string())?;

    debug!(
        "Stored result of unit {} ({} assets) at {}",
        unit.index,
        output.images.len(),
        path.display()
    );
    Ok(())
}
