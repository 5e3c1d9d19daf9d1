//! Submitter: push a job's pending units to the conversion service.
//!
//! Units are submitted one at a time in ascending index order. Before any
//! network use each unit is read and its content type checked against the
//! allow-list, so a rejected file costs neither a request nor a rate-limit
//! token. Every attempt, including retries, takes a token from the shared
//! limiter.
//!
//! Submission is fail-fast: once a unit fails, the rest of the job is never
//! submitted because the job cannot complete anyway.

use crate::config::ConversionOptions;
use crate::error::{ChunkmarkError, ServiceError};
use crate::job::{Job, JobState, Unit};
use crate::limiter::RateLimiter;
use crate::pipeline::input::{is_supported, sniff_mime};
use crate::progress::JobProgressCallback;
use crate::retry::RetryPolicy;
use crate::service::ConversionService;
use crate::store::{save_with_retry, JobStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Submits units through the shared limiter with bounded retry.
#[derive(Clone)]
pub struct Submitter {
    service: Arc<dyn ConversionService>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl Submitter {
    pub fn new(
        service: Arc<dyn ConversionService>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            limiter,
            policy,
        }
    }

    /// Validate and upload one unit. Returns the service's request id.
    pub async fn submit_unit(
        &self,
        unit: &Unit,
        options: &ConversionOptions,
    ) -> Result<String, ChunkmarkError> {
        let path = &unit.source_path;
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ChunkmarkError::FileNotFound { path: path.clone() },
            std::io::ErrorKind::PermissionDenied => {
                ChunkmarkError::PermissionDenied { path: path.clone() }
            }
            _ => ChunkmarkError::storage(path, e),
        })?;

        let mime = match sniff_mime(&bytes) {
            Some(m) if is_supported(m) => m,
            other => {
                return Err(ChunkmarkError::UnsupportedType {
                    path: path.clone(),
                    mime: other.unwrap_or("unknown").to_string(),
                })
            }
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("unit_{:03}", unit.index));
        debug!("Submitting unit {} ({}, {} bytes)", unit.index, mime, bytes.len());

        let service = self.service.as_ref();
        let limiter = self.limiter.as_ref();
        let bytes = bytes.as_slice();
        let file_name = file_name.as_str();
        let label = format!("submit unit {}", unit.index);

        let request_id = self
            .policy
            .run(&label, move || async move {
                limiter.acquire().await?;
                service.submit(file_name, bytes, mime, options).await
            })
            .await?;
        Ok(request_id)
    }

    /// Submit every pending unit of `job` in index order, persisting after
    /// each transition.
    ///
    /// Stops at the first failed unit. The job itself moves to in flight only
    /// once every unit is submitted. Returns the number of units submitted.
    /// Only persistence failures are returned as `Err`.
    pub async fn submit_job(
        &self,
        job: &mut Job,
        store: &dyn JobStore,
        progress: &dyn JobProgressCallback,
    ) -> Result<usize, ChunkmarkError> {
        if job.has_failed() {
            return Ok(0);
        }

        let total = job.units.len();
        let mut submitted = 0;
        for index in job.unit_indices(JobState::Pending) {
            let result = match job.unit(index) {
                Some(unit) => self.submit_unit(unit, &job.options).await,
                None => continue,
            };

            match result {
                Ok(request_id) => {
                    if let Some(unit) = job.unit_mut(index) {
                        unit.mark_in_flight(&request_id);
                    }
                    save_with_retry(store, job)?;
                    info!("Job {}: unit {}/{} submitted as {}", job.id, index + 1, total, request_id);
                    progress.on_unit_submitted(&job.id, index, total);
                    submitted += 1;
                }
                Err(ChunkmarkError::Service(ServiceError::LimiterClosed)) => {
                    warn!("Job {}: limiter closed, leaving unit {} pending", job.id, index);
                    break;
                }
                Err(e) => {
                    let reason = e.to_string();
                    if let Some(unit) = job.unit_mut(index) {
                        unit.mark_failed(&reason);
                    }
                    save_with_retry(store, job)?;
                    error!("Job {}: unit {} submission failed: {}", job.id, index, reason);
                    progress.on_unit_failed(&job.id, index, &reason);
                    break;
                }
            }
        }

        if job.state == JobState::Pending
            && !job.has_failed()
            && job.unit_indices(JobState::Pending).is_empty()
        {
            job.mark_in_flight();
            save_with_retry(store, job)?;
        }
        Ok(submitted)
    }
}
