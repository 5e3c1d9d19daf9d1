//! The conversion engine: create jobs, sweep them to completion, clean up.
//!
//! ## Lifecycle
//!
//! ```text
//! create_job ─▶ split ─▶ persist ─▶ submit ─┐
//!                                           ▼
//!        ┌──────────── sweep (every poll interval) ◀──┐
//!        │  resume pending submissions               │
//!        │  poll in-flight units                      │ waiting
//!        │  reconcile ──────────────────────────────────┘
//!        │     ├─ any unit failed ─▶ failed ─┐
//!        │     └─ all complete ─▶ combine ──┴─▶ persist terminal state ─▶ cleanup
//! ```
//!
//! The store is the only state carried between sweeps, so an engine built
//! over the same cache directory after a crash resumes every job where it
//! stopped: units already in flight are polled, never resubmitted.
//!
//! Within one sweep each job is handled by exactly one task. Jobs may run
//! concurrently (`job_concurrency`), but no two tasks ever mutate the same
//! job. Outbound calls from all tasks share one [`RateLimiter`].

use crate::config::{EngineConfig, API_KEY_ENV, NO_CHUNK_UNIT_SIZE};
use crate::error::ChunkmarkError;
use crate::job::{Job, JobState, Reconciliation};
use crate::limiter::RateLimiter;
use crate::pipeline::combine::combine_job;
use crate::pipeline::input::{is_supported, resolve_inputs, sniff_file, PDF_MIME};
use crate::pipeline::split::{split_document, Chunk, PageExtractor, PdfiumExtractor};
use crate::poll::Poller;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::retry::RetryPolicy;
use crate::service::{ConversionService, MarkerClient};
use crate::store::{save_with_retry, FileJobStore, JobStore};
use crate::submit::Submitter;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Where a job stands after the engine last touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Units are still pending or in flight.
    Waiting,
    /// Combined document written here.
    Complete(PathBuf),
    /// Failed for this reason.
    Failed(String),
}

/// Summary of one or more sweeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `(job id, output document)` of jobs that completed.
    pub completed: Vec<(String, PathBuf)>,
    /// `(job id, reason)` of jobs that failed.
    pub failed: Vec<(String, String)>,
    /// Jobs still waiting on the service after the last sweep.
    pub waiting: usize,
    /// `(job id, error)` of jobs the sweep could not advance, e.g. because
    /// their record could not be saved. They are retried next sweep.
    pub errors: Vec<(String, String)>,
}

impl SweepReport {
    /// True when no job is waiting and the last sweep advanced every job.
    pub fn is_idle(&self) -> bool {
        self.waiting == 0 && self.errors.is_empty()
    }

    fn absorb(&mut self, later: SweepReport) {
        self.completed.extend(later.completed);
        self.failed.extend(later.failed);
        self.errors = later.errors;
        self.waiting = later.waiting;
    }
}

/// Input files accepted and rejected by [`Engine::create_jobs`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub jobs: Vec<Job>,
    /// `(file, reason)` for files that could not become jobs.
    pub rejected: Vec<(PathBuf, String)>,
}

/// Coordinates splitting, submission, polling, combination and cleanup.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn PageExtractor>,
    limiter: Arc<RateLimiter>,
    submitter: Submitter,
    poller: Poller,
    progress: ProgressCallback,
}

impl Engine {
    /// Assemble an engine from explicit parts.
    ///
    /// `limiter` must be the one limiter shared by every component that
    /// talks to `service`.
    pub fn new(
        config: EngineConfig,
        service: Arc<dyn ConversionService>,
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn PageExtractor>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let policy = RetryPolicy::new(config.max_retries, config.retry_backoff());
        let submitter = Submitter::new(Arc::clone(&service), Arc::clone(&limiter), policy);
        let poller = Poller::new(service, Arc::clone(&limiter), policy);
        Self {
            config,
            store,
            extractor,
            limiter,
            submitter,
            poller,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Build the production engine: Marker client, file store under
    /// `cache_dir`, pdfium extractor and a per-minute limiter.
    pub fn from_config(config: EngineConfig) -> Result<Self, ChunkmarkError> {
        if config.api_key.trim().is_empty() {
            return Err(ChunkmarkError::MissingCredential {
                name: API_KEY_ENV.to_string(),
            });
        }
        let service = MarkerClient::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.request_timeout_secs,
        )?;
        let store = FileJobStore::open(config.cache_dir.clone())?;
        let limiter = RateLimiter::per_minute(config.requests_per_minute);
        Ok(Self::new(
            config,
            Arc::new(service),
            Arc::new(store),
            Arc::new(PdfiumExtractor::from_env()),
            Arc::new(limiter),
        ))
    }

    /// Receive lifecycle events.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Every persisted job, as of now.
    pub fn jobs(&self) -> Result<Vec<Job>, ChunkmarkError> {
        self.store.list_all()
    }

    // ── Creation ──────────────────────────────────────────────────────────

    /// Create one job per file under `input` (a file or a directory).
    ///
    /// For a single-file input, a file that cannot become a job is an error.
    /// For a directory, such files are reported in [`BatchReport::rejected`]
    /// and the rest proceed.
    pub async fn create_jobs(&self, input: &Path) -> Result<BatchReport, ChunkmarkError> {
        let files = resolve_inputs(input)?;
        let single = input.is_file();

        let mut report = BatchReport::default();
        for file in files {
            match self.create_job(&file).await {
                Ok(job) => report.jobs.push(job),
                Err(e) if single => return Err(e),
                Err(e) => {
                    warn!("Skipping {}: {}", file.display(), e);
                    report.rejected.push((file, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Create, persist and submit a job for `source`.
    ///
    /// Input problems (missing file, unsupported type, unsplittable PDF) are
    /// returned as errors and leave nothing behind. Once the job exists,
    /// problems are recorded on the job instead; the returned job shows its
    /// state after submission.
    pub async fn create_job(&self, source: &Path) -> Result<Job, ChunkmarkError> {
        // ── Step 1: Validate the input locally ──────────────────────────────
        if !source.exists() {
            return Err(ChunkmarkError::FileNotFound {
                path: source.to_path_buf(),
            });
        }
        if !source.is_file() {
            return Err(ChunkmarkError::InvalidInput {
                input: source.display().to_string(),
                reason: "not a regular file".into(),
            });
        }
        let mime = match sniff_file(source)? {
            Some(m) if is_supported(m) => m,
            other => {
                return Err(ChunkmarkError::UnsupportedType {
                    path: source.to_path_buf(),
                    mime: other.unwrap_or("unknown").to_string(),
                })
            }
        };

        // ── Step 2: Lay out the job ─────────────────────────────────────────
        let id = uuid::Uuid::new_v4().simple().to_string();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let workspace = self
            .config
            .workspace_root
            .join(format!("{}_{}", stem, &id[..8]));
        let target = self.config.output_dir.join(&stem);
        let mut job = Job::new(
            &id,
            source,
            target,
            self.config.options.clone(),
            self.config.unit_size,
            &workspace,
        );
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| ChunkmarkError::storage(&workspace, e))?;

        // ── Step 3: Split (PDFs only) ───────────────────────────────────────
        let chunks = if mime == PDF_MIME && self.config.unit_size < NO_CHUNK_UNIT_SIZE {
            match self.split(source, &workspace).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    remove_workspace(&workspace).await.ok();
                    return Err(e);
                }
            }
        } else {
            None
        };
        match chunks {
            Some(chunks) => {
                for chunk in chunks {
                    job.add_unit(chunk.index, chunk.path, Some(chunk.pages));
                }
            }
            // The unsplit original is the unit's input; cleanup never touches it.
            None => job.add_unit(0, source, None),
        }

        // ── Step 4: Persist ─────────────────────────────────────────────────
        if let Err(e) = save_with_retry(self.store.as_ref(), &job) {
            remove_workspace(&workspace).await.ok();
            return Err(e);
        }
        info!(
            "Job {} created for {} ({}, {} units)",
            job.id,
            source.display(),
            mime,
            job.units.len()
        );
        self.progress.on_job_created(&job.id, source, job.units.len());

        // ── Step 5: Submit ──────────────────────────────────────────────────
        self.submitter
            .submit_job(&mut job, self.store.as_ref(), self.progress.as_ref())
            .await?;
        self.settle(&mut job).await?;
        Ok(job)
    }

    async fn split(
        &self,
        source: &Path,
        workspace: &Path,
    ) -> Result<Option<Vec<Chunk>>, ChunkmarkError> {
        let extractor = Arc::clone(&self.extractor);
        let source = source.to_path_buf();
        let workspace = workspace.to_path_buf();
        let unit_size = self.config.unit_size;

        tokio::task::spawn_blocking(move || {
            split_document(extractor.as_ref(), &source, unit_size, &workspace)
        })
        .await
        .map_err(|e| ChunkmarkError::Internal(format!("Split task panicked: {}", e)))?
    }

    // ── Sweeping ──────────────────────────────────────────────────────────

    /// Advance every persisted job once.
    ///
    /// Per-job failures are recorded on the jobs and reported, not returned.
    /// `Err` means the store itself could not be read.
    pub async fn sweep(&self) -> Result<SweepReport, ChunkmarkError> {
        let jobs = self.store.list_all()?;
        debug!("Sweeping {} jobs", jobs.len());

        let outcomes: Vec<(String, Result<JobOutcome, ChunkmarkError>)> = stream::iter(jobs)
            .map(|job| async move {
                let id = job.id.clone();
                (id, self.advance(job).await)
            })
            .buffer_unordered(self.config.job_concurrency.max(1))
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(JobOutcome::Waiting) => report.waiting += 1,
                Ok(JobOutcome::Complete(path)) => report.completed.push((id, path)),
                Ok(JobOutcome::Failed(reason)) => report.failed.push((id, reason)),
                Err(e) => {
                    error!("Job {}: could not advance: {}", id, e);
                    report.errors.push((id, e.to_string()));
                }
            }
        }
        report.completed.sort();
        report.failed.sort();
        Ok(report)
    }

    async fn advance(&self, mut job: Job) -> Result<JobOutcome, ChunkmarkError> {
        let store = self.store.as_ref();
        let progress = self.progress.as_ref();

        if job.is_terminal() {
            // Terminal state was persisted but cleanup did not finish.
            self.remove_job(&job).await?;
            return Ok(match job.state {
                JobState::Complete => {
                    JobOutcome::Complete(job.output_file.clone().unwrap_or_default())
                }
                _ => JobOutcome::Failed(job.error.clone().unwrap_or_default()),
            });
        }

        if !job.unit_indices(JobState::Pending).is_empty() {
            self.submitter.submit_job(&mut job, store, progress).await?;
        }
        if !job.has_failed() {
            self.poller.poll_job(&mut job, store, progress).await?;
        }

        if job.reconcile() == Reconciliation::Waiting {
            job.poll_cycles += 1;
            if let Some(max) = self.config.max_poll_cycles {
                if job.poll_cycles >= max {
                    let reason = format!("gave up after {} polling cycles", job.poll_cycles);
                    let unresolved: Vec<usize> = job
                        .ordered_units()
                        .into_iter()
                        .filter(|u| !u.state.is_terminal())
                        .map(|u| u.index)
                        .collect();
                    for index in unresolved {
                        if let Some(unit) = job.unit_mut(index) {
                            unit.mark_failed(&reason);
                        }
                        progress.on_unit_failed(&job.id, index, &reason);
                    }
                }
            }
            save_with_retry(store, &job)?;
        }

        self.settle(&mut job).await
    }

    /// Apply the reconciliation rule; combine or fail as it says.
    async fn settle(&self, job: &mut Job) -> Result<JobOutcome, ChunkmarkError> {
        match job.reconcile() {
            Reconciliation::Waiting => Ok(JobOutcome::Waiting),
            Reconciliation::Failed(reason) => self.fail_job(job, reason).await,
            Reconciliation::Combine => {
                let snapshot = job.clone();
                let separator = self.config.separator.clone();
                let combined =
                    tokio::task::spawn_blocking(move || combine_job(&snapshot, &separator))
                        .await
                        .map_err(|e| {
                            ChunkmarkError::Internal(format!("Combine task panicked: {}", e))
                        })
                        .and_then(|r| r);

                match combined {
                    Ok(output) => {
                        job.mark_complete(&output);
                        save_with_retry(self.store.as_ref(), job)?;
                        info!("Job {} complete: {}", job.id, output.display());
                        self.progress.on_job_complete(&job.id, &output);
                        self.remove_job(job).await?;
                        Ok(JobOutcome::Complete(output))
                    }
                    Err(e) => self.fail_job(job, e.to_string()).await,
                }
            }
        }
    }

    async fn fail_job(&self, job: &mut Job, reason: String) -> Result<JobOutcome, ChunkmarkError> {
        job.mark_failed(&reason);
        save_with_retry(self.store.as_ref(), job)?;
        error!("Job {} failed: {}", job.id, reason);
        self.progress.on_job_failed(&job.id, &reason);
        self.remove_job(job).await?;
        Ok(JobOutcome::Failed(reason))
    }

    // ── Cleanup ───────────────────────────────────────────────────────────

    /// Delete a job's workspace and record. Returns false if there was no
    /// such job. Calling it again for the same id is a no-op.
    ///
    /// A job that is still running is abandoned: its remote requests are
    /// left to expire on the service.
    pub async fn cleanup(&self, id: &str) -> Result<bool, ChunkmarkError> {
        match self.store.load(id)? {
            Some(job) => {
                self.remove_job(&job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_job(&self, job: &Job) -> Result<(), ChunkmarkError> {
        // Workspace first: if this fails the record survives and a later
        // sweep retries the cleanup.
        remove_workspace(&job.workspace).await?;
        self.store.delete(&job.id)?;
        debug!("Job {} cleaned up", job.id);
        Ok(())
    }

    // ── Driving ───────────────────────────────────────────────────────────

    /// Sweep repeatedly, sleeping per the poll schedule, until no job is
    /// waiting or the limiter is closed.
    ///
    /// Jobs the sweep could not advance keep the loop going. After
    /// `max_retries` consecutive sweeps with such errors the loop stops and
    /// returns them in [`SweepReport::errors`].
    pub async fn run_until_idle(&self) -> Result<SweepReport, ChunkmarkError> {
        let mut total = SweepReport::default();
        let mut cycle = 0u32;
        let mut erroring = 0u32;
        loop {
            let report = self.sweep().await?;
            let idle = report.is_idle();
            if report.errors.is_empty() {
                erroring = 0;
            } else {
                erroring += 1;
            }
            total.absorb(report);
            if idle || self.limiter.is_closed() {
                return Ok(total);
            }
            if erroring > self.config.max_retries {
                warn!(
                    "{} jobs could not be advanced in {} consecutive sweeps; giving up",
                    total.errors.len(),
                    erroring
                );
                return Ok(total);
            }

            let delay = self.config.poll_schedule.delay(cycle);
            info!(
                "{} jobs waiting, {} erroring; next check in {:?}",
                total.waiting,
                total.errors.len(),
                delay
            );
            sleep(delay).await;
            cycle = cycle.saturating_add(1);
        }
    }

    /// Close the shared limiter. In-progress waits fail; jobs stay persisted
    /// and resume in the next process.
    pub async fn shutdown(&self) {
        self.limiter.close().await;
        info!("Engine shut down");
    }
}

async fn remove_workspace(workspace: &Path) -> Result<(), ChunkmarkError> {
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ChunkmarkError::storage(workspace, e)),
    }
}
