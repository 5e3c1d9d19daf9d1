//! Progress-callback trait for job lifecycle events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] into the engine via
//! [`crate::engine::Engine::with_progress`] to receive events as jobs are
//! created, their units submitted and resolved, and the jobs themselves
//! finish.
//!
//! # Example
//!
//! ```rust
//! use chunkmark::JobProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_unit_complete(&self, job_id: &str, index: usize, total_units: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{job_id}: unit {}/{} done ({done} overall)", index + 1, total_units);
//!     }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the engine as jobs move through their lifecycle.
///
/// Implementations must be `Send + Sync`: with `job_concurrency > 1`, events
/// for different jobs arrive from different tasks. All methods have default
/// no-op implementations so callers only override what they care about.
pub trait JobProgressCallback: Send + Sync {
    /// A job was created and persisted.
    ///
    /// # Arguments
    /// * `job_id`      — identifier of the new job
    /// * `source`      — the input document
    /// * `total_units` — number of units the input was split into
    fn on_job_created(&self, job_id: &str, source: &Path, total_units: usize) {
        let _ = (job_id, source, total_units);
    }

    /// A unit was accepted by the service.
    fn on_unit_submitted(&self, job_id: &str, index: usize, total_units: usize) {
        let _ = (job_id, index, total_units);
    }

    /// A unit's result was stored in its result slot.
    fn on_unit_complete(&self, job_id: &str, index: usize, total_units: usize) {
        let _ = (job_id, index, total_units);
    }

    /// A unit failed definitively.
    fn on_unit_failed(&self, job_id: &str, index: usize, error: &str) {
        let _ = (job_id, index, error);
    }

    /// The combined document was written to `output`.
    fn on_job_complete(&self, job_id: &str, output: &Path) {
        let _ = (job_id, output);
    }

    /// The job failed; `error` is the reason recorded on the job.
    fn on_job_failed(&self, job_id: &str, error: &str) {
        let _ = (job_id, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Shared handle as stored by the engine.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
