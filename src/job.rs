//! Job and unit records.
//!
//! A [`Job`] is one logical conversion of one input document. It owns an
//! ordered set of [`Unit`]s, each an independently submittable slice of the
//! input, plus a private workspace directory holding unit inputs and results.
//! A job that did not need splitting still has exactly one unit, so every
//! later stage handles both cases the same way.
//!
//! Every state change goes through the `mark_*` methods, which refuse to move
//! a unit out of a terminal state. The engine persists the job after each
//! successful transition.

use crate::config::{ConversionOptions, OutputFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifecycle state shared by jobs and units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created; not yet accepted by the service.
    Pending,
    /// Accepted by the service; waiting for a result.
    InFlight,
    /// Finished successfully.
    Complete,
    /// Finished unsuccessfully; `error` says why.
    Failed,
}

impl JobState {
    /// `Complete` and `Failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Pending => "pending",
            JobState::InFlight => "in_flight",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
        })
    }
}

/// Half-open, 0-based page range `[start, end)` of the original document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One independently convertible slice of a job's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Position in the original document; merge order.
    pub index: usize,
    /// The unit's input artifact.
    pub source_path: PathBuf,
    /// Pages of the original covered by this unit, when the input was split.
    #[serde(default)]
    pub pages: Option<PageRange>,
    /// Request id assigned by the service on submission.
    pub remote_id: Option<String>,
    pub state: JobState,
    pub error: Option<String>,
    /// Consecutive polling cycles that ended in a transient failure.
    #[serde(default)]
    pub poll_failures: u32,
}

impl Unit {
    pub fn new(index: usize, source_path: impl Into<PathBuf>, pages: Option<PageRange>) -> Self {
        Self {
            index,
            source_path: source_path.into(),
            pages,
            remote_id: None,
            state: JobState::Pending,
            error: None,
            poll_failures: 0,
        }
    }

    /// `pending → in_flight`. Returns false if the unit was not pending.
    pub fn mark_in_flight(&mut self, remote_id: impl Into<String>) -> bool {
        if self.state != JobState::Pending {
            return false;
        }
        self.remote_id = Some(remote_id.into());
        self.state = JobState::InFlight;
        true
    }

    /// `in_flight → complete`. Returns false if the unit was not in flight.
    pub fn mark_complete(&mut self) -> bool {
        if self.state != JobState::InFlight {
            return false;
        }
        self.state = JobState::Complete;
        self.poll_failures = 0;
        true
    }

    /// Any non-terminal state `→ failed`. Returns false if already terminal.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = JobState::Failed;
        self.error = Some(error.into());
        true
    }

    /// Where the unit's textual result is stored inside `workspace`.
    pub fn result_path(&self, workspace: &Path) -> PathBuf {
        workspace.join("results").join(format!("{:03}.out", self.index))
    }

    /// Where the unit's extracted assets are stored inside `workspace`.
    pub fn assets_dir(&self, workspace: &Path) -> PathBuf {
        workspace
            .join("results")
            .join(format!("{:03}_assets", self.index))
    }
}

/// What a job should do next, derived from its unit states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Some units are still pending or in flight.
    Waiting,
    /// Every unit is complete.
    Combine,
    /// At least one unit failed; carries the summary of the first one.
    Failed(String),
}

/// One logical conversion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub source_file: PathBuf,
    /// Canonical output location; the combiner picks a free variant of it.
    pub target_file: PathBuf,
    pub options: ConversionOptions,
    /// Pages per unit; fixed at creation.
    pub unit_size: usize,
    /// Job-private temporary directory.
    pub workspace: PathBuf,
    pub units: Vec<Unit>,
    pub state: JobState,
    pub error: Option<String>,
    /// Completed polling sweeps.
    #[serde(default)]
    pub poll_cycles: u32,
    /// Final document location, once combined.
    #[serde(default)]
    pub output_file: Option<PathBuf>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        source_file: impl Into<PathBuf>,
        target_file: impl Into<PathBuf>,
        options: ConversionOptions,
        unit_size: usize,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            source_file: source_file.into(),
            target_file: target_file.into(),
            options,
            unit_size,
            workspace: workspace.into(),
            units: Vec::new(),
            state: JobState::Pending,
            error: None,
            poll_cycles: 0,
            output_file: None,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        self.options.output_format
    }

    /// Append a new pending unit.
    pub fn add_unit(&mut self, index: usize, path: impl Into<PathBuf>, pages: Option<PageRange>) {
        self.units.push(Unit::new(index, path, pages));
    }

    /// Units sorted by `index`, regardless of insertion order.
    pub fn ordered_units(&self) -> Vec<&Unit> {
        let mut units: Vec<&Unit> = self.units.iter().collect();
        units.sort_by_key(|u| u.index);
        units
    }

    /// Indices of units in `state`, ascending.
    pub fn unit_indices(&self, state: JobState) -> Vec<usize> {
        self.ordered_units()
            .into_iter()
            .filter(|u| u.state == state)
            .map(|u| u.index)
            .collect()
    }

    pub fn unit(&self, index: usize) -> Option<&Unit> {
        self.units.iter().find(|u| u.index == index)
    }

    pub fn unit_mut(&mut self, index: usize) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.index == index)
    }

    pub fn has_failed(&self) -> bool {
        self.units.iter().any(|u| u.state == JobState::Failed)
    }

    pub fn all_complete(&self) -> bool {
        !self.units.is_empty() && self.units.iter().all(|u| u.state == JobState::Complete)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply the reconciliation rule: any failure fails the job; all
    /// complete means combine; anything else means wait.
    pub fn reconcile(&self) -> Reconciliation {
        if let Some(unit) = self
            .ordered_units()
            .into_iter()
            .find(|u| u.state == JobState::Failed)
        {
            let reason = unit.error.as_deref().unwrap_or("unknown error");
            return Reconciliation::Failed(format!("Unit {} failed: {}", unit.index, reason));
        }
        if self.all_complete() {
            Reconciliation::Combine
        } else {
            Reconciliation::Waiting
        }
    }

    /// `pending → in_flight`. No-op from any other state.
    pub fn mark_in_flight(&mut self) {
        if self.state == JobState::Pending {
            self.state = JobState::InFlight;
        }
    }

    /// Enter `complete`. No-op if already terminal.
    pub fn mark_complete(&mut self, output_file: impl Into<PathBuf>) {
        if !self.is_terminal() {
            self.state = JobState::Complete;
            self.output_file = Some(output_file.into());
        }
    }

    /// Enter `failed` with a reason. No-op if already terminal.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        if !self.is_terminal() {
            self.state = JobState::Failed;
            self.error = Some(error.into());
        }
    }
}
