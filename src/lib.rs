//! # chunkmark
//!
//! Convert large documents to Markdown, HTML or JSON through a remote
//! asynchronous conversion service, one bounded slice at a time.
//!
//! Conversion services cap how big a single upload may be and how many calls
//! a key may make per minute. chunkmark splits oversized PDFs into page-range
//! units, submits them under a shared rate limit, polls until each resolves,
//! and merges the results back into one document whose figures are named by
//! their page in the original. Every step is persisted, so an interrupted run
//! picks up where it stopped.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Input    resolve a file or directory; sniff content types
//!  ├─ 2. Split    PDFs over `unit_size` pages → units (pdfium, spawn_blocking)
//!  ├─ 3. Persist  job record → cache directory
//!  ├─ 4. Submit   units in index order, rate-limited, retried, fail-fast
//!  ├─ 5. Poll     in-flight units each sweep; results → workspace
//!  ├─ 6. Combine  merge in index order, renumber assets, unique output path
//!  └─ 7. Cleanup  workspace and job record removed on any terminal outcome
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chunkmark::{Engine, EngineConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder()
//!         .api_key(std::env::var("MARKER_PDF_KEY")?)
//!         .unit_size(25)
//!         .build()?;
//!     let engine = Engine::from_config(config)?;
//!
//!     engine.create_jobs(Path::new("report.pdf")).await?;
//!     let report = engine.run_until_idle().await?;
//!     for (id, path) in &report.completed {
//!         println!("{id}: {}", path.display());
//!     }
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `chunkmark` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `auto-pdfium` | on | Downloads and caches libpdfium on first use when none is installed |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! chunkmark = { version = "0.1", default-features = false, features = ["auto-pdfium"] }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod limiter;
pub mod pipeline;
pub mod poll;
pub mod progress;
pub mod retry;
pub mod schedule;
pub mod service;
pub mod store;
pub mod submit;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionOptions, EngineConfig, EngineConfigBuilder, OutputFormat, UnitSeparator,
    API_KEY_ENV, DEFAULT_BASE_URL, NO_CHUNK_UNIT_SIZE,
};
pub use engine::{BatchReport, Engine, JobOutcome, SweepReport};
pub use error::{ChunkmarkError, ServiceError};
pub use job::{Job, JobState, PageRange, Reconciliation, Unit};
pub use limiter::RateLimiter;
pub use pipeline::split::{PageExtractor, PdfiumExtractor};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use retry::RetryPolicy;
pub use schedule::PollSchedule;
pub use service::{ConversionService, MarkerClient, RemoteOutput, RemoteStatus};
pub use store::{FileJobStore, JobStore};
