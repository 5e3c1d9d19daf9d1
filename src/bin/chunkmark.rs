//! CLI binary for chunkmark.
//!
//! A thin shim over the library crate that maps CLI flags to `EngineConfig`,
//! creates one job per input file, and sweeps until every job has finished.

use anyhow::{Context, Result};
use chunkmark::{
    ConversionOptions, Engine, EngineConfig, JobProgressCallback, OutputFormat, PollSchedule,
    ProgressCallback, UnitSeparator, DEFAULT_BASE_URL,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar counting resolved units across every
/// job, plus a log line per finished job.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // grows as jobs are created
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} units  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn short_id(job_id: &str) -> &str {
    &job_id[..job_id.len().min(8)]
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_created(&self, job_id: &str, source: &Path, total_units: usize) {
        self.bar.inc_length(total_units as u64);
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&source.display().to_string()),
            dim(&format!("{total_units} units, job {}", short_id(job_id))),
        ));
    }

    fn on_unit_submitted(&self, job_id: &str, index: usize, total_units: usize) {
        self.bar.set_message(format!(
            "submitted {}/{} of {}",
            index + 1,
            total_units,
            short_id(job_id)
        ));
    }

    fn on_unit_complete(&self, _job_id: &str, _index: usize, _total_units: usize) {
        self.bar.inc(1);
    }

    fn on_unit_failed(&self, job_id: &str, index: usize, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Unit {:>3} of {}  {}",
            red("✗"),
            index,
            short_id(job_id),
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, job_id: &str, output: &Path) {
        self.bar.println(format!(
            "  {} {}  →  {}",
            green("✓"),
            short_id(job_id),
            bold(&output.display().to_string())
        ));
    }

    fn on_job_failed(&self, job_id: &str, error: &str) {
        self.bar
            .println(format!("  {} {}  {}", red("✘"), short_id(job_id), red(error)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one PDF to Markdown (25-page units)
  chunkmark report.pdf

  # Every file in a directory, JSON output, with LLM enhancement
  chunkmark --json --llm ./scans

  # Smaller units, all accuracy enhancements
  chunkmark -c 10 --max book.pdf

  # Submit the file whole (no splitting, no pdfium needed)
  chunkmark --no-chunk slides.pptx

  # Resume jobs left over from an interrupted run
  chunkmark --resume

ENVIRONMENT VARIABLES:
  MARKER_PDF_KEY          Conversion service API key (required)
  PDFIUM_LIB_PATH         Path to libpdfium; otherwise it is downloaded once and cached
  CHUNKMARK_PDFIUM_DIR    Cache root for the downloaded libpdfium
  RUST_LOG                Override log filtering (e.g. chunkmark=debug)

Jobs are persisted under --cache-dir. If a run is interrupted, start chunkmark
again with the same cache directory and unfinished jobs pick up where they
stopped; units already submitted are never submitted twice.
"#;

/// Convert documents through the Marker API, splitting large PDFs into units.
#[derive(Parser, Debug)]
#[command(
    name = "chunkmark",
    version,
    about = "Convert large documents to Markdown through the Marker API, in rate-limited chunks",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input file or directory.
    #[arg(required_unless_present = "resume")]
    input: Option<PathBuf>,

    /// Only sweep jobs already in the cache; create no new ones.
    #[arg(long)]
    resume: bool,

    /// Output JSON instead of Markdown.
    #[arg(long, env = "CHUNKMARK_JSON", conflicts_with = "html")]
    json: bool,

    /// Output HTML instead of Markdown.
    #[arg(long, env = "CHUNKMARK_HTML")]
    html: bool,

    /// Comma-separated OCR languages.
    #[arg(long, env = "CHUNKMARK_LANGS", default_value = "English")]
    langs: String,

    /// Use an LLM to improve accuracy.
    #[arg(long)]
    llm: bool,

    /// Strip the existing text layer and redo OCR.
    #[arg(long)]
    strip: bool,

    /// Disable image extraction.
    #[arg(long)]
    noimg: bool,

    /// Force OCR on every page.
    #[arg(long)]
    force: bool,

    /// Add page delimiters to the output.
    #[arg(long)]
    pages: bool,

    /// Enable all accuracy enhancements (LLM, strip OCR, force OCR).
    #[arg(long)]
    max: bool,

    /// Disable PDF chunking: submit every file whole.
    #[arg(long, conflicts_with = "chunk_size")]
    no_chunk: bool,

    /// Maximum pages per unit.
    #[arg(short = 'c', long, env = "CHUNKMARK_CHUNK_SIZE", default_value_t = 25,
          value_parser = clap::value_parser!(u32).range(1..))]
    chunk_size: u32,

    /// Service API key.
    #[arg(long, env = "MARKER_PDF_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Service endpoint.
    #[arg(long, env = "CHUNKMARK_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Directory that receives converted documents.
    #[arg(short, long, env = "CHUNKMARK_OUTPUT_DIR", default_value = "converted")]
    output_dir: PathBuf,

    /// Directory holding persisted job records.
    #[arg(long, env = "CHUNKMARK_CACHE_DIR", default_value = ".marker_cache")]
    cache_dir: PathBuf,

    /// Directory holding per-job working files.
    #[arg(long, env = "CHUNKMARK_WORKSPACE_DIR", default_value = "chunks")]
    workspace_dir: PathBuf,

    /// Seconds between status checks.
    #[arg(long, env = "CHUNKMARK_CHECK_INTERVAL", default_value_t = 15)]
    check_interval: u64,

    /// Double the check interval after each sweep, up to this many seconds.
    #[arg(long, env = "CHUNKMARK_MAX_INTERVAL")]
    max_interval: Option<u64>,

    /// Give up on a job after this many status sweeps.
    #[arg(long, env = "CHUNKMARK_MAX_CYCLES")]
    max_cycles: Option<u32>,

    /// Service calls allowed per minute.
    #[arg(long, env = "CHUNKMARK_RPM", default_value_t = 150)]
    rpm: usize,

    /// Attempts per service call on transient failure.
    #[arg(long, env = "CHUNKMARK_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-request timeout in seconds.
    #[arg(long, env = "CHUNKMARK_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Jobs advanced concurrently per sweep.
    #[arg(short, long, env = "CHUNKMARK_JOBS", default_value_t = 1)]
    jobs: usize,

    /// Unit separator in merged output: blank, hr, comment, or custom string.
    #[arg(long, env = "CHUNKMARK_SEPARATOR", default_value = "blank")]
    separator: String,

    /// Disable progress bar.
    #[arg(long, env = "CHUNKMARK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CHUNKMARK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CHUNKMARK_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build engine ─────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    ensure_pdfium(&cli);
    let progress = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };

    let mut engine = Engine::from_config(config).context("Failed to start engine")?;
    if let Some(ref cb) = progress {
        engine = engine.with_progress(Arc::clone(cb) as ProgressCallback);
    }

    // ── Create jobs ──────────────────────────────────────────────────────
    if let Some(ref input) = cli.input {
        let batch = engine
            .create_jobs(input)
            .await
            .with_context(|| format!("Cannot convert {}", input.display()))?;
        for (file, reason) in &batch.rejected {
            eprintln!("{} skipped {}: {}", cyan("⚠"), file.display(), reason);
        }
    }

    // ── Sweep until done ─────────────────────────────────────────────────
    let report = tokio::select! {
        r = engine.run_until_idle() => r.context("Job store unavailable")?,
        _ = tokio::signal::ctrl_c() => {
            engine.shutdown().await;
            if let Some(ref cb) = progress {
                cb.finish();
            }
            eprintln!(
                "{} interrupted; unfinished jobs stay in {} and resume on the next run",
                cyan("⚠"),
                cli.cache_dir.display()
            );
            return Ok(());
        }
    };
    engine.shutdown().await;

    if let Some(ref cb) = progress {
        cb.finish();
    }

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        for (_, path) in &report.completed {
            println!("{}", path.display());
        }
        let failed = report.failed.len();
        eprintln!(
            "{} {} converted, {} failed",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&report.completed.len().to_string()),
            failed
        );
        for (id, reason) in &report.failed {
            eprintln!("   {} {}", dim(short_id(id)), reason);
        }
        for (id, reason) in &report.errors {
            eprintln!("   {} {} {}", dim(short_id(id)), cyan("stuck:"), reason);
        }
    }

    if !report.failed.is_empty() {
        anyhow::bail!(
            "{} of {} jobs failed",
            report.failed.len(),
            report.failed.len() + report.completed.len() + report.errors.len()
        );
    }
    if !report.errors.is_empty() {
        anyhow::bail!(
            "{} jobs could not be advanced; they stay in {} and resume on the next run",
            report.errors.len(),
            cli.cache_dir.display()
        );
    }
    Ok(())
}

/// Fetch libpdfium before the first split needs it, showing a download bar.
///
/// A failed download is not fatal: splitting falls back to the system
/// library and reports a binding error per job if that is missing too.
#[cfg(feature = "auto-pdfium")]
fn ensure_pdfium(cli: &Cli) {
    if cli.no_chunk || cli.input.is_none() || pdfium_fetch::is_cached() {
        return;
    }

    let result = if cli.quiet {
        tokio::task::block_in_place(|| pdfium_fetch::ensure_library(None))
    } else {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_prefix("PDF engine");

        let on_progress = |downloaded: u64, total: Option<u64>| {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(downloaded);
        };
        let result =
            tokio::task::block_in_place(|| pdfium_fetch::ensure_library(Some(&on_progress)));
        bar.finish_and_clear();
        result
    };

    match result {
        Ok(path) if !cli.quiet => eprintln!(
            "{} PDF engine ready  {}",
            green("✔"),
            dim(&path.display().to_string())
        ),
        Ok(_) => {}
        Err(e) => eprintln!("{} {}; trying the system pdfium", cyan("⚠"), e),
    }
}

#[cfg(not(feature = "auto-pdfium"))]
fn ensure_pdfium(_cli: &Cli) {}

/// Map CLI args to `EngineConfig`.
fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let output_format = if cli.json {
        OutputFormat::Json
    } else if cli.html {
        OutputFormat::Html
    } else {
        OutputFormat::Markdown
    };

    let mut options = ConversionOptions {
        langs: cli.langs.clone(),
        output_format,
        force_ocr: cli.force,
        strip_existing_ocr: cli.strip,
        disable_image_extraction: cli.noimg,
        use_llm: cli.llm,
        paginate: cli.pages,
    };
    if cli.max {
        options = options.max();
    }

    let schedule = match cli.max_interval {
        Some(max) => PollSchedule::Backoff {
            initial: Duration::from_secs(cli.check_interval),
            max: Duration::from_secs(max.max(cli.check_interval)),
        },
        None => PollSchedule::Fixed(Duration::from_secs(cli.check_interval)),
    };

    let mut builder = EngineConfig::builder()
        .api_key(cli.api_key.clone().unwrap_or_default())
        .base_url(cli.base_url.clone())
        .unit_size(cli.chunk_size as usize)
        .requests_per_minute(cli.rpm)
        .max_retries(cli.max_retries)
        .request_timeout_secs(cli.timeout)
        .poll_schedule(schedule)
        .job_concurrency(cli.jobs)
        .cache_dir(cli.cache_dir.clone())
        .workspace_root(cli.workspace_dir.clone())
        .output_dir(cli.output_dir.clone())
        .separator(parse_separator(&cli.separator))
        .options(options);

    if cli.no_chunk {
        builder = builder.no_chunk();
    }
    if let Some(cycles) = cli.max_cycles {
        builder = builder.max_poll_cycles(cycles);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` string into `UnitSeparator`.
fn parse_separator(s: &str) -> UnitSeparator {
    match s.to_lowercase().as_str() {
        "blank" | "none" => UnitSeparator::Blank,
        "hr" | "---" => UnitSeparator::HorizontalRule,
        "comment" => UnitSeparator::Comment,
        _ => UnitSeparator::Custom(s.to_string()),
    }
}
