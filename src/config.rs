//! Configuration types for chunked conversion.
//!
//! All engine behaviour is controlled through [`EngineConfig`], built via its
//! [`EngineConfigBuilder`]. Per-request service options (OCR flags, output
//! format) live in [`ConversionOptions`] and are copied into every unit
//! submission of a job.

use crate::error::ChunkmarkError;
use crate::schedule::PollSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default Marker API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://www.datalab.to/api/v1/marker";

/// Environment variable holding the service API key.
pub const API_KEY_ENV: &str = "MARKER_PDF_KEY";

/// Unit size used when chunking is disabled. Large enough that no real
/// document is ever split.
pub const NO_CHUNK_UNIT_SIZE: usize = 1_000_000;

/// Configuration for the conversion engine.
///
/// # Example
/// ```rust
/// use chunkmark::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .api_key("sk-test")
///     .unit_size(10)
///     .requests_per_minute(60)
///     .build()
///     .unwrap();
/// assert_eq!(config.unit_size, 10);
/// ```
#[derive(Clone)]
pub struct EngineConfig {
    /// API key sent as `X-Api-Key`.
    pub api_key: String,

    /// Service base URL. Submissions POST here; status GETs `{base_url}/{id}`.
    pub base_url: String,

    /// Maximum pages per unit. Default: 25.
    pub unit_size: usize,

    /// Outbound calls (submit + status) allowed per rolling minute, process-wide. Default: 150.
    pub requests_per_minute: usize,

    /// Attempts per service call before a transient failure becomes definitive. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request HTTP timeout in seconds. Default: 30.
    pub request_timeout_secs: u64,

    /// Delay between polling sweeps.
    pub poll_schedule: PollSchedule,

    /// Give up on a job after this many polling sweeps. Default: None (wait forever).
    pub max_poll_cycles: Option<u32>,

    /// Jobs processed concurrently within one sweep. Default: 1.
    pub job_concurrency: usize,

    /// Directory holding persisted job records. Default: `.marker_cache`.
    pub cache_dir: PathBuf,

    /// Parent of every job workspace. Default: `chunks`.
    pub workspace_root: PathBuf,

    /// Where combined documents are written. Default: `converted`.
    pub output_dir: PathBuf,

    /// Separator placed between unit contents in the merged document.
    pub separator: UnitSeparator,

    /// Options forwarded to the service with every submission.
    pub options: ConversionOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            unit_size: 25,
            requests_per_minute: 150,
            max_retries: 3,
            retry_backoff_ms: 500,
            request_timeout_secs: 30,
            poll_schedule: PollSchedule::default(),
            max_poll_cycles: None,
            job_concurrency: 1,
            cache_dir: PathBuf::from(".marker_cache"),
            workspace_root: PathBuf::from("chunks"),
            output_dir: PathBuf::from("converted"),
            separator: UnitSeparator::default(),
            options: ConversionOptions::default(),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .field("unit_size", &self.unit_size)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_schedule", &self.poll_schedule)
            .field("max_poll_cycles", &self.max_poll_cycles)
            .field("job_concurrency", &self.job_concurrency)
            .field("cache_dir", &self.cache_dir)
            .field("workspace_root", &self.workspace_root)
            .field("output_dir", &self.output_dir)
            .field("separator", &self.separator)
            .field("options", &self.options)
            .finish()
    }
}

impl EngineConfig {
    /// Create a new builder for `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Initial retry delay as a `Duration`.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn unit_size(mut self, pages: usize) -> Self {
        self.config.unit_size = pages;
        self
    }

    /// Never split: every document becomes a single unit.
    pub fn no_chunk(mut self) -> Self {
        self.config.unit_size = NO_CHUNK_UNIT_SIZE;
        self
    }

    pub fn requests_per_minute(mut self, n: usize) -> Self {
        self.config.requests_per_minute = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn poll_schedule(mut self, schedule: PollSchedule) -> Self {
        self.config.poll_schedule = schedule;
        self
    }

    /// Shorthand for a fixed polling interval.
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_schedule = PollSchedule::Fixed(Duration::from_secs(secs));
        self
    }

    pub fn max_poll_cycles(mut self, cycles: u32) -> Self {
        self.config.max_poll_cycles = Some(cycles);
        self
    }

    pub fn job_concurrency(mut self, n: usize) -> Self {
        self.config.job_concurrency = n.max(1);
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn workspace_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn separator(mut self, sep: UnitSeparator) -> Self {
        self.config.separator = sep;
        self
    }

    pub fn options(mut self, options: ConversionOptions) -> Self {
        self.config.options = options;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, ChunkmarkError> {
        let c = &self.config;
        if c.unit_size < 1 {
            return Err(ChunkmarkError::InvalidConfig(
                "Unit size must be ≥ 1 page".into(),
            ));
        }
        if c.requests_per_minute == 0 {
            return Err(ChunkmarkError::InvalidConfig(
                "Requests per minute must be ≥ 1".into(),
            ));
        }
        if c.max_retries == 0 {
            return Err(ChunkmarkError::InvalidConfig(
                "Max retries must be ≥ 1 (it counts attempts, including the first)".into(),
            ));
        }
        if c.base_url.is_empty() {
            return Err(ChunkmarkError::InvalidConfig("Base URL is empty".into()));
        }
        Ok(self.config)
    }
}

// ── Service options ──────────────────────────────────────────────────────

/// Output format requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain markup. (default)
    #[default]
    Markdown,
    /// Structured markup.
    Html,
    /// Structured data.
    Json,
}

impl OutputFormat {
    /// Form-field value sent to the service.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }

    /// File extension of the combined document, including the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => ".md",
            OutputFormat::Html => ".html",
            OutputFormat::Json => ".json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-submission options understood by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    /// Comma-separated OCR languages. Default: "English".
    pub langs: String,
    pub output_format: OutputFormat,
    /// OCR every page even when a text layer exists.
    pub force_ocr: bool,
    /// Discard the existing text layer and redo OCR.
    pub strip_existing_ocr: bool,
    pub disable_image_extraction: bool,
    /// Let the service use an LLM to improve accuracy.
    pub use_llm: bool,
    /// Insert page delimiters in the output.
    pub paginate: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            langs: "English".to_string(),
            output_format: OutputFormat::default(),
            force_ocr: false,
            strip_existing_ocr: false,
            disable_image_extraction: false,
            use_llm: false,
            paginate: false,
        }
    }
}

impl ConversionOptions {
    /// Enable every accuracy enhancement: LLM, strip-OCR and force-OCR.
    pub fn max(mut self) -> Self {
        self.use_llm = true;
        self.strip_existing_ocr = true;
        self.force_ocr = true;
        self
    }
}

// ── Merge separator ──────────────────────────────────────────────────────

/// How to separate unit contents in the combined document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitSeparator {
    /// Blank line: "\n\n". (default)
    #[default]
    Blank,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with the first global page of the following unit.
    Comment,
    /// Custom string inserted between units.
    Custom(String),
}

impl UnitSeparator {
    /// Render the separator placed before a unit whose first page (1-indexed) is `first_page`.
    pub fn render(&self, first_page: usize) -> String {
        match self {
            UnitSeparator::Blank => "\n\n".to_string(),
            UnitSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            UnitSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", first_page),
            UnitSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_limits() {
        let c = EngineConfig::default();
        assert_eq!(c.unit_size, 25);
        assert_eq!(c.requests_per_minute, 150);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn zero_unit_size_rejected() {
        let err = EngineConfig::builder().unit_size(0).build().unwrap_err();
        assert!(matches!(err, ChunkmarkError::InvalidConfig(_)));
    }

    #[test]
    fn no_chunk_sets_unbounded_size() {
        let c = EngineConfig::builder().unit_size(5).no_chunk().build().unwrap();
        assert_eq!(c.unit_size, NO_CHUNK_UNIT_SIZE);
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = EngineConfig::builder().api_key("secret-key").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn max_enables_enhancements() {
        let o = ConversionOptions::default().max();
        assert!(o.use_llm && o.strip_existing_ocr && o.force_ocr);
        assert!(!o.paginate);
    }

    #[test]
    fn output_format_extensions() {
        assert_eq!(OutputFormat::Markdown.extension(), ".md");
        assert_eq!(OutputFormat::Json.extension(), ".json");
        assert_eq!(OutputFormat::Html.extension(), ".html");
        assert_eq!(serde_json::to_string(&OutputFormat::Json).unwrap(), "\"json\"");
    }

    #[test]
    fn separator_rendering() {
        assert_eq!(UnitSeparator::Blank.render(26), "\n\n");
        assert_eq!(UnitSeparator::Comment.render(26), "\n\n<!-- page 26 -->\n\n");
        assert_eq!(UnitSeparator::Custom("***".into()).render(1), "\n\n***\n\n");
    }
}
