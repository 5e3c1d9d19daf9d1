//! # pdfium-fetch
//!
//! Finds a usable PDFium shared library for `pdfium-render`, downloading the
//! platform build from
//! [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries)
//! the first time one is needed.
//!
//! Resolution order (first match wins):
//!
//! 1. `PDFIUM_LIB_PATH`, when it names an existing file.
//! 2. The per-version cache, `{cache}/chunkmark/pdfium-{VERSION}/`.
//! 3. A fresh download, extracted into the cache.
//!
//! `CHUNKMARK_PDFIUM_DIR` replaces `{cache}/chunkmark` as the cache root.
//!
//! ```rust,no_run
//! let pdfium = pdfium_fetch::bind(None).expect("PDFium unavailable");
//! ```

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::Pdfium;
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Constants ────────────────────────────────────────────────────────────────

/// Release tag of pdfium-binaries that is downloaded.
pub const PDFIUM_VERSION: &str = "7690";

/// Explicit library path; skips the cache and the download.
pub const LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Overrides the cache root.
pub const CACHE_DIR_ENV: &str = "CHUNKMARK_PDFIUM_DIR";

const RELEASES_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

/// Download progress: `(bytes so far, total if known)`.
pub type OnProgress<'a> = &'a dyn Fn(u64, Option<u64>);

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum FetchError {
    /// No prebuilt PDFium exists for this OS/architecture.
    #[error("No prebuilt PDFium for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// The cache directory could not be created or written.
    #[error("PDFium cache '{path}' is unusable: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDFium download failed: {0}")]
    Download(String),

    /// The archive was corrupt or lacked the library.
    #[error("PDFium archive unusable: {0}")]
    Extract(String),

    /// The library exists but could not be loaded.
    #[error("Failed to load PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

// ── Platforms ────────────────────────────────────────────────────────────────

/// Where the library lives in a release archive and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Release asset, e.g. `pdfium-linux-x64.tgz`.
    pub archive: &'static str,
    /// Member inside the archive, e.g. `lib/libpdfium.so`.
    pub member: &'static str,
    /// File name in the cache, e.g. `libpdfium.so`.
    pub file_name: &'static str,
}

const fn prebuilt(archive: &'static str, file_name: &'static str, member: &'static str) -> Platform {
    Platform {
        archive,
        member,
        file_name,
    }
}

const PLATFORMS: &[(&str, &str, Platform)] = &[
    ("macos", "aarch64", prebuilt("pdfium-mac-arm64.tgz", "libpdfium.dylib", "lib/libpdfium.dylib")),
    ("macos", "x86_64", prebuilt("pdfium-mac-x64.tgz", "libpdfium.dylib", "lib/libpdfium.dylib")),
    ("linux", "x86_64", prebuilt("pdfium-linux-x64.tgz", "libpdfium.so", "lib/libpdfium.so")),
    ("linux", "aarch64", prebuilt("pdfium-linux-arm64.tgz", "libpdfium.so", "lib/libpdfium.so")),
    ("windows", "x86_64", prebuilt("pdfium-win-x64.tgz", "pdfium.dll", "bin/pdfium.dll")),
    ("windows", "aarch64", prebuilt("pdfium-win-arm64.tgz", "pdfium.dll", "bin/pdfium.dll")),
    ("windows", "x86", prebuilt("pdfium-win-x86.tgz", "pdfium.dll", "bin/pdfium.dll")),
];

/// Prebuilt PDFium for `os`/`arch`, as named by `std::env::consts`.
pub fn platform_for(os: &str, arch: &str) -> Result<Platform, FetchError> {
    PLATFORMS
        .iter()
        .find(|(o, a, _)| *o == os && *a == arch)
        .map(|(_, _, p)| *p)
        .ok_or_else(|| FetchError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        })
}

/// Prebuilt PDFium for the running platform.
pub fn current_platform() -> Result<Platform, FetchError> {
    platform_for(std::env::consts::OS, std::env::consts::ARCH)
}

// ── Cache ────────────────────────────────────────────────────────────────────

fn cache_dir_under(root: Option<OsString>) -> PathBuf {
    let root = root.filter(|r| !r.is_empty()).map(PathBuf::from).unwrap_or_else(|| {
        dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
            .unwrap_or_else(std::env::temp_dir)
            .join("chunkmark")
    });
    root.join(format!("pdfium-{PDFIUM_VERSION}"))
}

/// Directory holding the downloaded library for [`PDFIUM_VERSION`].
pub fn cache_dir() -> PathBuf {
    cache_dir_under(std::env::var_os(CACHE_DIR_ENV))
}

fn explicit_library() -> Option<PathBuf> {
    std::env::var_os(LIB_PATH_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// The library that would be used without downloading, if any.
pub fn local_library() -> Option<PathBuf> {
    if let Some(path) = explicit_library().filter(|p| p.is_file()) {
        return Some(path);
    }
    let cached = cache_dir().join(current_platform().ok()?.file_name);
    cached.is_file().then_some(cached)
}

/// True when binding needs no network access.
pub fn is_cached() -> bool {
    local_library().is_some()
}

// ── Resolution ───────────────────────────────────────────────────────────────

static RESOLVED: OnceLock<PathBuf> = OnceLock::new();

/// Path of a usable library, downloading it into the cache if none exists.
///
/// Resolved once per process; later calls return the same path.
pub fn ensure_library(on_progress: Option<OnProgress<'_>>) -> Result<PathBuf, FetchError> {
    if let Some(path) = RESOLVED.get() {
        return Ok(path.clone());
    }
    let path = match local_library() {
        Some(path) => path,
        None => {
            if let Some(missing) = explicit_library() {
                warn!(
                    "{} '{}' does not exist; downloading PDFium instead",
                    LIB_PATH_ENV,
                    missing.display()
                );
            }
            download_into(&cache_dir(), current_platform()?, on_progress)?
        }
    };
    debug!("Using PDFium at {}", path.display());
    Ok(RESOLVED.get_or_init(|| path).clone())
}

/// Bind to PDFium, downloading it first if needed.
pub fn bind(on_progress: Option<OnProgress<'_>>) -> Result<Pdfium, FetchError> {
    bind_at(&ensure_library(on_progress)?)
}

/// Bind to the library at `path`.
pub fn bind_at(path: &Path) -> Result<Pdfium, FetchError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| FetchError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

// ── Download ─────────────────────────────────────────────────────────────────

fn download_into(
    dir: &Path,
    platform: Platform,
    on_progress: Option<OnProgress<'_>>,
) -> Result<PathBuf, FetchError> {
    let url = format!(
        "{}/chromium%2F{}/{}",
        RELEASES_URL, PDFIUM_VERSION, platform.archive
    );
    std::fs::create_dir_all(dir).map_err(|source| FetchError::Cache {
        path: dir.to_path_buf(),
        source,
    })?;

    info!("Downloading PDFium {} from {}", PDFIUM_VERSION, url);
    let archive = fetch(&url, on_progress)?;
    let dest = dir.join(platform.file_name);
    unpack_member(&archive, platform.member, &dest)?;
    info!("PDFium cached at {}", dest.display());
    Ok(dest)
}

fn fetch(url: &str, on_progress: Option<OnProgress<'_>>) -> Result<Vec<u8>, FetchError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pdfium-fetch/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| FetchError::Download(e.to_string()))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| FetchError::Download(format!("GET {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(FetchError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut body = Vec::with_capacity(total.unwrap_or(0) as usize);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match response.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FetchError::Download(format!("read {url}: {e}"))),
        };
        body.extend_from_slice(&buf[..n]);
        if let Some(cb) = on_progress {
            cb(body.len() as u64, total);
        }
    }
    Ok(body)
}

/// Extract `member` of the gzipped tar `archive` to `dest`.
///
/// The file is written next to `dest` and renamed into place, so `dest`
/// is either absent or complete.
fn unpack_member(archive: &[u8], member: &str, dest: &Path) -> Result<(), FetchError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let extract = |e: std::io::Error| FetchError::Extract(e.to_string());

    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(archive));
    for entry in tar.entries().map_err(extract)? {
        let mut entry = entry.map_err(extract)?;
        if entry.path().map_err(extract)?.to_string_lossy() != member {
            continue;
        }

        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(|source| FetchError::Cache {
            path: dir.to_path_buf(),
            source,
        })?;
        std::io::copy(&mut entry, staged.as_file_mut()).map_err(extract)?;
        staged.persist(dest).map_err(|e| FetchError::Cache {
            path: dest.to_path_buf(),
            source: e.error,
        })?;
        return Ok(());
    }
    Err(FetchError::Extract(format!("'{member}' not found in archive")))
}

// ── Tests ────────────────────────────────────────────────────────────────────
