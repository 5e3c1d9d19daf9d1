//! Splitting: partition an oversized PDF into page-range units.
//!
//! Boundary planning is a pure function of page count and unit size, so it
//! is identical on every run. Unit `k` covers pages
//! `[k * size, min((k + 1) * size, total))`.
//!
//! Producing the unit documents is delegated to a [`PageExtractor`]. The
//! production extractor wraps pdfium, which is blocking and not async-safe,
//! so callers run [`split_document`] inside `spawn_blocking`.
//!
//! If any unit fails to materialise, every unit file already written is
//! removed before the error is returned.

use crate::error::ChunkmarkError;
use crate::job::PageRange;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit libpdfium to bind to.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Capability: count pages and copy a page range into a new document.
pub trait PageExtractor: Send + Sync {
    /// Number of pages in `input`.
    fn page_count(&self, input: &Path) -> Result<usize, ChunkmarkError>;

    /// Write a self-contained document holding `pages` of `input` to `dest`.
    fn extract(&self, input: &Path, pages: PageRange, dest: &Path) -> Result<(), ChunkmarkError>;
}

/// A materialised unit of a split document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub path: PathBuf,
    pub pages: PageRange,
}

/// Plan unit boundaries for a document of `total` pages.
///
/// Returns `ceil(total / unit_size)` ranges; empty when `total` is 0.
pub fn plan_units(total: usize, unit_size: usize) -> Result<Vec<PageRange>, ChunkmarkError> {
    if unit_size < 1 {
        return Err(ChunkmarkError::InvalidConfig(
            "Unit size must be ≥ 1 page".into(),
        ));
    }
    Ok((0..total.div_ceil(unit_size))
        .map(|k| PageRange {
            start: k * unit_size,
            end: ((k + 1) * unit_size).min(total),
        })
        .collect())
}

/// File name of unit `index` out of `count`, e.g. `002of005.pdf`.
pub fn chunk_file_name(index: usize, count: usize) -> String {
    format!("{:03}of{:03}.pdf", index + 1, count)
}

/// Split `input` into units of at most `unit_size` pages inside `workspace`.
///
/// Returns `Ok(None)` when the document already fits in one unit.
pub fn split_document(
    extractor: &dyn PageExtractor,
    input: &Path,
    unit_size: usize,
    workspace: &Path,
) -> Result<Option<Vec<Chunk>>, ChunkmarkError> {
    if unit_size < 1 {
        return Err(ChunkmarkError::InvalidConfig(
            "Unit size must be ≥ 1 page".into(),
        ));
    }

    let total = extractor.page_count(input)?;
    if total == 0 {
        return Err(ChunkmarkError::EmptyDocument {
            path: input.to_path_buf(),
        });
    }
    if total <= unit_size {
        debug!(
            "{}: {} pages fit in one unit of {}",
            input.display(),
            total,
            unit_size
        );
        return Ok(None);
    }

    let ranges = plan_units(total, unit_size)?;
    let count = ranges.len();
    std::fs::create_dir_all(workspace).map_err(|e| ChunkmarkError::storage(workspace, e))?;

    let mut chunks: Vec<Chunk> = Vec::with_capacity(count);
    for (index, pages) in ranges.into_iter().enumerate() {
        let path = workspace.join(chunk_file_name(index, count));
        if let Err(e) = extractor.extract(input, pages, &path) {
            warn!(
                "{}: unit {} (pages {}–{}) failed, discarding {} written units",
                input.display(),
                index,
                pages.start,
                pages.end,
                chunks.len()
            );
            remove_quietly(&path);
            for chunk in &chunks {
                remove_quietly(&chunk.path);
            }
            return Err(e);
        }
        chunks.push(Chunk { index, path, pages });
    }

    info!(
        "Split {} ({} pages) into {} units of ≤{}",
        input.display(),
        total,
        count,
        unit_size
    );
    Ok(Some(chunks))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// [`PageExtractor`] backed by pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    library_path: Option<PathBuf>,
}

impl PdfiumExtractor {
    /// Bind to `PDFIUM_LIB_PATH` if set, else to a downloaded or system
    /// library.
    pub fn from_env() -> Self {
        Self {
            library_path: std::env::var_os(PDFIUM_LIB_PATH_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Bind to the library at `path`.
    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, ChunkmarkError> {
        match self.library_path {
            Some(ref p) => Pdfium::bind_to_library(p)
                .map(Pdfium::new)
                .map_err(|e| {
                    ChunkmarkError::PdfiumBindingFailed(format!("{}: {:?}", p.display(), e))
                }),
            None => bind_default(),
        }
    }

    fn open<'a>(pdfium: &'a Pdfium, input: &Path) -> Result<PdfDocument<'a>, ChunkmarkError> {
        pdfium
            .load_pdf_from_file(input, None)
            .map_err(|e| ChunkmarkError::MalformedDocument {
                path: input.to_path_buf(),
                detail: format!("{:?}", e),
            })
    }
}

/// Cached or freshly downloaded library first, then the system one.
#[cfg(feature = "auto-pdfium")]
fn bind_default() -> Result<Pdfium, ChunkmarkError> {
    pdfium_fetch::bind(None).or_else(|fetch_err| {
        debug!("Downloaded pdfium unavailable ({}); trying the system library", fetch_err);
        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| {
                ChunkmarkError::PdfiumBindingFailed(format!(
                    "{}; system library: {:?}",
                    fetch_err, e
                ))
            })
    })
}

#[cfg(not(feature = "auto-pdfium"))]
fn bind_default() -> Result<Pdfium, ChunkmarkError> {
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| ChunkmarkError::PdfiumBindingFailed(format!("system library: {:?}", e)))
}

impl PageExtractor for PdfiumExtractor {
    fn page_count(&self, input: &Path) -> Result<usize, ChunkmarkError> {
        let pdfium = self.bind()?;
        let document = Self::open(&pdfium, input)?;
        Ok(document.pages().len() as usize)
    }

    fn extract(&self, input: &Path, pages: PageRange, dest: &Path) -> Result<(), ChunkmarkError> {
        if pages.is_empty() {
            return Err(ChunkmarkError::Internal(format!(
                "empty page range {}..{}",
                pages.start, pages.end
            )));
        }

        let pdfium = self.bind()?;
        let source = Self::open(&pdfium, input)?;
        let mut unit = pdfium
            .create_new_pdf()
            .map_err(|e| ChunkmarkError::Internal(format!("create document: {:?}", e)))?;

        let first = pages.start as PdfPageIndex;
        let last = (pages.end - 1) as PdfPageIndex;
        unit.pages_mut()
            .copy_page_range_from_document(&source, first..=last, 0)
            .map_err(|e| ChunkmarkError::MalformedDocument {
                path: input.to_path_buf(),
                detail: format!("copy pages {}..{}: {:?}", pages.start, pages.end, e),
            })?;

        unit.save_to_file(dest).map_err(|e| {
            ChunkmarkError::storage(dest, std::io::Error::other(format!("{:?}", e)))
        })?;

        debug!(
            "Wrote pages {}..{} of {} to {}",
            pages.start,
            pages.end,
            input.display(),
            dest.display()
        );
        Ok(())
    }
}
