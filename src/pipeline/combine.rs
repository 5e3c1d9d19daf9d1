//! Combination: merge completed unit results into one document.
//!
//! Units are merged in ascending `index` order whatever order they completed
//! in. Each unit's assets are named after the unit's own page numbering, so
//! they are renamed to their page in the original document and every
//! reference to them in the unit's content is rewritten to match.
//!
//! ## Asset names
//!
//! The service names figures `..._page_{P}_Figure_{F}.{ext}`, with `P` local
//! to the unit. The global page is `index * unit_size + P`. Names that do not
//! follow the pattern get a synthetic `_chunk_{index}_{6 hex}.{ext}` name.
//!
//! ## Placement
//!
//! Output goes to a freshly created directory `{target}` or, when taken,
//! `{target}_1`, `{target}_2`, … Directory and file creation use
//! create-if-absent, so concurrent callers never share a location.

use crate::config::{OutputFormat, UnitSeparator};
use crate::error::ChunkmarkError;
use crate::job::{Job, Unit};
use crate::pipeline::encode::read_assets;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extension used when an asset name carries none.
pub const DEFAULT_ASSET_EXTENSION: &str = ".jpeg";

/// Name of the asset directory next to the combined document.
pub const IMAGES_DIR: &str = "images";

/// Highest numeric suffix tried before giving up on a free name.
const MAX_SUFFIX: usize = 10_000;

static PAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_page_(\d+)").unwrap());
static FIGURE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Figure_(\d+)").unwrap());
static EXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[A-Za-z0-9]+$").unwrap());

/// Page and figure numbers recovered from an asset name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetName {
    /// Page number local to the unit.
    pub page: usize,
    pub figure: usize,
}

/// Parse `name` as a page/figure asset name. `None` when it does not match.
pub fn parse_asset_name(name: &str) -> Option<AssetName> {
    let page = PAGE_RE.captures(name)?.get(1)?.as_str().parse().ok()?;
    let figure = FIGURE_RE.captures(name)?.get(1)?.as_str().parse().ok()?;
    Some(AssetName { page, figure })
}

/// Extension of `name` including the dot, or [`DEFAULT_ASSET_EXTENSION`].
pub fn asset_extension(name: &str) -> &str {
    EXT_RE
        .find(name)
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_ASSET_EXTENSION)
}

/// Global name for asset `name` of unit `index`.
pub fn renumber_asset(name: &str, index: usize, unit_size: usize) -> String {
    let ext = asset_extension(name);
    match parse_asset_name(name) {
        Some(AssetName { page, figure }) => {
            format!("_page_{}_Figure_{}{}", index * unit_size + page, figure, ext)
        }
        None => synthetic_asset_name(index, ext),
    }
}

fn synthetic_asset_name(index: usize, ext: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("_chunk_{}_{}{}", index, &suffix[..6], ext)
}

/// Rewrite references to `old` so they point at `images/{new}`.
fn rewrite_references(content: &str, old: &str, new: &str) -> String {
    content
        .replace(&format!("]({old})"), &format!("]({IMAGES_DIR}/{new})"))
        .replace(&format!("src=\"{old}\""), &format!("src=\"{IMAGES_DIR}/{new}\""))
}

// ── Merge ────────────────────────────────────────────────────────────────

/// A completed unit's content and assets, as read from its result slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitResult {
    pub index: usize,
    pub content: String,
    /// Service-assigned name → bytes.
    pub assets: BTreeMap<String, Vec<u8>>,
}

/// The merged document and its renamed assets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Combined {
    pub content: String,
    /// Global name → bytes.
    pub assets: BTreeMap<String, Vec<u8>>,
}

/// Load a completed unit's result slot. A missing or unreadable result is a
/// combination error.
pub fn load_unit_result(unit: &Unit, workspace: &Path) -> Result<UnitResult, ChunkmarkError> {
    let path = unit.result_path(workspace);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        ChunkmarkError::Combination(format!(
            "result of unit {} unreadable at {}: {}",
            unit.index,
            path.display(),
            e
        ))
    })?;
    let assets = read_assets(&unit.assets_dir(workspace))?;
    Ok(UnitResult {
        index: unit.index,
        content,
        assets,
    })
}

/// Merge `results` in ascending index order.
pub fn combine(
    mut results: Vec<UnitResult>,
    unit_size: usize,
    separator: &UnitSeparator,
) -> Result<Combined, ChunkmarkError> {
    if results.is_empty() {
        return Err(ChunkmarkError::Combination("no unit results to combine".into()));
    }
    results.sort_by_key(|r| r.index);

    let mut merged = Combined::default();
    for (position, result) in results.into_iter().enumerate() {
        let mut content = result.content;
        for (old_name, bytes) in result.assets {
            let mut new_name = renumber_asset(&old_name, result.index, unit_size);
            if merged.assets.contains_key(&new_name) {
                let ext = asset_extension(&old_name).to_string();
                warn!(
                    "Asset name {} already taken; using a synthetic name for unit {}",
                    new_name, result.index
                );
                new_name = synthetic_asset_name(result.index, &ext);
            }
            content = rewrite_references(&content, &old_name, &new_name);
            merged.assets.insert(new_name, bytes);
        }

        if position > 0 {
            merged
                .content
                .push_str(&separator.render(result.index * unit_size + 1));
        }
        merged.content.push_str(&content);
    }

    if merged.content.trim().is_empty() {
        return Err(ChunkmarkError::Combination("combined content is empty".into()));
    }
    Ok(merged)
}

// ── Placement ────────────────────────────────────────────────────────────

fn suffixed(base: &Path, n: usize) -> PathBuf {
    if n == 0 {
        return base.to_path_buf();
    }
    let name = base
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.with_file_name(format!("{}_{}", name, n))
}

/// Create the first free directory among `base`, `base_1`, `base_2`, …
pub fn create_unique_dir(base: &Path) -> Result<PathBuf, ChunkmarkError> {
    if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ChunkmarkError::storage(parent, e))?;
    }
    for n in 0..=MAX_SUFFIX {
        let candidate = suffixed(base, n);
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ChunkmarkError::storage(&candidate, e)),
        }
    }
    Err(no_free_name(base))
}

fn no_free_name(base: &Path) -> ChunkmarkError {
    ChunkmarkError::storage(
        base,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free name after {} attempts", MAX_SUFFIX),
        ),
    )
}

/// Create a new file named `{stem}{ext}` in `dir`, or `{stem}_1{ext}`, … if taken.
pub fn create_unique_file(
    dir: &Path,
    stem: &str,
    ext: &str,
) -> Result<(PathBuf, std::fs::File), ChunkmarkError> {
    for n in 0..=MAX_SUFFIX {
        let name = if n == 0 {
            format!("{stem}{ext}")
        } else {
            format!("{stem}_{n}{ext}")
        };
        let candidate = dir.join(name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ChunkmarkError::storage(&candidate, e)),
        }
    }
    Err(no_free_name(&dir.join(format!("{stem}{ext}"))))
}

/// Write `combined` under a unique variant of `target`.
///
/// Returns the path of the written document. On failure the directory
/// created for this call is removed again.
pub fn write_output(
    combined: &Combined,
    target: &Path,
    stem: &str,
    format: OutputFormat,
) -> Result<PathBuf, ChunkmarkError> {
    let dir = create_unique_dir(target)?;
    match write_into(combined, &dir, stem, format) {
        Ok(doc_path) => {
            info!("Wrote {}", doc_path.display());
            Ok(doc_path)
        }
        Err(e) => {
            if let Err(rm) = std::fs::remove_dir_all(&dir) {
                warn!("Could not remove partial output {}: {}", dir.display(), rm);
            }
            Err(e)
        }
    }
}

fn write_into(
    combined: &Combined,
    dir: &Path,
    stem: &str,
    format: OutputFormat,
) -> Result<PathBuf, ChunkmarkError> {
    let (doc_path, mut file) = create_unique_file(dir, stem, format.extension())?;
    file.write_all(combined.content.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| ChunkmarkError::storage(&doc_path, e))?;

    if !combined.assets.is_empty() {
        let images = create_unique_dir(&dir.join(IMAGES_DIR))?;
        for (name, bytes) in &combined.assets {
            let path = images.join(name);
            std::fs::write(&path, bytes).map_err(|e| ChunkmarkError::storage(&path, e))?;
        }
        debug!("Wrote {} assets to {}", combined.assets.len(), images.display());
    }
    Ok(doc_path)
}

/// Load, merge and write every unit of a fully complete `job`.
pub fn combine_job(job: &Job, separator: &UnitSeparator) -> Result<PathBuf, ChunkmarkError> {
    let results = job
        .ordered_units()
        .into_iter()
        .map(|u| load_unit_result(u, &job.workspace))
        .collect::<Result<Vec<_>, _>>()?;
    let combined = combine(results, job.unit_size, separator)?;

    let stem = job
        .source_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| job.id.clone());
    write_output(&combined, &job.target_file, &stem, job.output_format())
}
