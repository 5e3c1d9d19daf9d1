//! Asset encoding: service-returned base64 images ↔ files in a result slot.
//!
//! The service returns extracted images as a map of asset name to base64
//! content. The poller decodes them into the unit's asset directory; the
//! combiner reads them back before renumbering.
//!
//! Asset names may carry directory components (`figs/_page_1_Figure_0.jpeg`)
//! and the unit content references them by that full name. Files are stored
//! under their bare name and [`MANIFEST_FILE`] maps each stored file back to
//! the name the service gave it.

use crate::error::ChunkmarkError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// Stored file name → service-assigned asset name.
pub const MANIFEST_FILE: &str = "names.json";

/// Decode one base64 asset.
pub fn decode_asset(b64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    // Some responses wrap the payload as a data URI.
    let payload = match b64.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => b64,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact.as_bytes())
}

/// Bare file name of a service-assigned asset name, or `None` if it has none.
fn safe_name(name: &str) -> Option<&str> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
}

/// First stored name for `bare` not already in `taken`.
fn free_name(bare: &str, taken: &BTreeSet<String>) -> String {
    if !taken.contains(bare) {
        return bare.to_string();
    }
    (1..)
        .map(|n| format!("{n}_{bare}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| bare.to_string())
}

/// Decode `images` into `dir`, one file per entry, and record their names.
///
/// An asset that cannot be decoded or written is logged and skipped; the
/// unit's text is kept either way. Returns the number written.
pub fn write_assets(images: &BTreeMap<String, String>, dir: &Path) -> Result<usize, ChunkmarkError> {
    if images.is_empty() {
        return Ok(0);
    }
    std::fs::create_dir_all(dir).map_err(|e| ChunkmarkError::storage(dir, e))?;

    let mut taken = BTreeSet::from([MANIFEST_FILE.to_string()]);
    let mut manifest: BTreeMap<String, String> = BTreeMap::new();
    for (name, b64) in images {
        let Some(bare) = safe_name(name) else {
            warn!("Skipping asset with unusable name '{}'", name);
            continue;
        };
        let bytes = match decode_asset(b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping asset '{}': not valid base64: {}", name, e);
                continue;
            }
        };
        let stored = free_name(bare, &taken);
        let path = dir.join(&stored);
        if let Err(e) = std::fs::write(&path, &bytes) {
            warn!("Skipping asset '{}': {}: {}", name, path.display(), e);
            continue;
        }
        taken.insert(stored.clone());
        manifest.insert(stored, name.clone());
    }

    let manifest_path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| ChunkmarkError::Internal(format!("encode asset names: {e}")))?;
    std::fs::write(&manifest_path, json).map_err(|e| ChunkmarkError::storage(&manifest_path, e))?;

    debug!("Wrote {} assets to {}", manifest.len(), dir.display());
    Ok(manifest.len())
}

/// Read the assets in `dir`, keyed by their service-assigned names.
///
/// A missing directory means no assets. Without a manifest every file is
/// an asset named after itself.
pub fn read_assets(dir: &Path) -> Result<BTreeMap<String, Vec<u8>>, ChunkmarkError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    match std::fs::read(&manifest_path) {
        Ok(raw) => {
            let manifest: BTreeMap<String, String> =
                serde_json::from_slice(&raw).map_err(|e| ChunkmarkError::StoreCorrupt {
                    path: manifest_path.clone(),
                    detail: e.to_string(),
                })?;
            let mut assets = BTreeMap::new();
            for (stored, name) in manifest {
                let path = dir.join(&stored);
                let bytes = std::fs::read(&path).map_err(|e| ChunkmarkError::storage(&path, e))?;
                assets.insert(name, bytes);
            }
            Ok(assets)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => read_asset_files(dir),
        Err(e) => Err(ChunkmarkError::storage(&manifest_path, e)),
    }
}

fn read_asset_files(dir: &Path) -> Result<BTreeMap<String, Vec<u8>>, ChunkmarkError> {
    let mut assets = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(assets),
        Err(e) => return Err(ChunkmarkError::storage(dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| ChunkmarkError::storage(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let bytes = std::fs::read(&path).map_err(|e| ChunkmarkError::storage(&path, e))?;
        assets.insert(name, bytes);
    }
    Ok(assets)
}
