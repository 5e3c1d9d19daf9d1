//! Input resolution: turn a user-supplied path into the files to convert.
//!
//! A file path yields that file; a directory yields every regular file
//! beneath it, sorted so batch order is stable between runs. Content types
//! are sniffed from magic bytes, not extensions, and checked against the
//! service allow-list before anything is sent over the network.

use crate::error::ChunkmarkError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// MIME type of PDF documents, the only type that is ever split.
pub const PDF_MIME: &str = "application/pdf";

/// Content types the conversion service accepts.
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    // PDF
    PDF_MIME,
    // Word
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    // PowerPoint
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    // Images
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/gif",
    "image/tiff",
];

/// Whether `mime` is on the service allow-list.
pub fn is_supported(mime: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime)
}

/// Sniff the content type of `bytes`. `None` when no signature matches.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|kind| kind.mime_type())
}

/// Sniff a file on disk, reading only its header.
pub fn sniff_file(path: &Path) -> Result<Option<&'static str>, ChunkmarkError> {
    use std::io::Read;

    let mut file = open_readable(path)?;
    let mut header = [0u8; 8192];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ChunkmarkError::storage(path, e)),
        }
    }
    match sniff_mime(&header[..filled]) {
        // Office documents are zip archives; telling them apart means
        // looking at entries past the header.
        Some("application/zip") => {
            let bytes = std::fs::read(path).map_err(|e| ChunkmarkError::storage(path, e))?;
            Ok(sniff_mime(&bytes))
        }
        other => Ok(other),
    }
}

/// Expand `input` into a sorted list of files.
pub fn resolve_inputs(input: &Path) -> Result<Vec<PathBuf>, ChunkmarkError> {
    if !input.exists() {
        return Err(ChunkmarkError::FileNotFound {
            path: input.to_path_buf(),
        });
    }

    if input.is_file() {
        open_readable(input)?;
        return Ok(vec![input.to_path_buf()]);
    }

    if input.is_dir() {
        let mut files = Vec::new();
        collect_files(input, &mut files)?;
        if files.is_empty() {
            return Err(ChunkmarkError::InvalidInput {
                input: input.display().to_string(),
                reason: "directory contains no files".into(),
            });
        }
        files.sort();
        debug!("Resolved {} files under {}", files.len(), input.display());
        return Ok(files);
    }

    Err(ChunkmarkError::InvalidInput {
        input: input.display().to_string(),
        reason: "not a regular file or directory".into(),
    })
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ChunkmarkError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ChunkmarkError::storage(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ChunkmarkError::storage(dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| ChunkmarkError::storage(&path, e))?;
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn open_readable(path: &Path) -> Result<std::fs::File, ChunkmarkError> {
    std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ChunkmarkError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => ChunkmarkError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ChunkmarkError::storage(path, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn sniffs_pdf_and_png() {
        assert_eq!(sniff_mime(b"%PDF-1.7\n%..."), Some(PDF_MIME));
        assert_eq!(sniff_mime(PNG_MAGIC), Some("image/png"));
        assert_eq!(sniff_mime(b"just some text"), None);
    }

    #[test]
    fn allow_list() {
        assert!(is_supported("application/pdf"));
        assert!(is_supported("image/tiff"));
        assert!(!is_supported("application/zip"));
        assert!(!is_supported("text/plain"));
    }

    #[test]
    fn missing_input() {
        let err = resolve_inputs(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, ChunkmarkError::FileNotFound { .. }));
    }

    #[test]
    fn single_file() {
        let dir = TempDir::new().unwrap();
        let f = dir.path().join("a.pdf");
        std::fs::write(&f, b"%PDF-1.4").unwrap();
        assert_eq!(resolve_inputs(&f).unwrap(), vec![f]);
    }

    #[test]
    fn directory_is_walked_and_sorted() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("sub/c.png"), PNG_MAGIC).unwrap();

        let files = resolve_inputs(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf", "sub/c.png"]);
    }

    #[test]
    fn empty_directory_is_invalid() {
        let dir = TempDir::new().unwrap();
        let err = resolve_inputs(dir.path()).unwrap_err();
        assert!(matches!(err, ChunkmarkError::InvalidInput { .. }));
    }

    #[test]
    fn sniff_file_reads_header() {
        let dir = TempDir::new().unwrap();
        let f = dir.path().join("doc.bin");
        std::fs::write(&f, b"%PDF-1.5\nrest of file").unwrap();
        assert_eq!(sniff_file(&f).unwrap(), Some(PDF_MIME));
    }
}
