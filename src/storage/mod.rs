//! On-disk article stores
//!
//! Two stores back every export:
//!
//! - [`raw::RawStore`]: one pretty-printed JSON object keyed by `item_id`
//!   holding the unmodified provider payloads
//! - [`jsonl::JsonlStore`]: one [`crate::ArticleRecord`] per line, in fetch order
//!
//! Both are rewritten through a temp file and an atomic rename whenever a
//! write could otherwise leave a half-updated file behind.

use std::io::Write;
use std::path::{Path, PathBuf};

pub mod jsonl;
pub mod raw;
pub mod summary;

pub use jsonl::JsonlStore;
pub use raw::RawStore;
pub use summary::FileSummary;

/// Raw payload directory, relative to the output directory
pub const RAW_DIR: &str = "raw_data";
/// Raw payload file name
pub const RAW_FILE: &str = "pocket_export_raw.json";
/// Normalized record directory, relative to the output directory
pub const PARSED_DIR: &str = "parsed_data";
/// Normalized record file name
pub const JSONL_FILE: &str = "articles.jsonl";
/// Checkpoint record file name
pub const STATE_FILE: &str = "export_state.json";
/// Human-readable run log file name
pub const LOG_FILE: &str = "export_logs.txt";

/// Resolved locations of everything an export writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    /// Raw JSON store
    pub raw: PathBuf,
    /// Normalized JSONL store
    pub normalized: PathBuf,
    /// Checkpoint record
    pub state: PathBuf,
    /// Run log
    pub log: PathBuf,
}

impl ExportPaths {
    /// Standard layout under `output_dir`
    ///
    /// ```
    /// use pocket_exporter::storage::ExportPaths;
    ///
    /// let paths = ExportPaths::under("out");
    /// assert!(paths.raw.ends_with("raw_data/pocket_export_raw.json"));
    /// assert!(paths.normalized.ends_with("parsed_data/articles.jsonl"));
    /// ```
    pub fn under(output_dir: impl AsRef<Path>) -> Self {
        let root = output_dir.as_ref();
        Self {
            raw: root.join(RAW_DIR).join(RAW_FILE),
            normalized: root.join(PARSED_DIR).join(JSONL_FILE),
            state: root.join(STATE_FILE),
            log: root.join(LOG_FILE),
        }
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error
    #[error("IO error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Existing file content cannot be parsed
    #[error("corrupt store {path}: {message}")]
    Corrupt {
        /// File involved
        path: PathBuf,
        /// What is wrong
        message: String,
    },
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the parent directory of `path`
pub(crate) fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    Ok(())
}

/// Temp file in the same directory as `path`, so persisting is a rename
pub(crate) fn temp_beside(path: &Path) -> StorageResult<tempfile::NamedTempFile> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    tempfile::NamedTempFile::new_in(parent).map_err(|e| StorageError::io(parent, e))
}

/// Flush, fsync, rename over `path`, then fsync the directory
pub(crate) fn commit_temp(
    mut temp: tempfile::NamedTempFile,
    path: &Path,
) -> StorageResult<()> {
    temp.flush().map_err(|e| StorageError::io(path, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    sync_parent(path);
    Ok(())
}

/// Best-effort fsync of the containing directory so a rename is durable
pub(crate) fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}
