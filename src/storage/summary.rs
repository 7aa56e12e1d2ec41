//! File summaries for run reports and the `status` command

use super::jsonl::JsonlScan;
use super::raw::RawStore;
use super::StorageResult;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Size and article count of one store file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    /// File location
    pub file: PathBuf,
    /// Whether the file exists
    pub exists: bool,
    /// Size in bytes
    pub size_bytes: u64,
    /// Articles in the file
    pub article_count: u64,
}

impl FileSummary {
    fn base(path: &Path) -> Self {
        let size = std::fs::metadata(path).map(|m| m.len()).ok();
        Self {
            file: path.to_path_buf(),
            exists: size.is_some(),
            size_bytes: size.unwrap_or(0),
            article_count: 0,
        }
    }

    /// Summarize the raw JSON store
    pub fn raw(path: &Path) -> StorageResult<Self> {
        let mut summary = Self::base(path);
        if summary.exists {
            summary.article_count = RawStore::new(path).count()?;
        }
        Ok(summary)
    }

    /// Summarize the normalized JSONL store (one article per line)
    pub fn jsonl(path: &Path) -> StorageResult<Self> {
        let mut summary = Self::base(path);
        if summary.exists {
            summary.article_count = JsonlScan::of(path)?.lines;
        }
        Ok(summary)
    }
}

impl fmt::Display for FileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.exists {
            return write!(f, "{} (missing)", self.file.display());
        }
        write!(
            f,
            "{}: {} bytes ({:.1} KB), {} articles",
            self.file.display(),
            self.size_bytes,
            self.size_bytes as f64 / 1024.0,
            self.article_count
        )
    }
}
