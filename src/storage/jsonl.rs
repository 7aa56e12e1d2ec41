//! Normalized record store (JSON Lines)
//!
//! One [`ArticleRecord`] per line in fetch order. The store keeps an
//! in-memory index of ids so it can enforce one record per `item_id`:
//! a batch with only new ids is appended, a batch that repeats ids
//! triggers a streaming rewrite that keeps the latest record.
//!
//! Every line is newline-terminated when written. Bytes after the last
//! newline can only come from an interrupted append and are truncated
//! when the store is opened.

use super::{commit_temp, ensure_parent, temp_beside, StorageError, StorageResult};
use crate::ArticleRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Only the id is needed to index a line
#[derive(Deserialize)]
struct LineId {
    item_id: String,
}

/// Result of writing one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonlWriteStats {
    /// Records whose id was new
    pub added: u64,
    /// Records that replaced an existing line
    pub replaced: u64,
    /// Whether the file had to be rewritten
    pub rewritten: bool,
}

/// Line-level scan of a JSONL file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JsonlScan {
    /// Non-empty, newline-terminated lines
    pub lines: u64,
    /// Distinct ids
    pub unique_ids: u64,
    /// Lines whose id was already seen
    pub duplicate_lines: u64,
    /// Lines that are not a valid record
    pub invalid_lines: u64,
    /// Trailing bytes without a newline
    pub torn_tail_bytes: u64,
}

impl JsonlScan {
    /// Scan `path` without modifying it; a missing file scans as empty.
    pub fn of(path: &Path) -> StorageResult<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(StorageError::io(path, e)),
        };

        let mut scan = Self::default();
        let mut ids = HashSet::new();
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| StorageError::io(path, e))?;
            if read == 0 {
                break;
            }
            if buf.last() != Some(&b'\n') {
                scan.torn_tail_bytes = read as u64;
                break;
            }
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            scan.lines += 1;
            match serde_json::from_slice::<ArticleRecord>(&buf) {
                Ok(record) => {
                    if !ids.insert(record.item_id) {
                        scan.duplicate_lines += 1;
                    }
                }
                Err(_) => scan.invalid_lines += 1,
            }
        }

        scan.unique_ids = ids.len() as u64;
        Ok(scan)
    }

    /// No duplicates, no invalid lines, no torn tail
    pub fn is_clean(&self) -> bool {
        self.duplicate_lines == 0 && self.invalid_lines == 0 && self.torn_tail_bytes == 0
    }
}

/// JSONL store with an id index
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    ids: HashSet<String>,
}

impl JsonlStore {
    /// Open (or lazily create) the store at `path`, indexing existing ids
    /// and truncating a torn trailing line.
    ///
    /// # Errors
    /// Returns `StorageError::Corrupt` if a complete line is not valid JSON
    /// with an `item_id`.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            ids: HashSet::new(),
        };
        store.load_index()?;
        Ok(store)
    }

    fn load_index(&mut self) -> StorageResult<()> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut valid_len: u64 = 0;
        let mut line_no: u64 = 0;
        let mut torn = false;

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| StorageError::io(&self.path, e))?;
            if read == 0 {
                break;
            }
            if buf.last() != Some(&b'\n') {
                torn = true;
                break;
            }
            line_no += 1;
            valid_len += read as u64;
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let line: LineId = serde_json::from_slice(&buf).map_err(|e| StorageError::Corrupt {
                path: self.path.clone(),
                message: format!("line {line_no}: {e}"),
            })?;
            self.ids.insert(line.item_id);
        }

        if torn {
            warn!(
                path = %self.path.display(),
                keep_bytes = valid_len,
                "Truncating torn trailing line"
            );
            let file = OpenOptions::new()
                .write(true)
                .open(&self.path)
                .map_err(|e| StorageError::io(&self.path, e))?;
            file.set_len(valid_len)
                .map_err(|e| StorageError::io(&self.path, e))?;
            file.sync_all()
                .map_err(|e| StorageError::io(&self.path, e))?;
        }

        debug!(
            path = %self.path.display(),
            records = self.ids.len(),
            "Normalized store indexed"
        );
        Ok(())
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct records
    pub fn len(&self) -> u64 {
        self.ids.len() as u64
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether a record with `item_id` exists
    pub fn contains(&self, item_id: &str) -> bool {
        self.ids.contains(item_id)
    }

    /// Write a batch of records, one line each, keeping one line per id.
    ///
    /// # Errors
    /// Any IO or serialization failure. On a rewrite the previous file stays
    /// intact until the rename.
    pub fn write_batch(&mut self, records: &[ArticleRecord]) -> StorageResult<JsonlWriteStats> {
        if records.is_empty() {
            return Ok(JsonlWriteStats::default());
        }
        ensure_parent(&self.path)?;

        let last: HashMap<&str, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.item_id.as_str(), i))
            .collect();
        let batch: Vec<&ArticleRecord> = records
            .iter()
            .enumerate()
            .filter(|(i, r)| last.get(r.item_id.as_str()) == Some(i))
            .map(|(_, r)| r)
            .collect();

        let replaced = batch
            .iter()
            .filter(|r| self.ids.contains(&r.item_id))
            .count() as u64;

        let stats = if replaced == 0 {
            self.append(&batch)?;
            JsonlWriteStats {
                added: batch.len() as u64,
                replaced: 0,
                rewritten: false,
            }
        } else {
            self.rewrite(&batch, &last)?;
            JsonlWriteStats {
                added: batch.len() as u64 - replaced,
                replaced,
                rewritten: true,
            }
        };

        for record in &batch {
            self.ids.insert(record.item_id.clone());
        }

        debug!(
            path = %self.path.display(),
            added = stats.added,
            replaced = stats.replaced,
            rewritten = stats.rewritten,
            "Normalized store updated"
        );
        Ok(stats)
    }

    fn append(&self, batch: &[&ArticleRecord]) -> StorageResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::io(&self.path, e))?;
        let mut writer = BufWriter::new(file);
        for record in batch {
            write_line(&mut writer, record, &self.path)?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::io(&self.path, e.into_error()))?;
        file.sync_data()
            .map_err(|e| StorageError::io(&self.path, e))?;
        Ok(())
    }

    fn rewrite(&self, batch: &[&ArticleRecord], replacing: &HashMap<&str, usize>) -> StorageResult<()> {
        let mut temp = temp_beside(&self.path)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());

            let existing = File::open(&self.path).map_err(|e| StorageError::io(&self.path, e))?;
            let mut reader = BufReader::new(existing);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let read = reader
                    .read_until(b'\n', &mut buf)
                    .map_err(|e| StorageError::io(&self.path, e))?;
                if read == 0 {
                    break;
                }
                if buf.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let line: LineId =
                    serde_json::from_slice(&buf).map_err(|e| StorageError::Corrupt {
                        path: self.path.clone(),
                        message: e.to_string(),
                    })?;
                if replacing.contains_key(line.item_id.as_str()) {
                    continue;
                }
                writer
                    .write_all(&buf)
                    .map_err(|e| StorageError::io(&self.path, e))?;
            }

            for record in batch {
                write_line(&mut writer, record, &self.path)?;
            }
            writer.flush().map_err(|e| StorageError::io(&self.path, e))?;
        }
        commit_temp(temp, &self.path)
    }

    /// Read every record. Intended for verification and tests.
    pub fn records(&self) -> StorageResult<Vec<ArticleRecord>> {
        read_records(&self.path)
    }
}

fn write_line<W: Write>(writer: &mut W, record: &ArticleRecord, path: &Path) -> StorageResult<()> {
    serde_json::to_writer(&mut *writer, record)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    writer
        .write_all(b"\n")
        .map_err(|e| StorageError::io(path, e))
}

/// Read all complete records from a JSONL file; a missing file is empty.
pub fn read_records(path: &Path) -> StorageResult<Vec<ArticleRecord>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StorageError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| StorageError::Corrupt {
            path: path.to_path_buf(),
            message: format!("line {}: {e}", index + 1),
        })?;
        records.push(record);
    }
    Ok(records)
}
