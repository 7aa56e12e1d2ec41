//! Raw payload store
//!
//! A single JSON object keyed by `item_id`, indented with two spaces.
//! Merging a batch streams the existing file entry by entry into a temp
//! file, skips ids the batch replaces, appends the batch and renames the
//! temp file into place. Memory stays bounded by one article plus the
//! batch regardless of archive size. The older array layout (a list of
//! payloads) is still readable and is converted on the next merge.
//!
//! # Cost
//!
//! Every merge rewrites the whole document, so a full export performs
//! `pages` rewrites of a growing file and its total I/O is quadratic in the
//! archive size. At the maximum page size a 30k-article archive is roughly
//! 110 rewrites. That is the price of the raw file being complete and valid
//! JSON after every persisted page.

use super::{commit_temp, ensure_parent, temp_beside, StorageError, StorageResult};
use crate::RawArticle;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer as _};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of merging a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawMergeStats {
    /// Entries carried over from the previous file
    pub carried: u64,
    /// Previous entries replaced by the batch
    pub replaced: u64,
    /// Entries in the file after the merge
    pub total: u64,
}

/// Raw JSON store
#[derive(Debug, Clone)]
pub struct RawStore {
    path: PathBuf,
}

impl RawStore {
    /// Store at `path`; nothing is created until the first merge
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn has_content(&self) -> StorageResult<bool> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len() > 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    fn reader(&self) -> StorageResult<serde_json::Deserializer<serde_json::de::IoRead<BufReader<File>>>> {
        let file = File::open(&self.path).map_err(|e| StorageError::io(&self.path, e))?;
        Ok(serde_json::Deserializer::from_reader(BufReader::new(file)))
    }

    fn corrupt(&self, err: serde_json::Error) -> StorageError {
        StorageError::Corrupt {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }

    /// Merge `articles` into the store, replacing entries with the same id.
    ///
    /// # Errors
    /// Fails if the existing file cannot be parsed or any write fails; the
    /// previous file is left untouched in that case.
    pub fn merge_batch(&self, articles: &[RawArticle]) -> StorageResult<RawMergeStats> {
        ensure_parent(&self.path)?;

        let incoming: HashSet<&str> = articles.iter().map(|a| a.item_id()).collect();
        let mut temp = temp_beside(&self.path)?;
        let mut stats = RawMergeStats::default();

        {
            let writer = BufWriter::new(temp.as_file_mut());
            let mut ser = serde_json::Serializer::with_formatter(writer, PrettyFormatter::with_indent(b"  "));
            let mut out = ser
                .serialize_map(None)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            if self.has_content()? {
                let mut de = self.reader()?;
                let copier = CopyEntries {
                    out: &mut out,
                    skip: &incoming,
                    stats: &mut stats,
                };
                copier.deserialize(&mut de).map_err(|e| self.corrupt(e))?;
                de.end().map_err(|e| self.corrupt(e))?;
            }

            // Within one batch the last occurrence of an id wins
            let last: HashMap<&str, usize> = articles
                .iter()
                .enumerate()
                .map(|(i, a)| (a.item_id(), i))
                .collect();
            for (i, article) in articles.iter().enumerate() {
                if last.get(article.item_id()) != Some(&i) {
                    continue;
                }
                out.serialize_entry(article.item_id(), article.fields())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
            }

            out.end()
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            let mut writer = ser.into_inner();
            writer.write_all(b"\n").map_err(|e| StorageError::io(&self.path, e))?;
            writer.flush().map_err(|e| StorageError::io(&self.path, e))?;
        }

        commit_temp(temp, &self.path)?;

        stats.total = stats.carried + incoming.len() as u64;
        debug!(
            path = %self.path.display(),
            carried = stats.carried,
            replaced = stats.replaced,
            total = stats.total,
            "Raw store merged"
        );
        Ok(stats)
    }

    /// Ids present in the store, streamed without loading payloads
    pub fn ids(&self) -> StorageResult<HashSet<String>> {
        if !self.has_content()? {
            return Ok(HashSet::new());
        }
        let mut de = self.reader()?;
        let ids = CollectIds
            .deserialize(&mut de)
            .map_err(|e| self.corrupt(e))?;
        de.end().map_err(|e| self.corrupt(e))?;
        Ok(ids)
    }

    /// Number of stored articles
    pub fn count(&self) -> StorageResult<u64> {
        Ok(self.ids()?.len() as u64)
    }

    /// Load the whole store into memory. Intended for small archives and tests.
    pub fn load_all(&self) -> StorageResult<Map<String, Value>> {
        if !self.has_content()? {
            return Ok(Map::new());
        }
        let value: Value = serde_json::from_reader(BufReader::new(
            File::open(&self.path).map_err(|e| StorageError::io(&self.path, e))?,
        ))
        .map_err(|e| self.corrupt(e))?;

        match value {
            Value::Object(map) => Ok(map),
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| {
                    let id = legacy_id(&item)?;
                    Some((id, item))
                })
                .collect()),
            _ => Err(StorageError::Corrupt {
                path: self.path.clone(),
                message: "top-level value is neither an object nor an array".to_string(),
            }),
        }
    }
}

fn legacy_id(item: &Value) -> Option<String> {
    match item.get("item_id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Copies every entry not in `skip` into `out`
struct CopyEntries<'a, M> {
    out: &'a mut M,
    skip: &'a HashSet<&'a str>,
    stats: &'a mut RawMergeStats,
}

impl<'a, M> CopyEntries<'a, M>
where
    M: SerializeMap,
{
    fn copy<E: de::Error>(&mut self, id: &str, value: &Value) -> Result<(), E> {
        if self.skip.contains(id) {
            self.stats.replaced += 1;
            return Ok(());
        }
        self.out
            .serialize_entry(id, value)
            .map_err(|e| E::custom(format!("failed to copy entry '{id}': {e}")))?;
        self.stats.carried += 1;
        Ok(())
    }
}

impl<'de, 'a, M> DeserializeSeed<'de> for CopyEntries<'a, M>
where
    M: SerializeMap,
{
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de, 'a, M> Visitor<'de> for CopyEntries<'a, M>
where
    M: SerializeMap,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object keyed by item_id or an array of articles")
    }

    fn visit_map<A: MapAccess<'de>>(mut self, mut access: A) -> Result<(), A::Error> {
        while let Some(id) = access.next_key::<String>()? {
            let value: Value = access.next_value()?;
            self.copy(&id, &value)?;
        }
        Ok(())
    }

    fn visit_seq<A: SeqAccess<'de>>(mut self, mut access: A) -> Result<(), A::Error> {
        // Legacy files may repeat an id; the first copy is kept
        let mut seen = HashSet::new();
        while let Some(item) = access.next_element::<Value>()? {
            let id = legacy_id(&item)
                .ok_or_else(|| de::Error::custom("legacy array entry has no item_id"))?;
            if !seen.insert(id.clone()) {
                continue;
            }
            self.copy(&id, &item)?;
        }
        Ok(())
    }
}

/// Collects keys (or legacy `item_id`s) while skipping payloads
struct CollectIds;

impl<'de> DeserializeSeed<'de> for CollectIds {
    type Value = HashSet<String>;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for CollectIds {
    type Value = HashSet<String>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object keyed by item_id or an array of articles")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut ids = HashSet::new();
        while let Some(id) = access.next_key::<String>()? {
            access.next_value::<IgnoredAny>()?;
            ids.insert(id);
        }
        Ok(ids)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut ids = HashSet::new();
        while let Some(item) = access.next_element::<Value>()? {
            if let Some(id) = legacy_id(&item) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }
}
