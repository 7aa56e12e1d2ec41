//! # Pocket Exporter Library
//!
//! A resumable, rate-aware exporter for a Pocket saved-article archive. Built
//! for multi-hour extractions that must survive interruption, throttling and
//! partial failure without losing or re-fetching already persisted articles.
//!
//! ## Features
//!
//! - **Incremental Export**: one page at a time, persisted before the cursor moves
//! - **Resume Capability**: a durable checkpoint record is the single resume key
//! - **Adaptive Pacing**: progressive delay, periodic cooldown, rate-limit escalation
//! - **Bounded Retries**: exponential backoff with jitter for transient failures
//! - **Dual Storage**: raw provider payloads plus a line-oriented normalized store
//!
//! ## Quick Start
//!
//! ```no_run
//! use pocket_exporter::credential::{CredentialProvider, EnvCredentials};
//! use pocket_exporter::export::{ExportConfig, ExportDriver};
//! use pocket_exporter::fetcher::pocket_http::PocketHttpSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credential = EnvCredentials::new().get_credential()?;
//! let config = ExportConfig::new("./pocket_export");
//!
//! let mut driver = ExportDriver::new(PocketHttpSource::new(), credential, config);
//! let report = driver.run().await?;
//! println!("exported {} articles", report.state.total_fetched);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`credential`] - Credential value and provider capability
//! - [`normalize`] - Pure raw-to-canonical article normalization
//! - [`fetcher`] - Paginated article sources and error classification
//! - [`export`] - Rate controller, retry policy and the export driver
//! - [`checkpoint`] - Durable export state, run lock and the checkpoint store
//! - [`storage`] - Raw JSON and normalized JSONL stores

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Durable export state, run lock and the checkpoint store
pub mod checkpoint;

/// CLI command implementations
pub mod cli;

/// Credential value and provider capability
pub mod credential;

/// Export orchestration: pacing, retries and the driver loop
pub mod export;

/// Paginated article sources
pub mod fetcher;

/// Metrics collection and Prometheus export
pub mod metrics;

/// Raw article normalization
pub mod normalize;

/// Graceful shutdown coordination
pub mod shutdown;

/// On-disk article stores
pub mod storage;

/// Raw provider payload for one article.
///
/// The provider sends a dynamic mapping of fields. Only `item_id` is required
/// and it is lifted out at the format-check boundary; everything else is kept
/// verbatim so the raw store holds exactly what the provider returned.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArticle {
    item_id: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl RawArticle {
    /// Create a raw article from its id and the provider field mapping.
    pub fn new(item_id: impl Into<String>, fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            item_id: item_id.into(),
            fields,
        }
    }

    /// Stable unique identifier of the article
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Provider fields, unmodified
    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.fields
    }

    /// Look up one provider field
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Consume into the raw field mapping
    pub fn into_fields(self) -> serde_json::Map<String, serde_json::Value> {
        self.fields
    }
}

/// Canonical per-article record written to the normalized store.
///
/// One line of `articles.jsonl` is one serialized `ArticleRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Unique article identifier
    pub item_id: String,
    /// Resolved (canonical) URL
    pub resolved_url: Option<String>,
    /// Resolved title
    pub resolved_title: Option<String>,
    /// Short excerpt
    pub excerpt: Option<String>,
    /// Tag names; empty when the article has none
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Provider status code ("0" unread, "1" archived, "2" deleted)
    pub status: Option<String>,
    /// Time added as `YYYY-MM-DDTHH:MM:SSZ`
    pub time_added: Option<String>,
    /// Word count
    pub word_count: Option<u64>,
    /// Raw provider fields preserved for audit
    #[serde(default)]
    pub original: serde_json::Map<String, serde_json::Value>,
}

impl ArticleRecord {
    /// Interpret the provider status code
    pub fn status_kind(&self) -> Option<ArticleStatus> {
        self.status.as_deref().map(ArticleStatus::from_code)
    }
}

/// Article status as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleStatus {
    /// Code "0"
    Unread,
    /// Code "1"
    Archived,
    /// Code "2"
    Deleted,
    /// Any other code, kept verbatim
    Other(String),
}

impl ArticleStatus {
    /// Map a provider status code
    pub fn from_code(code: &str) -> Self {
        match code {
            "0" => Self::Unread,
            "1" => Self::Archived,
            "2" => Self::Deleted,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Which articles the provider should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    /// Unread and archived
    #[default]
    All,
    /// Unread only
    Unread,
    /// Archived only
    Archive,
}

impl StateFilter {
    /// Wire value sent to the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Unread => "unread",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for StateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "unread" => Ok(Self::Unread),
            "archive" => Ok(Self::Archive),
            _ => Err(format!(
                "Invalid state filter: {s}. Valid options: all, unread, archive"
            )),
        }
    }
}

/// How much of each article the provider should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Basic fields only
    Simple,
    /// Full payload including tags, authors and images
    #[default]
    Complete,
}

impl DetailLevel {
    /// Wire value sent to the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetailLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "complete" => Ok(Self::Complete),
            _ => Err(format!(
                "Invalid detail level: {s}. Valid options: simple, complete"
            )),
        }
    }
}
