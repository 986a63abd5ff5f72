//! Per-run ingestion manifest.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::record::ContentKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusCounts {
    pub files_discovered: usize,
    pub files_skipped: usize,
    pub files_chunked: usize,
    pub chunks: usize,
    pub points_upserted: usize,
    pub stale_pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusReport {
    pub name: String,
    pub corpus: ContentKind,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Commit the chunks were recorded against.
    pub commit: String,
    pub counts: CorpusCounts,
}

/// Immutable record of one ingestion run, written once as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub collection: String,
    /// Effective configuration with secrets redacted.
    pub config: serde_json::Value,
    pub corpora: Vec<CorpusReport>,
    pub total_chunks: usize,
    /// blake3 over the sorted chunk-id set; equal across idempotent runs.
    pub chunk_id_digest: String,
    pub warnings: Vec<String>,
}

impl RunManifest {
    /// Write the manifest as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), run_id = %self.run_id, "manifest written");
        Ok(())
    }

    /// Read a manifest back for verification.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or not a manifest.
    pub fn read_json(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Single-owner run state. Stages report into it; `finalize` consumes it.
#[derive(Debug)]
pub struct ManifestBuilder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    collection: String,
    config: serde_json::Value,
    corpora: Vec<CorpusReport>,
    chunk_ids: Vec<String>,
    warnings: Vec<String>,
}

impl ManifestBuilder {
    #[must_use]
    pub fn new(collection: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            collection: collection.into(),
            config,
            corpora: Vec::new(),
            chunk_ids: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn add_corpus(&mut self, report: CorpusReport) {
        self.corpora.push(report);
    }

    pub fn record_chunk_ids<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.chunk_ids.extend(ids);
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!(run_id = %self.run_id, "{warning}");
        self.warnings.push(warning);
    }

    #[must_use]
    pub fn finalize(mut self) -> RunManifest {
        self.chunk_ids.sort_unstable();
        self.chunk_ids.dedup();
        RunManifest {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            collection: self.collection,
            config: self.config,
            corpora: self.corpora,
            total_chunks: self.chunk_ids.len(),
            chunk_id_digest: chunk_id_digest(&self.chunk_ids),
            warnings: self.warnings,
        }
    }
}

/// Digest over an already sorted id list.
fn chunk_id_digest(sorted_ids: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    for id in sorted_ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}
