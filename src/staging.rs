// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! File staging for bulk loads.
//!
//! Records are written as JSON arrays, `size` records per file, under one
//! subdirectory per record kind. A replay job reads a file, applies it, then
//! appends a `DONE` trailer so a restarted job can skip it.
//!
//! ```text
//! <root>/owners/owners_0_<nanos>.json
//! <root>/lists/lists_0_<nanos>.json
//! <root>/members/members_0_<nanos>.json
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::batch::Mutation;

const DONE_MARKER: &str = "DONE";

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("staging I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid staged JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("batch size must be at least 1")]
    InvalidBatchSize,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StagingError + '_ {
    move |source| StagingError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRecord {
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecord {
    pub owner_id: String,
    pub list_id: String,
}

/// One member touch, `updated_at` in epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub owner_id: String,
    pub list_id: String,
    pub member_id: String,
    pub updated_at: i64,
}

impl MemberRecord {
    pub fn into_mutation(self) -> Mutation {
        let offset = Duration::from_secs(self.updated_at.unsigned_abs());
        let updated_at = if self.updated_at >= 0 {
            UNIX_EPOCH + offset
        } else {
            UNIX_EPOCH - offset
        };
        Mutation::update(self.owner_id, self.list_id, self.member_id, updated_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Owners,
    Lists,
    Members,
}

impl RecordKind {
    pub fn dir(&self) -> &'static str {
        match self {
            RecordKind::Owners => "owners",
            RecordKind::Lists => "lists",
            RecordKind::Members => "members",
        }
    }

    pub fn prefix(&self) -> &'static str {
        self.dir()
    }
}

/// A homogeneous set of records to stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedRecords {
    Owners(Vec<OwnerRecord>),
    Lists(Vec<ListRecord>),
    Members(Vec<MemberRecord>),
}

impl StagedRecords {
    pub fn kind(&self) -> RecordKind {
        match self {
            StagedRecords::Owners(_) => RecordKind::Owners,
            StagedRecords::Lists(_) => RecordKind::Lists,
            StagedRecords::Members(_) => RecordKind::Members,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StagedRecords::Owners(r) => r.len(),
            StagedRecords::Lists(r) => r.len(),
            StagedRecords::Members(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct StagingDir {
    root: PathBuf,
}

impl StagingDir {
    /// Open (creating if needed) a staging root and its kind directories.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let root = root.into();
        for kind in [RecordKind::Owners, RecordKind::Lists, RecordKind::Members] {
            let dir = root.join(kind.dir());
            fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `records` as JSON files of at most `size` records each.
    pub fn write_batches(&self, size: usize, records: &StagedRecords) -> Result<Vec<PathBuf>, StagingError> {
        if size == 0 {
            return Err(StagingError::InvalidBatchSize);
        }
        match records {
            StagedRecords::Owners(r) => self.write_chunks(RecordKind::Owners, size, r),
            StagedRecords::Lists(r) => self.write_chunks(RecordKind::Lists, size, r),
            StagedRecords::Members(r) => self.write_chunks(RecordKind::Members, size, r),
        }
    }

    fn write_chunks<T: Serialize>(&self, kind: RecordKind, size: usize, records: &[T]) -> Result<Vec<PathBuf>, StagingError> {
        let dir = self.root.join(kind.dir());
        let mut written = Vec::with_capacity(records.len().div_ceil(size));
        for (index, chunk) in records.chunks(size).enumerate() {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let path = dir.join(format!("{}_{}_{}.json", kind.prefix(), index, nanos));
            let body = serde_json::to_vec(chunk).map_err(|source| StagingError::Json {
                path: path.clone(),
                source,
            })?;
            fs::write(&path, body).map_err(io_err(&path))?;
            written.push(path);
        }
        debug!(kind = kind.dir(), files = written.len(), records = records.len(), "Staged records");
        Ok(written)
    }

    /// Read one staged file, ignoring a `DONE` trailer.
    pub fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>, StagingError> {
        let text = fs::read_to_string(path).map_err(io_err(path))?;
        let body = text.trim_end();
        let body = body.strip_suffix(DONE_MARKER).unwrap_or(body);
        serde_json::from_str(body).map_err(|source| StagingError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn mark_done(&self, path: &Path) -> Result<(), StagingError> {
        let mut file = OpenOptions::new().append(true).open(path).map_err(io_err(path))?;
        file.write_all(format!("\n{}\n", DONE_MARKER).as_bytes())
            .map_err(io_err(path))
    }

    /// Whether `path` carries a `DONE` trailer. Unreadable files are not done.
    pub fn is_done(&self, path: &Path) -> bool {
        fs::read_to_string(path)
            .map(|text| text.trim_end().ends_with(DONE_MARKER))
            .unwrap_or(false)
    }

    /// Staged `.json` files of one kind, sorted by path.
    pub fn list(&self, kind: RecordKind) -> Result<Vec<PathBuf>, StagingError> {
        let dir = self.root.join(kind.dir());
        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
            let path = entry.map_err(io_err(&dir))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Staged files of one kind without a `DONE` trailer.
    pub fn pending(&self, kind: RecordKind) -> Result<Vec<PathBuf>, StagingError> {
        Ok(self.list(kind)?.into_iter().filter(|p| !self.is_done(p)).collect())
    }
}
