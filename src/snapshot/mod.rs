pub mod locator;
pub mod record;
pub mod store;

use std::collections::HashMap;

use thiserror::Error;

use record::TrackRecord;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("No snapshot found in {0}")]
    NotFound(String),
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid JSON in {path} line {line}: {source}")]
    Json {
        path: String,
        line: usize,
        source: serde_json::Error,
    },
    #[error("{path} line {line} is missing required field `{field}`")]
    SchemaMismatch {
        path: String,
        line: usize,
        field: String,
    },
    #[error("Track {filename} has no ID")]
    MissingId { filename: String },
    #[error("Filename {0} appears more than once")]
    DuplicateFilename(String),
    #[error("ID {id} is shared by {first} and {second}")]
    DuplicateId {
        id: i64,
        first: String,
        second: String,
    },
}

/// Track records produced by one scan.
///
/// Construction checks that every record has an ID, and that IDs and
/// filenames are unique. Row order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    records: Vec<TrackRecord>,
}

impl Snapshot {
    pub fn new(records: Vec<TrackRecord>) -> Result<Self, SnapshotError> {
        let mut filenames = std::collections::HashSet::with_capacity(records.len());
        let mut ids: HashMap<i64, &str> = HashMap::with_capacity(records.len());
        for r in &records {
            if !filenames.insert(r.filename.as_str()) {
                return Err(SnapshotError::DuplicateFilename(r.filename.clone()));
            }
            let id = r.id.ok_or_else(|| SnapshotError::MissingId {
                filename: r.filename.clone(),
            })?;
            if let Some(first) = ids.insert(id, r.filename.as_str()) {
                return Err(SnapshotError::DuplicateId {
                    id,
                    first: first.to_string(),
                    second: r.filename.clone(),
                });
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[TrackRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrackRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Index the snapshot by filename for scan-time lookups.
    pub fn cache(&self) -> CacheTable<'_> {
        CacheTable {
            by_filename: self
                .records
                .iter()
                .map(|r| (r.filename.as_str(), r))
                .collect(),
        }
    }

    /// Records sorted by ID, for order-independent comparison.
    pub fn sorted(&self) -> Vec<&TrackRecord> {
        let mut v: Vec<&TrackRecord> = self.records.iter().collect();
        v.sort_by_key(|r| r.id);
        v
    }
}

/// Read-only table of the previous snapshot keyed by filename.
///
/// Built once before a cached scan and shared by all workers.
#[derive(Debug, Default)]
pub struct CacheTable<'a> {
    by_filename: HashMap<&'a str, &'a TrackRecord>,
}

impl<'a> CacheTable<'a> {
    pub fn get(&self, filename: &str) -> Option<&'a TrackRecord> {
        self.by_filename.get(filename).copied()
    }

    pub fn len(&self) -> usize {
        self.by_filename.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_filename.is_empty()
    }
}
