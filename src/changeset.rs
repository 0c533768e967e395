//! Field-level differences between two snapshots.

use std::collections::HashMap;
use std::io::Write;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{ColumnType, TrackSchema};
use crate::snapshot::Snapshot;
use crate::snapshot::record::{TrackRecord, column_kind};

/// Format of the `datetime` column of a change record.
pub use crate::snapshot::locator::TIMESTAMP_FORMAT as DATETIME_FORMAT;

#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Tracked field `{0}` is not a track column")]
    UnknownField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    #[serde(rename = "ins")]
    Insert,
    #[serde(rename = "del")]
    Delete,
    #[serde(rename = "upd")]
    Update,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "ins",
            ChangeOp::Delete => "del",
            ChangeOp::Update => "upd",
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the diff table. Inserts and deletes leave the field columns
/// null; `remarks` carries the filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub op: ChangeOp,
    pub id: i64,
    pub field_name: Option<String>,
    pub field_type: Option<ColumnType>,
    pub old_val: Option<String>,
    pub new_val: Option<String>,
    pub datetime: String,
    pub remarks: String,
}

/// Ordered change records: deletions, then insertions, then updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Changeset {
    pub computed_at: NaiveDateTime,
    records: Vec<ChangeRecord>,
}

impl Changeset {
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChangeRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, op: ChangeOp) -> usize {
        self.records.iter().filter(|r| r.op == op).count()
    }

    /// One JSON object per line.
    pub fn write_jsonl<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        for record in &self.records {
            serde_json::to_writer(&mut out, record)?;
            out.write_all(b"\n")?;
        }
        out.flush()
    }
}

struct Tracked {
    name: String,
    kind: ColumnType,
}

/// Diffs snapshots over the schema's tracked fields.
pub struct ChangesetBuilder {
    tracked: Vec<Tracked>,
}

impl ChangesetBuilder {
    pub fn new(schema: &TrackSchema) -> Result<Self, DiffError> {
        let tracked = schema
            .tracked
            .iter()
            .map(|f| match column_kind(&f.name) {
                Some(_) => Ok(Tracked {
                    name: f.name.clone(),
                    kind: f.kind,
                }),
                None => Err(DiffError::UnknownField(f.name.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tracked })
    }

    /// Diff `old` against `new`, stamped with the current local time.
    pub fn build(&self, old: &Snapshot, new: &Snapshot) -> Changeset {
        self.build_at(old, new, chrono::Local::now().naive_local())
    }

    pub fn build_at(&self, old: &Snapshot, new: &Snapshot, at: NaiveDateTime) -> Changeset {
        let datetime = at.format(DATETIME_FORMAT).to_string();
        let old_index = index_by_id(old);
        let new_index = index_by_id(new);
        let mut records = Vec::new();

        for (id, r) in with_ids(old) {
            if !new_index.contains_key(&id) {
                records.push(structural(ChangeOp::Delete, id, r, &datetime));
            }
        }

        for (id, r) in with_ids(new) {
            if !old_index.contains_key(&id) {
                records.push(structural(ChangeOp::Insert, id, r, &datetime));
            }
        }

        for (id, new_rec) in with_ids(new) {
            let Some(old_rec) = old_index.get(&id) else {
                continue;
            };
            for field in &self.tracked {
                let (Some(before), Some(after)) =
                    (old_rec.value(&field.name), new_rec.value(&field.name))
                else {
                    continue;
                };
                if before.same_as(&after) {
                    continue;
                }
                records.push(ChangeRecord {
                    op: ChangeOp::Update,
                    id,
                    field_name: Some(field.name.clone()),
                    field_type: Some(field.kind),
                    old_val: before.to_text(),
                    new_val: after.to_text(),
                    datetime: datetime.clone(),
                    remarks: new_rec.filename.clone(),
                });
            }
        }

        for r in &records {
            log::debug!(
                "{} {} {} {:?} -> {:?} ({})",
                r.op,
                r.id,
                r.field_name.as_deref().unwrap_or("-"),
                r.old_val,
                r.new_val,
                r.remarks
            );
        }
        if records.is_empty() {
            log::info!("No diff created");
        } else {
            log::info!("{} changes found", records.len());
        }

        Changeset {
            computed_at: at,
            records,
        }
    }
}

fn with_ids(snapshot: &Snapshot) -> impl Iterator<Item = (i64, &TrackRecord)> {
    snapshot.iter().filter_map(|r| r.id.map(|id| (id, r)))
}

fn index_by_id(snapshot: &Snapshot) -> HashMap<i64, &TrackRecord> {
    with_ids(snapshot).collect()
}

fn structural(op: ChangeOp, id: i64, record: &TrackRecord, datetime: &str) -> ChangeRecord {
    ChangeRecord {
        op,
        id,
        field_name: None,
        field_type: None,
        old_val: None,
        new_val: None,
        datetime: datetime.to_string(),
        remarks: record.filename.clone(),
    }
}
