use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use super::locator;
use super::record::TrackRecord;
use super::{Snapshot, SnapshotError};
use crate::schema::TrackSchema;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Load a JSON-lines snapshot.
///
/// Every line must carry the identity, the filename and each tracked field of
/// `schema` (null is allowed where the field is nullable). A line missing one
/// of them is a schema mismatch and fails the whole load.
pub fn load(path: &Path, schema: &TrackSchema) -> Result<Snapshot, SnapshotError> {
    let file = File::open(path).map_err(io_err(path))?;
    let keys = schema.snapshot_keys();
    let mut records = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let json_err = |source| SnapshotError::Json {
            path: path.display().to_string(),
            line: line_no,
            source,
        };
        let map: Map<String, Value> = serde_json::from_str(&line).map_err(json_err)?;

        for key in &keys {
            let present = match map.get(*key) {
                None => false,
                // identity and cache key may never be null
                Some(Value::Null) => *key != super::record::ID && *key != super::record::FILENAME,
                Some(_) => true,
            };
            if !present {
                return Err(SnapshotError::SchemaMismatch {
                    path: path.display().to_string(),
                    line: line_no,
                    field: key.to_string(),
                });
            }
        }

        let record: TrackRecord = serde_json::from_value(Value::Object(map)).map_err(json_err)?;
        records.push(record);
    }

    log::debug!("Loaded {} records from {}", records.len(), path.display());
    Snapshot::new(records)
}

/// Load the most recent snapshot in `report_dir`.
pub fn load_latest(
    report_dir: &Path,
    schema: &TrackSchema,
) -> Result<(PathBuf, Snapshot), SnapshotError> {
    let path = locator::find_latest(report_dir)?;
    log::debug!("Latest snapshot is {}", path.display());
    let snapshot = load(&path, schema)?;
    Ok((path, snapshot))
}

/// Write `snapshot` to `report_dir` as `report <created>.jsonl`.
///
/// The file is written under a temporary name and renamed into place, so a
/// reader never sees a partial snapshot.
pub fn save(
    snapshot: &Snapshot,
    report_dir: &Path,
    created: NaiveDateTime,
) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(report_dir).map_err(io_err(report_dir))?;
    let path = report_dir.join(locator::report_file_name(created));
    let tmp = path.with_extension("jsonl.tmp");

    {
        let file = File::create(&tmp).map_err(io_err(&tmp))?;
        let mut out = BufWriter::new(file);
        for record in snapshot.iter() {
            serde_json::to_writer(&mut out, record).map_err(|source| SnapshotError::Json {
                path: tmp.display().to_string(),
                line: 0,
                source,
            })?;
            out.write_all(b"\n").map_err(io_err(&tmp))?;
        }
        out.flush().map_err(io_err(&tmp))?;
    }

    std::fs::rename(&tmp, &path).map_err(io_err(&path))?;
    log::info!("Saved snapshot to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, body).unwrap();
        p
    }

    const LINE_A: &str = r#"{"ID": 1, "Title": "Alpha", "Major_Genre": "Pop", "Minor_Genre": null, "Rating": 3.0, "KPlay": null, "Filename": "a.mp3"}"#;
    const LINE_B: &str = r#"{"ID": 2, "Title": "Beta", "Major_Genre": "Rock", "Minor_Genre": "Indie", "Rating": "4.5", "KPlay": "7", "Filename": "b.flac"}"#;

    #[test]
    fn test_load_snapshot() {
        let tmp = TempDir::new().unwrap();
        let p = write(tmp.path(), "s.jsonl", &format!("{LINE_A}\n\n{LINE_B}\n"));
        let snap = load(&p, &TrackSchema::default()).unwrap();
        assert_eq!(snap.len(), 2);
        let b = &snap.records()[1];
        assert_eq!(b.rating, Some(4.5));
        assert_eq!(b.kplay, Some(7));
    }

    #[test]
    fn test_missing_tracked_field_is_schema_mismatch() {
        let tmp = TempDir::new().unwrap();
        let line = r#"{"ID": 1, "Major_Genre": "Pop", "Minor_Genre": null, "KPlay": null, "Filename": "a.mp3"}"#;
        let p = write(tmp.path(), "s.jsonl", line);
        let err = load(&p, &TrackSchema::default()).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::SchemaMismatch { line: 1, ref field, .. } if field == "Rating"
        ));
    }

    #[test]
    fn test_null_id_is_schema_mismatch() {
        let tmp = TempDir::new().unwrap();
        let line = LINE_A.replace(r#""ID": 1"#, r#""ID": null"#);
        let p = write(tmp.path(), "s.jsonl", &format!("{LINE_B}\n{line}\n"));
        let err = load(&p, &TrackSchema::default()).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::SchemaMismatch { line: 2, ref field, .. } if field == "ID"
        ));
    }

    #[test]
    fn test_bad_json_reports_line() {
        let tmp = TempDir::new().unwrap();
        let p = write(tmp.path(), "s.jsonl", &format!("{LINE_A}\n{{not json\n"));
        assert!(matches!(
            load(&p, &TrackSchema::default()),
            Err(SnapshotError::Json { line: 2, .. })
        ));
    }

    #[test]
    fn test_save_then_load_latest() {
        let tmp = TempDir::new().unwrap();
        let src = write(tmp.path(), "src.jsonl", &format!("{LINE_A}\n{LINE_B}\n"));
        let schema = TrackSchema::default();
        let snap = load(&src, &schema).unwrap();

        let reports = tmp.path().join("reports");
        let created = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let saved = save(&snap, &reports, created).unwrap();
        assert!(saved.ends_with("report 2024-05-01 12-00-00.jsonl"));
        // no temp file left behind
        assert_eq!(std::fs::read_dir(&reports).unwrap().count(), 1);

        let (path, latest) = load_latest(&reports, &schema).unwrap();
        assert_eq!(path, saved);
        let cache = latest.cache();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a.mp3").and_then(|r| r.title.as_deref()), Some("Alpha"));
    }

    #[test]
    fn test_load_latest_without_snapshots() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            load_latest(tmp.path(), &TrackSchema::default()),
            Err(SnapshotError::NotFound(_))
        ));
    }
}
