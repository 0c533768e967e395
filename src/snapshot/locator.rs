use chrono::NaiveDateTime;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::SnapshotError;

/// Timestamp embedded in snapshot file names (and in change records).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H-%M-%S";

// e.g. "report 2024-03-09 21-04-55.jsonl"
static REPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<ts>\d{4}-\d{2}-\d{2} \d{2}-\d{2}-\d{2})\.jsonl$").unwrap()
});

/// File name for a snapshot created at `ts`.
pub fn report_file_name(ts: NaiveDateTime) -> String {
    format!("report {}.jsonl", ts.format(TIMESTAMP_FORMAT))
}

/// Extract the creation timestamp from a snapshot file name.
pub fn parse_report_timestamp(file_name: &str) -> Option<NaiveDateTime> {
    let caps = REPORT_RE.captures(file_name)?;
    NaiveDateTime::parse_from_str(&caps["ts"], TIMESTAMP_FORMAT).ok()
}

/// Find the snapshot in `dir` with the latest embedded timestamp.
///
/// Files with identical timestamps are ordered by path, so the lexically
/// greatest one wins.
pub fn find_latest(dir: &Path) -> Result<PathBuf, SnapshotError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SnapshotError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut latest: Option<(NaiveDateTime, PathBuf)> = None;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(ts) = parse_report_timestamp(name) else {
            log::trace!("Ignoring {} (no snapshot timestamp)", path.display());
            continue;
        };
        let candidate = (ts, path);
        if latest.as_ref().is_none_or(|best| candidate > *best) {
            latest = Some(candidate);
        }
    }

    match latest {
        Some((_, path)) => {
            log::debug!("Latest snapshot: {}", path.display());
            Ok(path)
        }
        None => Err(SnapshotError::NotFound(dir.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn test_report_file_name() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(21, 4, 55)
            .unwrap();
        assert_eq!(report_file_name(ts), "report 2024-03-09 21-04-55.jsonl");
        assert_eq!(parse_report_timestamp(&report_file_name(ts)), Some(ts));
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert_eq!(parse_report_timestamp("report.jsonl"), None);
        assert_eq!(parse_report_timestamp("report 2024-03-09 21-04-55.json"), None);
        assert_eq!(parse_report_timestamp("report 2024-03-09 21-04-55.jsonl.tmp"), None);
        // well-formed digits but not a real date
        assert_eq!(parse_report_timestamp("report 2024-13-40 21-04-55.jsonl"), None);
    }

    #[test]
    fn test_find_latest_picks_newest_timestamp() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "report 2023-12-31 23-59-59.jsonl");
        touch(tmp.path(), "report 2024-01-02 08-00-00.jsonl");
        touch(tmp.path(), "report 2024-01-01 09-30-00.jsonl");
        touch(tmp.path(), "notes.txt");

        let latest = find_latest(tmp.path()).unwrap();
        assert_eq!(
            latest.file_name().unwrap().to_str().unwrap(),
            "report 2024-01-02 08-00-00.jsonl"
        );
    }

    #[test]
    fn test_find_latest_compares_time_not_name() {
        let tmp = TempDir::new().unwrap();
        // lexically "z..." sorts last but is older
        touch(tmp.path(), "z 2020-01-01 00-00-00.jsonl");
        touch(tmp.path(), "a 2021-01-01 00-00-00.jsonl");
        let latest = find_latest(tmp.path()).unwrap();
        assert!(latest.ends_with("a 2021-01-01 00-00-00.jsonl"));
    }

    #[test]
    fn test_find_latest_tie_break_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a 2024-01-01 00-00-00.jsonl");
        touch(tmp.path(), "b 2024-01-01 00-00-00.jsonl");
        for _ in 0..3 {
            let latest = find_latest(tmp.path()).unwrap();
            assert!(latest.ends_with("b 2024-01-01 00-00-00.jsonl"));
        }
    }

    #[test]
    fn test_find_latest_empty_dir_not_found() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "readme.md");
        assert!(matches!(
            find_latest(tmp.path()),
            Err(SnapshotError::NotFound(_))
        ));
    }

    #[test]
    fn test_find_latest_missing_dir_is_io_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            find_latest(&tmp.path().join("nope")),
            Err(SnapshotError::Io { .. })
        ));
    }
}
