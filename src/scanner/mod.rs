pub mod metadata;
pub mod registry;

use crate::schema::TrackSchema;
use crate::snapshot::record::TrackRecord;
use crate::snapshot::{CacheTable, Snapshot, SnapshotError, store};
use indicatif::{ProgressBar, ProgressStyle};
use metadata::{ExtractError, TagExtractor};
use registry::IdRegistry;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use walkdir::WalkDir;

/// Default staleness threshold: five days, in minutes.
pub const DEFAULT_STALENESS_MINS: u64 = 5 * 24 * 60;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Library directory not found: {0}")]
    LibraryNotFound(String),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Could not start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// How a scan treats the previous snapshot.
#[derive(Debug, Clone, Copy)]
pub enum ScanMode<'a> {
    /// Extract every file; no cache is consulted.
    Full,
    /// Reuse records from the latest snapshot in `report_dir` for files not
    /// modified within the last `staleness_mins` minutes.
    Cached {
        report_dir: &'a Path,
        staleness_mins: u64,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub entries: u64,
    pub extracted: u64,
    pub reused: u64,
    pub refreshed: u64,
    pub new_files: u64,
    pub unsupported: u64,
    pub errors: u64,
}

#[derive(Debug)]
pub struct ScanResult {
    pub snapshot: Snapshot,
    pub stats: ScanStats,
    pub missing: Vec<MissingField>,
    /// The snapshot the cache was seeded from (cached mode only), for diffing.
    pub previous: Option<Snapshot>,
    pub cache_source: Option<PathBuf>,
}

/// A null in one of the schema's required display fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingField {
    pub column: String,
    pub filename: String,
    pub label: String,
}

enum EntryOutcome {
    /// Not in the cache (or no cache): extracted.
    Fresh { record: TrackRecord, new: bool },
    /// In the cache but recently modified: extracted again.
    Refreshed(TrackRecord),
    /// In the cache and untouched: cached record reused as is.
    Reused(TrackRecord),
    Unsupported,
    Failed,
}

/// Builds a new snapshot of a library directory.
pub struct Scanner<'a, E: TagExtractor> {
    extractor: &'a E,
    schema: &'a TrackSchema,
    workers: usize,
}

impl<'a, E: TagExtractor> Scanner<'a, E> {
    pub fn new(extractor: &'a E, schema: &'a TrackSchema) -> Self {
        Self {
            extractor,
            schema,
            workers: 1,
        }
    }

    /// Upper bound on files processed concurrently.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Scan the top level of `library`.
    ///
    /// All workers are joined before the snapshot is assembled; on error no
    /// snapshot is returned at all. IDs are resolved through `registry`.
    pub fn scan(
        &self,
        library: &Path,
        mode: ScanMode<'_>,
        registry: &mut IdRegistry,
    ) -> Result<ScanResult, ScanError> {
        if !library.is_dir() {
            return Err(ScanError::LibraryNotFound(library.display().to_string()));
        }

        let (previous, staleness_mins) = match mode {
            ScanMode::Full => {
                log::info!("Full scan of {}: not using cache", library.display());
                (None, 0)
            }
            ScanMode::Cached {
                report_dir,
                staleness_mins,
            } => {
                let (path, snapshot) = store::load_latest(report_dir, self.schema)?;
                log::info!(
                    "Cached scan of {}: {} cached records from {}, staleness {} min",
                    library.display(),
                    snapshot.len(),
                    path.display(),
                    staleness_mins
                );
                (Some((path, snapshot)), staleness_mins)
            }
        };
        let cache = previous.as_ref().map(|(_, snapshot)| snapshot.cache());

        let entries = list_entries(library);
        let now = SystemTime::now();

        let pb = ProgressBar::new(entries.len() as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
            )
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message("Scanning...");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        // One output slot per entry; collect() joins every worker.
        let outcomes: Vec<EntryOutcome> = pool.install(|| {
            use rayon::prelude::*;
            entries
                .par_iter()
                .map(|path| {
                    let outcome = self.process(path, cache.as_ref(), staleness_mins, now);
                    pb.inc(1);
                    outcome
                })
                .collect()
        });
        drop(cache);

        let mut stats = ScanStats {
            entries: entries.len() as u64,
            ..Default::default()
        };
        let mut records = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                EntryOutcome::Fresh { record, new } => {
                    stats.extracted += 1;
                    if new {
                        stats.new_files += 1;
                    }
                    records.push(record);
                }
                EntryOutcome::Refreshed(record) => {
                    stats.extracted += 1;
                    stats.refreshed += 1;
                    records.push(record);
                }
                EntryOutcome::Reused(record) => {
                    stats.reused += 1;
                    records.push(record);
                }
                EntryOutcome::Unsupported => stats.unsupported += 1,
                EntryOutcome::Failed => stats.errors += 1,
            }
        }

        pb.finish_with_message(format!(
            "Done: {} extracted, {} reused, {} skipped, {} errors",
            stats.extracted, stats.reused, stats.unsupported, stats.errors
        ));

        assign_ids(&mut records, registry);
        let snapshot = Snapshot::new(records)?;
        log::info!(
            "Extracted {} songs successfully from {}",
            snapshot.len(),
            library.display()
        );

        let missing = check_completeness(&snapshot, self.schema);

        let (cache_source, previous) = match previous {
            Some((path, snapshot)) => (Some(path), Some(snapshot)),
            None => (None, None),
        };

        Ok(ScanResult {
            snapshot,
            stats,
            missing,
            previous,
            cache_source,
        })
    }

    fn process(
        &self,
        path: &Path,
        cache: Option<&CacheTable<'_>>,
        staleness_mins: u64,
        now: SystemTime,
    ) -> EntryOutcome {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        let Some(cache) = cache else {
            return self.extract(path, |record| EntryOutcome::Fresh { record, new: false });
        };

        let Some(cached) = cache.get(&filename) else {
            let outcome = self.extract(path, |record| EntryOutcome::Fresh { record, new: true });
            if matches!(outcome, EntryOutcome::Fresh { .. }) {
                log::info!("Not in cache: possible new song found: {filename}");
            }
            return outcome;
        };

        // an embedded tag still wins; otherwise the track keeps its cached identity
        let refreshed = |mut record: TrackRecord| {
            if record.id.is_none() {
                record.id = cached.id;
            }
            EntryOutcome::Refreshed(record)
        };

        match minutes_since_modified(path, now) {
            Ok(elapsed) if !needs_refresh(elapsed, staleness_mins) => {
                EntryOutcome::Reused(cached.clone())
            }
            Ok(elapsed) => {
                log::debug!("{filename} modified {elapsed} min ago, re-extracting");
                self.extract(path, refreshed)
            }
            Err(e) => {
                log::debug!("No mtime for {}: {e}; re-extracting", path.display());
                self.extract(path, refreshed)
            }
        }
    }

    fn extract(&self, path: &Path, wrap: impl FnOnce(TrackRecord) -> EntryOutcome) -> EntryOutcome {
        match self.extractor.extract(path) {
            Ok(record) => wrap(record),
            Err(ExtractError::UnsupportedFormat(_)) => {
                log::warn!(
                    "Invalid file format (not one of {:?}) detected in {}",
                    crate::SUPPORTED_EXTENSIONS,
                    path.display()
                );
                EntryOutcome::Unsupported
            }
            Err(e) => {
                log::warn!("Error scanning {}: {}", path.display(), e);
                EntryOutcome::Failed
            }
        }
    }
}

/// Regular files directly inside `library`, sorted by name.
fn list_entries(library: &Path) -> Vec<PathBuf> {
    WalkDir::new(library)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("Cannot read entry in {}: {}", library.display(), err);
                None
            }
        })
        .filter(|entry| {
            let is_file = entry.file_type().is_file();
            if !is_file {
                log::debug!("Skipping non-file {}", entry.path().display());
            }
            is_file
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Whether a cached file modified `elapsed_mins` ago must be extracted again.
/// Anything touched more recently than the threshold is suspect.
pub fn needs_refresh(elapsed_mins: i64, staleness_mins: u64) -> bool {
    elapsed_mins < i64::try_from(staleness_mins).unwrap_or(i64::MAX)
}

/// Whole minutes since `path` was last modified, from OS metadata only.
/// A modification time in the future gives a negative count.
pub fn minutes_since_modified(path: &Path, now: SystemTime) -> std::io::Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(elapsed_minutes(modified, now))
}

fn elapsed_minutes(then: SystemTime, now: SystemTime) -> i64 {
    match now.duration_since(then) {
        Ok(d) => (d.as_secs() / 60) as i64,
        Err(e) => -((e.duration().as_secs() / 60) as i64),
    }
}

/// Resolve identities in filename order: records that already know their ID
/// first, so fresh allocations never collide with them.
fn assign_ids(records: &mut [TrackRecord], registry: &mut IdRegistry) {
    records.sort_by(|a, b| a.filename.cmp(&b.filename));
    for r in records.iter_mut().filter(|r| r.id.is_some()) {
        r.id = Some(registry.resolve(&r.filename, r.id));
    }
    for r in records.iter_mut().filter(|r| r.id.is_none()) {
        r.id = Some(registry.resolve(&r.filename, None));
    }
}

/// Report nulls in the schema's required columns. Nothing is rejected.
pub fn check_completeness(snapshot: &Snapshot, schema: &TrackSchema) -> Vec<MissingField> {
    let mut missing = Vec::new();
    for column in &schema.required {
        for record in snapshot.iter() {
            let is_null = record.value(column).is_none_or(|v| v.is_null());
            if is_null {
                let label = record.label();
                log::warn!("Column `{column}` contains null value: {label}");
                missing.push(MissingField {
                    column: column.clone(),
                    filename: record.filename.clone(),
                    label,
                });
            }
        }
    }
    missing
}
