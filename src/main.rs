use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tabulate::changeset::{ChangeOp, Changeset, ChangesetBuilder};
use tabulate::config::AppConfig;
use tabulate::scanner::metadata::LoftyExtractor;
use tabulate::scanner::registry::IdRegistry;
use tabulate::scanner::{ScanMode, Scanner};
use tabulate::snapshot::{Snapshot, SnapshotError, locator, store};

#[derive(Parser)]
#[command(name = "tabulate", version, about = "Music library tag cataloguer")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Snapshot (report) directory
    #[arg(long, global = true, env = "REPORT_TARGET")]
    reports: Option<PathBuf>,

    /// Config file (defaults to ~/.config/tabulate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for music.log
    #[arg(long, global = true, env = "LOGS_TARGET")]
    log_dir: Option<PathBuf>,

    /// Log to the terminal only
    #[arg(long, global = true)]
    no_write_log: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the library, diff against the last snapshot and load the sinks
    Run {
        /// Library directory to scan
        #[arg(long, env = "LIBRARY_TARGET")]
        library: Option<PathBuf>,

        /// Re-read every file instead of reusing the last snapshot
        #[arg(long)]
        full_scan: bool,

        /// Don't write the new snapshot to the report directory
        #[arg(long)]
        no_local: bool,

        /// Don't replace the library table
        #[arg(long)]
        no_lib_sink: bool,

        /// Don't append the changeset to the diff table
        #[arg(long)]
        no_diff_sink: bool,

        /// Re-read cached files modified within this many minutes
        #[arg(long)]
        staleness_mins: Option<u64>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Print the changeset between two snapshot files as JSON lines
    Diff {
        old: PathBuf,
        new: PathBuf,
    },

    /// Report null required fields in a snapshot (latest by default)
    Check {
        snapshot: Option<PathBuf>,
    },

    /// Move a registered ID to a renamed file
    Rename {
        from: String,
        to: String,
    },

    /// Print the path of the latest snapshot
    Latest,

    /// Show recent diff rows and warehouse totals
    History {
        /// Number of rows
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

fn open_log_file(dir: &Path) -> std::io::Result<File> {
    std::fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("music.log"))
}

fn terminal_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// music.log keeps at least info, so STARTED/COMPLETED land in it even when
/// the terminal only shows warnings.
fn file_level(terminal: LevelFilter) -> LevelFilter {
    terminal.max(LevelFilter::Info)
}

fn init_logging(verbose: u8, log_dir: Option<&Path>) {
    // RUST_LOG, when set, decides for both outputs
    let terminal = if std::env::var_os("RUST_LOG").is_some() {
        LevelFilter::Trace
    } else {
        terminal_level(verbose)
    };

    let mut file_error = None;
    let file = match log_dir.map(|dir| (dir, open_log_file(dir))) {
        Some((_, Ok(file))) => Some(Mutex::new(LineWriter::new(file))),
        Some((dir, Err(e))) => {
            file_error = Some((dir.to_path_buf(), e));
            None
        }
        None => None,
    };
    let filter = if file.is_some() {
        file_level(terminal_level(verbose))
    } else {
        terminal_level(verbose)
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(filter.to_string().to_lowercase()),
    );
    builder.format(move |buf, record| {
        let line = format!(
            "[{}] {} {}; {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        );
        if let Some(file) = &file {
            if let Ok(mut file) = file.lock() {
                // a failing log file must not take the terminal output down with it
                let _ = file.write_all(line.as_bytes());
            }
        }
        if record.level() <= terminal {
            buf.write_all(line.as_bytes())?;
        }
        Ok(())
    });
    builder.init();

    if let Some((dir, e)) = file_error {
        log::warn!("Cannot write log to {}: {}", dir.display(), e);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load config file (optional, defaults if missing). A broken file is
    // reported once the logger is up.
    let (config, config_error) = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .map_or_else(|e| (AppConfig::default(), Some(e)), |config| (config, None));

    let log_dir = if cli.no_write_log {
        None
    } else {
        cli.log_dir.clone().or_else(|| config.log_dir.clone())
    };
    init_logging(cli.verbose, log_dir.as_deref());
    if let Some(e) = config_error {
        log::warn!("{e}; using defaults");
    }

    let flags: Vec<String> = std::env::args().skip(1).collect();
    log::info!("STARTED: flags={flags:?}");

    match run(cli, config) {
        Ok(()) => {
            log::info!("COMPLETED");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Uncaught error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: AppConfig) -> Result<()> {
    // Resolve paths: CLI/env > config > XDG default
    let report_dir = cli
        .reports
        .clone()
        .unwrap_or_else(|| config.resolve_report_dir());
    let db_path = cli.db_path.clone().unwrap_or_else(|| config.resolve_db_path());

    match cli.command {
        Commands::Run {
            library,
            full_scan,
            no_local,
            no_lib_sink,
            no_diff_sink,
            staleness_mins,
            jobs,
        } => {
            let library = library.or_else(|| config.library_dir.clone()).context(
                "No library directory. Pass --library, set LIBRARY_TARGET, or set library_dir in config.",
            )?;
            let schema = config.load_schema().context("Failed to load track schema")?;
            let registry_path = config.resolve_registry_path(&report_dir);
            let mut registry = IdRegistry::open(&registry_path)
                .context("Failed to open ID registry")?;

            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let mode = if full_scan {
                ScanMode::Full
            } else {
                ScanMode::Cached {
                    report_dir: &report_dir,
                    staleness_mins: staleness_mins.unwrap_or(config.staleness_mins),
                }
            };

            let scanner = Scanner::new(&LoftyExtractor, &schema).with_workers(workers);
            let result = scanner
                .scan(&library, mode, &mut registry)
                .context("Scan failed")?;
            registry.save().context("Failed to save ID registry")?;

            let s = &result.stats;
            println!(
                "Scan complete: {} tracks, {} extracted, {} reused, {} new, {} skipped, {} errors",
                result.snapshot.len(),
                s.extracted,
                s.reused,
                s.new_files,
                s.unsupported,
                s.errors
            );
            if !result.missing.is_empty() {
                println!("{} null required fields (see log)", result.missing.len());
            }

            let previous = match result.previous {
                Some(snapshot) => Some(snapshot),
                None => load_previous(&report_dir, &schema)?,
            };

            let changeset = match &previous {
                Some(old) => {
                    let builder =
                        ChangesetBuilder::new(&schema).context("Invalid tracked fields")?;
                    let changeset = builder.build(old, &result.snapshot);
                    print_changeset_summary(&changeset);
                    Some(changeset)
                }
                None => {
                    log::info!("No previous snapshot in {}; skipping diff", report_dir.display());
                    println!("First snapshot: no diff computed");
                    None
                }
            };

            let created = chrono::Local::now().naive_local();
            if no_local {
                log::info!("Not saving snapshot locally (--no-local)");
            } else {
                let path = store::save(&result.snapshot, &report_dir, created)
                    .context("Failed to save snapshot")?;
                println!("Snapshot saved to {}", path.display());
            }

            if !no_lib_sink || !no_diff_sink {
                let db = tabulate::db::Database::open(&db_path)
                    .context("Failed to open database")?;
                log::info!("Database: {}", db_path.display());
                if no_lib_sink {
                    log::info!("Not loading library table (--no-lib-sink)");
                } else {
                    db.replace_library(&result.snapshot, &schema, created)
                        .context("Failed to load library table")?;
                }
                match (&changeset, no_diff_sink) {
                    (_, true) => log::info!("Not appending diff (--no-diff-sink)"),
                    (Some(cs), false) => {
                        db.append_changeset(cs).context("Failed to append diff")?;
                    }
                    (None, false) => {}
                }
            }
        }

        Commands::Diff { old, new } => {
            let schema = config.load_schema().context("Failed to load track schema")?;
            let old = store::load(&old, &schema)
                .with_context(|| format!("Failed to load {}", old.display()))?;
            let new = store::load(&new, &schema)
                .with_context(|| format!("Failed to load {}", new.display()))?;
            let builder = ChangesetBuilder::new(&schema).context("Invalid tracked fields")?;
            let changeset = builder.build(&old, &new);
            changeset
                .write_jsonl(std::io::stdout().lock())
                .context("Failed to write changeset")?;
        }

        Commands::Check { snapshot } => {
            let schema = config.load_schema().context("Failed to load track schema")?;
            let path = match snapshot {
                Some(p) => p,
                None => locator::find_latest(&report_dir).context("No snapshot to check")?,
            };
            let snap = store::load(&path, &schema)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let missing = tabulate::scanner::check_completeness(&snap, &schema);

            println!("{}: {} tracks", path.display(), snap.len());
            if missing.is_empty() {
                println!("No null required fields.");
                return Ok(());
            }
            println!("{:<16} {:<40} {}", "Column", "Track", "File");
            println!("{}", "-".repeat(90));
            for m in &missing {
                println!("{:<16} {:<40} {}", m.column, truncate(&m.label, 40), m.filename);
            }
            println!();
            println!("{} null required fields", missing.len());
        }

        Commands::Rename { from, to } => {
            let registry_path = config.resolve_registry_path(&report_dir);
            let mut registry = IdRegistry::open(&registry_path)
                .context("Failed to open ID registry")?;
            let id = registry.rename(&from, &to).context("Rename failed")?;
            registry.save().context("Failed to save ID registry")?;
            println!("ID {id}: {from} -> {to}");
        }

        Commands::Latest => {
            let path = locator::find_latest(&report_dir).context("No snapshot found")?;
            println!("{}", path.display());
        }

        Commands::History { limit } => {
            let db = tabulate::db::Database::open(&db_path)
                .context("Failed to open database")?;
            let stats = db.stats().context("Query failed")?;

            println!("Warehouse");
            println!("=========");
            println!("Library rows:  {}", stats.library_rows);
            if let Some(load) = &stats.last_load {
                println!("Last load:     {} ({} rows)", load.report_time, load.row_count);
            }
            println!("Diff rows:     {}", stats.diff_rows);
            for (op, count) in &stats.ops {
                println!("  {:<4} {}", op, count);
            }
            println!();

            let rows = db.recent_changes(limit).context("Query failed")?;
            if rows.is_empty() {
                println!("No changes recorded.");
                return Ok(());
            }
            println!(
                "{:<4} {:>6} {:<12} {:<12} {:<12} {:<19} {}",
                "Op", "ID", "Field", "Old", "New", "When", "File"
            );
            println!("{}", "-".repeat(95));
            for r in &rows {
                println!(
                    "{:<4} {:>6} {:<12} {:<12} {:<12} {:<19} {}",
                    r.op,
                    r.id,
                    r.field_name.as_deref().unwrap_or(""),
                    truncate(r.old_val.as_deref().unwrap_or(""), 12),
                    truncate(r.new_val.as_deref().unwrap_or(""), 12),
                    r.datetime,
                    r.remarks.as_deref().unwrap_or(""),
                );
            }
        }
    }

    Ok(())
}

/// Latest snapshot in `report_dir`, or `None` if there is none yet.
fn load_previous(
    report_dir: &Path,
    schema: &tabulate::schema::TrackSchema,
) -> Result<Option<Snapshot>> {
    match store::load_latest(report_dir, schema) {
        Ok((_, snapshot)) => Ok(Some(snapshot)),
        Err(SnapshotError::NotFound(_)) => Ok(None),
        Err(e) => Err(e).context("Failed to load previous snapshot"),
    }
}

fn print_changeset_summary(changeset: &Changeset) {
    if changeset.is_empty() {
        println!("No changes since last snapshot");
    } else {
        println!(
            "Changes: {} inserted, {} deleted, {} field updates",
            changeset.count(ChangeOp::Insert),
            changeset.count(ChangeOp::Delete),
            changeset.count(ChangeOp::Update)
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
