use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linehist_kernel::adapters::git::{self, GitHistory};
use linehist_kernel::annotate::{AnnotatedLine, Annotator};
use linehist_kernel::bootstrap::{BootstrapTask, HistorySource, Snapshot};
use linehist_kernel::config::{BootstrapConfig, TrackerConfig};
use linehist_kernel::invariants::InvariantEngine;
use linehist_kernel::log::store::{FileStore, LineLogStore};
use linehist_kernel::log::{Rev, RevisionRecord};
use linehist_kernel::registry::Registry;
use linehist_kernel::replay::{self, ReplaySummary};

/// Line history tracker
#[derive(Parser, Debug)]
#[command(name = "linehist")]
#[command(about = "Per-line revision history for text files", long_about = None)]
struct Cli {
    /// Path to tracker config JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding stored line logs (overrides the config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Increase log verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record the current contents of a file as a new revision
    Record {
        file: PathBuf,

        /// Do not seed a new log from git history
        #[arg(long)]
        no_bootstrap: bool,
    },

    /// Seed a file's history from git
    Bootstrap { file: PathBuf },

    /// Print the text of a revision
    Show {
        file: PathBuf,

        /// Revision to check out (default: latest)
        #[arg(long)]
        rev: Option<Rev>,

        /// Also include lines deleted after this revision
        #[arg(long)]
        start: Option<Rev>,
    },

    /// Print the lines of a revision with their origin as JSON
    Annotate {
        file: PathBuf,

        #[arg(long)]
        rev: Option<Rev>,

        #[arg(long)]
        start: Option<Rev>,
    },

    /// List recorded revisions as JSON
    Log { file: PathBuf },

    /// Replay every revision and check the stored encoding
    Verify { file: PathBuf },
}

#[derive(Debug, Serialize)]
struct RecordOutput {
    file: PathBuf,
    rev: Rev,
    bootstrapped: bool,
}

#[derive(Debug, Serialize)]
struct AnnotateOutput<'a> {
    rev: Rev,
    start: Option<Rev>,
    timestamp_span: Option<(u64, u64)>,
    lines: Vec<AnnotatedLine<'a>>,
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    rev: Rev,
    #[serde(flatten)]
    record: &'a RevisionRecord,
}

#[derive(Debug, Serialize)]
struct VerifyOutput {
    file: PathBuf,
    #[serde(flatten)]
    summary: ReplaySummary,
    round_trip: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &cli.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(store) = cli.store {
        config.storage_dir = store;
    }

    let store = FileStore::new(&config.storage_dir);
    debug!(root = %store.root().display(), "opening line log store");
    let registry = Registry::new(store);

    match cli.command {
        Command::Record { file, no_bootstrap } => {
            let file = identity(&file)?;
            let text = fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;

            let log = registry.open(&file)?;
            let pending = if config.bootstrap.enabled && !no_bootstrap && log.read().is_empty() {
                start_bootstrap(&config.bootstrap, &file)
            } else {
                None
            };

            let mut rev = registry.record_text(&file, &text)?;
            let mut bootstrapped = false;
            if let Some(task) = pending {
                if let Some(snapshots) = finish_bootstrap(task).await {
                    (rev, bootstrapped) = install_history(&registry, &file, snapshots)?;
                }
            }
            registry.save(&file)?;

            print_json(&RecordOutput {
                file,
                rev,
                bootstrapped,
            })
        }

        Command::Bootstrap { file } => {
            let file = identity(&file)?;
            let mut rev = registry.open(&file)?.read().max_rev();
            let mut bootstrapped = false;
            if let Some(task) = start_bootstrap(&config.bootstrap, &file) {
                if let Some(snapshots) = finish_bootstrap(task).await {
                    (rev, bootstrapped) = install_history(&registry, &file, snapshots)?;
                    registry.save(&file)?;
                }
            }
            print_json(&RecordOutput {
                file,
                rev,
                bootstrapped,
            })
        }

        Command::Show { file, rev, start } => {
            let log = registry.open(&identity(&file)?)?;
            let log = log.read();
            let (rev, start) = clamp_query(log.max_rev(), rev, start);
            print!("{}", log.checkout(rev, start)?.text());
            Ok(())
        }

        Command::Annotate { file, rev, start } => {
            let log = registry.open(&identity(&file)?)?;
            let log = log.read();
            let (rev, start) = clamp_query(log.max_rev(), rev, start);
            let checkout = log.checkout(rev, start)?;
            let lines = Annotator::new(&log).annotate(&checkout);

            print_json(&AnnotateOutput {
                rev,
                start,
                timestamp_span: Annotator::timestamp_span(&lines),
                lines,
            })
        }

        Command::Log { file } => {
            let log = registry.open(&identity(&file)?)?;
            let log = log.read();
            let entries: Vec<_> = log
                .revisions()
                .map(|(rev, record)| LogEntry { rev, record })
                .collect();
            print_json(&entries)
        }

        Command::Verify { file } => {
            let file = identity(&file)?;
            let log = registry.open(&file)?;
            let log = log.read();
            let summary = replay::verify_history(&log, &InvariantEngine::standard())?;
            replay::verify_round_trip(&log)?;
            info!(file = %file.display(), revisions = summary.revisions, "history verified");

            print_json(&VerifyOutput {
                file,
                summary,
                round_trip: true,
            })
        }
    }
}

/// Stable identity of a tracked file: its canonical path when it exists.
fn identity(file: &Path) -> Result<PathBuf> {
    match fs::canonicalize(file) {
        Ok(path) => Ok(path),
        Err(_) if file.is_absolute() => Ok(file.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(file)),
    }
}

/// Bring query parameters into `rev <= max_rev`, `start <= rev`.
fn clamp_query(max_rev: Rev, rev: Option<Rev>, start: Option<Rev>) -> (Rev, Option<Rev>) {
    let rev = rev.unwrap_or(max_rev).min(max_rev);
    (rev, start.map(|start| start.min(rev)))
}

fn start_bootstrap(config: &BootstrapConfig, file: &Path) -> Option<BootstrapTask> {
    let located = git::discover_root(file)
        .and_then(|root| git::relative_to_root(&root, file).map(|relative| (root, relative)));
    let (root, relative) = match located {
        Ok(located) => located,
        Err(err) => {
            warn!(file = %file.display(), error = %err, "no history to bootstrap");
            return None;
        }
    };

    let source: Arc<dyn HistorySource> = Arc::new(GitHistory::from_config(config));
    Some(BootstrapTask::spawn(source, root, relative))
}

/// Wait for a bootstrap, giving up on failure or Ctrl-C.
async fn finish_bootstrap(task: BootstrapTask) -> Option<Vec<Snapshot>> {
    tokio::select! {
        result = task.join() => match result {
            Ok(snapshots) => Some(snapshots),
            Err(err) => {
                warn!(error = %err, "bootstrap failed, tracking from an empty history");
                None
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("bootstrap interrupted");
            None
        }
    }
}

/// Seed `file` and report whether its log now carries commit provenance.
fn install_history<S: LineLogStore>(
    registry: &Registry<S>,
    file: &Path,
    snapshots: Vec<Snapshot>,
) -> Result<(Rev, bool)> {
    let rev = registry.seed(file, snapshots)?;
    let bootstrapped = registry.open(file)?.read().has_provenance();
    Ok((rev, bootstrapped))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
