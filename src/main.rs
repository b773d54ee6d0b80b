use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tagmark::archive::{select_hook, Archive};
use tagmark::import::{export_backup, Backup};
use tagmark::{Config, IndexQueue, IndexWorker, Result, SearchIndex, Store, TagmarkError};

#[derive(Parser)]
#[command(author, version, about = "Search index worker and maintenance commands for tagmark", long_about = None)]
struct Cli {
    /// Optional custom configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Optional custom database file path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Optional custom search index file path
    #[arg(long)]
    index: Option<PathBuf>,

    /// Show debug information
    #[arg(short = 'g', long = "debug")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process index operations until interrupted
    Run,
    /// Move messages left in flight back to the incoming queue
    Requeue,
    /// Rebuild the whole search index from the database
    Reindex,
    /// Show queue lengths and index size
    Status,
    /// Write every user and bookmark to a JSON backup file
    Backup { file: PathBuf },
    /// Load a JSON backup file and index the restored bookmarks
    Restore { file: PathBuf },
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut cfg = if let Some(config_path) = &args.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load()
    };
    if let Some(db) = args.db {
        cfg.database.path = db;
    }
    if let Some(index) = args.index {
        cfg.search.index_path = index;
    }

    let store = Store::init(&cfg.database.path)?;
    let index = SearchIndex::open(&cfg.search.index_path)?;
    let queue = IndexQueue::from_config(&cfg.queue)?;

    match args.command {
        Command::Run => run_worker(&cfg, &store, &index, queue)?,
        Command::Requeue => {
            let moved = queue.requeue_in_flight()?;
            println!("Requeued {} messages", moved);
        }
        Command::Reindex => {
            let worker = IndexWorker::new(&store, &index, queue);
            let count = worker.reindex_all()?;
            println!("Indexed {} bookmarks", count);
        }
        Command::Status => {
            println!("database:   {}", store.get_path().display());
            println!("index:      {}", cfg.search.index_path.display());
            println!("pending:    {}", queue.pending()?);
            println!("in flight:  {}", queue.in_flight()?);
            println!("documents:  {}", index.document_count()?);
        }
        Command::Backup { file } => {
            let backup = export_backup(&store)?;
            backup.save(&file)?;
            println!(
                "Saved {} bookmarks of {} users to {}",
                backup.bookmark_count(),
                backup.users.len(),
                file.display()
            );
        }
        Command::Restore { file } => {
            let backup = Backup::load(&file)?;
            let archive = Archive::new(&store, select_hook(&cfg, queue, &index));
            let committed = archive.restore(&backup)?;
            if !committed.is_synced() {
                log::warn!(
                    "{} restored bookmarks were not handed to the index; run `reindex`",
                    committed.unsynced.len()
                );
            }
            let report = committed.value;
            println!(
                "Restored {} bookmarks ({} new users, {} skipped)",
                report.imported.len(),
                report.users_created,
                report.skipped.len()
            );
        }
    }

    Ok(())
}

fn run_worker(cfg: &Config, store: &Store, index: &SearchIndex, queue: IndexQueue) -> Result<()> {
    if cfg.queue.requeue_on_start {
        queue.requeue_in_flight()?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| TagmarkError::Io(std::io::Error::other(e)))?;

    let worker = IndexWorker::new(store, index, queue);
    worker.run(&shutdown, Duration::from_millis(cfg.queue.poll_interval_ms));
    Ok(())
}
