use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use seekcore_config::{Settings, DEFAULT_CONFIG_FILE};
use seekd::{AppService, SearchSnapshot};

#[derive(Parser, Debug)]
#[command(name = "seek")]
#[command(about = "Index a directory tree and find files by fuzzy name")]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the index from the configured root directory
    Reindex,
    /// Run a single search and print the ranked paths
    Search {
        #[arg(required = true)]
        words: Vec<String>,
    },
    /// Read one query per line from stdin and print results as they arrive
    Query,
    /// Open a file with the configured viewer
    Open { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let settings = if args.config.exists() {
        Settings::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        warn!(config = %args.config.display(), "config not found, using defaults");
        Settings::default()
    };
    let service = AppService::open(settings)?;

    match args.command {
        Command::Reindex => run_reindex(&service),
        Command::Search { words } => run_search(&service, &words.join(" ")),
        Command::Query => run_query_loop(&service).await,
        Command::Open { path } => Ok(service.launch_viewer(&path)?),
    }
}

fn run_reindex(service: &AppService) -> Result<()> {
    let root = service.settings().root_dir.clone();
    info!(root = %root.display(), "starting reindex");

    let mut stderr = std::io::stderr();
    let summary = service.reindex(|progress| {
        let _ = write!(
            stderr,
            "\rProcessed {} of {} files",
            progress.indexed, progress.total
        );
        let _ = stderr.flush();
    })?;
    eprintln!();

    info!(
        indexed = summary.indexed,
        skipped = summary.skipped,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "index stored"
    );
    Ok(())
}

fn run_search(service: &AppService, query: &str) -> Result<()> {
    for hit in service.search(query)? {
        println!("{:>3}  {}", hit.score, hit.path);
    }
    Ok(())
}

async fn run_query_loop(service: &AppService) -> Result<()> {
    let searches = Arc::new(service.spawn_search_service());
    let mut updates = searches.subscribe();

    let submitter = Arc::clone(&searches);
    let mut reader = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
        let mut last = 0;
        for line in std::io::stdin().lock().lines() {
            last = submitter.submit(line?);
        }
        Ok(last)
    });

    let mut printed = 0;
    let last = loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break 0;
                }
                let snapshot = updates.borrow_and_update().clone();
                printed = print_snapshot(&snapshot);
            }
            done = &mut reader => break done??,
        }
    };

    if last > printed {
        if let Some(snapshot) = searches.wait_for(last).await {
            print_snapshot(&snapshot);
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &SearchSnapshot) -> u64 {
    println!("# {} ({} hits)", snapshot.query, snapshot.hits.len());
    if let Some(error) = &snapshot.error {
        println!("! {error}");
    }
    for hit in &snapshot.hits {
        println!("{:>3}  {}", hit.score, hit.path);
    }
    snapshot.generation
}
