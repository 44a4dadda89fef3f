mod config;
mod fixes;
mod heuristics;
mod llm;
mod processor;
mod scanner;
mod store;
mod verifier;
mod worker;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use log::info;
use processor::{BatchOutcome, Processor};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store::Store;

#[derive(Parser)]
#[command(name = "shelfmender", version, about = "Detects and repairs wrongly named Author/Title folders in an audiobook library")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the library and queue suspicious folders
    Scan,
    /// Send queued folders to the LLM and record suggested fixes
    Process {
        /// Drain the whole queue instead of one batch
        #[arg(long)]
        all: bool,
        /// Cap on items for a single batch
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List folders waiting for AI analysis
    Queue,
    /// Show recent fix history
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Apply a pending fix by history id
    Apply { history_id: i64 },
    /// Roll back an applied fix by history id
    Rollback { history_id: i64 },
    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the default location
        #[arg(long)]
        init: bool,
    },
    /// Show library counts and recent daily activity
    Stats,
    /// Run the periodic scan/process worker until interrupted
    Run,
}

fn daily_summary(day: &store::DailyStats) -> String {
    format!(
        "  {}  scanned {:<5} queued {:<5} fixed {:<5} verified {:<5} api calls {}",
        day.date, day.scanned, day.queued, day.fixed, day.verified, day.api_calls
    )
}


#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let store = Store::open(&config.db_path()?)?;

    match cli.command {
        Command::Scan => {
            let summary = scanner::scan_library(&store, &config)?;
            println!(
                "Scan complete: {} new books, {} queued, {} empty folders",
                summary.new_books, summary.queued, summary.empty
            );
        }
        Command::Process { all, limit } => {
            let processor = Processor::new(&store, &config);
            if all {
                let (processed, fixed) = processor.process_all().await?;
                println!("Processed {} items, {} fixes", processed, fixed);
            } else {
                match processor.process_batch(limit).await? {
                    BatchOutcome::Empty => println!("Queue is empty"),
                    BatchOutcome::Deferred => {
                        println!("Rate limit reached, try again later")
                    }
                    BatchOutcome::Done { processed, fixed } => {
                        println!("Processed {} items, {} fixes", processed, fixed)
                    }
                }
            }
        }
        Command::Queue => {
            let items = store.list_queue()?;
            if items.is_empty() {
                println!("Queue is empty");
            }
            for item in items {
                println!(
                    "#{:<5} {:<28} {}/{}",
                    item.queue_id, item.reason, item.author, item.title
                );
            }
        }
        Command::History { limit } => {
            for record in store.recent_history(limit)? {
                println!(
                    "#{:<5} [{}] {}/{} -> {}/{}  ({})",
                    record.id,
                    record.status,
                    record.old_author,
                    record.old_title,
                    record.new_author,
                    record.new_title,
                    record.created_at
                );
            }
        }
        Command::Apply { history_id } => {
            fixes::apply_fix(&store, &config, history_id)?;
            println!("Applied fix #{}", history_id);
        }
        Command::Rollback { history_id } => {
            fixes::rollback_fix(&store, &config, history_id)?;
            println!("Rolled back fix #{}", history_id);
        }
        Command::Config { init } => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
            if init {
                config.save()?;
                println!("Configuration saved");
            }
        }
        Command::Stats => {
            let counts = store.counts()?;
            println!("Books:         {}", counts.total_books);
            println!("Queued:        {}", counts.queue_size);
            println!("Pending fixes: {}", counts.pending_fixes);
            println!("Fixed:         {}", counts.fixed);
            println!("Verified:      {}", counts.verified);
            let recent = store.recent_stats(7)?;
            if !recent.is_empty() {
                println!("\nLast {} days:", recent.len());
                for day in recent {
                    println!("{}", daily_summary(&day));
                }
            }
        }
        Command::Run => {
            let stop = Arc::new(AtomicBool::new(false));
            let stop_signal = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping worker");
                    stop_signal.store(true, Ordering::SeqCst);
                }
            });
            worker::run(&store, stop).await?;
        }
    }

    Ok(())
}
