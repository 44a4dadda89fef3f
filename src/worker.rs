//! Background worker
//!
//! A single timer loop: scan the library, optionally drain the queue, then
//! sleep for the configured interval. Config is reloaded each cycle so
//! settings changes take effect without a restart. The stop flag is checked
//! every few seconds during the sleep so shutdown stays prompt.

use crate::config::Config;
use crate::processor::Processor;
use crate::scanner;
use crate::store::Store;
use anyhow::Result;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STOP_POLL: Duration = Duration::from_secs(10);

pub async fn run(store: &Store, stop: Arc<AtomicBool>) -> Result<()> {
    info!("Background worker started");

    while !stop.load(Ordering::SeqCst) {
        let config = match Config::load() {
            Ok(config) => config,
            Err(e) => {
                error!("Worker could not load config: {:#}", e);
                sleep_until_stop(Duration::from_secs(60), &stop).await;
                continue;
            }
        };

        if config.enabled {
            if let Err(e) = run_cycle(store, &config).await {
                error!("Worker cycle failed: {:#}", e);
            }
        } else {
            debug!("Worker disabled in config, skipping cycle");
        }

        let interval = Duration::from_secs(config.scan_interval_hours.max(1) * 3600);
        debug!("Worker sleeping for {:?}", interval);
        sleep_until_stop(interval, &stop).await;
    }

    info!("Background worker stopped");
    Ok(())
}

async fn run_cycle(store: &Store, config: &Config) -> Result<()> {
    scanner::scan_library(store, config)?;

    if config.auto_fix {
        debug!("Auto-fix enabled, draining queue");
        let processor = Processor::new(store, config);
        processor.process_all().await?;
    }

    Ok(())
}

/// Sleep in short slices so a stop request is honored within seconds
async fn sleep_until_stop(total: Duration, stop: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
        let slice = remaining.min(STOP_POLL);
        tokio::time::sleep(slice).await;
        remaining = remaining.saturating_sub(slice);
    }
}
