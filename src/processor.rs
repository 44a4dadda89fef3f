//! Queue processing
//!
//! Pulls a FIFO batch from the queue, asks the LLM to re-parse each messy
//! name, and turns the answers into verified books, pending fixes, or
//! (with auto_fix) applied renames. One LLM request per batch, bounded by
//! `max_requests_per_hour` over a sliding one-hour window.

use crate::config::Config;
use crate::fixes;
use crate::llm::{self, LlmClient, ParsedName};
use crate::store::{fix_status, status, QueueItem, Store};
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Pause between batches when draining the whole queue
const BATCH_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing waiting
    Empty,
    /// Rate limit reached; queue left untouched for the next tick
    Deferred,
    Done { processed: usize, fixed: usize },
}

pub struct Processor<'a> {
    store: &'a Store,
    config: &'a Config,
    llm: Option<LlmClient>,
}

impl<'a> Processor<'a> {
    pub fn new(store: &'a Store, config: &'a Config) -> Self {
        let llm = LlmClient::from_config(config);
        Self { store, config, llm }
    }

    /// Process one batch from the queue
    pub async fn process_batch(&self, limit: Option<usize>) -> Result<BatchOutcome> {
        let batch_size = match limit {
            Some(n) => self.config.batch_size.min(n),
            None => self.config.batch_size,
        };

        let batch = self.store.next_batch(batch_size)?;
        if batch.is_empty() {
            return Ok(BatchOutcome::Empty);
        }

        let llm = self
            .llm
            .as_ref()
            .context("No OpenRouter API key configured")?;

        let recent = self.store.api_calls_in_last_hour()?;
        if recent >= self.config.max_requests_per_hour {
            warn!(
                "Rate limit reached ({}/{} requests in the last hour), deferring {} items",
                recent,
                self.config.max_requests_per_hour,
                batch.len()
            );
            return Ok(BatchOutcome::Deferred);
        }

        let messy_names: Vec<String> = batch
            .iter()
            .map(|item| format!("{} - {}", item.author, item.title))
            .collect();
        info!("Processing batch of {} items", batch.len());

        self.store.log_api_call()?;
        let results = llm.parse_names(&messy_names).await?;

        let matched = match_results(batch.len(), results);

        let mut processed = 0;
        let mut fixed = 0;
        let mut verified = 0;

        for (item, result) in batch.iter().zip(matched) {
            let result = match result {
                // No answer for this item; leave it queued for a retry
                None => continue,
                Some(r) => r,
            };

            match self.handle_result(item, &result)? {
                ItemOutcome::Verified => verified += 1,
                ItemOutcome::Fixed => fixed += 1,
                ItemOutcome::Errored => {}
            }
            self.store.dequeue(item.queue_id)?;
            processed += 1;
        }

        self.store.bump_stats(0, 0, fixed as i64, verified as i64)?;
        info!("Batch complete: {} processed, {} fixed", processed, fixed);
        Ok(BatchOutcome::Done { processed, fixed })
    }

    fn handle_result(&self, item: &QueueItem, result: &ParsedName) -> Result<ItemOutcome> {
        let new_author = result.author.as_deref().unwrap_or("").trim().to_string();
        let new_title = result.title.as_deref().unwrap_or("").trim().to_string();

        // An empty answer means the model saw nothing to fix
        if new_author.is_empty() || new_title.is_empty() {
            self.store.set_book_status(item.book_id, status::VERIFIED)?;
            info!("Verified (no suggestion): {}/{}", item.author, item.title);
            return Ok(ItemOutcome::Verified);
        }

        if new_author == item.author && new_title == item.title {
            self.store.set_book_status(item.book_id, status::VERIFIED)?;
            info!("Verified OK: {}/{}", item.author, item.title);
            return Ok(ItemOutcome::Verified);
        }

        let new_path = fixes::destination_for(Path::new(&item.path), &new_author, &new_title)?;
        let history_id = self.store.insert_history(
            item.book_id,
            &item.author,
            &item.title,
            &new_author,
            &new_title,
            &item.path,
            &new_path.to_string_lossy(),
            fix_status::PENDING,
        )?;

        if self.config.auto_fix {
            match fixes::apply_fix(self.store, self.config, history_id) {
                Ok(()) => Ok(ItemOutcome::Fixed),
                Err(e) => {
                    // Leave the history row pending so the fix can be
                    // retried or applied manually
                    error!("Error fixing {}: {:#}", item.path, e);
                    self.store.set_book_status(item.book_id, status::ERROR)?;
                    Ok(ItemOutcome::Errored)
                }
            }
        } else {
            self.store
                .set_book_status(item.book_id, status::PENDING_FIX)?;
            info!(
                "Suggested fix: {}/{} -> {}/{}",
                item.author, item.title, new_author, new_title
            );
            Ok(ItemOutcome::Fixed)
        }
    }

    /// Drain the queue batch by batch. Stops on rate-limit deferral or
    /// when a batch makes no progress.
    pub async fn process_all(&self) -> Result<(usize, usize)> {
        let total = self.store.queue_len()?;
        if total == 0 {
            info!("Queue is empty, nothing to process");
            return Ok((0, 0));
        }
        info!("Draining queue: {} items", total);

        let mut total_processed = 0;
        let mut total_fixed = 0;

        loop {
            match self.process_batch(None).await? {
                BatchOutcome::Empty => break,
                BatchOutcome::Deferred => {
                    info!("Stopping drain until the rate window clears");
                    break;
                }
                BatchOutcome::Done { processed, fixed } => {
                    if processed == 0 {
                        let remaining = self.store.queue_len()?;
                        if remaining > 0 {
                            warn!(
                                "No items processed but {} remain, stopping drain",
                                remaining
                            );
                        }
                        break;
                    }
                    total_processed += processed;
                    total_fixed += fixed;
                }
            }

            tokio::time::sleep(BATCH_PAUSE).await;
        }

        info!(
            "Drain complete: {} processed, {} fixed",
            total_processed, total_fixed
        );
        Ok((total_processed, total_fixed))
    }
}

enum ItemOutcome {
    Verified,
    Fixed,
    Errored,
}

/// Line up model answers with batch slots. Answers carrying a valid
/// `ITEM_N` label win; answers with an unusable label (invented,
/// out of range, or already claimed) fall back to their position.
fn match_results(batch_len: usize, results: Vec<ParsedName>) -> Vec<Option<ParsedName>> {
    let mut slots: Vec<Option<ParsedName>> = vec![None; batch_len];
    let mut unlabelled: HashMap<usize, ParsedName> = HashMap::new();

    for (pos, result) in results.into_iter().enumerate() {
        let labelled_idx = result.item.as_deref().and_then(llm::item_index);
        match labelled_idx {
            Some(idx) if idx < batch_len && slots[idx].is_none() => {
                slots[idx] = Some(result);
            }
            _ => {
                unlabelled.insert(pos, result);
            }
        }
    }

    for (pos, result) in unlabelled {
        if pos < batch_len && slots[pos].is_none() {
            slots[pos] = Some(result);
        }
    }

    slots
}
