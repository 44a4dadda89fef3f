//! Library scanner
//!
//! Walks each configured library root, which is expected to be laid out as
//! `<root>/<Author>/<Title>/...files`, records every book folder, and
//! queues the ones whose naming looks wrong.

use crate::config::Config;
use crate::heuristics;
use crate::store::{status, Store};
use crate::verifier;
use anyhow::Result;
use log::{debug, info, warn};
use std::path::Path;
use walkdir::WalkDir;

pub const AUDIO_EXTENSIONS: &[&str] = &["m4b", "m4a", "mp3", "flac", "ogg", "opus", "aac"];

/// Sidecar files that don't count towards a folder having content
pub const SIDECAR_EXTENSIONS: &[&str] = &[
    "nfo", "txt", "json", "xml", "opf", "jpg", "jpeg", "png", "webp",
];

/// Queue reason used when the name heuristics pass but the embedded tags
/// disagree with the folder name
pub const REASON_TAG_MISMATCH: &str = "file_tag_mismatch";

#[derive(Debug, Default, Clone)]
pub struct ScanSummary {
    pub new_books: usize,
    pub queued: usize,
    pub empty: usize,
}

pub fn is_audio_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if name.starts_with("._") {
            return false;
        }
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Directories the scanner never descends into
fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || name.starts_with("backup_") || name == "backups"
}

/// A book folder is empty when it holds no audio files at any depth.
/// Sidecar metadata files (.nfo, cover images, ...) don't count.
pub fn folder_is_empty(dir: &Path) -> bool {
    !WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file() && is_audio_file(e.path()))
}

fn subdirectories(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut dirs = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {}: {}", dir.display(), e);
            return dirs;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if !is_skipped_dir(name) => dirs.push(path),
            _ => {}
        }
    }
    dirs.sort();
    dirs
}

/// Scan all configured library roots, upserting book rows and queueing
/// suspicious folders. Already verified/fixed/empty books are skipped.
pub fn scan_library(store: &Store, config: &Config) -> Result<ScanSummary> {
    let mut summary = ScanSummary::default();

    for root in &config.library_paths {
        if !root.exists() {
            warn!("Library path not found: {}", root.display());
            continue;
        }
        info!("Scanning {}", root.display());

        for author_dir in subdirectories(root) {
            let author = match author_dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            for title_dir in subdirectories(&author_dir) {
                let title = match title_dir.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                let path = title_dir.to_string_lossy().to_string();

                let (book, inserted) = store.upsert_book(&path, &author, &title)?;
                if inserted {
                    summary.new_books += 1;
                }
                if matches!(
                    book.status.as_str(),
                    status::VERIFIED | status::FIXED | status::EMPTY
                ) {
                    continue;
                }

                if folder_is_empty(&title_dir) {
                    debug!("Empty folder: {}", path);
                    store.set_book_status(book.id, status::EMPTY)?;
                    summary.empty += 1;
                    continue;
                }

                if let Some(issue) = heuristics::classify(&author, &title) {
                    if store.enqueue(book.id, issue.as_str())? {
                        info!("Queued ({}): {}/{}", issue, author, title);
                        summary.queued += 1;
                    }
                    continue;
                }

                // Name looks fine; let the embedded tags get a vote
                let verification = verifier::verify_folder(
                    &title_dir,
                    &author,
                    &title,
                    config.verify_sample_size,
                    config.similarity_threshold,
                );
                if verification.flagged && store.enqueue(book.id, REASON_TAG_MISMATCH)? {
                    info!(
                        "Queued (tag mismatch {}/{} files): {}/{}",
                        verification.mismatched, verification.sampled, author, title
                    );
                    summary.queued += 1;
                }
            }
        }
    }

    store.bump_stats(summary.new_books as i64, summary.queued as i64, 0, 0)?;
    info!(
        "Scan complete: {} new books, {} queued, {} empty",
        summary.new_books, summary.queued, summary.empty
    );
    Ok(summary)
}
