//! Applying and rolling back folder renames
//!
//! A fix moves `<root>/<Old Author>/<Old Title>` to
//! `<root>/<New Author>/<New Title>`. The destination must land inside a
//! configured library root, the move merges into an existing destination
//! without overwriting, and the history row flips state only after the
//! filesystem work succeeded.

use crate::config::Config;
use crate::store::{fix_status, status, HistoryRecord, Store};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Sanitize a string for use as a single path component
pub fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            '\0' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Build the corrected `<root>/<Author>/<Title>` path for a book whose
/// current folder lives two levels below the library root.
pub fn destination_for(old_path: &Path, author: &str, title: &str) -> Result<PathBuf> {
    let library_root = old_path
        .parent()
        .and_then(|p| p.parent())
        .with_context(|| format!("Path too shallow to be a book folder: {}", old_path.display()))?;
    Ok(library_root
        .join(sanitize_component(author))
        .join(sanitize_component(title)))
}

/// Lexical containment check: no `..` components, and the candidate must
/// sit under one of the configured roots. The destination does not exist
/// yet, so this cannot rely on canonicalization.
pub fn path_within_library(config: &Config, candidate: &Path) -> bool {
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return false;
    }
    config
        .library_paths
        .iter()
        .any(|root| candidate.starts_with(root))
}

/// Move a folder, merging into the destination when it already exists.
/// Existing destination files are never overwritten.
fn move_folder(old_path: &Path, new_path: &Path) -> Result<()> {
    if new_path.exists() {
        for entry in fs::read_dir(old_path)
            .with_context(|| format!("Failed to read {}", old_path.display()))?
        {
            let entry = entry?;
            let dest = new_path.join(entry.file_name());
            if !dest.exists() {
                fs::rename(entry.path(), &dest).with_context(|| {
                    format!(
                        "Failed to move {} -> {}",
                        entry.path().display(),
                        dest.display()
                    )
                })?;
            }
        }
        fs::remove_dir(old_path)
            .with_context(|| format!("Leftover files in {}", old_path.display()))?;
    } else {
        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::rename(old_path, new_path).with_context(|| {
            format!(
                "Failed to move {} -> {}",
                old_path.display(),
                new_path.display()
            )
        })?;
    }
    Ok(())
}

/// Remove the author directory the book vacated, if it is now empty
fn prune_empty_parent(old_path: &Path) {
    if let Some(parent) = old_path.parent() {
        if let Ok(mut entries) = fs::read_dir(parent) {
            if entries.next().is_none() {
                if let Err(e) = fs::remove_dir(parent) {
                    warn!("Could not prune {}: {}", parent.display(), e);
                }
            }
        }
    }
}

fn load_record(store: &Store, history_id: i64) -> Result<HistoryRecord> {
    store
        .history_record(history_id)?
        .with_context(|| format!("No history record with id {}", history_id))
}

/// Apply a pending fix: rename the folder and mark the book fixed
pub fn apply_fix(store: &Store, config: &Config, history_id: i64) -> Result<()> {
    let record = load_record(store, history_id)?;

    if record.status != fix_status::PENDING {
        bail!(
            "History record {} is {}, not pending",
            history_id,
            record.status
        );
    }

    let old_path = Path::new(&record.old_path);
    let new_path = Path::new(&record.new_path);

    if !old_path.exists() {
        bail!("Source folder no longer exists: {}", record.old_path);
    }
    if !path_within_library(config, new_path) {
        bail!(
            "Destination escapes the configured library roots: {}",
            record.new_path
        );
    }

    move_folder(old_path, new_path)?;
    // The vacated author directory is left in place even when empty, so a
    // later rollback can restore the exact prior path.

    store.set_history_status(history_id, fix_status::APPLIED)?;
    store.relocate_book(
        record.book_id,
        &record.new_path,
        &record.new_author,
        &record.new_title,
        status::FIXED,
    )?;

    info!(
        "Fixed: {}/{} -> {}/{}",
        record.old_author, record.old_title, record.new_author, record.new_title
    );
    Ok(())
}

/// Undo an applied fix, restoring the exact prior path. Fails loudly when
/// the moved folder is gone or the prior location's parent has vanished.
pub fn rollback_fix(store: &Store, config: &Config, history_id: i64) -> Result<()> {
    let record = load_record(store, history_id)?;

    if record.status != fix_status::APPLIED {
        bail!(
            "History record {} is {}, only applied fixes can be rolled back",
            history_id,
            record.status
        );
    }

    let current_path = Path::new(&record.new_path);
    let prior_path = Path::new(&record.old_path);

    if !current_path.exists() {
        bail!(
            "Cannot roll back: current folder is gone: {}",
            record.new_path
        );
    }
    if prior_path.exists() {
        bail!(
            "Cannot roll back: prior path is occupied: {}",
            record.old_path
        );
    }
    let prior_parent = prior_path
        .parent()
        .with_context(|| format!("Prior path has no parent: {}", record.old_path))?;
    if !prior_parent.exists() {
        bail!(
            "Cannot roll back: prior parent directory is gone: {}",
            prior_parent.display()
        );
    }
    if !path_within_library(config, prior_path) {
        bail!(
            "Prior path escapes the configured library roots: {}",
            record.old_path
        );
    }

    fs::rename(current_path, prior_path).with_context(|| {
        format!(
            "Failed to restore {} -> {}",
            record.new_path, record.old_path
        )
    })?;
    prune_empty_parent(current_path);

    store.set_history_status(history_id, fix_status::ROLLED_BACK)?;
    store.relocate_book(
        record.book_id,
        &record.old_path,
        &record.old_author,
        &record.old_title,
        status::PENDING,
    )?;

    info!(
        "Rolled back: {}/{} -> {}/{}",
        record.new_author, record.new_title, record.old_author, record.old_title
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Fixture {
        _root: tempfile::TempDir,
        config: Config,
        store: Store,
        history_id: i64,
        old_path: PathBuf,
        new_path: PathBuf,
    }

    /// A library with one wrongly named book and a pending fix for it
    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let old_path = root.path().join("The Funhouse").join("Dean Koontz");
        fs::create_dir_all(&old_path).unwrap();
        fs::write(old_path.join("book.m4b"), b"audio").unwrap();

        let config = Config {
            library_paths: vec![root.path().to_path_buf()],
            ..Config::default()
        };

        let store = Store::open_in_memory().unwrap();
        let (book, _) = store
            .upsert_book(&old_path.to_string_lossy(), "The Funhouse", "Dean Koontz")
            .unwrap();

        let new_path = root.path().join("Dean Koontz").join("The Funhouse");
        let history_id = store
            .insert_history(
                book.id,
                "The Funhouse",
                "Dean Koontz",
                "Dean Koontz",
                "The Funhouse",
                &old_path.to_string_lossy(),
                &new_path.to_string_lossy(),
                fix_status::PENDING,
            )
            .unwrap();

        Fixture {
            _root: root,
            config,
            store,
            history_id,
            old_path,
            new_path,
        }
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Book: Part 1"), "Book_ Part 1");
        assert_eq!(sanitize_component("Author/Title"), "Author_Title");
        assert_eq!(sanitize_component("  spaced  "), "spaced");
    }

    #[test]
    fn test_destination_for() {
        let dest = destination_for(
            Path::new("/lib/The Funhouse/Dean Koontz"),
            "Dean Koontz",
            "The Funhouse",
        )
        .unwrap();
        assert_eq!(dest, Path::new("/lib/Dean Koontz/The Funhouse"));
    }

    #[test]
    fn test_apply_moves_folder_and_updates_records() {
        let fx = fixture();
        apply_fix(&fx.store, &fx.config, fx.history_id).unwrap();

        assert!(!fx.old_path.exists());
        assert!(fx.new_path.join("book.m4b").exists());
        // Vacated author dir stays so the move can be rolled back
        assert!(fx.old_path.parent().unwrap().exists());

        let record = fx.store.history_record(fx.history_id).unwrap().unwrap();
        assert_eq!(record.status, fix_status::APPLIED);

        let book = fx.store.book_by_id(record.book_id).unwrap().unwrap();
        assert_eq!(book.status, status::FIXED);
        assert_eq!(book.author, "Dean Koontz");
        assert_eq!(book.path, fx.new_path.to_string_lossy());
    }

    #[test]
    fn test_apply_merges_into_existing_destination() {
        let fx = fixture();
        fs::create_dir_all(&fx.new_path).unwrap();
        fs::write(fx.new_path.join("existing.nfo"), b"keep").unwrap();

        apply_fix(&fx.store, &fx.config, fx.history_id).unwrap();

        assert!(fx.new_path.join("book.m4b").exists());
        assert_eq!(
            fs::read(fx.new_path.join("existing.nfo")).unwrap(),
            b"keep"
        );
    }

    #[test]
    fn test_apply_rejects_escaping_destination() {
        let fx = fixture();
        let record = fx.store.history_record(fx.history_id).unwrap().unwrap();
        let evil = fx
            .store
            .insert_history(
                record.book_id,
                &record.old_author,
                &record.old_title,
                "..",
                "pwned",
                &record.old_path,
                "/tmp/elsewhere/pwned",
                fix_status::PENDING,
            )
            .unwrap();

        let err = apply_fix(&fx.store, &fx.config, evil).unwrap_err();
        assert!(err.to_string().contains("escapes"));
        assert!(fx.old_path.exists());
    }

    #[test]
    fn test_apply_rejects_parent_dir_components() {
        let fx = fixture();
        let record = fx.store.history_record(fx.history_id).unwrap().unwrap();
        let sneaky_path = fx._root.path().join("..").join("outside");
        let sneaky = fx
            .store
            .insert_history(
                record.book_id,
                &record.old_author,
                &record.old_title,
                "X",
                "Y",
                &record.old_path,
                &sneaky_path.to_string_lossy(),
                fix_status::PENDING,
            )
            .unwrap();

        assert!(apply_fix(&fx.store, &fx.config, sneaky).is_err());
    }

    #[test]
    fn test_apply_twice_fails() {
        let fx = fixture();
        apply_fix(&fx.store, &fx.config, fx.history_id).unwrap();
        let err = apply_fix(&fx.store, &fx.config, fx.history_id).unwrap_err();
        assert!(err.to_string().contains("not pending"));
    }

    #[test]
    fn test_apply_fails_when_source_gone() {
        let fx = fixture();
        fs::remove_dir_all(&fx.old_path).unwrap();
        let err = apply_fix(&fx.store, &fx.config, fx.history_id).unwrap_err();
        assert!(err.to_string().contains("no longer exists"));
    }

    #[test]
    fn test_rollback_restores_prior_path() {
        let fx = fixture();
        apply_fix(&fx.store, &fx.config, fx.history_id).unwrap();
        rollback_fix(&fx.store, &fx.config, fx.history_id).unwrap();

        assert!(fx.old_path.join("book.m4b").exists());
        assert!(!fx.new_path.exists());

        let record = fx.store.history_record(fx.history_id).unwrap().unwrap();
        assert_eq!(record.status, fix_status::ROLLED_BACK);

        let book = fx.store.book_by_id(record.book_id).unwrap().unwrap();
        assert_eq!(book.status, status::PENDING);
        assert_eq!(book.path, fx.old_path.to_string_lossy());
    }

    #[test]
    fn test_rollback_fails_when_current_gone() {
        let fx = fixture();
        apply_fix(&fx.store, &fx.config, fx.history_id).unwrap();
        fs::remove_dir_all(&fx.new_path).unwrap();

        let err = rollback_fix(&fx.store, &fx.config, fx.history_id).unwrap_err();
        assert!(err.to_string().contains("current folder is gone"));
    }

    #[test]
    fn test_rollback_fails_when_prior_parent_gone() {
        let fx = fixture();
        apply_fix(&fx.store, &fx.config, fx.history_id).unwrap();
        // Someone deletes the vacated author dir out from under us
        fs::remove_dir(fx.old_path.parent().unwrap()).unwrap();

        let err = rollback_fix(&fx.store, &fx.config, fx.history_id).unwrap_err();
        assert!(err.to_string().contains("prior parent directory is gone"));
    }

    #[test]
    fn test_rollback_requires_applied_status() {
        let fx = fixture();
        let err = rollback_fix(&fx.store, &fx.config, fx.history_id).unwrap_err();
        assert!(err.to_string().contains("only applied fixes"));
    }
}
