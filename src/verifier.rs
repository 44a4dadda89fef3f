//! File-to-folder cross-validation
//!
//! Samples a folder's audio files, reads their embedded tags, and checks
//! whether the tag-derived author/title agree with the folder name. A
//! folder whose files mostly disagree with its name is worth a second look
//! even when the name heuristics pass.

use crate::heuristics::strip_format_junk;
use crate::scanner::is_audio_file;
use lazy_static::lazy_static;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::Accessor;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

/// Tag fields relevant to identity, pulled from one sampled file
#[derive(Debug, Clone, Default)]
pub struct TagSample {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_title: Option<String>,
}

impl TagSample {
    fn is_empty(&self) -> bool {
        self.artist.is_none() && self.album.is_none() && self.track_title.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Verification {
    pub sampled: usize,
    pub mismatched: usize,
    pub flagged: bool,
}

fn read_tag_sample(path: &Path) -> TagSample {
    let tagged_file = match Probe::open(path).and_then(|p| p.read()) {
        Ok(f) => f,
        Err(_) => return TagSample::default(),
    };

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

    match tag {
        Some(t) => TagSample {
            artist: t.artist().map(|s| s.to_string()),
            album: t.album().map(|s| s.to_string()),
            track_title: t.title().map(|s| s.to_string()),
        },
        None => TagSample::default(),
    }
}

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[A-Za-z0-9']+").unwrap();
}

fn word_set(s: &str) -> HashSet<String> {
    WORD.find_iter(s)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Overlap of two word sets, scaled by the smaller set so that a short
/// tag fully contained in a long folder name still scores 1.0.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let overlap = set_a.intersection(&set_b).count();
    overlap as f64 / set_a.len().min(set_b.len()) as f64
}

/// A file mismatches when neither its artist nor its album/track title
/// resembles the folder's author/title. Untagged fields score 0 but an
/// entirely tagless sample is skipped by the caller.
fn sample_mismatches(sample: &TagSample, author: &str, title: &str, threshold: f64) -> bool {
    let author_score = sample
        .artist
        .as_deref()
        .map(|a| word_overlap(a, author))
        .unwrap_or(0.0);

    let title_score = [sample.album.as_deref(), sample.track_title.as_deref()]
        .iter()
        .flatten()
        .map(|t| word_overlap(t, title))
        .fold(0.0_f64, f64::max);

    author_score < threshold && title_score < threshold
}

/// Pure decision over already-read samples; tagless samples are excluded
/// from the ratio. Flagged when at least half of the usable samples
/// mismatch.
pub fn evaluate(samples: &[TagSample], author: &str, title: &str, threshold: f64) -> Verification {
    let clean_title = strip_format_junk(title);
    let clean_author = strip_format_junk(author);

    let usable: Vec<&TagSample> = samples.iter().filter(|s| !s.is_empty()).collect();
    if usable.is_empty() {
        return Verification {
            sampled: 0,
            mismatched: 0,
            flagged: false,
        };
    }

    let mismatched = usable
        .iter()
        .filter(|s| sample_mismatches(s, &clean_author, &clean_title, threshold))
        .count();

    Verification {
        sampled: usable.len(),
        mismatched,
        flagged: mismatched * 2 >= usable.len(),
    }
}

/// Sample up to `sample_size` audio files under `folder` (sorted for
/// determinism) and evaluate their tags against the folder's author/title.
pub fn verify_folder(
    folder: &Path,
    author: &str,
    title: &str,
    sample_size: usize,
    threshold: f64,
) -> Verification {
    let mut audio_files: Vec<_> = WalkDir::new(folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    audio_files.sort();

    let samples: Vec<TagSample> = audio_files
        .iter()
        .take(sample_size)
        .map(|p| read_tag_sample(p))
        .collect();

    evaluate(&samples, author, title, threshold)
}
