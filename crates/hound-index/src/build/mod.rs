//! One index build: walk a working copy, filter, stream accepted files into
//! an `IndexWriter` under a fresh staging directory, and open the committed
//! generation.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::reader::IndexReader;
use crate::store::writer::IndexWriter;

pub mod walker;

pub use walker::{walk, ExcludedFile, WalkOutcome, WalkedFile};

const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub max_file_size: u64,
    pub exclude_dot_files: bool,
    pub auto_generated_files: Vec<String>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            exclude_dot_files: false,
            auto_generated_files: Vec::new(),
        }
    }
}

/// Build one generation from `working_copy` into a staging directory
/// `<repo_dir>/idx-<revision>-<nonce>/` and open it.
///
/// Per-file failures (unreadable, oversized, binary) are skipped with a log.
/// `cancel` is honored between file ingests; a canceled build removes its
/// staging directory and returns `Error::Canceled`.
pub fn build_index(
    working_copy: &Path,
    revision: &str,
    repo_dir: &Path,
    generation: u32,
    opts: &IndexOptions,
    cancel: &AtomicBool,
) -> Result<IndexReader> {
    if !working_copy.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("working copy {} does not exist", working_copy.display()),
        )));
    }
    std::fs::create_dir_all(repo_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(&format!("idx-{}-", revision))
        .tempdir_in(repo_dir)?;

    let mut outcome = walk(working_copy, opts);
    let mut writer = IndexWriter::begin(staging.path(), generation, opts.max_file_size)?;
    for f in &outcome.accepted {
        if cancel.load(Ordering::Relaxed) {
            // TempDir drop removes the partial staging directory.
            return Err(Error::Canceled);
        }
        let bytes = match std::fs::read(&f.abs) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %f.rel, error = %e, "unreadable file; skipping");
                outcome.excluded.push(ExcludedFile {
                    path: f.rel.clone(),
                    reason: "unreadable".to_string(),
                });
                continue;
            }
        };
        match writer.add_file(&f.rel, &bytes, f.mtime) {
            Ok(_) => {}
            Err(e) if e.is_rejection() => {
                debug!(path = %f.rel, reason = %e, "file rejected; skipping");
                outcome.excluded.push(ExcludedFile {
                    path: f.rel.clone(),
                    reason: match e {
                        Error::TooLarge { .. } => "exceeds max file size".to_string(),
                        _ => "binary content".to_string(),
                    },
                });
            }
            Err(e) => return Err(e),
        }
    }
    if cancel.load(Ordering::Relaxed) {
        return Err(Error::Canceled);
    }
    // The exclusion record is informational and lands before the manifest
    // commit record.
    let excluded_json = serde_json::to_vec_pretty(&outcome.excluded)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    std::fs::write(
        staging.path().join(crate::store::EXCLUDED_FILE),
        excluded_json,
    )?;
    let file_count = writer.file_count();
    writer.finish()?;
    let dir = staging.keep();
    info!(
        revision = %revision,
        generation,
        files = file_count,
        skipped = outcome.excluded.len(),
        dir = %dir.display(),
        "committed index generation"
    );
    IndexReader::open(&dir)
}

/// Parse the source revision back out of a committed generation directory
/// name (`idx-<revision>-<nonce>`).
pub fn revision_from_dir_name(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("idx-")?;
    let (rev, _nonce) = rest.rsplit_once('-')?;
    if rev.is_empty() {
        None
    } else {
        Some(rev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_parse() {
        assert_eq!(
            revision_from_dir_name("idx-abc123-Xyz9"),
            Some("abc123")
        );
        assert_eq!(revision_from_dir_name("idx--Xyz9"), None);
        assert_eq!(revision_from_dir_name("work"), None);
        assert_eq!(revision_from_dir_name("idx-abc123"), None);
    }

    #[test]
    fn default_options() {
        let opts = IndexOptions::default();
        assert_eq!(opts.max_file_size, 2 * 1024 * 1024);
        assert!(!opts.exclude_dot_files);
    }
}
