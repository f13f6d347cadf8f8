use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::IndexOptions;

/// A file accepted by the path-level filters, in deterministic walk order.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    /// Repo-relative path, UTF-8, forward slashes as produced by the walk.
    pub rel: String,
    pub abs: PathBuf,
    pub size: u64,
    /// Modification time, epoch seconds. Informational.
    pub mtime: u64,
}

/// A file rejected during the walk or ingest, recorded alongside the
/// generation so the UI can explain why a path is not searchable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExcludedFile {
    pub path: String,
    pub reason: String,
}

/// Everything the walk decided: accepted files in deterministic order plus
/// the path-level exclusions.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub accepted: Vec<WalkedFile>,
    pub excluded: Vec<ExcludedFile>,
}

/// Convert an `auto-generated-files` glob (`*` and `?` wildcards only,
/// case-sensitive) into an anchored regex.
pub(crate) fn glob_to_regex(pat: &str) -> String {
    let mut out = String::with_capacity(pat.len() + 8);
    out.push('^');
    for ch in pat.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('$');
    out
}

fn compile_globs(patterns: &[String]) -> Vec<Regex> {
    let mut out = Vec::with_capacity(patterns.len());
    for pat in patterns {
        match Regex::new(&glob_to_regex(pat)) {
            Ok(re) => out.push(re),
            Err(e) => warn!(pattern = %pat, error = %e, "skipping unusable exclude glob"),
        }
    }
    out
}

fn is_vcs_dir(name: &std::ffi::OsStr) -> bool {
    name == ".git" || name == ".hg" || name == ".svn"
}

/// Walk `root` yielding accepted files in sorted per-directory order.
/// Oversized files and entries failing path filters are skipped with a log
/// and recorded as exclusions; content-level acceptance (binary detection)
/// happens at ingest time.
pub fn walk(root: &Path, opts: &IndexOptions) -> WalkOutcome {
    let globs = compile_globs(&opts.auto_generated_files);
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .hidden(opts.exclude_dot_files)
        .follow_links(false)
        .sort_by_file_path(|a, b| a.cmp(b))
        .filter_entry(|e| e.depth() == 0 || !is_vcs_dir(e.file_name()));

    let mut out = WalkOutcome::default();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "walk error; skipping entry");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let rel_path = pathdiff::diff_paths(entry.path(), root)
            .unwrap_or_else(|| PathBuf::from(entry.file_name()));
        let rel = match rel_path.to_str() {
            Some(s) => s.to_string(),
            None => {
                warn!(path = %rel_path.display(), "skipping non-UTF-8 path");
                out.excluded.push(ExcludedFile {
                    path: rel_path.to_string_lossy().into_owned(),
                    reason: "path is not valid UTF-8".to_string(),
                });
                continue;
            }
        };
        let base = entry.file_name().to_string_lossy();
        if globs
            .iter()
            .any(|re| re.is_match(&rel) || re.is_match(&base))
        {
            debug!(path = %rel, "skipping auto-generated file");
            out.excluded.push(ExcludedFile {
                path: rel,
                reason: "matches auto-generated-files".to_string(),
            });
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %rel, error = %e, "stat failed; skipping");
                out.excluded.push(ExcludedFile {
                    path: rel,
                    reason: "unreadable metadata".to_string(),
                });
                continue;
            }
        };
        if meta.len() > opts.max_file_size {
            debug!(path = %rel, size = meta.len(), "skipping oversized file");
            out.excluded.push(ExcludedFile {
                path: rel,
                reason: "exceeds max file size".to_string(),
            });
            continue;
        }
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        out.accepted.push(WalkedFile {
            rel,
            abs: entry.path().to_path_buf(),
            size: meta.len(),
            mtime,
        });
    }
    out
}
