//! Candidate selection and confirmation over one committed generation.
//!
//! The trigram expression narrows the search to candidate files; the full
//! regex is then re-run over each candidate's raw bytes to confirm matches
//! and annotate them with line numbers and context.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::prefilter::TrigramExpr;
use crate::store::reader::IndexReader;
use crate::store::FileId;

/// One confirmed match, line-annotated. `start`/`end` are byte offsets into
/// the file; `line_number` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineMatch {
    pub line_number: u32,
    pub start: u32,
    pub end: u32,
    pub line: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOpts {
    /// Lines of context captured before and after each matching line.
    pub context_lines: usize,
    /// Stop scanning a file after this many matches; 0 means unbounded.
    pub max_matches_per_file: usize,
}

/// Result of confirming one candidate file.
#[derive(Debug, Clone)]
pub struct FileScan {
    pub matches: Vec<LineMatch>,
    /// More matches existed past the per-file cap.
    pub truncated: bool,
}

pub struct IndexSearcher<'r> {
    reader: &'r IndexReader,
}

impl<'r> IndexSearcher<'r> {
    pub fn new(reader: &'r IndexReader) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &'r IndexReader {
        self.reader
    }

    /// Evaluate the trigram expression and optional path filter into a
    /// candidate set, ordered by path ascending so downstream visiting and
    /// truncation are deterministic.
    pub fn candidates(
        &self,
        expr: &TrigramExpr,
        path_filter: Option<&regex::Regex>,
    ) -> Vec<FileId> {
        let mut ids = match self.eval(expr) {
            Candidates::All => (0..self.reader.file_count()).collect(),
            Candidates::Ids(ids) => ids,
        };
        if let Some(re) = path_filter {
            ids.retain(|&id| {
                self.reader
                    .path(id)
                    .map(|p| re.is_match(p))
                    .unwrap_or(false)
            });
        }
        ids.sort_by(|&a, &b| self.reader.path(a).cmp(&self.reader.path(b)));
        ids
    }

    fn eval(&self, expr: &TrigramExpr) -> Candidates {
        match expr {
            TrigramExpr::All => Candidates::All,
            TrigramExpr::Lit(t) => Candidates::Ids(self.reader.lookup(*t).collect()),
            TrigramExpr::And(parts) => {
                let mut acc: Option<Vec<FileId>> = None;
                for part in parts {
                    match self.eval(part) {
                        Candidates::All => continue,
                        Candidates::Ids(ids) => {
                            acc = Some(match acc {
                                None => ids,
                                Some(prev) => intersect_sorted(&prev, &ids),
                            });
                            if acc.as_ref().map(|v| v.is_empty()).unwrap_or(false) {
                                return Candidates::Ids(Vec::new());
                            }
                        }
                    }
                }
                match acc {
                    None => Candidates::All,
                    Some(ids) => Candidates::Ids(ids),
                }
            }
            TrigramExpr::Or(parts) => {
                let mut acc: Vec<FileId> = Vec::new();
                for part in parts {
                    match self.eval(part) {
                        Candidates::All => return Candidates::All,
                        Candidates::Ids(ids) => acc = union_sorted(&acc, &ids),
                    }
                }
                Candidates::Ids(acc)
            }
        }
    }

    /// Run the full regex over one candidate's bytes and annotate each match
    /// with its line and surrounding context.
    pub fn confirm(
        &self,
        id: FileId,
        re: &regex::bytes::Regex,
        opts: &ScanOpts,
    ) -> Result<FileScan> {
        let bytes = self.reader.read_file(id)?;
        let starts = self.reader.line_offsets(id)?;
        let mut matches = Vec::new();
        let mut truncated = false;
        for m in re.find_iter(bytes) {
            if opts.max_matches_per_file != 0 && matches.len() == opts.max_matches_per_file {
                truncated = true;
                break;
            }
            let line_idx = line_for_offset(&starts, m.start() as u32);
            let (lb, le) = line_bounds(&starts, line_idx, bytes.len());
            let mut before = Vec::with_capacity(opts.context_lines);
            for i in line_idx.saturating_sub(opts.context_lines)..line_idx {
                let (b, e) = line_bounds(&starts, i, bytes.len());
                before.push(line_text(&bytes[b..e]));
            }
            let mut after = Vec::with_capacity(opts.context_lines);
            for i in line_idx + 1..(line_idx + 1 + opts.context_lines).min(starts.len()) {
                let (b, e) = line_bounds(&starts, i, bytes.len());
                after.push(line_text(&bytes[b..e]));
            }
            matches.push(LineMatch {
                line_number: (line_idx + 1) as u32,
                start: m.start() as u32,
                end: m.end() as u32,
                line: line_text(&bytes[lb..le]),
                before,
                after,
            });
        }
        Ok(FileScan { matches, truncated })
    }
}

enum Candidates {
    All,
    Ids(Vec<FileId>),
}

fn line_text(bytes: &[u8]) -> String {
    let trimmed = match bytes.last() {
        Some(b'\n') => &bytes[..bytes.len() - 1],
        _ => bytes,
    };
    let trimmed = match trimmed.last() {
        Some(b'\r') => &trimmed[..trimmed.len() - 1],
        _ => trimmed,
    };
    String::from_utf8_lossy(trimmed).into_owned()
}

/// Index of the line containing byte offset `pos`.
fn line_for_offset(starts: &[u32], pos: u32) -> usize {
    let mut lo = 0usize;
    let mut hi = starts.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if starts[mid] <= pos {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo.saturating_sub(1)
}

fn line_bounds(starts: &[u32], line_idx: usize, file_len: usize) -> (usize, usize) {
    if starts.is_empty() {
        return (0, 0);
    }
    let beg = starts[line_idx] as usize;
    let end = if line_idx + 1 < starts.len() {
        starts[line_idx + 1] as usize
    } else {
        file_len
    };
    (beg, end)
}

pub(crate) fn intersect_sorted(a: &[FileId], b: &[FileId]) -> Vec<FileId> {
    let mut i = 0;
    let mut j = 0;
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(a[i]);
            i += 1;
            j += 1;
        } else if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

pub(crate) fn union_sorted(a: &[FileId], b: &[FileId]) -> Vec<FileId> {
    let mut i = 0;
    let mut j = 0;
    let mut out = Vec::with_capacity(a.len() + b.len());
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(a[i]);
            i += 1;
            j += 1;
        } else if a[i] < b[j] {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}
